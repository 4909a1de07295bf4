//! Background TTL eviction.
//!
//! Probabilistic sampling in the Redis style: a 10 Hz tick samples up to 20
//! random slots of the flat expiration list, swap-pops the ones whose
//! deadline has passed, then re-checks each against the authoritative map
//! under the write lock before deleting through the normal mutation path
//! (so purges are logged and fence-evaluated like any other delete). A
//! busy tick (more than 5 purges) runs again immediately.
//!
//! Followers never purge on their own: the leader's deletes arrive through
//! the replication stream, and readers skip expired ids regardless.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error};

use crate::commands;
use crate::server::{CommandCtx, ExpireEntry, Server, now_nanos};

const TICK: Duration = Duration::from_millis(100);
const SAMPLE: usize = 20;
const BURST_THRESHOLD: usize = 5;

pub async fn run(server: Arc<Server>) {
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if server.config.read().following() {
            continue;
        }
        loop {
            let purged = sweep(&server);
            if purged <= BURST_THRESHOLD {
                break;
            }
            // churn burst: keep purging without waiting for the next tick
        }
    }
}

/// One sampling pass. Returns how many ids were actually purged.
pub fn sweep(server: &Arc<Server>) -> usize {
    let now = now_nanos();

    let batch: Vec<ExpireEntry> = {
        let mut list = server.expires_list.lock();
        if list.is_empty() {
            return 0;
        }
        let mut rng = rand::rng();
        let mut batch = Vec::new();
        for _ in 0..SAMPLE {
            if list.is_empty() {
                break;
            }
            let idx = rng.random_range(0..list.len());
            if list[idx].at <= now {
                batch.push(list.swap_remove(idx));
            }
        }
        batch
    };
    if batch.is_empty() {
        return 0;
    }

    let mut purged = 0;
    let mut db = server.db.write();
    for entry in batch {
        // the map is authoritative; PERSIST or a refreshing SET leaves
        // stale list entries behind which are dropped here
        match db.expires.get(&(entry.key.clone(), entry.id.clone())) {
            Some(at) if *at <= now => {}
            _ => continue,
        }
        let mut ctx = CommandCtx::internal();
        match commands::purge_expired(&mut db, &entry.key, &entry.id, &mut ctx) {
            Ok(Some(outcome)) => {
                if let Err(err) = server.commit_outcome(&outcome) {
                    error!(error = %err, "failed to log expiration delete");
                }
                purged += 1;
            }
            Ok(None) => {}
            Err(err) => error!(error = %err, "expiration purge failed"),
        }
    }
    if purged > 0 {
        debug!(purged, "expired ids purged");
        metrics::counter!("objects_expired_total").increment(purged as u64);
    }
    purged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::Value;

    fn exec(server: &Arc<Server>, tokens: &[&str]) -> Value {
        let args: Vec<String> = tokens.iter().map(|s| s.to_string()).collect();
        server.execute(args, &mut CommandCtx::default())
    }

    #[test]
    fn sweep_purges_expired_ids() {
        let dir = tempfile::tempdir().unwrap();
        let server = Server::open(dir.path()).unwrap();
        exec(&server, &["SET", "k", "stays", "STRING", "a"]);
        exec(&server, &["SET", "k", "goes", "STRING", "b"]);
        assert_eq!(exec(&server, &["EXPIRE", "k", "goes", "0.001"]), Value::Int(1));
        std::thread::sleep(Duration::from_millis(10));

        // several passes: sampling is random but the list is tiny
        for _ in 0..50 {
            sweep(&server);
        }
        assert_eq!(exec(&server, &["EXISTS", "k", "goes"]), Value::Int(0));
        assert_eq!(exec(&server, &["EXISTS", "k", "stays"]), Value::Int(1));

        // the purge went through the logged delete path
        let db = server.db.read();
        assert!(db.col("k").unwrap().get("goes").is_none());
    }

    #[test]
    fn persist_makes_list_entry_stale() {
        let dir = tempfile::tempdir().unwrap();
        let server = Server::open(dir.path()).unwrap();
        exec(&server, &["SET", "k", "id1", "STRING", "a"]);
        exec(&server, &["EXPIRE", "k", "id1", "0.001"]);
        assert_eq!(exec(&server, &["PERSIST", "k", "id1"]), Value::Int(1));
        std::thread::sleep(Duration::from_millis(10));

        for _ in 0..50 {
            sweep(&server);
        }
        // still alive: the authoritative map was cleared by PERSIST
        assert_eq!(exec(&server, &["EXISTS", "k", "id1"]), Value::Int(1));
        assert_eq!(exec(&server, &["TTL", "k", "id1"]), Value::Int(-1));
    }
}
