//! Leader-following replication.
//!
//! A follower dials its leader, verifies the shared log prefix with MD5
//! range digests (truncating its own log back to the last agreeing byte on
//! divergence), then streams the leader's log from the verified position.
//! Every received command runs through the normal dispatch path, which
//! appends to the follower's own log, so a follower can itself be followed.
//! The generation counter kills loops stranded by reconfiguration.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::resp::{self, Value};
use crate::server::{CommandCtx, Server};

const RETRY: Duration = Duration::from_secs(1);
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Digest chunk size for the handshake.
const VERIFY_CHUNK: u64 = 1 << 20;

pub async fn run(server: Arc<Server>, generation: u64) {
    loop {
        if server.follow_generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let (host, port) = {
            let config = server.config.read();
            (config.follow_host.clone(), config.follow_port)
        };
        if host.is_empty() {
            return;
        }
        match follow_once(&server, generation, &host, port).await {
            Ok(()) => {}
            Err(Error::NoLongerFollowing) => return,
            Err(err) => {
                warn!(leader = %format!("{host}:{port}"), error = %err, "follow failed, retrying");
            }
        }
        tokio::time::sleep(RETRY).await;
    }
}

struct LeaderConn {
    stream: TcpStream,
    buf: BytesMut,
}

impl LeaderConn {
    async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::Other("dial timeout".to_string()))??;
        Ok(Self {
            stream,
            buf: BytesMut::new(),
        })
    }

    async fn request(&mut self, args: &[&str]) -> Result<Value> {
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.stream.write_all(&resp::encode_command(&owned)).await?;
        self.read_value().await
    }

    async fn read_value(&mut self) -> Result<Value> {
        loop {
            if let Some((value, used)) = resp::parse_value(&self.buf)? {
                self.buf.advance(used);
                return Ok(value);
            }
            let mut chunk = [0u8; 16 * 1024];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::Other("connection reset by leader".to_string()));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Next streamed command, or None on a quiet-period timeout. The
    /// stream carries log records verbatim, so the same lenient framing
    /// used by replay applies.
    async fn read_command(&mut self) -> Result<Option<Vec<String>>> {
        loop {
            match resp::parse_command(&self.buf, true)? {
                Some((args, used)) => {
                    self.buf.advance(used);
                    if args.is_empty() {
                        continue;
                    }
                    return Ok(Some(args));
                }
                None => {}
            }
            let mut chunk = [0u8; 16 * 1024];
            let read = tokio::time::timeout(RETRY, self.stream.read(&mut chunk)).await;
            match read {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => return Err(Error::Other("connection reset by leader".to_string())),
                Ok(Ok(n)) => self.buf.extend_from_slice(&chunk[..n]),
                Ok(Err(err)) => return Err(err.into()),
            }
        }
    }
}

async fn follow_once(server: &Arc<Server>, generation: u64, host: &str, port: u16) -> Result<()> {
    let mut conn = LeaderConn::connect(host, port).await?;

    let leaderauth = server.config.read().leaderauth.clone();
    if !leaderauth.is_empty() {
        match conn.request(&["AUTH", &leaderauth]).await? {
            Value::Simple(_) => {}
            other => return Err(Error::Other(format!("leader AUTH refused: {other:?}"))),
        }
    }

    let doc = match conn.request(&["SERVER"]).await? {
        Value::Bulk(body) => serde_json::from_str::<serde_json::Value>(&body)
            .map_err(|_| Error::Other("malformed SERVER reply".to_string()))?,
        Value::Error(msg) => return Err(Error::Other(msg)),
        other => return Err(Error::Other(format!("unexpected SERVER reply: {other:?}"))),
    };
    let leader_id = doc["id"].as_str().unwrap_or_default().to_string();
    let leader_size = doc["aof_size"].as_u64().unwrap_or(0);
    if leader_id == server.config.read().server_id {
        return Err(Error::Other("cannot follow self".to_string()));
    }
    if !doc["following"].as_str().unwrap_or_default().is_empty() {
        return Err(Error::Other("cannot follow a follower".to_string()));
    }

    let pos = verify_shared_prefix(server, &mut conn, leader_size).await?;
    if server.aof_size.load(Ordering::SeqCst) >= leader_size {
        server.caught_up.store(true, Ordering::SeqCst);
    }

    match conn.request(&["AOF", &pos.to_string()]).await? {
        Value::Simple(_) => {}
        Value::Error(msg) => return Err(Error::Other(msg)),
        other => return Err(Error::Other(format!("unexpected AOF reply: {other:?}"))),
    }
    info!(leader = %format!("{host}:{port}"), pos, "streaming from leader");

    loop {
        if server.follow_generation.load(Ordering::SeqCst) != generation {
            return Err(Error::NoLongerFollowing);
        }
        let Some(args) = conn.read_command().await? else {
            continue;
        };
        let mut ctx = CommandCtx::internal();
        match server.try_execute(args, &mut ctx) {
            Ok(_) => {}
            Err(err) if err.harmless_in_replay() => {}
            Err(err) => {
                warn!(error = %err, "failed to apply replicated command");
            }
        }
        if !server.caught_up.load(Ordering::SeqCst)
            && server.aof_size.load(Ordering::SeqCst) >= leader_size
        {
            server.caught_up.store(true, Ordering::SeqCst);
            info!("caught up to leader");
        }
    }
}

/// Compare increasing MD5 chunks of the local log against the leader's.
/// On the first disagreement, truncate the local log to the last agreeing
/// byte and rebuild in-memory state from the shorter log. Returns the
/// position streaming should start from.
async fn verify_shared_prefix(
    server: &Arc<Server>,
    conn: &mut LeaderConn,
    leader_size: u64,
) -> Result<u64> {
    let local_size = server.aof_size.load(Ordering::SeqCst);
    let shared = local_size.min(leader_size);
    let mut pos = 0u64;
    let mut diverged_at: Option<u64> = None;

    while pos < shared {
        let chunk = VERIFY_CHUNK.min(shared - pos);
        let local = server.aof.lock().md5_range(pos, chunk)?;
        let remote = conn
            .request(&["AOFMD5", &pos.to_string(), &chunk.to_string()])
            .await?;
        match remote {
            Value::Bulk(digest) if digest == local => pos += chunk,
            _ => {
                diverged_at = Some(pos);
                break;
            }
        }
    }
    if diverged_at.is_none() && local_size > leader_size {
        // our log ran ahead of a leader that was reset or shrunk
        diverged_at = Some(leader_size);
    }

    if let Some(cut) = diverged_at {
        warn!(cut, local_size, "log diverged from leader, truncating");
        server.aof.lock().truncate(cut)?;
        server.aof_size.store(cut, Ordering::SeqCst);
        server.reset_and_replay()?;
        return Ok(cut);
    }
    Ok(pos)
}
