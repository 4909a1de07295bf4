//! Durability and replication: restart replay, log rewrite, corruption
//! handling, and leader/follower streaming over a real socket.

mod common;

use std::time::Duration;

use common::{TestServer, bulk, error_of, exec_on, reply_ids};
use fleetmap::resp::Value;
use fleetmap::server::Server;
use fleetmap::socket_server::SocketServer;

#[test]
fn restart_replays_objects_fields_and_hooks() {
    let mut ts = TestServer::new();
    ts.exec(&["SET", "fleet", "truck1", "FIELD", "speed", "55", "POINT", "33", "-115"]);
    ts.exec(&["SET", "fleet", "truck2", "POINT", "34", "-116"]);
    ts.exec(&["SET", "notes", "n1", "STRING", "hello"]);
    ts.exec(&["DEL", "fleet", "truck2"]);
    ts.exec(&[
        "SETCHAN", "zone", "WITHIN", "fleet", "BOUNDS", "0", "0", "40", "40",
    ]);

    ts = ts.reopen();
    assert_eq!(ts.exec(&["GET", "fleet", "truck2"]), Value::Null);
    assert_eq!(ts.exec(&["GET", "notes", "n1"]), Value::Bulk("hello".into()));
    assert_eq!(
        ts.exec(&["FGET", "fleet", "truck1", "speed"]),
        Value::Bulk("55".into())
    );
    match ts.exec(&["CHANS", "*"]) {
        Value::Array(entries) => assert_eq!(entries.len(), 1),
        other => panic!("unexpected {other:?}"),
    }
    // replayed spatial state answers queries
    let found = ts.exec(&["NEARBY", "fleet", "IDS", "POINT", "33", "-115"]);
    assert_eq!(reply_ids(&found), vec!["truck1"]);
}

#[test]
fn replayed_ttls_stay_authoritative() {
    let mut ts = TestServer::new();
    ts.exec(&["SET", "k", "keeper", "STRING", "a"]);
    ts.exec(&["SET", "k", "goner", "STRING", "b"]);
    ts.exec(&["EXPIRE", "k", "goner", "0.05"]);

    ts = ts.reopen();
    // the EXPIRE record replays relative to replay time; past the
    // deadline the id is gone again
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(ts.exec(&["GET", "k", "goner"]), Value::Null);
    assert_eq!(ts.exec(&["GET", "k", "keeper"]), Value::Bulk("a".into()));
    assert_eq!(ts.exec(&["TTL", "k", "keeper"]), Value::Int(-1));
}

#[test]
fn aofshrink_compacts_and_preserves_state() {
    let mut ts = TestServer::new();
    for i in 0..20 {
        ts.exec(&["SET", "fleet", "bouncer", "POINT", &i.to_string(), "0"]);
    }
    ts.exec(&["SET", "fleet", "truck1", "FIELD", "speed", "70", "POINT", "10", "10"]);
    ts.exec(&["DEL", "fleet", "bouncer"]);

    let before = ts.server.aof_size.load(std::sync::atomic::Ordering::SeqCst);
    assert_eq!(ts.exec(&["AOFSHRINK"]), Value::ok());
    let after = ts.server.aof_size.load(std::sync::atomic::Ordering::SeqCst);
    assert!(after < before, "rewrite must shrink the log ({before} -> {after})");

    ts = ts.reopen();
    assert_eq!(ts.exec(&["GET", "fleet", "bouncer"]), Value::Null);
    assert_eq!(
        ts.exec(&["FGET", "fleet", "truck1", "speed"]),
        Value::Bulk("70".into())
    );
}

#[test]
fn aofmd5_digests_ranges() {
    let ts = TestServer::new();
    ts.exec(&["SET", "k", "i", "STRING", "hello"]);
    let size = ts.server.aof_size.load(std::sync::atomic::Ordering::SeqCst);

    let digest = bulk(&ts.exec(&["AOFMD5", "0", &size.to_string()]));
    assert_eq!(digest.len(), 32);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    // past-the-end ranges are refused
    match ts.exec(&["AOFMD5", "0", &(size + 1).to_string()]) {
        Value::Error(_) => {}
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn corrupt_log_tails_and_padding() {
    // trailing garbage without a newline is an incomplete record: tolerated
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("appendonly.aof"),
        b"SET fleet truck POINT 10 10\r\nasdfasdf".to_vec(),
    )
    .unwrap();
    let server = Server::open(dir.path()).unwrap();
    match exec_on(&server, &["GET", "fleet", "truck", "POINT"]) {
        Value::Array(_) => {}
        other => panic!("unexpected {other:?}"),
    }

    // mid-stream framing corruption is fatal
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("appendonly.aof"), b"*2\r\n$1\r\nh\r\n+OK\r\n".to_vec())
        .unwrap();
    let err = Server::open(dir.path()).unwrap_err();
    assert!(
        format!("{err:#}").contains("Protocol error: expected '$', got '+'"),
        "got: {err:#}"
    );
}

#[test]
fn replay_tolerates_missing_ids() {
    // deletes against ids a previous shrink removed replay harmlessly
    let dir = tempfile::tempdir().unwrap();
    let mut content = Vec::new();
    content.extend_from_slice(b"DEL ghosts g1\r\n");
    content.extend_from_slice(b"SET fleet truck1 STRING ok\r\n");
    std::fs::write(dir.path().join("appendonly.aof"), content).unwrap();

    let server = Server::open(dir.path()).unwrap();
    assert_eq!(
        exec_on(&server, &["GET", "fleet", "truck1"]),
        Value::Bulk("ok".into())
    );
}

async fn wait_for<F>(mut check: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn follower_catches_up_and_stays_live() {
    let leader_dir = tempfile::tempdir().unwrap();
    let leader = Server::open(leader_dir.path()).unwrap();
    let listener = SocketServer::bind("127.0.0.1", 0).await.unwrap();
    let leader_addr = listener.local_addr();
    tokio::spawn(listener.accept_loop(leader.clone()));

    for i in 1..=6 {
        exec_on(
            &leader,
            &[
                "SET",
                "mykey",
                &format!("truck{i}"),
                "POINT",
                &(10.0 + i as f64).to_string(),
                "-115",
            ],
        );
    }

    let follower_dir = tempfile::tempdir().unwrap();
    let follower = Server::open(follower_dir.path()).unwrap();
    assert_eq!(
        exec_on(
            &follower,
            &["FOLLOW", "127.0.0.1", &leader_addr.port().to_string()],
        ),
        Value::ok()
    );

    // all six objects arrive within a second
    let caught_up = wait_for(
        || {
            (1..=6).all(|i| {
                matches!(
                    exec_on(&follower, &["GET", "mykey", &format!("truck{i}")]),
                    Value::Array(_) | Value::Bulk(_)
                )
            })
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(caught_up, "follower did not catch up in time");
    assert!(follower.caught_up.load(std::sync::atomic::Ordering::SeqCst));

    // follower keeps tailing live appends
    exec_on(&leader, &["SET", "mykey", "truck7", "POINT", "20", "-115"]);
    let live = wait_for(
        || matches!(exec_on(&follower, &["GET", "mykey", "truck7"]), Value::Bulk(_)),
        Duration::from_secs(2),
    )
    .await;
    assert!(live, "follower did not receive the live append");

    // followers refuse client writes
    assert_eq!(
        error_of(&exec_on(&follower, &["SET", "mykey", "nope", "POINT", "1", "1"])),
        "read only"
    );

    // FOLLOW no one restores writability
    assert_eq!(exec_on(&follower, &["FOLLOW", "no", "one"]), Value::ok());
    assert_eq!(
        exec_on(&follower, &["SET", "mykey", "mine", "POINT", "1", "1"]),
        Value::ok()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reads_error_while_catching_up() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::open(dir.path()).unwrap();
    // nothing listens on this port; the follower loop keeps retrying
    assert_eq!(exec_on(&server, &["FOLLOW", "127.0.0.1", "1"]), Value::ok());
    assert_eq!(
        error_of(&exec_on(&server, &["GET", "k", "i"])),
        "catching up to leader"
    );
    match exec_on(&server, &["HEALTHZ"]) {
        Value::Error(msg) => assert_eq!(msg, "catching up to leader"),
        other => panic!("unexpected {other:?}"),
    }
    exec_on(&server, &["FOLLOW", "no", "one"]);
}
