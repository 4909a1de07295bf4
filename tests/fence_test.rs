//! Geofence hooks end to end: channel fences over pub/sub, detect
//! filtering, roaming fences, and hook lifecycle.

mod common;

use std::time::Duration;

use common::{TestServer, error_of};
use fleetmap::resp::Value;

fn detect_of(payload: &str) -> (String, String) {
    let v: serde_json::Value = serde_json::from_str(payload).expect("event json");
    (
        v["detect"].as_str().unwrap_or_default().to_string(),
        v["id"].as_str().unwrap_or_default().to_string(),
    )
}

async fn recv_event(
    rx: &mut tokio::sync::broadcast::Receiver<fleetmap::pubsub::Envelope>,
) -> Option<(String, String, String)> {
    match tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
        Ok(Ok(envelope)) => {
            let (detect, id) = detect_of(&envelope.payload);
            Some((envelope.channel, detect, id))
        }
        _ => None,
    }
}

#[tokio::test]
async fn channel_fence_emits_transitions() {
    let ts = TestServer::new();
    assert_eq!(
        ts.exec(&[
            "SETCHAN", "warehouse", "WITHIN", "fleet", "BOUNDS", "0", "0", "10", "10",
        ]),
        Value::Int(1)
    );
    let mut rx = ts.server.pubsub.subscribe();

    // enter
    ts.exec(&["SET", "fleet", "truck1", "POINT", "5", "5"]);
    let (chan, detect, id) = recv_event(&mut rx).await.expect("enter event");
    assert_eq!((chan.as_str(), detect.as_str(), id.as_str()), ("warehouse", "enter", "truck1"));
    let (_, detect, _) = recv_event(&mut rx).await.expect("inside event");
    assert_eq!(detect, "inside");

    // dwell
    ts.exec(&["SET", "fleet", "truck1", "POINT", "6", "6"]);
    let (_, detect, _) = recv_event(&mut rx).await.expect("dwell event");
    assert_eq!(detect, "inside");

    // exit
    ts.exec(&["SET", "fleet", "truck1", "POINT", "50", "50"]);
    let (_, detect, _) = recv_event(&mut rx).await.expect("exit event");
    assert_eq!(detect, "exit");
    let (_, detect, _) = recv_event(&mut rx).await.expect("outside event");
    assert_eq!(detect, "outside");

    // mutations on other keys never trigger this hook
    ts.exec(&["SET", "otherkey", "x", "POINT", "5", "5"]);
    assert!(recv_event(&mut rx).await.is_none());
}

#[tokio::test]
async fn detect_and_match_filters() {
    let ts = TestServer::new();
    ts.exec(&[
        "SETCHAN", "gate", "WITHIN", "fleet", "DETECT", "enter,exit", "MATCH", "truck*",
        "BOUNDS", "0", "0", "10", "10",
    ]);
    let mut rx = ts.server.pubsub.subscribe();

    ts.exec(&["SET", "fleet", "car7", "POINT", "5", "5"]);
    assert!(recv_event(&mut rx).await.is_none(), "id filter must gate events");

    ts.exec(&["SET", "fleet", "truck1", "POINT", "5", "5"]);
    let (_, detect, _) = recv_event(&mut rx).await.expect("enter");
    assert_eq!(detect, "enter");
    // inside suppressed by the DETECT set
    ts.exec(&["SET", "fleet", "truck1", "POINT", "6", "6"]);
    assert!(recv_event(&mut rx).await.is_none());

    ts.exec(&["SET", "fleet", "truck1", "POINT", "60", "6"]);
    let (_, detect, _) = recv_event(&mut rx).await.expect("exit");
    assert_eq!(detect, "exit");
}

#[tokio::test]
async fn del_triggers_exit_and_prunes_state() {
    let ts = TestServer::new();
    ts.exec(&[
        "SETCHAN", "zone", "WITHIN", "fleet", "BOUNDS", "0", "0", "10", "10",
    ]);
    let mut rx = ts.server.pubsub.subscribe();

    ts.exec(&["SET", "fleet", "truck1", "POINT", "5", "5"]);
    recv_event(&mut rx).await.expect("enter");
    recv_event(&mut rx).await.expect("inside");

    ts.exec(&["DEL", "fleet", "truck1"]);
    let (_, detect, _) = recv_event(&mut rx).await.expect("exit on delete");
    assert_eq!(detect, "exit");
}

#[tokio::test]
async fn nearby_fence_uses_radius() {
    let ts = TestServer::new();
    ts.exec(&[
        "SETCHAN", "prox", "NEARBY", "fleet", "POINT", "33", "-115", "1000",
    ]);
    let mut rx = ts.server.pubsub.subscribe();

    ts.exec(&["SET", "fleet", "close", "POINT", "33.001", "-115"]);
    let (_, detect, id) = recv_event(&mut rx).await.expect("enter");
    assert_eq!((detect.as_str(), id.as_str()), ("enter", "close"));
    recv_event(&mut rx).await.expect("inside");

    // ~5.5 km away, outside the 1 km radius: no event for a fresh id
    ts.exec(&["SET", "fleet", "distant", "POINT", "33.05", "-115"]);
    assert!(recv_event(&mut rx).await.is_none());
}

#[tokio::test]
async fn roam_fence_reports_neighbors() {
    let ts = TestServer::new();
    ts.exec(&["SET", "others", "n1", "POINT", "33", "-115"]);
    ts.exec(&[
        "SETCHAN", "convoy", "NEARBY", "fleet", "ROAM", "others", "*", "5000",
    ]);
    let mut rx = ts.server.pubsub.subscribe();

    ts.exec(&["SET", "fleet", "truck1", "POINT", "33.001", "-115"]);
    let (_, detect, id) = recv_event(&mut rx).await.expect("roam nearby");
    assert_eq!((detect.as_str(), id.as_str()), ("roam", "truck1"));

    // moving far away produces the faraway counterpart
    ts.exec(&["SET", "fleet", "truck1", "POINT", "40", "-100"]);
    let (_, detect, _) = recv_event(&mut rx).await.expect("roam faraway");
    assert_eq!(detect, "roam");
}

#[tokio::test]
async fn hook_lifecycle_and_listing() {
    let ts = TestServer::new();
    assert_eq!(
        ts.exec(&[
            "SETCHAN", "alpha", "WITHIN", "fleet", "BOUNDS", "0", "0", "1", "1",
        ]),
        Value::Int(1)
    );
    // identical re-registration reports 0
    assert_eq!(
        ts.exec(&[
            "SETCHAN", "alpha", "WITHIN", "fleet", "BOUNDS", "0", "0", "1", "1",
        ]),
        Value::Int(0)
    );
    assert_eq!(
        ts.exec(&[
            "SETHOOK", "beta", "endpoint://queue", "WITHIN", "fleet", "BOUNDS", "0", "0",
            "1", "1",
        ]),
        Value::Int(1)
    );

    let chans = ts.exec(&["CHANS", "*"]);
    assert_eq!(reply_items_len(&chans), 1);
    let hooks = ts.exec(&["HOOKS", "*"]);
    assert_eq!(reply_items_len(&hooks), 1);

    // wrong-kind deletion is a no-op
    assert_eq!(ts.exec(&["DELHOOK", "alpha"]), Value::Int(0));
    assert_eq!(ts.exec(&["DELCHAN", "alpha"]), Value::Int(1));
    assert_eq!(ts.exec(&["DELHOOK", "beta"]), Value::Int(1));
    assert_eq!(reply_items_len(&ts.exec(&["CHANS", "*"])), 0);

    // DROP on the observed key detaches hooks
    ts.exec(&[
        "SETCHAN", "gamma", "WITHIN", "fleet", "BOUNDS", "0", "0", "1", "1",
    ]);
    ts.exec(&["SET", "fleet", "x", "POINT", "0.5", "0.5"]);
    ts.exec(&["DROP", "fleet"]);
    assert_eq!(reply_items_len(&ts.exec(&["CHANS", "*"])), 0);
}

fn reply_items_len(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        other => panic!("expected array, got {other:?}"),
    }
}

#[tokio::test]
async fn rename_refuses_keys_with_hooks() {
    let ts = TestServer::new();
    ts.exec(&["SET", "fleet", "x", "POINT", "1", "1"]);
    ts.exec(&[
        "SETCHAN", "watch", "WITHIN", "fleet", "BOUNDS", "0", "0", "10", "10",
    ]);
    assert_eq!(
        error_of(&ts.exec(&["RENAME", "fleet", "fleet2"])),
        "key has hooks set"
    );
}

#[tokio::test]
async fn where_filtered_fence() {
    let ts = TestServer::new();
    ts.exec(&[
        "SETCHAN", "fast", "WITHIN", "fleet", "WHERE", "speed", "60", "+inf", "BOUNDS",
        "0", "0", "10", "10",
    ]);
    let mut rx = ts.server.pubsub.subscribe();

    ts.exec(&[
        "SET", "fleet", "slow", "FIELD", "speed", "30", "POINT", "5", "5",
    ]);
    assert!(recv_event(&mut rx).await.is_none());

    ts.exec(&[
        "SET", "fleet", "quick", "FIELD", "speed", "90", "POINT", "5", "5",
    ]);
    let (_, detect, id) = recv_event(&mut rx).await.expect("filtered enter");
    assert_eq!((detect.as_str(), id.as_str()), ("enter", "quick"));
}
