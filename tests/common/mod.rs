//! Common test utilities.
//!
//! `TestServer` stands up an isolated server on a temporary data directory
//! so tests can run in parallel without interference. The directory lives
//! as long as the struct, which makes restart-and-replay tests a matter of
//! calling `reopen()`.
#![allow(dead_code)]

use std::sync::Arc;

use fleetmap::resp::Value;
use fleetmap::server::{CommandCtx, Server};

pub struct TestServer {
    pub server: Arc<Server>,
    dir: tempfile::TempDir,
}

impl TestServer {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let server = Server::open(dir.path()).expect("failed to open server");
        Self { server, dir }
    }

    pub fn exec(&self, tokens: &[&str]) -> Value {
        exec_on(&self.server, tokens)
    }

    /// Simulate a restart: drop the running server and replay the log.
    pub fn reopen(self) -> Self {
        let TestServer { server, dir } = self;
        drop(server);
        let server = Server::open(dir.path()).expect("failed to reopen server");
        Self { server, dir }
    }
}

pub fn exec_on(server: &Arc<Server>, tokens: &[&str]) -> Value {
    let args: Vec<String> = tokens.iter().map(|s| s.to_string()).collect();
    server.execute(args, &mut CommandCtx::default())
}

/// Unwrap a `[cursor, items]` reply into its items.
pub fn reply_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(parts) if parts.len() == 2 => match &parts[1] {
            Value::Array(items) => items.clone(),
            other => panic!("expected items array, got {other:?}"),
        },
        other => panic!("expected [cursor, items], got {other:?}"),
    }
}

/// Ids from a reply whose items are bare ids or `[id, ...]` arrays.
pub fn reply_ids(value: &Value) -> Vec<String> {
    reply_items(value)
        .iter()
        .map(|item| match item {
            Value::Bulk(id) => id.clone(),
            Value::Array(parts) => match &parts[0] {
                Value::Bulk(id) => id.clone(),
                other => panic!("expected id, got {other:?}"),
            },
            other => panic!("unexpected item {other:?}"),
        })
        .collect()
}

pub fn bulk(value: &Value) -> String {
    match value {
        Value::Bulk(s) | Value::Simple(s) => s.clone(),
        other => panic!("expected bulk, got {other:?}"),
    }
}

pub fn error_of(value: &Value) -> String {
    match value {
        Value::Error(msg) => msg.clone(),
        other => panic!("expected error, got {other:?}"),
    }
}
