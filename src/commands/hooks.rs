//! Hook registration verbs: SETHOOK/DELHOOK/HOOKS and the channel forms
//! SETCHAN/DELCHAN/CHANS.

use crate::commands::{WriteOutcome, search};
use crate::error::{Error, Result};
use crate::geofence::{FenceKind, Hook};
use crate::glob::Glob;
use crate::resp::Value;
use crate::server::Db;

fn arity(verb: &str) -> Error {
    Error::ArgCount(verb.to_lowercase())
}

/// SETHOOK name endpoint query… / SETCHAN name query…
pub fn cmd_sethook(db: &mut Db, args: &[String], with_endpoint: bool) -> Result<WriteOutcome> {
    let verb = if with_endpoint { "sethook" } else { "setchan" };
    let query_start = if with_endpoint { 3 } else { 2 };
    if args.len() < query_start + 3 {
        return Err(arity(verb));
    }
    let name = args[1].clone();
    let endpoint = with_endpoint.then(|| args[2].clone());

    let kind = match args[query_start].to_uppercase().as_str() {
        "WITHIN" => FenceKind::Within,
        "INTERSECTS" => FenceKind::Intersects,
        "NEARBY" => FenceKind::Nearby,
        other => return Err(Error::InvalidArgument(other.to_string())),
    };
    let key = args[query_start + 1].clone();

    // reshape to the search-verb layout the shared parser expects:
    // [VERB, key, options…, target…]
    let qargs: Vec<String> = args[query_start..].to_vec();
    let query = search::parse_fence_tail(db, kind, &qargs)?;

    let mut command: Vec<String> = args.to_vec();
    command[0] = command[0].to_uppercase();

    if let Some(existing) = db.hooks.get(&name)
        && existing.command == command
    {
        return Ok(WriteOutcome::reply_only(Value::Int(0)));
    }
    let hook = Hook::new(name.clone(), key.into(), endpoint, query, command.clone());
    db.hooks.insert(name, hook);
    metrics::counter!("hooks_registered_total").increment(1);

    Ok(WriteOutcome {
        reply: Value::Int(1),
        aof: Some(vec![command]),
        events: Vec::new(),
    })
}

pub fn cmd_delhook(db: &mut Db, args: &[String], with_endpoint: bool) -> Result<WriteOutcome> {
    let verb = if with_endpoint { "delhook" } else { "delchan" };
    if args.len() != 2 {
        return Err(arity(verb));
    }
    let matches_kind = db
        .hooks
        .get(&args[1])
        .map(|h| h.is_channel() != with_endpoint)
        .unwrap_or(false);
    if !matches_kind {
        return Ok(WriteOutcome::reply_only(Value::Int(0)));
    }
    db.hooks.remove(&args[1]);
    let mut record = args.to_vec();
    record[0] = record[0].to_uppercase();
    Ok(WriteOutcome {
        reply: Value::Int(1),
        aof: Some(vec![record]),
        events: Vec::new(),
    })
}

/// HOOKS pattern / CHANS pattern: list registrations by name glob.
/// Connection-scoped live fences have no durable command and are skipped.
pub fn cmd_hooks(db: &Db, args: &[String], with_endpoint: bool) -> Result<Value> {
    let verb = if with_endpoint { "hooks" } else { "chans" };
    if args.len() != 2 {
        return Err(arity(verb));
    }
    let glob = Glob::new(&args[1])?;
    let mut out = Vec::new();
    for hook in db.hooks.values() {
        if hook.is_channel() == with_endpoint || hook.command.is_empty() {
            continue;
        }
        if !glob.matches(&hook.name) {
            continue;
        }
        let mut entry = vec![
            Value::Bulk(hook.name.clone()),
            Value::Bulk(hook.key.to_string()),
        ];
        if let Some(endpoint) = &hook.endpoint {
            entry.push(Value::Bulk(endpoint.clone()));
        }
        entry.push(Value::Array(
            hook.command.iter().map(|a| Value::Bulk(a.clone())).collect(),
        ));
        out.push(Value::Array(entry));
    }
    Ok(Value::Array(out))
}
