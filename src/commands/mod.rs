//! Command dispatch.
//!
//! Verbs are split by lock mode: writes take the exclusive lock, produce
//! log records and fence events; reads run under the shared lock. The
//! dispatcher here is the same path used by live traffic, log replay, and
//! the follower apply loop.

mod crud;
mod hooks;
mod search;

pub use crud::purge_expired;

use std::sync::Arc;

use geo::Point;

use crate::collection::Collection;
use crate::error::{Error, Result};
use crate::fields::{self, FieldMap};
use crate::geofence::{self, Mutation};
use crate::glob::Glob;
use crate::object::ObjectValue;
use crate::resp::Value;
use crate::server::{CommandCtx, Db, Server};

/// A write's results: the wire reply, zero or more log records, and the
/// fence events the mutation produced.
pub struct WriteOutcome {
    pub reply: Value,
    pub aof: Option<Vec<Vec<String>>>,
    pub events: Vec<FenceEventOut>,
}

impl WriteOutcome {
    pub fn reply_only(reply: Value) -> Self {
        Self {
            reply,
            aof: None,
            events: Vec::new(),
        }
    }
}

pub struct FenceEventOut {
    pub channel: Option<String>,
    pub endpoint: Option<String>,
    pub payload: String,
}

const WRITE_VERBS: &[&str] = &[
    "SET", "FSET", "DEL", "PDEL", "DROP", "FLUSHDB", "RENAME", "RENAMENX", "EXPIRE", "PERSIST",
    "JSET", "JDEL", "SETHOOK", "DELHOOK", "SETCHAN", "DELCHAN", "MASSINSERT",
];

const READ_VERBS: &[&str] = &[
    "GET", "FGET", "FEXISTS", "EXISTS", "TTL", "JGET", "TYPE", "KEYS", "STATS", "BOUNDS", "SCAN",
    "SEARCH", "WITHIN", "INTERSECTS", "NEARBY", "TEST", "HOOKS", "CHANS",
];

pub fn is_write(verb: &str) -> bool {
    WRITE_VERBS.contains(&verb)
}

pub fn is_read(verb: &str) -> bool {
    READ_VERBS.contains(&verb)
}

/// FENCE turns a search verb into a registration, which mutates the hook
/// store and therefore needs the write lock.
pub fn is_fence_registration(verb: &str, args: &[String]) -> bool {
    matches!(verb, "WITHIN" | "INTERSECTS" | "NEARBY")
        && args.iter().any(|a| a.eq_ignore_ascii_case("FENCE"))
}

pub fn dispatch_write(
    server: &Arc<Server>,
    db: &mut Db,
    verb: &str,
    args: &[String],
    ctx: &mut CommandCtx,
) -> Result<WriteOutcome> {
    match verb {
        "SET" => crud::cmd_set(server, db, args, ctx),
        "FSET" => crud::cmd_fset(db, args),
        "DEL" => crud::cmd_del(db, args, ctx),
        "PDEL" => crud::cmd_pdel(db, args, ctx),
        "DROP" => crud::cmd_drop(db, args),
        "FLUSHDB" => crud::cmd_flushdb(db, args),
        "RENAME" | "RENAMENX" => crud::cmd_rename(db, args, verb == "RENAMENX"),
        "EXPIRE" => crud::cmd_expire(server, db, args),
        "PERSIST" => crud::cmd_persist(db, args),
        "JSET" => crud::cmd_jset(server, db, args, ctx),
        "JDEL" => crud::cmd_jdel(server, db, args, ctx),
        "MASSINSERT" => crud::cmd_massinsert(server, db, args, ctx),
        "SETHOOK" => hooks::cmd_sethook(db, args, true),
        "SETCHAN" => hooks::cmd_sethook(db, args, false),
        "DELHOOK" => hooks::cmd_delhook(db, args, true),
        "DELCHAN" => hooks::cmd_delhook(db, args, false),
        "WITHIN" | "INTERSECTS" | "NEARBY" => search::cmd_live_fence(db, verb, args, ctx),
        other => Err(Error::UnknownCommand(other.to_string())),
    }
}

pub fn dispatch_read(
    server: &Arc<Server>,
    db: &Db,
    verb: &str,
    args: &[String],
    ctx: &mut CommandCtx,
) -> Result<Value> {
    match verb {
        "GET" => crud::cmd_get(db, args),
        "FGET" => crud::cmd_fget(db, args),
        "FEXISTS" => crud::cmd_fexists(db, args),
        "EXISTS" => crud::cmd_exists(db, args),
        "TTL" => crud::cmd_ttl(db, args),
        "JGET" => crud::cmd_jget(db, args),
        "TYPE" => crud::cmd_type(db, args),
        "KEYS" => crud::cmd_keys(db, args),
        "STATS" => crud::cmd_stats(db, args),
        "BOUNDS" => crud::cmd_bounds(db, args),
        "SCAN" => search::cmd_scan(db, args, ctx),
        "SEARCH" => search::cmd_search(db, args, ctx),
        "WITHIN" => search::cmd_area(db, args, ctx, true),
        "INTERSECTS" => search::cmd_area(db, args, ctx, false),
        "NEARBY" => search::cmd_nearby(db, args, ctx),
        "TEST" => search::cmd_test(db, args),
        "HOOKS" => hooks::cmd_hooks(db, args, true),
        "CHANS" => hooks::cmd_hooks(db, args, false),
        other => {
            let _ = server;
            Err(Error::UnknownCommand(other.to_string()))
        }
    }
}

/// Evaluate every hook observing `key` against one mutation. Suppressed
/// entirely during log replay.
#[allow(clippy::too_many_arguments)]
pub fn fence_events(
    db: &mut Db,
    ctx: &CommandCtx,
    command: &str,
    key: &str,
    id: &Arc<str>,
    old: Option<&ObjectValue>,
    new: Option<&ObjectValue>,
    field_map: &FieldMap,
    field_values: &[f64],
) -> Vec<FenceEventOut> {
    if ctx.replaying {
        return Vec::new();
    }
    let Db {
        collections, hooks, ..
    } = db;
    if hooks.is_empty() {
        return Vec::new();
    }

    let lookup = |name: &str| -> f64 {
        field_map
            .index_of(name)
            .map(|idx| fields::get_value(field_values, idx))
            .unwrap_or(0.0)
    };
    let present: Vec<(&str, f64)> = fields::present(field_map, field_values).collect();
    let field_json = (!present.is_empty()).then(|| {
        serde_json::Value::Object(
            present
                .iter()
                .map(|(name, v)| (name.to_string(), serde_json::json!(v)))
                .collect(),
        )
    });

    let roam_lookup = |roam_key: &str, pattern: &Glob, center: Point<f64>, meters: f64| {
        neighbors_of(collections.get(roam_key), pattern, center, meters, id)
    };

    let mutation = Mutation {
        command,
        key,
        id,
        old,
        new,
        field: &lookup,
        field_json,
    };

    let mut out = Vec::new();
    for hook in hooks.values_mut() {
        if hook.key.as_ref() != key {
            continue;
        }
        for payload in geofence::match_mutation(hook, &mutation, &roam_lookup) {
            metrics::counter!("fence_events_total").increment(1);
            out.push(FenceEventOut {
                channel: hook.is_channel().then(|| hook.name.clone()),
                endpoint: hook.endpoint.clone(),
                payload,
            });
        }
    }
    out
}

fn neighbors_of(
    col: Option<&Collection>,
    pattern: &Glob,
    center: Point<f64>,
    meters: f64,
    moving_id: &Arc<str>,
) -> Vec<(Arc<str>, f64)> {
    let Some(col) = col else {
        return Vec::new();
    };
    let mut found = Vec::new();
    for (entry, envelope_dist) in col.nearby(center) {
        if envelope_dist > meters {
            break;
        }
        if entry.id == *moving_id {
            continue;
        }
        if !pattern.matches(&entry.id) {
            continue;
        }
        if let Some(obj) = col.get(&entry.id) {
            let dist = obj.value.distance_to_point(center);
            if dist <= meters {
                found.push((entry.id.clone(), dist));
            }
        }
    }
    found
}

/// The compact log: one SET per live object (fields and remaining TTL
/// included) followed by the hook registrations.
pub fn shrink_commands(db: &Db) -> Vec<Vec<String>> {
    let now = crate::server::now_nanos();
    let mut out = Vec::new();
    for (key, col) in &db.collections {
        let mut emit = |obj: &crate::object::Object| -> bool {
            let mut cmd: Vec<String> = vec!["SET".to_string(), key.to_string(), obj.id.to_string()];
            for (name, value) in fields::present(col.field_map(), &obj.fields) {
                cmd.push("FIELD".to_string());
                cmd.push(name.to_string());
                cmd.push(crate::resp::format_float(value));
            }
            if let Some(at) = db.expire_at(key, &obj.id)
                && at > now
            {
                let remaining = (at - now) as f64 / 1e9;
                cmd.push("EX".to_string());
                cmd.push(format!("{remaining:.3}"));
            }
            match &obj.value {
                ObjectValue::String(s) => {
                    cmd.push("STRING".to_string());
                    cmd.push(s.to_string());
                }
                ObjectValue::Point { x, y, z } => {
                    cmd.push("POINT".to_string());
                    cmd.push(crate::resp::format_float(*y));
                    cmd.push(crate::resp::format_float(*x));
                    if let Some(z) = z {
                        cmd.push(crate::resp::format_float(*z));
                    }
                }
                ObjectValue::Rect(r) => {
                    cmd.push("BOUNDS".to_string());
                    for v in [r.min().y, r.min().x, r.max().y, r.max().x] {
                        cmd.push(crate::resp::format_float(v));
                    }
                }
                other => {
                    cmd.push("OBJECT".to_string());
                    cmd.push(other.string_form().to_string());
                }
            }
            out.push(cmd);
            true
        };
        col.scan(false, &mut emit);
    }
    for hook in db.hooks.values() {
        // live fences are connection-scoped and not durable
        if !hook.command.is_empty() {
            out.push(hook.command.clone());
        }
    }
    out
}
