//! Object lifecycle verbs: SET/GET/DEL and friends, field access, TTLs,
//! JSON document access, and the key-level admin commands.

use std::sync::Arc;

use rand::Rng;

use crate::area::parse_f64;
use crate::commands::{FenceEventOut, WriteOutcome, fence_events};
use crate::error::{Error, Result};
use crate::fields;
use crate::geom;
use crate::glob::Glob;
use crate::json_path;
use crate::object::{Object, ObjectValue};
use crate::resp::{Value, format_float};
use crate::server::{CommandCtx, Db, Server, now_nanos};

fn arity(verb: &str) -> Error {
    Error::ArgCount(verb.to_lowercase())
}

fn record(args: &[String]) -> Vec<String> {
    let mut rec = args.to_vec();
    rec[0] = rec[0].to_uppercase();
    rec
}

/// A live object: present and not past its deadline.
fn live<'a>(db: &'a Db, key: &str, id: &str) -> Option<&'a Object> {
    let obj = db.col(key)?.get(id)?;
    if db.is_expired(key, id, now_nanos()) {
        return None;
    }
    Some(obj)
}

pub fn cmd_set(
    server: &Arc<Server>,
    db: &mut Db,
    args: &[String],
    ctx: &mut CommandCtx,
) -> Result<WriteOutcome> {
    if args.len() < 4 {
        return Err(arity("set"));
    }
    let key = args[1].as_str();
    let id = args[2].as_str();
    if key.is_empty() || id.is_empty() {
        return Err(Error::InvalidArgument(String::new()));
    }

    let mut field_args: Vec<(String, f64)> = Vec::new();
    let mut ex: Option<f64> = None;
    let mut nx = false;
    let mut xx = false;
    let mut value: Option<ObjectValue> = None;

    let mut pos = 3;
    while pos < args.len() {
        match args[pos].to_uppercase().as_str() {
            "FIELD" => {
                if pos + 2 >= args.len() {
                    return Err(arity("set"));
                }
                field_args.push((args[pos + 1].clone(), parse_f64(&args[pos + 2])?));
                pos += 3;
            }
            "EX" => {
                if pos + 1 >= args.len() {
                    return Err(arity("set"));
                }
                ex = Some(parse_f64(&args[pos + 1])?);
                pos += 2;
            }
            "NX" => {
                nx = true;
                pos += 1;
            }
            "XX" => {
                xx = true;
                pos += 1;
            }
            "POINT" => {
                if pos + 2 >= args.len() {
                    return Err(arity("set"));
                }
                let lat = parse_f64(&args[pos + 1])?;
                let lon = parse_f64(&args[pos + 2])?;
                pos += 3;
                let z = if pos < args.len() && pos + 1 == args.len() {
                    let z = parse_f64(&args[pos])?;
                    pos += 1;
                    Some(z)
                } else {
                    None
                };
                value = Some(ObjectValue::Point { x: lon, y: lat, z });
            }
            "BOUNDS" => {
                if pos + 4 >= args.len() {
                    return Err(arity("set"));
                }
                let min_lat = parse_f64(&args[pos + 1])?;
                let min_lon = parse_f64(&args[pos + 2])?;
                let max_lat = parse_f64(&args[pos + 3])?;
                let max_lon = parse_f64(&args[pos + 4])?;
                pos += 5;
                value = Some(ObjectValue::Rect(geo::Rect::new(
                    geo::coord! { x: min_lon, y: min_lat },
                    geo::coord! { x: max_lon, y: max_lat },
                )));
            }
            "HASH" => {
                if pos + 1 >= args.len() {
                    return Err(arity("set"));
                }
                let rect = geom::geohash_rect(&args[pos + 1])?;
                let center = rect.center();
                pos += 2;
                value = Some(ObjectValue::Point {
                    x: center.x,
                    y: center.y,
                    z: None,
                });
            }
            "OBJECT" => {
                if pos + 1 >= args.len() {
                    return Err(arity("set"));
                }
                value = Some(ObjectValue::from_geojson(&args[pos + 1])?);
                pos += 2;
            }
            "STRING" => {
                if pos + 1 >= args.len() {
                    return Err(arity("set"));
                }
                value = Some(ObjectValue::String(Arc::from(args[pos + 1].as_str())));
                pos += 2;
            }
            other => return Err(Error::InvalidArgument(other.to_string())),
        }
    }
    let Some(value) = value else {
        return Err(arity("set"));
    };

    let now = now_nanos();
    let exists = live(db, key, id).is_some();
    if (nx && exists) || (xx && !exists) {
        return Ok(WriteOutcome::reply_only(Value::Null));
    }

    let id_arc: Arc<str> = Arc::from(id);
    let col = db.col_mut_or_create(key);
    let prior = col.set(Object::new(id_arc.clone(), value.clone()));
    for (name, v) in &field_args {
        col.set_field(id, name, *v)?;
    }
    let new_fields = col.get(id).map(|o| o.fields.clone()).unwrap_or_default();
    let field_map = col.field_map().clone();

    let expires_key = (Arc::from(key), id_arc.clone());
    match ex {
        Some(seconds) => {
            let at = now + (seconds * 1e9) as u64;
            db.expires.insert(expires_key, at);
            server.push_expire_entry(Arc::from(key), id_arc.clone(), at);
        }
        None => {
            db.expires.remove(&expires_key);
        }
    }

    let old_value = prior.map(|p| p.value);
    let events = fence_events(
        db,
        ctx,
        "set",
        key,
        &id_arc,
        old_value.as_ref(),
        Some(&value),
        &field_map,
        &new_fields,
    );
    metrics::counter!("objects_set_total").increment(1);

    Ok(WriteOutcome {
        reply: Value::ok(),
        aof: Some(vec![record(args)]),
        events,
    })
}

pub fn cmd_fset(db: &mut Db, args: &[String]) -> Result<WriteOutcome> {
    if args.len() < 5 {
        return Err(arity("fset"));
    }
    let key = args[1].as_str();
    let id = args[2].as_str();
    let mut pos = 3;
    let xx = args[3].eq_ignore_ascii_case("XX");
    if xx {
        pos = 4;
    }
    if (args.len() - pos) % 2 != 0 || args.len() == pos {
        return Err(arity("fset"));
    }
    let mut pairs: Vec<(String, f64)> = Vec::new();
    while pos < args.len() {
        pairs.push((args[pos].clone(), parse_f64(&args[pos + 1])?));
        pos += 2;
    }

    let Some(col) = db.collections.get_mut(key) else {
        if xx {
            return Ok(WriteOutcome::reply_only(Value::Int(0)));
        }
        return Err(Error::KeyNotFound);
    };
    if col.get(id).is_none() {
        if xx {
            return Ok(WriteOutcome::reply_only(Value::Int(0)));
        }
        return Err(Error::IdNotFound);
    }
    let changed = col.set_fields(id, &pairs)?;

    let aof = (changed > 0).then(|| vec![record(args)]);
    Ok(WriteOutcome {
        reply: Value::Int(changed as i64),
        aof,
        events: Vec::new(),
    })
}

pub fn cmd_del(db: &mut Db, args: &[String], ctx: &mut CommandCtx) -> Result<WriteOutcome> {
    if !(3..=4).contains(&args.len()) {
        return Err(arity("del"));
    }
    let key = args[1].as_str();
    let id = args[2].as_str();
    let strict = args
        .get(3)
        .map(|a| a.eq_ignore_ascii_case("ERRON404"))
        .unwrap_or(false);
    if args.len() == 4 && !strict {
        return Err(Error::InvalidArgument(args[3].clone()));
    }

    let Some(col) = db.collections.get_mut(key) else {
        if strict {
            return Err(Error::KeyNotFound);
        }
        return Ok(WriteOutcome::reply_only(Value::Int(0)));
    };
    let Some(removed) = col.delete(id) else {
        if strict {
            return Err(Error::IdNotFound);
        }
        return Ok(WriteOutcome::reply_only(Value::Int(0)));
    };
    let field_map = col.field_map().clone();
    db.expires.remove(&(Arc::from(key), removed.id.clone()));
    db.drop_if_empty(key);

    let events = fence_events(
        db,
        ctx,
        "del",
        key,
        &removed.id,
        Some(&removed.value),
        None,
        &field_map,
        &removed.fields,
    );
    metrics::counter!("objects_deleted_total").increment(1);

    Ok(WriteOutcome {
        reply: Value::Int(1),
        aof: Some(vec![record(&args[..3])]),
        events,
    })
}

pub fn cmd_pdel(db: &mut Db, args: &[String], ctx: &mut CommandCtx) -> Result<WriteOutcome> {
    if args.len() != 3 {
        return Err(arity("pdel"));
    }
    let key = args[1].as_str();
    let glob = Glob::new(&args[2])?;
    let Some(col) = db.collections.get(key) else {
        return Ok(WriteOutcome::reply_only(Value::Int(0)));
    };

    let mut doomed: Vec<Arc<str>> = Vec::new();
    col.scan(false, |obj| {
        if glob.matches(&obj.id) {
            doomed.push(obj.id.clone());
        }
        true
    });

    let mut events: Vec<FenceEventOut> = Vec::new();
    for id in &doomed {
        let Some(col) = db.collections.get_mut(key) else {
            break;
        };
        let Some(removed) = col.delete(id) else {
            continue;
        };
        let field_map = col.field_map().clone();
        db.expires.remove(&(Arc::from(key), removed.id.clone()));
        events.extend(fence_events(
            db,
            ctx,
            "del",
            key,
            &removed.id,
            Some(&removed.value),
            None,
            &field_map,
            &removed.fields,
        ));
    }
    db.drop_if_empty(key);

    let count = doomed.len() as i64;
    let aof = (count > 0).then(|| vec![record(args)]);
    Ok(WriteOutcome {
        reply: Value::Int(count),
        aof,
        events,
    })
}

pub fn cmd_drop(db: &mut Db, args: &[String]) -> Result<WriteOutcome> {
    if args.len() != 2 {
        return Err(arity("drop"));
    }
    let key = args[1].as_str();
    if db.collections.remove(key).is_none() {
        return Ok(WriteOutcome::reply_only(Value::Int(0)));
    }
    db.expires.retain(|(k, _), _| k.as_ref() != key);
    db.hooks.retain(|_, hook| hook.key.as_ref() != key);
    Ok(WriteOutcome {
        reply: Value::Int(1),
        aof: Some(vec![record(args)]),
        events: Vec::new(),
    })
}

pub fn cmd_flushdb(db: &mut Db, args: &[String]) -> Result<WriteOutcome> {
    if args.len() != 1 {
        return Err(arity("flushdb"));
    }
    db.collections.clear();
    db.expires.clear();
    db.hooks.clear();
    Ok(WriteOutcome {
        reply: Value::ok(),
        aof: Some(vec![record(args)]),
        events: Vec::new(),
    })
}

pub fn cmd_rename(db: &mut Db, args: &[String], nx: bool) -> Result<WriteOutcome> {
    if args.len() != 3 {
        return Err(arity(if nx { "renamenx" } else { "rename" }));
    }
    let key = args[1].as_str();
    let newkey = args[2].as_str();
    if !db.collections.contains_key(key) {
        return Err(Error::KeyNotFound);
    }
    if db.hooks.values().any(|h| h.key.as_ref() == key) {
        return Err(Error::Other("key has hooks set".to_string()));
    }
    if nx && db.collections.contains_key(newkey) {
        return Ok(WriteOutcome::reply_only(Value::Int(0)));
    }

    let col = db.collections.remove(key).expect("checked above");
    db.collections.insert(Arc::from(newkey), col);
    // deadlines of the overwritten destination die with it; the source's
    // move over
    db.expires.retain(|(k, _), _| k.as_ref() != newkey || k.as_ref() == key);
    let moved: Vec<((Arc<str>, Arc<str>), u64)> = db
        .expires
        .iter()
        .filter(|((k, _), _)| k.as_ref() == key)
        .map(|((k, id), at)| ((k.clone(), id.clone()), *at))
        .collect();
    for ((_, id), at) in moved {
        db.expires.remove(&(Arc::from(key), id.clone()));
        db.expires.insert((Arc::from(newkey), id), at);
    }

    Ok(WriteOutcome {
        reply: if nx { Value::Int(1) } else { Value::ok() },
        aof: Some(vec![record(args)]),
        events: Vec::new(),
    })
}

pub fn cmd_expire(server: &Arc<Server>, db: &mut Db, args: &[String]) -> Result<WriteOutcome> {
    if args.len() != 4 {
        return Err(arity("expire"));
    }
    let key = args[1].as_str();
    let id = args[2].as_str();
    let seconds = parse_f64(&args[3])?;
    if live(db, key, id).is_none() {
        return Ok(WriteOutcome::reply_only(Value::Int(0)));
    }
    let at = now_nanos() + (seconds * 1e9) as u64;
    db.expires.insert((Arc::from(key), Arc::from(id)), at);
    server.push_expire_entry(Arc::from(key), Arc::from(id), at);
    Ok(WriteOutcome {
        reply: Value::Int(1),
        aof: Some(vec![record(args)]),
        events: Vec::new(),
    })
}

pub fn cmd_persist(db: &mut Db, args: &[String]) -> Result<WriteOutcome> {
    if args.len() != 3 {
        return Err(arity("persist"));
    }
    let key = args[1].as_str();
    let id = args[2].as_str();
    if live(db, key, id).is_none() {
        return Ok(WriteOutcome::reply_only(Value::Int(0)));
    }
    let cleared = db
        .expires
        .remove(&(Arc::from(key), Arc::from(id)))
        .is_some();
    if !cleared {
        return Ok(WriteOutcome::reply_only(Value::Int(0)));
    }
    Ok(WriteOutcome {
        reply: Value::Int(1),
        aof: Some(vec![record(args)]),
        events: Vec::new(),
    })
}

pub fn cmd_ttl(db: &Db, args: &[String]) -> Result<Value> {
    if args.len() != 3 {
        return Err(arity("ttl"));
    }
    let key = args[1].as_str();
    let id = args[2].as_str();
    if live(db, key, id).is_none() {
        return Ok(Value::Int(-2));
    }
    match db.expire_at(key, id) {
        Some(at) => {
            let now = now_nanos();
            let secs = (at.saturating_sub(now)) as f64 / 1e9;
            Ok(Value::Int(secs.floor() as i64))
        }
        None => Ok(Value::Int(-1)),
    }
}

pub fn cmd_get(db: &Db, args: &[String]) -> Result<Value> {
    if args.len() < 3 {
        return Err(arity("get"));
    }
    let key = args[1].as_str();
    let id = args[2].as_str();
    let Some(obj) = live(db, key, id) else {
        return Ok(Value::Null);
    };

    let mut pos = 3;
    let mut withfields = false;
    if pos < args.len() && args[pos].eq_ignore_ascii_case("WITHFIELDS") {
        withfields = true;
        pos += 1;
    }
    let mode = args.get(pos).map(|a| a.to_uppercase());
    let body = match mode.as_deref() {
        None | Some("OBJECT") => Value::Bulk(obj.value.string_form().to_string()),
        Some("POINT") => {
            let center = obj.value.center();
            let mut coords = vec![Value::float(center.y()), Value::float(center.x())];
            if let ObjectValue::Point { z: Some(z), .. } = &obj.value {
                coords.push(Value::float(*z));
            }
            Value::Array(coords)
        }
        Some("BOUNDS") => match obj.value.rect() {
            Some(r) => Value::Array(vec![
                Value::Array(vec![Value::float(r.min().y), Value::float(r.min().x)]),
                Value::Array(vec![Value::float(r.max().y), Value::float(r.max().x)]),
            ]),
            None => Value::Null,
        },
        Some("HASH") => {
            let precision: usize = args
                .get(pos + 1)
                .ok_or_else(|| arity("get"))?
                .parse()
                .map_err(|_| Error::InvalidArgument(args[pos + 1].clone()))?;
            Value::Bulk(geom::geohash_encode(obj.value.center(), precision)?)
        }
        Some(other) => return Err(Error::InvalidArgument(other.to_string())),
    };

    if withfields {
        let map = db.col(key).expect("live checked").field_map();
        let listed: Vec<Value> = fields::present(map, &obj.fields)
            .flat_map(|(name, v)| [Value::Bulk(name.to_string()), Value::float(v)])
            .collect();
        if !listed.is_empty() {
            return Ok(Value::Array(vec![body, Value::Array(listed)]));
        }
    }
    Ok(body)
}

pub fn cmd_fget(db: &Db, args: &[String]) -> Result<Value> {
    if args.len() != 4 {
        return Err(arity("fget"));
    }
    let key = args[1].as_str();
    let Some(col) = db.col(key) else {
        return Err(Error::KeyNotFound);
    };
    let Some(obj) = col.get(&args[2]) else {
        return Err(Error::IdNotFound);
    };
    let value = col
        .field_map()
        .index_of(&args[3])
        .map(|idx| fields::get_value(&obj.fields, idx))
        .unwrap_or(0.0);
    Ok(Value::float(value))
}

pub fn cmd_fexists(db: &Db, args: &[String]) -> Result<Value> {
    if args.len() != 4 {
        return Err(arity("fexists"));
    }
    let key = args[1].as_str();
    let Some(col) = db.col(key) else {
        return Err(Error::KeyNotFound);
    };
    let Some(obj) = col.get(&args[2]) else {
        return Err(Error::IdNotFound);
    };
    let present = col
        .field_map()
        .index_of(&args[3])
        .map(|idx| fields::get_value(&obj.fields, idx) != 0.0)
        .unwrap_or(false);
    Ok(Value::Int(present as i64))
}

pub fn cmd_exists(db: &Db, args: &[String]) -> Result<Value> {
    if args.len() != 3 {
        return Err(arity("exists"));
    }
    Ok(Value::Int(live(db, &args[1], &args[2]).is_some() as i64))
}

pub fn cmd_jget(db: &Db, args: &[String]) -> Result<Value> {
    if !(3..=4).contains(&args.len()) {
        return Err(arity("jget"));
    }
    let Some(obj) = live(db, &args[1], &args[2]) else {
        return Ok(Value::Null);
    };
    let doc = object_document(&obj.value)?;
    match args.get(3) {
        Some(path) => match json_path::get(&doc, path) {
            Some(serde_json::Value::String(s)) => Ok(Value::Bulk(s.clone())),
            Some(v) => Ok(Value::Bulk(v.to_string())),
            None => Ok(Value::Null),
        },
        None => Ok(Value::Bulk(doc.to_string())),
    }
}

pub fn cmd_jset(
    server: &Arc<Server>,
    db: &mut Db,
    args: &[String],
    ctx: &mut CommandCtx,
) -> Result<WriteOutcome> {
    if !(5..=6).contains(&args.len()) {
        return Err(arity("jset"));
    }
    let key = args[1].as_str();
    let id = args[2].as_str();
    let raw = match args.get(5).map(|a| a.to_uppercase()) {
        None => false,
        Some(ref s) if s == "RAW" => true,
        Some(ref s) if s == "STR" => false,
        Some(other) => return Err(Error::InvalidArgument(other.clone())),
    };

    let mut doc = match db.col(key).and_then(|col| col.get(id)) {
        Some(obj) => object_document(&obj.value)?,
        None => serde_json::json!({}),
    };
    json_path::set(&mut doc, &args[3], json_path::coerce(&args[4], raw)?)?;
    store_document(server, db, key, id, doc, ctx)?;

    Ok(WriteOutcome {
        reply: Value::ok(),
        aof: Some(vec![record(args)]),
        events: Vec::new(),
    })
}

pub fn cmd_jdel(
    server: &Arc<Server>,
    db: &mut Db,
    args: &[String],
    ctx: &mut CommandCtx,
) -> Result<WriteOutcome> {
    if args.len() != 4 {
        return Err(arity("jdel"));
    }
    let key = args[1].as_str();
    let id = args[2].as_str();
    let Some(obj) = db.col(key).and_then(|col| col.get(id)) else {
        return Err(Error::IdNotFound);
    };
    let mut doc = object_document(&obj.value)?;
    json_path::del(&mut doc, &args[3])?;
    store_document(server, db, key, id, doc, ctx)?;

    Ok(WriteOutcome {
        reply: Value::Int(1),
        aof: Some(vec![record(args)]),
        events: Vec::new(),
    })
}

/// The JSON document form a JSET/JGET works against.
fn object_document(value: &ObjectValue) -> Result<serde_json::Value> {
    match value {
        ObjectValue::String(s) => {
            serde_json::from_str(s).map_err(|_| Error::InvalidArgument(s.to_string()))
        }
        other => Ok(other.to_json()),
    }
}

/// Store a mutated document back: GeoJSON-shaped documents re-enter the
/// spatial SET path and re-index, everything else is kept as a string.
fn store_document(
    server: &Arc<Server>,
    db: &mut Db,
    key: &str,
    id: &str,
    doc: serde_json::Value,
    ctx: &mut CommandCtx,
) -> Result<()> {
    let text = doc.to_string();
    let value = if doc.get("type").and_then(|t| t.as_str()).is_some() {
        ObjectValue::from_geojson(&text).unwrap_or(ObjectValue::String(Arc::from(text.as_str())))
    } else {
        ObjectValue::String(Arc::from(text.as_str()))
    };
    let set_args: Vec<String> = vec![
        "SET".to_string(),
        key.to_string(),
        id.to_string(),
        match value {
            ObjectValue::String(_) => "STRING".to_string(),
            _ => "OBJECT".to_string(),
        },
        text,
    ];
    // route through SET so indexes, counters and fences all observe it;
    // the JSET/JDEL record is what lands in the log
    let outcome = cmd_set(server, db, &set_args, ctx)?;
    for event in outcome.events {
        if let Some(channel) = &event.channel {
            server.pubsub.publish(channel, &event.payload);
        }
    }
    Ok(())
}

pub fn cmd_type(db: &Db, args: &[String]) -> Result<Value> {
    if args.len() != 2 {
        return Err(arity("type"));
    }
    match db.col(&args[1]) {
        Some(_) => Ok(Value::Simple("hash".to_string())),
        None => Ok(Value::Simple("none".to_string())),
    }
}

pub fn cmd_keys(db: &Db, args: &[String]) -> Result<Value> {
    if args.len() != 2 {
        return Err(arity("keys"));
    }
    let glob = Glob::new(&args[1])?;
    let keys: Vec<Value> = db
        .collections
        .keys()
        .filter(|k| glob.matches(k))
        .map(|k| Value::Bulk(k.to_string()))
        .collect();
    Ok(Value::Array(keys))
}

pub fn cmd_stats(db: &Db, args: &[String]) -> Result<Value> {
    if args.len() < 2 {
        return Err(arity("stats"));
    }
    let mut out = Vec::with_capacity(args.len() - 1);
    for key in &args[1..] {
        match db.col(key) {
            Some(col) => out.push(Value::Array(vec![
                Value::Bulk("in_memory_size".to_string()),
                Value::Int(col.weight() as i64),
                Value::Bulk("num_objects".to_string()),
                Value::Int(col.count() as i64),
                Value::Bulk("num_points".to_string()),
                Value::Int(col.point_count() as i64),
                Value::Bulk("num_strings".to_string()),
                Value::Int(col.string_count() as i64),
            ])),
            None => out.push(Value::Null),
        }
    }
    Ok(Value::Array(out))
}

pub fn cmd_bounds(db: &Db, args: &[String]) -> Result<Value> {
    if args.len() != 2 {
        return Err(arity("bounds"));
    }
    let Some(col) = db.col(&args[1]) else {
        return Err(Error::KeyNotFound);
    };
    match col.bounds() {
        Some(r) => Ok(Value::Array(vec![
            Value::Array(vec![Value::float(r.min().y), Value::float(r.min().x)]),
            Value::Array(vec![Value::float(r.max().y), Value::float(r.max().x)]),
        ])),
        None => Ok(Value::Null),
    }
}

/// Test utility: bulk-load random points. Each insert is logged as a
/// plain SET so replay reproduces the exact data.
pub fn cmd_massinsert(
    server: &Arc<Server>,
    db: &mut Db,
    args: &[String],
    ctx: &mut CommandCtx,
) -> Result<WriteOutcome> {
    if args.len() != 3 {
        return Err(arity("massinsert"));
    }
    let count: usize = args[2]
        .parse()
        .map_err(|_| Error::InvalidArgument(args[2].clone()))?;
    if count > 10_000_000 {
        return Err(Error::InvalidArgument(args[2].clone()));
    }

    let mut rng = rand::rng();
    let mut records = Vec::with_capacity(count);
    for i in 0..count {
        let lat: f64 = rng.random_range(-85.0..85.0);
        let lon: f64 = rng.random_range(-180.0..180.0);
        let set_args: Vec<String> = vec![
            "SET".to_string(),
            args[1].clone(),
            format!("id:{i}"),
            "POINT".to_string(),
            format_float(lat),
            format_float(lon),
        ];
        cmd_set(server, db, &set_args, ctx)?;
        records.push(set_args);
    }
    Ok(WriteOutcome {
        reply: Value::ok(),
        aof: Some(records),
        events: Vec::new(),
    })
}

/// Purge one expired id through the normal delete path. Called by the
/// expiration task under the write lock after re-checking the map.
pub fn purge_expired(
    db: &mut Db,
    key: &str,
    id: &str,
    ctx: &mut CommandCtx,
) -> Result<Option<WriteOutcome>> {
    let args = vec!["DEL".to_string(), key.to_string(), id.to_string()];
    match cmd_del(db, &args, ctx) {
        Ok(outcome) => Ok(Some(outcome)),
        Err(err) if err.harmless_in_replay() => Ok(None),
        Err(err) => Err(err),
    }
}
