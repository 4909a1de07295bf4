//! Search verb parsing: SCAN, SEARCH, WITHIN, INTERSECTS, NEARBY, TEST.
//!
//! Option tokens (CURSOR/LIMIT/SPARSE/MATCH/WHERE/...) come first, the
//! output projection next, and the target area last. The parsed form feeds
//! the shared query executor; with FENCE the same parse becomes a hook
//! registration instead of a one-shot query.

use geo::Point;

use crate::area::{self, parse_f64};
use crate::commands::WriteOutcome;
use crate::error::{Error, Result};
use crate::geofence::{DetectSet, FenceKind, FenceQuery, Hook, Roam};
use crate::glob::Glob;
use crate::object::ObjectValue;
use crate::query::{self, OutputKind, QueryCtx, QueryParams};
use crate::resp::Value;
use crate::server::{CommandCtx, ConnAction, Db, now_nanos};
use crate::where_filter::{Expr, WhereClause, parse_bound};

fn arity(verb: &str) -> Error {
    Error::ArgCount(verb.to_lowercase())
}

struct ParsedSearch {
    params: QueryParams,
    fence: bool,
    detect: DetectSet,
    nodwell: bool,
    /// Index of the first unconsumed token (area/target start).
    pos: usize,
}

/// Keywords that begin a target area for WITHIN/INTERSECTS/NEARBY.
fn starts_area(token: &str) -> bool {
    matches!(
        token,
        "POINT" | "CIRCLE" | "SECTOR" | "OBJECT" | "TILE" | "QUADKEY" | "HASH" | "GET" | "ROAM"
    )
}

fn parse_search_args(args: &[String], verb: &str, area_tail: bool) -> Result<ParsedSearch> {
    let mut params = QueryParams::default();
    let mut fence = false;
    let mut detect = DetectSet::all();
    let mut nodwell = false;

    let mut pos = 2;
    while pos < args.len() {
        let token = args[pos].to_uppercase();
        match token.as_str() {
            "CURSOR" => {
                params.cursor = args
                    .get(pos + 1)
                    .ok_or_else(|| arity(verb))?
                    .parse()
                    .map_err(|_| Error::InvalidArgument(args[pos + 1].clone()))?;
                pos += 2;
            }
            "LIMIT" => {
                params.limit = args
                    .get(pos + 1)
                    .ok_or_else(|| arity(verb))?
                    .parse()
                    .map_err(|_| Error::InvalidArgument(args[pos + 1].clone()))?;
                pos += 2;
            }
            "SPARSE" => {
                let depth: u32 = args
                    .get(pos + 1)
                    .ok_or_else(|| arity(verb))?
                    .parse()
                    .map_err(|_| Error::InvalidArgument(args[pos + 1].clone()))?;
                if depth > 8 {
                    return Err(Error::InvalidArgument(args[pos + 1].clone()));
                }
                params.sparse = Some(depth);
                pos += 2;
            }
            "MATCH" => {
                params.pattern = Glob::new(args.get(pos + 1).ok_or_else(|| arity(verb))?)?;
                pos += 2;
            }
            "ASC" => {
                params.desc = false;
                pos += 1;
            }
            "DESC" => {
                params.desc = true;
                pos += 1;
            }
            "NOFIELDS" => {
                params.nofields = true;
                pos += 1;
            }
            "CLIP" => {
                params.clip = true;
                pos += 1;
            }
            "FENCE" => {
                fence = true;
                pos += 1;
            }
            "DETECT" => {
                let spec = args.get(pos + 1).ok_or_else(|| arity(verb))?;
                detect = DetectSet::parse(spec)
                    .ok_or_else(|| Error::InvalidArgument(spec.clone()))?;
                pos += 2;
            }
            "NODWELL" => {
                nodwell = true;
                pos += 1;
            }
            "DISTANCE" => {
                params.with_distance = true;
                pos += 1;
            }
            "WHERE" => {
                // three-operand numeric range, else a single expression token
                if pos + 3 < args.len()
                    && parse_bound(&args[pos + 2]).is_ok()
                    && parse_bound(&args[pos + 3]).is_ok()
                {
                    params.wheres.push(WhereClause::range(
                        &args[pos + 1],
                        &args[pos + 2],
                        &args[pos + 3],
                    )?);
                    pos += 4;
                } else {
                    let expr = args.get(pos + 1).ok_or_else(|| arity(verb))?;
                    params.wheres.push(WhereClause::Expr(Expr::parse(expr)?));
                    pos += 2;
                }
            }
            "WHEREIN" => {
                let name = args.get(pos + 1).ok_or_else(|| arity(verb))?.clone();
                let count: usize = args
                    .get(pos + 2)
                    .ok_or_else(|| arity(verb))?
                    .parse()
                    .map_err(|_| Error::InvalidArgument(args[pos + 2].clone()))?;
                if pos + 3 + count > args.len() {
                    return Err(arity(verb));
                }
                let mut values = Vec::with_capacity(count);
                for v in &args[pos + 3..pos + 3 + count] {
                    values.push(parse_f64(v)?);
                }
                params.wheres.push(WhereClause::In {
                    field: name,
                    values,
                });
                pos += 3 + count;
            }
            "COUNT" => {
                params.output = OutputKind::Count;
                pos += 1;
            }
            "IDS" => {
                params.output = OutputKind::Ids;
                pos += 1;
            }
            "OBJECTS" => {
                params.output = OutputKind::Objects;
                pos += 1;
            }
            "POINTS" => {
                params.output = OutputKind::Points;
                pos += 1;
            }
            "HASHES" => {
                let precision: usize = args
                    .get(pos + 1)
                    .ok_or_else(|| arity(verb))?
                    .parse()
                    .map_err(|_| Error::InvalidArgument(args[pos + 1].clone()))?;
                params.output = OutputKind::Hashes(precision);
                pos += 2;
            }
            "BOUNDS" => {
                // area form when four coordinates follow, projection otherwise
                let coords_follow = args.len() >= pos + 5
                    && args[pos + 1..pos + 5].iter().all(|a| a.parse::<f64>().is_ok());
                if area_tail && coords_follow {
                    break;
                }
                params.output = OutputKind::Bounds;
                pos += 1;
            }
            other if starts_area(other) => break,
            other => return Err(Error::InvalidArgument(other.to_string())),
        }
    }

    Ok(ParsedSearch {
        params,
        fence,
        detect,
        nodwell,
        pos,
    })
}

fn empty_result(params: &QueryParams) -> Value {
    match params.output {
        OutputKind::Count => Value::Array(vec![Value::Int(0), Value::Int(0)]),
        _ => Value::Array(vec![Value::Int(0), Value::Array(Vec::new())]),
    }
}

fn expired_check<'a>(db: &'a Db, key: &'a str) -> impl Fn(&str) -> bool + 'a {
    let now = now_nanos();
    move |id: &str| db.is_expired(key, id, now)
}

pub fn cmd_scan(db: &Db, args: &[String], ctx: &mut CommandCtx) -> Result<Value> {
    if args.len() < 2 {
        return Err(arity("scan"));
    }
    let parsed = parse_search_args(args, "scan", false)?;
    if parsed.fence {
        return Err(Error::InvalidArgument("FENCE".to_string()));
    }
    if parsed.pos != args.len() {
        return Err(Error::InvalidArgument(args[parsed.pos].clone()));
    }
    let Some(col) = db.col(&args[1]) else {
        return Ok(empty_result(&parsed.params));
    };
    let is_expired = expired_check(db, &args[1]);
    let qctx = QueryCtx {
        col,
        params: &parsed.params,
        deadline: &ctx.deadline,
        is_expired: &is_expired,
    };
    query::run_scan(&qctx, None)
}

pub fn cmd_search(db: &Db, args: &[String], ctx: &mut CommandCtx) -> Result<Value> {
    if args.len() < 2 {
        return Err(arity("search"));
    }
    let parsed = parse_search_args(args, "search", false)?;
    if parsed.fence {
        return Err(Error::InvalidArgument("FENCE".to_string()));
    }
    if parsed.pos != args.len() {
        return Err(Error::InvalidArgument(args[parsed.pos].clone()));
    }
    let Some(col) = db.col(&args[1]) else {
        return Ok(empty_result(&parsed.params));
    };
    let is_expired = expired_check(db, &args[1]);
    let qctx = QueryCtx {
        col,
        params: &parsed.params,
        deadline: &ctx.deadline,
        is_expired: &is_expired,
    };
    query::run_search(&qctx, None)
}

fn db_lookup(db: &Db) -> impl Fn(&str, &str) -> Option<ObjectValue> + '_ {
    |key: &str, id: &str| db.col(key).and_then(|c| c.get(id)).map(|o| o.value.clone())
}

pub fn cmd_area(db: &Db, args: &[String], ctx: &mut CommandCtx, within: bool) -> Result<Value> {
    let verb = if within { "within" } else { "intersects" };
    if args.len() < 3 {
        return Err(arity(verb));
    }
    let parsed = parse_search_args(args, verb, true)?;
    let mut pos = parsed.pos;
    let lookup = db_lookup(db);
    let target = area::parse_area(args, &mut pos, &lookup)?;
    if pos != args.len() {
        return Err(Error::InvalidArgument(args[pos].clone()));
    }
    let Some(col) = db.col(&args[1]) else {
        return Ok(empty_result(&parsed.params));
    };
    let is_expired = expired_check(db, &args[1]);
    let qctx = QueryCtx {
        col,
        params: &parsed.params,
        deadline: &ctx.deadline,
        is_expired: &is_expired,
    };
    query::run_area(&qctx, &target, within)
}

pub fn cmd_nearby(db: &Db, args: &[String], ctx: &mut CommandCtx) -> Result<Value> {
    if args.len() < 3 {
        return Err(arity("nearby"));
    }
    let parsed = parse_search_args(args, "nearby", true)?;
    let mut pos = parsed.pos;
    if args.get(pos).map(|a| a.to_uppercase()) != Some("POINT".to_string()) {
        return Err(Error::InvalidArgument(
            args.get(pos).cloned().unwrap_or_default(),
        ));
    }
    pos += 1;
    let lat = parse_f64(args.get(pos).ok_or_else(|| arity("nearby"))?)?;
    let lon = parse_f64(args.get(pos + 1).ok_or_else(|| arity("nearby"))?)?;
    pos += 2;
    let radius = match args.get(pos) {
        Some(token) => {
            let meters = parse_f64(token)?;
            pos += 1;
            Some(meters)
        }
        None => None,
    };
    if pos != args.len() {
        return Err(Error::InvalidArgument(args[pos].clone()));
    }

    let Some(col) = db.col(&args[1]) else {
        return Ok(empty_result(&parsed.params));
    };
    let is_expired = expired_check(db, &args[1]);
    let qctx = QueryCtx {
        col,
        params: &parsed.params,
        deadline: &ctx.deadline,
        is_expired: &is_expired,
    };
    query::run_nearby(&qctx, Point::new(lon, lat), radius)
}

/// TEST: predicate arithmetic over areas, no collection involved.
/// `area (WITHIN|INTERSECTS) area` terms combined with AND/OR/NOT and
/// parentheses.
pub fn cmd_test(db: &Db, args: &[String]) -> Result<Value> {
    if args.len() < 4 {
        return Err(arity("test"));
    }
    let lookup = db_lookup(db);
    let mut pos = 1;
    let result = test_or(args, &mut pos, &lookup)?;
    if pos != args.len() {
        return Err(Error::InvalidArgument(args[pos].clone()));
    }
    Ok(Value::Int(result as i64))
}

type AreaLookup<'a> = &'a dyn Fn(&str, &str) -> Option<ObjectValue>;

fn test_or(args: &[String], pos: &mut usize, lookup: AreaLookup) -> Result<bool> {
    let mut left = test_and(args, pos, lookup)?;
    while args.get(*pos).map(|a| a.to_uppercase()) == Some("OR".to_string()) {
        *pos += 1;
        let right = test_and(args, pos, lookup)?;
        left = left || right;
    }
    Ok(left)
}

fn test_and(args: &[String], pos: &mut usize, lookup: AreaLookup) -> Result<bool> {
    let mut left = test_unary(args, pos, lookup)?;
    while args.get(*pos).map(|a| a.to_uppercase()) == Some("AND".to_string()) {
        *pos += 1;
        let right = test_unary(args, pos, lookup)?;
        left = left && right;
    }
    Ok(left)
}

fn test_unary(args: &[String], pos: &mut usize, lookup: AreaLookup) -> Result<bool> {
    match args.get(*pos).map(|a| a.to_uppercase()).as_deref() {
        Some("NOT") => {
            *pos += 1;
            Ok(!test_unary(args, pos, lookup)?)
        }
        Some("(") => {
            *pos += 1;
            let inner = test_or(args, pos, lookup)?;
            if args.get(*pos).map(|a| a.as_str()) != Some(")") {
                return Err(Error::InvalidArgument("missing ')'".to_string()));
            }
            *pos += 1;
            Ok(inner)
        }
        Some(_) => {
            let left = area::parse_area(args, pos, lookup)?;
            let op = args
                .get(*pos)
                .ok_or_else(|| arity("test"))?
                .to_uppercase();
            *pos += 1;
            let right = area::parse_area(args, pos, lookup)?;
            match op.as_str() {
                "WITHIN" => Ok(left.within(&right)),
                "INTERSECTS" => Ok(left.intersects(&right)),
                other => Err(Error::InvalidArgument(other.to_string())),
            }
        }
        None => Err(arity("test")),
    }
}

/// WITHIN/INTERSECTS/NEARBY ... FENCE: register a connection-scoped fence
/// instead of running the query. The hook is a channel the connection
/// subscribes to; it is deleted when the connection goes away.
pub fn cmd_live_fence(
    db: &mut Db,
    verb: &str,
    args: &[String],
    ctx: &mut CommandCtx,
) -> Result<WriteOutcome> {
    if args.len() < 3 {
        return Err(arity(&verb.to_lowercase()));
    }
    let key = args[1].clone();
    let kind = match verb {
        "WITHIN" => FenceKind::Within,
        "INTERSECTS" => FenceKind::Intersects,
        _ => FenceKind::Nearby,
    };
    let query = parse_fence_tail(db, kind, args)?;
    let name = format!("live:{}", uuid::Uuid::new_v4().simple());
    let hook = Hook::new(name.clone(), key.into(), None, query, Vec::new());
    db.hooks.insert(name.clone(), hook);
    ctx.action = Some(ConnAction::LiveFence(name));
    Ok(WriteOutcome::reply_only(Value::ok()))
}

/// Parse the filter options and target of a fence query (shared by live
/// fences and SETHOOK/SETCHAN registrations). `args` is positioned so that
/// `args[1]` is the observed key.
pub fn parse_fence_tail(db: &Db, kind: FenceKind, args: &[String]) -> Result<FenceQuery> {
    let verb = kind.verb();
    let parsed = parse_search_args(args, verb, true)?;
    let mut pos = parsed.pos;

    let mut roam = None;
    let mut target = None;
    match args.get(pos).map(|a| a.to_uppercase()).as_deref() {
        Some("ROAM") if kind == FenceKind::Nearby => {
            let key = args.get(pos + 1).ok_or_else(|| arity(verb))?.clone();
            let pattern = Glob::new(args.get(pos + 2).ok_or_else(|| arity(verb))?)?;
            let meters = parse_f64(args.get(pos + 3).ok_or_else(|| arity(verb))?)?;
            pos += 4;
            roam = Some(Roam {
                key,
                pattern,
                meters,
            });
        }
        Some("POINT") if kind == FenceKind::Nearby => {
            let lat = parse_f64(args.get(pos + 1).ok_or_else(|| arity(verb))?)?;
            let lon = parse_f64(args.get(pos + 2).ok_or_else(|| arity(verb))?)?;
            let meters = parse_f64(args.get(pos + 3).ok_or_else(|| arity(verb))?)?;
            pos += 4;
            target = Some(ObjectValue::Circle {
                center: Point::new(lon, lat),
                meters,
            });
        }
        Some(_) => {
            let lookup = db_lookup(db);
            target = Some(area::parse_area(args, &mut pos, &lookup)?);
        }
        None => return Err(arity(verb)),
    }
    if pos != args.len() {
        return Err(Error::InvalidArgument(args[pos].clone()));
    }

    Ok(FenceQuery {
        kind,
        target,
        roam,
        pattern: parsed.params.pattern.clone(),
        wheres: parsed.params.wheres.clone(),
        detect: parsed.detect,
        nodwell: parsed.nodwell,
    })
}
