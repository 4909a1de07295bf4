//! Query execution for SCAN, SEARCH, WITHIN, INTERSECTS and NEARBY.
//!
//! All five verbs share the same accumulator: cursor skipping, id glob and
//! field filters, the expired-id check, output projection, and the
//! cooperative deadline check every 255 visits. WITHIN/INTERSECTS drive the
//! R-tree with the target's bounding rectangle and confirm each candidate
//! with the exact predicate; NEARBY pulls candidates in envelope-distance
//! order and keeps a capped set re-sorted by exact object distance.

use std::collections::HashSet;
use std::sync::Arc;

use geo::{BooleanOps, Geometry, MultiLineString, MultiPolygon, Point, Rect};
use once_cell::sync::Lazy;
use serde_json::json;

use crate::collection::Collection;
use crate::deadline::Deadline;
use crate::error::Result;
use crate::fields;
use crate::geom;
use crate::glob::Glob;
use crate::object::{Object, ObjectValue};
use crate::resp::Value;
use crate::where_filter::WhereClause;

/// Iterations between cooperative deadline checks.
const YIELD_EVERY: u32 = 255;

/// NEARBY and scans cap output here unless LIMIT says otherwise.
pub const DEFAULT_LIMIT: usize = 100;

static MATCH_ALL: Lazy<Glob> = Lazy::new(|| Glob::new("*").expect("star glob"));

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputKind {
    Objects,
    Ids,
    Count,
    Points,
    Bounds,
    Hashes(usize),
}

#[derive(Debug, Clone)]
pub struct QueryParams {
    pub cursor: usize,
    pub limit: usize,
    pub sparse: Option<u32>,
    pub clip: bool,
    pub nofields: bool,
    pub desc: bool,
    pub pattern: Glob,
    pub wheres: Vec<WhereClause>,
    pub output: OutputKind,
    pub with_distance: bool,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            cursor: 0,
            limit: DEFAULT_LIMIT,
            sparse: None,
            clip: false,
            nofields: false,
            desc: false,
            pattern: MATCH_ALL.clone(),
            wheres: Vec::new(),
            output: OutputKind::Objects,
            with_distance: false,
        }
    }
}

pub struct QueryCtx<'a> {
    pub col: &'a Collection,
    pub params: &'a QueryParams,
    pub deadline: &'a Deadline,
    pub is_expired: &'a dyn Fn(&str) -> bool,
}

impl QueryCtx<'_> {
    /// Filters common to every verb. `steps` drives the deadline check.
    fn admit(&self, obj: &Object, steps: &mut u32) -> bool {
        *steps += 1;
        if *steps % YIELD_EVERY == 0 {
            self.deadline.check();
        }
        if (self.is_expired)(&obj.id) {
            return false;
        }
        if !self.params.pattern.is_all() && !self.params.pattern.matches(&obj.id) {
            return false;
        }
        if !self.params.wheres.is_empty() {
            let lookup = self.field_lookup_ref(obj);
            if !self.params.wheres.iter().all(|w| w.matches(&lookup)) {
                return false;
            }
        }
        true
    }

    fn field_lookup_ref(&self, obj: &Object) -> impl Fn(&str) -> f64 + '_ {
        let values = obj.fields.clone();
        move |name: &str| {
            self.col
                .field_map()
                .index_of(name)
                .map(|idx| fields::get_value(&values, idx))
                .unwrap_or(0.0)
        }
    }

    fn project(&self, obj: &Object, dist: Option<f64>, clip_to: Option<&Rect<f64>>) -> Value {
        let params = self.params;
        let mut parts: Vec<Value> = vec![Value::Bulk(obj.id.to_string())];
        match params.output {
            OutputKind::Ids => return Value::Bulk(obj.id.to_string()),
            OutputKind::Count => unreachable!("count never projects"),
            OutputKind::Objects => {
                let body = match clip_to {
                    Some(rect) if params.clip => clipped_json(&obj.value, rect),
                    _ => obj.value.to_json(),
                };
                let body = match body {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                parts.push(Value::Bulk(body));
            }
            OutputKind::Points => {
                let center = obj.value.center();
                parts.push(Value::Array(vec![
                    Value::float(center.y()),
                    Value::float(center.x()),
                ]));
            }
            OutputKind::Bounds => {
                let bounds = obj.value.rect().unwrap_or(Rect::new(
                    geo::coord! { x: 0.0, y: 0.0 },
                    geo::coord! { x: 0.0, y: 0.0 },
                ));
                parts.push(Value::Array(vec![
                    Value::Array(vec![
                        Value::float(bounds.min().y),
                        Value::float(bounds.min().x),
                    ]),
                    Value::Array(vec![
                        Value::float(bounds.max().y),
                        Value::float(bounds.max().x),
                    ]),
                ]));
            }
            OutputKind::Hashes(precision) => {
                let hash = geom::geohash_encode(obj.value.center(), precision)
                    .unwrap_or_default();
                parts.push(Value::Bulk(hash));
            }
        }
        if !params.nofields {
            let listed: Vec<Value> = fields::present(self.col.field_map(), &obj.fields)
                .flat_map(|(name, v)| [Value::Bulk(name.to_string()), Value::float(v)])
                .collect();
            if !listed.is_empty() {
                parts.push(Value::Array(listed));
            }
        }
        if let Some(d) = dist
            && params.with_distance
        {
            parts.push(Value::float(d));
        }
        Value::Array(parts)
    }
}

struct Accumulator {
    skipped: usize,
    emitted: usize,
    count: usize,
    items: Vec<Value>,
    hit_limit: bool,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            skipped: 0,
            emitted: 0,
            count: 0,
            items: Vec::new(),
            hit_limit: false,
        }
    }

    /// Record a match. Returns false when iteration should stop.
    fn push(&mut self, ctx: &QueryCtx, obj: &Object, dist: Option<f64>, clip_to: Option<&Rect<f64>>) -> bool {
        if self.skipped < ctx.params.cursor {
            self.skipped += 1;
            return true;
        }
        self.count += 1;
        if ctx.params.output != OutputKind::Count {
            self.items.push(ctx.project(obj, dist, clip_to));
        }
        self.emitted += 1;
        if self.emitted >= ctx.params.limit {
            self.hit_limit = true;
            return false;
        }
        true
    }

    fn finish(self, ctx: &QueryCtx) -> Value {
        let cursor_out = if self.hit_limit {
            (ctx.params.cursor + self.emitted) as i64
        } else {
            0
        };
        match ctx.params.output {
            OutputKind::Count => Value::Array(vec![
                Value::Int(cursor_out),
                Value::Int(self.count as i64),
            ]),
            _ => Value::Array(vec![Value::Int(cursor_out), Value::Array(self.items)]),
        }
    }
}

/// SCAN: walk the id index, optionally over a `[start, end)` range.
pub fn run_scan(ctx: &QueryCtx, range: Option<(&str, &str)>) -> Result<Value> {
    let mut acc = Accumulator::new();
    let mut steps = 0u32;
    let mut visit = |obj: &Object| -> bool {
        if !ctx.admit(obj, &mut steps) {
            return true;
        }
        acc.push(ctx, obj, None, None)
    };
    match range {
        Some((start, end)) => ctx.col.scan_range(start, end, ctx.params.desc, &mut visit),
        None => ctx.col.scan(ctx.params.desc, &mut visit),
    }
    Ok(acc.finish(ctx))
}

/// SEARCH: walk the value index over string objects.
pub fn run_search(ctx: &QueryCtx, range: Option<(&str, &str)>) -> Result<Value> {
    let mut acc = Accumulator::new();
    let mut steps = 0u32;
    let mut visit = |obj: &Object| -> bool {
        if !ctx.admit(obj, &mut steps) {
            return true;
        }
        acc.push(ctx, obj, None, None)
    };
    match range {
        Some((start, end)) => ctx
            .col
            .search_values_range(start, end, ctx.params.desc, &mut visit),
        None => ctx.col.search_values(ctx.params.desc, &mut visit),
    }
    Ok(acc.finish(ctx))
}

/// WITHIN / INTERSECTS. The target's bounding rectangle drives the index;
/// each candidate is confirmed with the exact predicate.
pub fn run_area(ctx: &QueryCtx, target: &ObjectValue, within: bool) -> Result<Value> {
    let Some(rect) = target.rect() else {
        return Ok(Accumulator::new().finish(ctx));
    };
    if let Some(depth) = ctx.params.sparse {
        return run_sparse(ctx, target, within, &rect, depth);
    }
    let clip_to = ctx.params.clip.then_some(rect);
    let mut acc = Accumulator::new();
    let mut steps = 0u32;
    ctx.col.search_rect(&rect, |obj| {
        if !ctx.admit(obj, &mut steps) {
            return true;
        }
        let matched = if within {
            obj.value.within(target)
        } else {
            obj.value.intersects(target)
        };
        if !matched {
            return true;
        }
        acc.push(ctx, obj, None, clip_to.as_ref())
    });
    Ok(acc.finish(ctx))
}

/// SPARSE sampling: quarter the target rectangle `depth` times and emit at
/// most one match per leaf quadrant, deduplicated by id.
fn run_sparse(
    ctx: &QueryCtx,
    target: &ObjectValue,
    within: bool,
    rect: &Rect<f64>,
    depth: u32,
) -> Result<Value> {
    let mut quads = vec![*rect];
    for _ in 0..depth {
        let mut next = Vec::with_capacity(quads.len() * 4);
        for q in quads {
            let center = q.center();
            let (min, max) = (q.min(), q.max());
            next.push(Rect::new(min, center));
            next.push(Rect::new(
                geo::coord! { x: center.x, y: min.y },
                geo::coord! { x: max.x, y: center.y },
            ));
            next.push(Rect::new(
                geo::coord! { x: min.x, y: center.y },
                geo::coord! { x: center.x, y: max.y },
            ));
            next.push(Rect::new(center, max));
        }
        quads = next;
    }

    let clip_to = ctx.params.clip.then_some(*rect);
    let mut acc = Accumulator::new();
    let mut seen: HashSet<Arc<str>> = HashSet::new();
    let mut steps = 0u32;
    'outer: for quad in &quads {
        let mut stop = false;
        ctx.col.search_rect(quad, |obj| {
            if !ctx.admit(obj, &mut steps) {
                return true;
            }
            if seen.contains(&obj.id) {
                return true;
            }
            let matched = if within {
                obj.value.within(target)
            } else {
                obj.value.intersects(target)
            };
            if !matched {
                return true;
            }
            seen.insert(obj.id.clone());
            stop = !acc.push(ctx, obj, None, clip_to.as_ref());
            false // one object per quadrant
        });
        if stop {
            break 'outer;
        }
    }
    Ok(acc.finish(ctx))
}

/// NEARBY: k-nearest when `radius` is None, bounded search otherwise.
/// Candidates arrive in envelope-distance order; the capped buffer is
/// re-sorted by exact object distance before projection.
pub fn run_nearby(ctx: &QueryCtx, center: Point<f64>, radius: Option<f64>) -> Result<Value> {
    let cap = ctx.params.cursor + ctx.params.limit;
    // (exact distance, object clone) kept sorted ascending, max len = cap
    let mut best: Vec<(f64, Object)> = Vec::new();
    let mut steps = 0u32;

    for (entry, envelope_dist) in ctx.col.nearby(center) {
        steps += 1;
        if steps % YIELD_EVERY == 0 {
            ctx.deadline.check();
        }
        if let Some(r) = radius
            && envelope_dist > r
        {
            break;
        }
        // candidates can no longer displace the buffer once their envelope
        // lower bound exceeds the current k-th exact distance
        if best.len() >= cap {
            let worst = best[best.len() - 1].0;
            if envelope_dist > worst {
                break;
            }
        }
        let Some(obj) = ctx.col.get(&entry.id) else {
            continue;
        };
        if (ctx.is_expired)(&obj.id) {
            continue;
        }
        if !ctx.params.pattern.is_all() && !ctx.params.pattern.matches(&obj.id) {
            continue;
        }
        if !ctx.params.wheres.is_empty() {
            let lookup = ctx.field_lookup_ref(obj);
            if !ctx.params.wheres.iter().all(|w| w.matches(&lookup)) {
                continue;
            }
        }
        let dist = obj.value.distance_to_point(center);
        if let Some(r) = radius
            && dist > r
        {
            continue;
        }
        let at = best.partition_point(|(d, _)| *d <= dist);
        if at >= cap {
            continue;
        }
        best.insert(at, (dist, obj.clone()));
        best.truncate(cap);
    }

    let mut acc = Accumulator::new();
    for (dist, obj) in &best {
        if !acc.push(ctx, obj, Some(*dist), None) {
            break;
        }
    }
    Ok(acc.finish(ctx))
}

/// Clip an object's geometry to the query rectangle for CLIP output.
fn clipped_json(value: &ObjectValue, rect: &Rect<f64>) -> serde_json::Value {
    let window = rect.to_polygon();
    match value {
        ObjectValue::Rect(r) => {
            let min_x = r.min().x.max(rect.min().x);
            let min_y = r.min().y.max(rect.min().y);
            let max_x = r.max().x.min(rect.max().x);
            let max_y = r.max().y.min(rect.max().y);
            json!({"type": "Polygon", "coordinates": [[
                [min_x, min_y], [max_x, min_y], [max_x, max_y], [min_x, max_y], [min_x, min_y]
            ]]})
        }
        ObjectValue::Geo(g) => match &g.geom {
            Geometry::Polygon(p) => {
                let clipped = window.intersection(p);
                multipolygon_json(&clipped)
            }
            Geometry::MultiPolygon(mp) => {
                let window = MultiPolygon::new(vec![window.clone()]);
                let clipped = window.intersection(mp);
                multipolygon_json(&clipped)
            }
            Geometry::LineString(ls) => {
                let clipped = window.clip(&MultiLineString::new(vec![ls.clone()]), false);
                multilinestring_json(&clipped)
            }
            Geometry::MultiLineString(mls) => {
                let clipped = window.clip(mls, false);
                multilinestring_json(&clipped)
            }
            _ => value.to_json(),
        },
        other => other.to_json(),
    }
}

fn multipolygon_json(mp: &MultiPolygon<f64>) -> serde_json::Value {
    let polys: Vec<Vec<Vec<[f64; 2]>>> = mp
        .iter()
        .map(|p| {
            let mut rings: Vec<Vec<[f64; 2]>> =
                vec![p.exterior().coords().map(|c| [c.x, c.y]).collect()];
            for interior in p.interiors() {
                rings.push(interior.coords().map(|c| [c.x, c.y]).collect());
            }
            rings
        })
        .collect();
    if polys.len() == 1 {
        json!({"type": "Polygon", "coordinates": polys[0]})
    } else {
        json!({"type": "MultiPolygon", "coordinates": polys})
    }
}

fn multilinestring_json(mls: &MultiLineString<f64>) -> serde_json::Value {
    let lines: Vec<Vec<[f64; 2]>> = mls
        .iter()
        .map(|ls| ls.coords().map(|c| [c.x, c.y]).collect())
        .collect();
    if lines.len() == 1 {
        json!({"type": "LineString", "coordinates": lines[0]})
    } else {
        json!({"type": "MultiLineString", "coordinates": lines})
    }
}
