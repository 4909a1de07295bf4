//! Geofence hooks and the mutation matcher.
//!
//! A hook is a compiled WITHIN/INTERSECTS/NEARBY query bound to a delivery
//! target. Every mutation against the observed key is classified into
//! enter/exit/inside/outside/cross transitions using the hook's last known
//! state for that object id; roaming NEARBY fences compare the moving
//! object against its neighbors in another key instead of a static area.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use geo::{Geometry, Point};
use serde_json::json;

use crate::glob::Glob;
use crate::object::ObjectValue;
use crate::where_filter::WhereClause;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FenceKind {
    Within,
    Intersects,
    Nearby,
}

impl FenceKind {
    pub fn verb(&self) -> &'static str {
        match self {
            FenceKind::Within => "within",
            FenceKind::Intersects => "intersects",
            FenceKind::Nearby => "nearby",
        }
    }
}

/// DETECT set; defaults to everything.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectSet(u8);

impl DetectSet {
    pub const ENTER: u8 = 1;
    pub const EXIT: u8 = 2;
    pub const INSIDE: u8 = 4;
    pub const OUTSIDE: u8 = 8;
    pub const CROSS: u8 = 16;

    pub fn all() -> Self {
        DetectSet(Self::ENTER | Self::EXIT | Self::INSIDE | Self::OUTSIDE | Self::CROSS)
    }

    pub fn parse(spec: &str) -> Option<Self> {
        let mut bits = 0;
        for part in spec.split(',') {
            bits |= match part.trim() {
                "enter" => Self::ENTER,
                "exit" => Self::EXIT,
                "inside" => Self::INSIDE,
                "outside" => Self::OUTSIDE,
                "cross" => Self::CROSS,
                _ => return None,
            };
        }
        Some(DetectSet(bits))
    }

    pub fn has(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

#[derive(Debug, Clone)]
pub struct Roam {
    pub key: String,
    pub pattern: Glob,
    pub meters: f64,
}

#[derive(Debug, Clone)]
pub struct FenceQuery {
    pub kind: FenceKind,
    /// Static predicate area; None for roaming fences.
    pub target: Option<ObjectValue>,
    pub roam: Option<Roam>,
    pub pattern: Glob,
    pub wheres: Vec<WhereClause>,
    pub detect: DetectSet,
    pub nodwell: bool,
}

impl FenceQuery {
    fn predicate(&self, value: &ObjectValue) -> bool {
        let Some(target) = &self.target else {
            return false;
        };
        match self.kind {
            FenceKind::Within => value.within(target),
            // NEARBY targets are circles; intersect semantics cover both
            FenceKind::Intersects | FenceKind::Nearby => value.intersects(target),
        }
    }
}

#[derive(Debug)]
pub struct Hook {
    pub name: String,
    pub key: Arc<str>,
    /// Delivery endpoint; None means the hook is a named channel.
    pub endpoint: Option<String>,
    pub query: FenceQuery,
    /// Original registration tokens, listed by HOOKS/CHANS and replayed by
    /// the log rewrite.
    pub command: Vec<String>,
    states: HashMap<Arc<str>, bool>,
    roam_states: HashMap<Arc<str>, HashSet<Arc<str>>>,
}

impl Hook {
    pub fn new(
        name: String,
        key: Arc<str>,
        endpoint: Option<String>,
        query: FenceQuery,
        command: Vec<String>,
    ) -> Self {
        Self {
            name,
            key,
            endpoint,
            query,
            command,
            states: HashMap::new(),
            roam_states: HashMap::new(),
        }
    }

    pub fn is_channel(&self) -> bool {
        self.endpoint.is_none()
    }
}

/// One mutation as seen by the fence engine.
pub struct Mutation<'a> {
    /// "set" or "del"
    pub command: &'a str,
    pub key: &'a str,
    pub id: &'a Arc<str>,
    pub old: Option<&'a ObjectValue>,
    pub new: Option<&'a ObjectValue>,
    /// Field lookup for WHERE filters.
    pub field: &'a dyn Fn(&str) -> f64,
    /// Present fields as a JSON object, carried into event payloads.
    pub field_json: Option<serde_json::Value>,
}

/// Neighbor lookup for roaming fences: (key, pattern, center, meters) →
/// matching (id, distance) pairs.
pub type RoamLookup<'a> = &'a dyn Fn(&str, &Glob, Point<f64>, f64) -> Vec<(Arc<str>, f64)>;

/// Classify a mutation against one hook. Returns the JSON payloads to
/// deliver, in emission order.
pub fn match_mutation(hook: &mut Hook, m: &Mutation, roam_lookup: RoamLookup) -> Vec<String> {
    if !hook.query.pattern.matches(m.id) {
        return Vec::new();
    }
    let filters_pass = hook.query.wheres.iter().all(|w| w.matches(m.field));

    if hook.query.roam.is_some() {
        return match_roam(hook, m, filters_pass, roam_lookup);
    }

    let old_known = hook.states.contains_key(m.id);
    let old_match = hook.states.get(m.id).copied().unwrap_or(false);
    let new_match = match m.new {
        Some(value) if m.command != "del" => filters_pass && hook.query.predicate(value),
        _ => false,
    };

    let detect = hook.query.detect;
    let mut detects: Vec<&str> = Vec::new();
    match (old_match, new_match) {
        (false, true) => {
            detects.push("enter");
            if detect.has(DetectSet::INSIDE) {
                detects.push("inside");
            }
        }
        (true, false) => {
            detects.push("exit");
            if detect.has(DetectSet::OUTSIDE) {
                detects.push("outside");
            }
        }
        (true, true) => {
            if !hook.query.nodwell {
                detects.push("inside");
            }
        }
        (false, false) => {
            if detect.has(DetectSet::OUTSIDE) && !hook.query.nodwell && old_known {
                detects.push("outside");
            }
        }
    }
    if detect.has(DetectSet::CROSS) && crossed_boundary(m, old_match, new_match) {
        detects.push("cross");
    }

    if m.command == "del" {
        hook.states.remove(m.id);
    } else {
        hook.states.insert(m.id.clone(), new_match);
    }

    let group = uuid::Uuid::new_v4().simple().to_string();
    detects
        .into_iter()
        .filter(|d| enabled(detect, d))
        .map(|d| event_payload(hook, m, d, &group, None))
        .collect()
}

fn enabled(detect: DetectSet, name: &str) -> bool {
    match name {
        "enter" => detect.has(DetectSet::ENTER),
        "exit" => detect.has(DetectSet::EXIT),
        "inside" => detect.has(DetectSet::INSIDE),
        "outside" => detect.has(DetectSet::OUTSIDE),
        "cross" => detect.has(DetectSet::CROSS),
        _ => true,
    }
}

/// Boundary crossing applies to line movements only: point moves report
/// enter/exit without a cross event.
fn crossed_boundary(m: &Mutation, old_match: bool, new_match: bool) -> bool {
    if old_match == new_match {
        return false;
    }
    let is_line = |v: &ObjectValue| {
        matches!(
            v,
            ObjectValue::Geo(g) if matches!(
                g.geom,
                Geometry::LineString(_) | Geometry::MultiLineString(_)
            )
        )
    };
    match (m.old, m.new) {
        (Some(old), Some(new)) => is_line(old) || is_line(new),
        _ => false,
    }
}

fn match_roam(
    hook: &mut Hook,
    m: &Mutation,
    filters_pass: bool,
    roam_lookup: RoamLookup,
) -> Vec<String> {
    let roam = hook.query.roam.clone().expect("roam fence");
    let previous = hook.roam_states.remove(m.id).unwrap_or_default();

    let current: Vec<(Arc<str>, f64)> = match m.new {
        Some(value) if m.command != "del" && filters_pass => {
            roam_lookup(&roam.key, &roam.pattern, value.center(), roam.meters)
        }
        _ => Vec::new(),
    };
    let current_ids: HashSet<Arc<str>> = current.iter().map(|(id, _)| id.clone()).collect();

    let group = uuid::Uuid::new_v4().simple().to_string();
    let mut events = Vec::new();
    for (nid, meters) in &current {
        if !previous.contains(nid) {
            let info = json!({"key": roam.key, "id": nid.as_ref(), "meters": meters});
            events.push(event_payload(hook, m, "roam", &group, Some(("nearby", info))));
        }
    }
    for nid in previous.difference(&current_ids) {
        let info = json!({"key": roam.key, "id": nid.as_ref()});
        events.push(event_payload(hook, m, "roam", &group, Some(("faraway", info))));
    }

    if m.command != "del" && !current_ids.is_empty() {
        hook.roam_states.insert(m.id.clone(), current_ids);
    }
    events
}

fn event_payload(
    hook: &Hook,
    m: &Mutation,
    detect: &str,
    group: &str,
    extra: Option<(&str, serde_json::Value)>,
) -> String {
    let mut event = json!({
        "command": m.command,
        "group": group,
        "detect": detect,
        "key": m.key,
        "time": chrono::Utc::now().to_rfc3339(),
        "id": m.id.as_ref(),
    });
    let map = event.as_object_mut().unwrap();
    if hook.is_channel() {
        map.insert("channel".to_string(), json!(hook.name));
    } else {
        map.insert("hook".to_string(), json!(hook.name));
    }
    if let Some(value) = m.new.or(m.old) {
        map.insert("object".to_string(), value.to_json());
    }
    if let Some(fields) = &m.field_json {
        map.insert("fields".to_string(), fields.clone());
    }
    if let Some((name, value)) = extra {
        map.insert(name.to_string(), value);
    }
    event.to_string()
}
