//! A keyed collection of objects.
//!
//! Composes the ordered id index (iteration, scans), the R-tree (spatial
//! queries), and the value index (lexicographic scans over string objects),
//! plus the interned field table and the counters the STATS command reports.
//! All mutation goes through `set`/`delete`/`set_field` so the indexes and
//! counters never drift.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;

use geo::{Point, Rect};

use crate::error::{Error, Result};
use crate::fields::{self, FieldMap};
use crate::object::{Object, ObjectValue};
use crate::spatial_index::{SpatialEntry, SpatialIndex};

#[derive(Debug, Default)]
pub struct Collection {
    items: BTreeMap<Arc<str>, Object>,
    index: SpatialIndex,
    values: BTreeSet<(Arc<str>, Arc<str>)>,
    field_map: FieldMap,
    weight: u64,
    points: u64,
    strings: u64,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn string_count(&self) -> u64 {
        self.strings
    }

    pub fn point_count(&self) -> u64 {
        self.points
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn field_map(&self) -> &FieldMap {
        &self.field_map
    }

    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.index.bounds()
    }

    pub fn get(&self, id: &str) -> Option<&Object> {
        self.items.get(id)
    }

    /// Insert or replace. Returns the prior object when the id existed.
    /// A replacement that carries no fields adopts the prior object's.
    pub fn set(&mut self, mut obj: Object) -> Option<Object> {
        let prior = self.remove_inner(&obj.id.clone());
        if obj.fields.is_empty()
            && let Some(prev) = &prior
        {
            obj.fields = prev.fields.clone();
        }
        self.insert_inner(obj);
        prior
    }

    /// Remove an id from every index. Returns the removed object.
    pub fn delete(&mut self, id: &str) -> Option<Object> {
        self.remove_inner(id)
    }

    /// Upsert a single field. Returns whether the stored value changed.
    pub fn set_field(&mut self, id: &str, name: &str, value: f64) -> Result<bool> {
        let obj = self.items.get_mut(id).ok_or(Error::IdNotFound)?;
        let idx = self.field_map.assign(name);
        let before = obj.weight();
        let changed = fields::set_value(&mut obj.fields, idx, value);
        let after = obj.weight();
        self.weight = self.weight - before + after;
        Ok(changed)
    }

    /// Batch field upsert. Returns how many stored values changed.
    pub fn set_fields(&mut self, id: &str, pairs: &[(String, f64)]) -> Result<usize> {
        if !self.items.contains_key(id) {
            return Err(Error::IdNotFound);
        }
        let mut changed = 0;
        for (name, value) in pairs {
            if self.set_field(id, name, *value)? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn insert_inner(&mut self, obj: Object) {
        match &obj.value {
            ObjectValue::String(_) => {
                self.strings += 1;
                self.values.insert((obj.value.string_form(), obj.id.clone()));
            }
            spatial => {
                if let Some(rect) = spatial.rect() {
                    self.index.insert(obj.id.clone(), &rect);
                }
            }
        }
        self.points += obj.value.num_points() as u64;
        self.weight += obj.weight();
        self.items.insert(obj.id.clone(), obj);
    }

    fn remove_inner(&mut self, id: &str) -> Option<Object> {
        let obj = self.items.remove(id)?;
        match &obj.value {
            ObjectValue::String(_) => {
                self.strings -= 1;
                self.values.remove(&(obj.value.string_form(), obj.id.clone()));
            }
            spatial => {
                if let Some(rect) = spatial.rect() {
                    self.index.remove(&obj.id, &rect);
                }
            }
        }
        self.points -= obj.value.num_points() as u64;
        self.weight -= obj.weight();
        Some(obj)
    }

    /// Walk the id index in order. The visitor returns false to stop.
    pub fn scan<F>(&self, desc: bool, mut visit: F)
    where
        F: FnMut(&Object) -> bool,
    {
        if desc {
            for (_, obj) in self.items.iter().rev() {
                if !visit(obj) {
                    return;
                }
            }
        } else {
            for (_, obj) in self.items.iter() {
                if !visit(obj) {
                    return;
                }
            }
        }
    }

    /// Walk ids in `[start, end)` lexicographically.
    pub fn scan_range<F>(&self, start: &str, end: &str, desc: bool, mut visit: F)
    where
        F: FnMut(&Object) -> bool,
    {
        let range = self
            .items
            .range::<str, _>((Bound::Included(start), Bound::Excluded(end)));
        if desc {
            for (_, obj) in range.rev() {
                if !visit(obj) {
                    return;
                }
            }
        } else {
            for (_, obj) in range {
                if !visit(obj) {
                    return;
                }
            }
        }
    }

    /// Walk string objects ordered by (value, id).
    pub fn search_values<F>(&self, desc: bool, mut visit: F)
    where
        F: FnMut(&Object) -> bool,
    {
        let mut step = |entry: &(Arc<str>, Arc<str>)| -> bool {
            match self.items.get(&entry.1) {
                Some(obj) => visit(obj),
                None => true,
            }
        };
        if desc {
            for entry in self.values.iter().rev() {
                if !step(entry) {
                    return;
                }
            }
        } else {
            for entry in self.values.iter() {
                if !step(entry) {
                    return;
                }
            }
        }
    }

    /// Walk string objects whose value falls in `[start, end)`.
    pub fn search_values_range<F>(&self, start: &str, end: &str, desc: bool, mut visit: F)
    where
        F: FnMut(&Object) -> bool,
    {
        let lo: (Arc<str>, Arc<str>) = (Arc::from(start), Arc::from(""));
        let hi: (Arc<str>, Arc<str>) = (Arc::from(end), Arc::from(""));
        let range = self.values.range((Bound::Included(lo), Bound::Excluded(hi)));
        let mut step = |entry: &(Arc<str>, Arc<str>)| -> bool {
            match self.items.get(&entry.1) {
                Some(obj) => visit(obj),
                None => true,
            }
        };
        if desc {
            for entry in range.rev() {
                if !step(entry) {
                    return;
                }
            }
        } else {
            for entry in range {
                if !step(entry) {
                    return;
                }
            }
        }
    }

    /// Visit objects whose bounds overlap `rect`, unordered.
    pub fn search_rect<F>(&self, rect: &Rect<f64>, mut visit: F)
    where
        F: FnMut(&Object) -> bool,
    {
        self.index.search(rect, |entry| match self.items.get(&entry.id) {
            Some(obj) => visit(obj),
            None => true,
        });
    }

    /// Spatial entries in non-decreasing envelope distance from `target`.
    pub fn nearby(&self, target: Point<f64>) -> impl Iterator<Item = (&SpatialEntry, f64)> {
        self.index.nearby(target)
    }
}
