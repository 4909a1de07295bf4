//! R-tree over object bounding rectangles.
//!
//! Entries carry the object id and its envelope at insert time; the owner
//! must remove with the same rectangle it inserted (the collection keeps the
//! authoritative object and re-derives it). Nearest-neighbor iteration
//! orders by meters to the envelope so callers can cut off by real-world
//! radius.

use std::sync::Arc;

use geo::{Point, Rect, coord};
use rstar::{AABB, PointDistance, RTree, RTreeObject};

use crate::geom;

#[derive(Debug, Clone)]
pub struct SpatialEntry {
    pub id: Arc<str>,
    min: [f64; 2],
    max: [f64; 2],
}

impl SpatialEntry {
    fn new(id: Arc<str>, rect: &Rect<f64>) -> Self {
        Self {
            id,
            min: [rect.min().x, rect.min().y],
            max: [rect.max().x, rect.max().y],
        }
    }

    pub fn rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.min[0], y: self.min[1] },
            coord! { x: self.max[0], y: self.max[1] },
        )
    }
}

impl PartialEq for SpatialEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl RTreeObject for SpatialEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

impl PointDistance for SpatialEntry {
    /// Squared meters from the query point to the entry envelope. The tree's
    /// internal degree-space node estimates always underestimate this, which
    /// keeps best-first traversal ordering valid.
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let d = geom::point_rect_distance(Point::new(point[0], point[1]), &self.rect());
        d * d
    }
}

#[derive(Debug, Default)]
pub struct SpatialIndex {
    tree: RTree<SpatialEntry>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn insert(&mut self, id: Arc<str>, rect: &Rect<f64>) {
        self.tree.insert(SpatialEntry::new(id, rect));
    }

    pub fn remove(&mut self, id: &Arc<str>, rect: &Rect<f64>) -> bool {
        self.tree.remove(&SpatialEntry::new(id.clone(), rect)).is_some()
    }

    /// Visit every entry whose envelope overlaps `rect`. The visitor returns
    /// false to stop early.
    pub fn search<F>(&self, rect: &Rect<f64>, mut visit: F)
    where
        F: FnMut(&SpatialEntry) -> bool,
    {
        let envelope = AABB::from_corners(
            [rect.min().x, rect.min().y],
            [rect.max().x, rect.max().y],
        );
        for entry in self.tree.locate_in_envelope_intersecting(&envelope) {
            if !visit(entry) {
                return;
            }
        }
    }

    /// Entries in non-decreasing envelope distance (meters) from the target.
    pub fn nearby(&self, target: Point<f64>) -> impl Iterator<Item = (&SpatialEntry, f64)> {
        self.tree
            .nearest_neighbor_iter_with_distance_2(&[target.x(), target.y()])
            .map(|(entry, d2)| (entry, d2.sqrt()))
    }

    /// Componentwise bounds of every indexed rectangle.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        let mut it = self.tree.iter();
        let first = it.next()?;
        let mut min = first.min;
        let mut max = first.max;
        for e in it {
            min[0] = min[0].min(e.min[0]);
            min[1] = min[1].min(e.min[1]);
            max[0] = max[0].max(e.max[0]);
            max[1] = max[1].max(e.max[1]);
        }
        Some(Rect::new(
            coord! { x: min[0], y: min[1] },
            coord! { x: max[0], y: max[1] },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt_rect(x: f64, y: f64) -> Rect<f64> {
        Rect::new(coord! { x: x, y: y }, coord! { x: x, y: y })
    }

    #[test]
    fn insert_search_remove() {
        let mut index = SpatialIndex::new();
        index.insert(Arc::from("a"), &pt_rect(1.0, 1.0));
        index.insert(Arc::from("b"), &pt_rect(5.0, 5.0));
        index.insert(Arc::from("c"), &pt_rect(50.0, 50.0));

        let window = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 });
        let mut seen = Vec::new();
        index.search(&window, |e| {
            seen.push(e.id.to_string());
            true
        });
        seen.sort();
        assert_eq!(seen, vec!["a", "b"]);

        assert!(index.remove(&Arc::from("b"), &pt_rect(5.0, 5.0)));
        assert!(!index.remove(&Arc::from("b"), &pt_rect(5.0, 5.0)));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn nearby_orders_by_distance() {
        let mut index = SpatialIndex::new();
        index.insert(Arc::from("near"), &pt_rect(1.0, 1.0));
        index.insert(Arc::from("mid"), &pt_rect(3.0, 3.0));
        index.insert(Arc::from("far"), &pt_rect(20.0, 20.0));

        let order: Vec<String> = index
            .nearby(Point::new(0.0, 0.0))
            .map(|(e, _)| e.id.to_string())
            .collect();
        assert_eq!(order, vec!["near", "mid", "far"]);

        let dists: Vec<f64> = index.nearby(Point::new(0.0, 0.0)).map(|(_, d)| d).collect();
        assert!(dists.windows(2).all(|w| w[0] <= w[1]));
        // ~157 km for one degree of diagonal at the equator
        assert!(dists[0] > 150_000.0 && dists[0] < 165_000.0);
    }

    #[test]
    fn early_stop_search() {
        let mut index = SpatialIndex::new();
        for i in 0..100 {
            index.insert(Arc::from(format!("id{i}")), &pt_rect(i as f64 * 0.001, 0.0));
        }
        let mut count = 0;
        let window = Rect::new(coord! { x: -1.0, y: -1.0 }, coord! { x: 1.0, y: 1.0 });
        index.search(&window, |_| {
            count += 1;
            count < 10
        });
        assert_eq!(count, 10);
    }

    #[test]
    fn bounds_cover_all_entries() {
        let mut index = SpatialIndex::new();
        assert!(index.bounds().is_none());
        index.insert(Arc::from("a"), &pt_rect(-10.0, -5.0));
        index.insert(Arc::from("b"), &pt_rect(20.0, 15.0));
        let b = index.bounds().unwrap();
        assert_eq!(b.min().x, -10.0);
        assert_eq!(b.min().y, -5.0);
        assert_eq!(b.max().x, 20.0);
        assert_eq!(b.max().y, 15.0);
    }
}
