//! A bulk-loaded R-tree over axis-aligned bounding boxes, keyed to
//! whatever handle the caller wants to look up by bbox — a tile during a
//! render pass, a cell during hit-testing. The index owns no geometry
//! itself; it only ever stores `(bbox, handle)` leaves.

use geometry::BBox;
use rstar::{RTree, RTreeObject, AABB};

#[derive(Debug, Clone)]
struct Entry<T> {
    bbox: BBox,
    value: T,
}

impl<T> RTreeObject for Entry<T> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners([self.bbox.min_x, self.bbox.min_y], [self.bbox.max_x, self.bbox.max_y])
    }
}

/// Lifetime is tied to a single render pass: `insert_many` replaces the
/// whole tree, and `clear` empties it ahead of the next render.
pub struct SpatialIndex<T> {
    tree: RTree<Entry<T>>,
}

impl<T> Default for SpatialIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SpatialIndex<T> {
    pub fn new() -> Self {
        Self { tree: RTree::new() }
    }

    /// Bulk-loads a fresh index from `entries`, discarding whatever was
    /// there before. O(n log n).
    pub fn insert_many(&mut self, entries: impl IntoIterator<Item = (BBox, T)>) {
        let entries: Vec<Entry<T>> =
            entries.into_iter().map(|(bbox, value)| Entry { bbox, value }).collect();
        self.tree = RTree::bulk_load(entries);
    }

    /// Returns every entry whose bbox intersects `bbox`. Output-sensitive;
    /// no ordering is guaranteed.
    pub fn query(&self, bbox: BBox) -> impl Iterator<Item = &T> {
        let aabb = AABB::from_corners([bbox.min_x, bbox.min_y], [bbox.max_x, bbox.max_y]);
        self.tree.locate_in_envelope_intersecting(&aabb).map(|entry| &entry.value)
    }

    pub fn clear(&mut self) {
        self.tree = RTree::new();
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}
