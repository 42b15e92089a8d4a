//! Bounding-box R-tree used to prune point-query candidates

use rstar::{AABB, RTree, RTreeObject};

use crate::store::ImageSnapshot;

/// Entry in the index: a mask's bbox and its position in the snapshot's mask list
#[derive(Debug, Clone)]
pub struct MaskEntry {
    /// Index into `ImageSnapshot::masks()`
    pub index: usize,
    /// Inclusive pixel corners
    lower: [i64; 2],
    upper: [i64; 2],
}

impl RTreeObject for MaskEntry {
    type Envelope = AABB<[i64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.lower, self.upper)
    }
}

/// Spatial index over the bboxes of one snapshot's masks
pub struct MaskIndex {
    tree: RTree<MaskEntry>,
}

impl MaskIndex {
    /// Build from a snapshot; masks with an empty bbox are never candidates
    pub fn build(snapshot: &ImageSnapshot) -> Self {
        let entries = snapshot
            .masks()
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.bbox().is_empty())
            .map(|(index, m)| {
                let b = m.bbox();
                MaskEntry {
                    index,
                    lower: [b.x as i64, b.y as i64],
                    upper: [(b.x + b.w - 1) as i64, (b.y + b.h - 1) as i64],
                }
            })
            .collect();

        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Indices of masks whose bbox contains (x, y)
    pub fn candidates(&self, x: u32, y: u32) -> impl Iterator<Item = usize> + '_ {
        let point = AABB::from_point([x as i64, y as i64]);
        self.tree
            .locate_in_envelope_intersecting(&point)
            .map(|entry| entry.index)
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}
