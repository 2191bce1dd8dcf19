//! Static packed R-tree over record positions.
//!
//! Built once per reconcile with sort-tile-recursive packing: entries are sorted
//! into vertical slices by longitude, each slice is sorted by latitude and cut
//! into full nodes, and the same packing is applied to each level's node
//! rectangles until a single root remains.

use std::ops::Range;

use catastro_source::{BoundingBox, Point};

const NODE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Rect {
    south: f64,
    north: f64,
    west: f64,
    east: f64,
}

impl Rect {
    fn of_point(p: &Point) -> Self {
        Self {
            south: p.lat,
            north: p.lat,
            west: p.lon,
            east: p.lon,
        }
    }

    fn expand(self, other: Self) -> Self {
        Self {
            south: self.south.min(other.south),
            north: self.north.max(other.north),
            west: self.west.min(other.west),
            east: self.east.max(other.east),
        }
    }

    fn center(&self) -> (f64, f64) {
        ((self.west + self.east) / 2.0, (self.south + self.north) / 2.0)
    }

    fn intersects(&self, bbox: &BoundingBox) -> bool {
        self.south <= bbox.north()
            && self.north >= bbox.south()
            && self.west <= bbox.east()
            && self.east >= bbox.west()
    }
}

#[derive(Debug, Clone)]
struct Node {
    rect: Rect,
    /// Entry range for leaves, node range in the level below otherwise
    children: Range<usize>,
}

/// Point index answering bounding-box range queries.
#[derive(Debug)]
pub struct SpatialIndex {
    /// (position, caller's item index), in packed order
    entries: Vec<(Point, usize)>,
    /// `levels[0]` are leaves; the last level holds the root
    levels: Vec<Vec<Node>>,
}

impl SpatialIndex {
    /// Index `(position, item)` pairs; `item` is handed back by queries.
    pub fn build(mut entries: Vec<(Point, usize)>) -> Self {
        if entries.is_empty() {
            return Self {
                entries,
                levels: Vec::new(),
            };
        }

        str_pack(&mut entries, |(p, _)| (p.lon, p.lat));
        let leaves = group(entries.len(), |range| {
            entries[range]
                .iter()
                .map(|(p, _)| Rect::of_point(p))
                .reduce(Rect::expand)
        });

        let mut levels = vec![leaves];
        loop {
            let Some(below) = levels.last_mut() else {
                break;
            };
            if below.len() <= 1 {
                break;
            }
            str_pack(below, |node| node.rect.center());
            let above = group(below.len(), |range| {
                below[range].iter().map(|node| node.rect).reduce(Rect::expand)
            });
            levels.push(above);
        }

        Self { entries, levels }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Items whose position lies inside `bbox` (edges inclusive), in ascending item order.
    #[must_use]
    pub fn query(&self, bbox: &BoundingBox) -> Vec<usize> {
        let Some(root_level) = self.levels.len().checked_sub(1) else {
            return Vec::new();
        };

        let mut hits = Vec::new();
        let mut stack: Vec<(usize, usize)> = (0..self.levels[root_level].len())
            .map(|i| (root_level, i))
            .collect();

        while let Some((level, idx)) = stack.pop() {
            let node = &self.levels[level][idx];
            if !node.rect.intersects(bbox) {
                continue;
            }
            if level == 0 {
                hits.extend(
                    self.entries[node.children.clone()]
                        .iter()
                        .filter(|(p, _)| bbox.contains(p))
                        .map(|&(_, item)| item),
                );
            } else {
                stack.extend(node.children.clone().map(|child| (level - 1, child)));
            }
        }

        hits.sort_unstable();
        hits
    }
}

/// Reorder `items` in sort-tile-recursive order so consecutive runs of
/// `NODE_CAPACITY` form spatially compact groups.
fn str_pack<T>(items: &mut [T], key: impl Fn(&T) -> (f64, f64)) {
    let node_count = items.len().div_ceil(NODE_CAPACITY);
    // ceil(sqrt(node_count)) without float rounding surprises
    let mut slices = 1;
    while slices * slices < node_count {
        slices += 1;
    }
    let slice_len = slices * NODE_CAPACITY;

    items.sort_by(|a, b| key(a).0.total_cmp(&key(b).0));
    for slice in items.chunks_mut(slice_len) {
        slice.sort_by(|a, b| key(a).1.total_cmp(&key(b).1));
    }
}

/// One node per run of `NODE_CAPACITY` children over `0..len`.
fn group(len: usize, bounds: impl Fn(Range<usize>) -> Option<Rect>) -> Vec<Node> {
    (0..len)
        .step_by(NODE_CAPACITY)
        .filter_map(|start| {
            let children = start..(start + NODE_CAPACITY).min(len);
            bounds(children.clone()).map(|rect| Node { rect, children })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scatter(n: usize) -> Vec<(Point, usize)> {
        // Deterministic spread over a small box around San Juan
        (0..n)
            .map(|i| {
                let a = (i * 7919 % 1000) as f64 / 1000.0;
                let b = (i * 104_729 % 997) as f64 / 997.0;
                (Point::new(18.40 + 0.08 * a, -66.10 + 0.08 * b), i)
            })
            .collect()
    }

    fn linear(entries: &[(Point, usize)], bbox: &BoundingBox) -> Vec<usize> {
        entries
            .iter()
            .filter(|(p, _)| bbox.contains(p))
            .map(|&(_, i)| i)
            .collect()
    }

    #[test]
    fn test_matches_linear_scan() {
        let entries = scatter(5_000);
        let index = SpatialIndex::build(entries.clone());
        assert_eq!(index.len(), 5_000);
        assert!(index.levels.len() >= 3, "5000 entries need more than two levels");

        for bbox in [
            BoundingBox::new(18.42, 18.45, -66.08, -66.05).unwrap(),
            BoundingBox::new(18.40, 18.48, -66.10, -66.02).unwrap(),
            BoundingBox::new(18.0, 18.1, -67.0, -66.9).unwrap(),
            BoundingBox::new(18.4399, 18.4401, -66.0601, -66.0599).unwrap(),
        ] {
            assert_eq!(index.query(&bbox), linear(&entries, &bbox), "{bbox}");
        }
    }

    #[test]
    fn test_edges_are_inclusive() {
        let entries = vec![
            (Point::new(18.0, -66.0), 0),
            (Point::new(18.5, -65.5), 1),
            (Point::new(18.6, -65.5), 2),
        ];
        let index = SpatialIndex::build(entries);
        let bbox = BoundingBox::new(18.0, 18.5, -66.0, -65.5).unwrap();
        assert_eq!(index.query(&bbox), vec![0, 1]);
    }

    #[test]
    fn test_empty_and_tiny_indexes() {
        let empty = SpatialIndex::build(Vec::new());
        assert!(empty.is_empty());
        let bbox = BoundingBox::new(18.0, 19.0, -67.0, -66.0).unwrap();
        assert!(empty.query(&bbox).is_empty());

        let one = SpatialIndex::build(vec![(Point::new(18.5, -66.5), 42)]);
        assert_eq!(one.levels.len(), 1);
        assert_eq!(one.query(&bbox), vec![42]);
    }

    #[test]
    fn test_duplicate_positions_are_all_returned() {
        let p = Point::new(18.44, -66.06);
        let index = SpatialIndex::build((0..40).map(|i| (p, i)).collect());
        let bbox = BoundingBox::new(18.43, 18.45, -66.07, -66.05).unwrap();
        assert_eq!(index.query(&bbox), (0..40).collect::<Vec<_>>());
    }
}
