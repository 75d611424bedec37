//! Point, range and k-nearest-neighbour queries.

use super::Slbrin;
use crate::geohash::CellRange;
use crate::io_cost::{IoCost, pages_for_items};
use geo::Point;
use rustc_hash::FxHashSet;
use slbrin_types::region::RELATION_ALL;
use slbrin_types::{PayloadId, Record, Region};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

/// A kNN result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: PayloadId,
    pub point: Point<f64>,
    pub distance: f64,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    dist2: f64,
    id: PayloadId,
    point: Point<f64>,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist2
            .total_cmp(&other.dist2)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Bounded max-heap keeping the `k` best candidates.
struct NearestK {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl NearestK {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    fn kth_dist2(&self) -> f64 {
        if self.is_full() {
            self.heap.peek().map_or(f64::INFINITY, |c| c.dist2)
        } else {
            f64::INFINITY
        }
    }

    fn offer(&mut self, record: &Record, center: &Point<f64>) {
        let cand = Candidate {
            dist2: record.distance_squared(center),
            id: record.id,
            point: record.point,
        };
        if !self.is_full() {
            self.heap.push(cand);
        } else if self.heap.peek().is_some_and(|top| cand < *top) {
            self.heap.pop();
            self.heap.push(cand);
        }
    }

    fn into_neighbors(self) -> Vec<Neighbor> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| Neighbor {
                id: c.id,
                point: c.point,
                distance: c.dist2.sqrt(),
            })
            .collect()
    }
}

impl Slbrin {
    /// Payload ids of every record whose key equals the key of `point`.
    pub fn point_query(&self, point: &Point<f64>, io: &mut IoCost) -> SmallVec<[PayloadId; 4]> {
        let mut result = SmallVec::new();
        let key = self.meta.geohash.encode(point);
        let Some(index) = self.binary_search_partition(key) else {
            return result;
        };
        let partition = &self.partitions[index];
        let range = partition.key_range.clone();
        let bounds = partition.search_bounds(key);
        io.charge(pages_for_items(bounds.len()).max(1));

        let mut pos = self.items.lower_bound(bounds.clone(), key);
        let missed_left = pos == bounds.start
            && bounds.start > range.start
            && self.items.get(bounds.start - 1).is_some_and(|r| r.key >= key);
        let missed_right = pos == bounds.end && bounds.end < range.end;
        if missed_left || missed_right {
            log::debug!("Key {key} outside the error window of partition {index}");
            io.charge(pages_for_items(range.len()));
            pos = self.items.lower_bound(range.clone(), key);
        }

        result.extend(
            self.items
                .records(pos..range.end)
                .take_while(|r| r.key == key)
                .map(|r| r.id),
        );

        if let Some(delta) = self.deltas.get(index).filter(|d| !d.is_empty()) {
            io.charge(pages_for_items(delta.len()));
            result.extend(delta.records().iter().filter(|r| r.key == key).map(|r| r.id));
        }
        result
    }

    /// Partitions that may hold records inside `window`, each with the union
    /// of the relations of its overlapping cells.
    ///
    /// A window whose corners fall into one partition maps to that partition
    /// with every edge flagged.
    pub fn range_partitions(&self, window: &Region) -> BTreeMap<usize, u8> {
        let mut result = BTreeMap::new();
        let (low, high) = self.window_keys(window);
        let (Some(first), Some(last)) = (
            self.binary_search_partition(low),
            self.binary_search_partition(high),
        ) else {
            return result;
        };
        if first == last {
            result.insert(first, RELATION_ALL);
            return result;
        }

        self.for_each_cell_partition(window, first, |index, cell| {
            *result.entry(index).or_insert(0) |= cell.relation;
        });
        result
    }

    /// Payload ids of every record inside `window`, edges included.
    pub fn range_query(&self, window: &Region, io: &mut IoCost) -> Vec<PayloadId> {
        let mut result = Vec::new();
        let (low, high) = self.window_keys(window);
        let (Some(first), Some(last)) = (
            self.binary_search_partition(low),
            self.binary_search_partition(high),
        ) else {
            return result;
        };

        if first == last {
            let range = self.partitions[first].key_range.clone();
            io.charge(pages_for_items(range.len()));
            let start = self.items.lower_bound(range.clone(), low);
            let end = self.items.lower_bound(range, high.saturating_add(1));
            result.extend(
                self.items
                    .records(start..end)
                    .filter(|r| window.contains(&r.point))
                    .map(|r| r.id),
            );
            self.scan_deltas([first], window, io, &mut result);
            return result;
        }

        let region = *self.meta.geohash.region();
        let mut touched = BTreeSet::new();
        self.for_each_cell_partition(window, first, |index, cell| {
            let partition = &self.partitions[index];
            if touched.insert(index) {
                io.charge(pages_for_items(partition.count));
            }
            let range = partition.key_range.clone();
            let cell_end = self.meta.geohash.cell_end(cell.value, cell.length);
            let start = self.items.lower_bound(range.clone(), cell.value.max(low));
            let end = self.items.lower_bound(range, cell_end.min(high.saturating_add(1)));
            result.extend(
                self.items
                    .records(start..end)
                    .filter(|r| in_window(window, &region, r, cell.relation))
                    .map(|r| r.id),
            );
        });
        self.scan_deltas(touched, window, io, &mut result);
        result
    }

    /// Partitions overlapping `window`, nearest to `point` first, with the
    /// squared distance from `point` to each partition's scope.
    pub fn knn_partitions(&self, window: &Region, point: &Point<f64>) -> Vec<(usize, f64)> {
        let mut result: Vec<(usize, f64)> = self
            .range_partitions(window)
            .into_keys()
            .map(|i| (i, self.partitions[i].scope.min_distance_squared(point)))
            .collect();
        result.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        result
    }

    /// The `k` records nearest to `point`, nearest first; ties go to the
    /// smaller payload id.
    pub fn knn_query(&self, point: &Point<f64>, k: usize, io: &mut IoCost) -> Vec<Neighbor> {
        let total = self.len();
        if k == 0 || total == 0 {
            return Vec::new();
        }
        let region = *self.meta.geohash.region();
        let cells = (1u64 << self.meta.geohash.bits_per_dim()) as f64;
        let unit = region.width().max(region.height()) / cells;
        let mut half = ((region.area() * k as f64 / total as f64).sqrt() / 2.0).max(unit);

        let mut nearest = NearestK::new(k);
        let mut scanned: FxHashSet<usize> = FxHashSet::default();
        loop {
            let window = Region::around(point, half);
            for (index, dist2) in self.knn_partitions(&window, point) {
                if scanned.contains(&index) {
                    continue;
                }
                if dist2 > nearest.kth_dist2() {
                    break;
                }
                scanned.insert(index);
                let partition = &self.partitions[index];
                io.charge(pages_for_items(partition.count));
                for record in self.items.records(partition.key_range.clone()) {
                    nearest.offer(record, point);
                }
                if let Some(delta) = self.deltas.get(index).filter(|d| !d.is_empty()) {
                    io.charge(pages_for_items(delta.len()));
                    for record in delta.records() {
                        nearest.offer(record, point);
                    }
                }
            }

            let done = nearest.is_full() && nearest.kth_dist2() <= half * half;
            if done || window.contains_region(&region) {
                break;
            }
            half *= 2.0;
        }
        nearest.into_neighbors()
    }

    fn window_keys(&self, window: &Region) -> (u64, u64) {
        let geohash = &self.meta.geohash;
        (geohash.encode(&window.min()), geohash.encode(&window.max()))
    }

    /// Walk the window's cells once, calling `f` for every (partition, cell)
    /// pair whose key intervals overlap.
    fn for_each_cell_partition<F>(&self, window: &Region, first: usize, mut f: F)
    where
        F: FnMut(usize, &CellRange),
    {
        let geohash = &self.meta.geohash;
        let (low, high) = self.window_keys(window);
        let mut current = first;
        for cell in geohash.ranges_by_window(low, high, *window, self.meta.max_length) {
            let cell_end = geohash.cell_end(cell.value, cell.length);
            while current + 1 < self.partitions.len()
                && self.partitions[current].next_value <= cell.value
            {
                current += 1;
            }
            let mut index = current;
            while index < self.partitions.len() && self.partitions[index].value < cell_end {
                f(index, &cell);
                index += 1;
            }
        }
    }

    fn scan_deltas<I>(
        &self,
        partitions: I,
        window: &Region,
        io: &mut IoCost,
        out: &mut Vec<PayloadId>,
    ) where
        I: IntoIterator<Item = usize>,
    {
        for index in partitions {
            let Some(delta) = self.deltas.get(index).filter(|d| !d.is_empty()) else {
                continue;
            };
            io.charge(pages_for_items(delta.len()));
            out.extend(
                delta
                    .records()
                    .iter()
                    .filter(|r| window.contains(&r.point))
                    .map(|r| r.id),
            );
        }
    }
}

/// Window test that trusts the cell relation for points inside the indexed
/// region. Points stored outside it were clamped into an edge cell and get the
/// full test.
fn in_window(window: &Region, region: &Region, record: &Record, relation: u8) -> bool {
    if region.contains(&record.point) {
        window.satisfies_edges(&record.point, relation)
    } else {
        window.contains(&record.point)
    }
}
