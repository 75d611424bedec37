//! Fixed-slot item array.
//!
//! Partition `i` owns slots `i * slot_size .. (i + 1) * slot_size`. Its records
//! fill the front of the slot in key order and the rest is padding, so merges
//! append in place until a slot overflows.

use super::meta::Partition;
use crate::io_cost::pages_for_items;
use serde::{Deserialize, Serialize};
use slbrin_types::Record;
use std::ops::Range;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemArray {
    slot_size: usize,
    slots: Vec<Option<Record>>,
}

impl ItemArray {
    /// Lay out key-sorted `records` whose partitions currently point at
    /// contiguous ranges of `records`; rewrites every `key_range`.
    pub fn layout(records: Vec<Record>, partitions: &mut [Partition], slot_size: usize) -> Self {
        let slot_size = slot_size.max(1);
        let mut slots = vec![None; partitions.len() * slot_size];
        for (i, partition) in partitions.iter_mut().enumerate() {
            let base = i * slot_size;
            for (offset, record) in records[partition.key_range.clone()].iter().enumerate() {
                slots[base + offset] = Some(*record);
            }
            partition.key_range = base..base + partition.count;
        }
        Self { slot_size, slots }
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Total slots, padding included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn records(&self, range: Range<usize>) -> impl Iterator<Item = &Record> + '_ {
        self.slots[range].iter().flatten()
    }

    /// First position in `range` whose key is not below `key`.
    pub fn lower_bound(&self, range: Range<usize>, key: u64) -> usize {
        let start = range.start;
        start + self.slots[range].partition_point(|slot| matches!(slot, Some(r) if r.key < key))
    }

    /// Unused slots left to `partition`.
    pub fn free(&self, partition: &Partition) -> usize {
        self.slot_size.saturating_sub(partition.count)
    }

    /// Merge key-sorted `delta` into the partition's slot, from the back.
    ///
    /// Stored records stay ahead of delta records with the same key. The
    /// caller guarantees the slot has room.
    pub fn merge(&mut self, partition: &mut Partition, delta: &[Record]) {
        let base = partition.key_range.start;
        let mut i = partition.count;
        let mut j = delta.len();
        let mut k = partition.count + delta.len();
        while j > 0 {
            k -= 1;
            let take_stored =
                i > 0 && matches!(self.slots[base + i - 1], Some(r) if r.key > delta[j - 1].key);
            if take_stored {
                i -= 1;
                self.slots[base + k] = self.slots[base + i];
            } else {
                j -= 1;
                self.slots[base + k] = Some(delta[j]);
            }
        }
        partition.count += delta.len();
        partition.key_range = base..base + partition.count;
    }

    /// Re-lay every partition into slots of `slot_size`; returns the pages
    /// written.
    pub fn grow(&mut self, partitions: &mut [Partition], slot_size: usize) -> u64 {
        let mut slots = vec![None; partitions.len() * slot_size];
        for (i, partition) in partitions.iter_mut().enumerate() {
            let base = i * slot_size;
            let old = partition.key_range.clone();
            slots[base..base + old.len()].copy_from_slice(&self.slots[old.clone()]);
            partition.key_range = base..base + old.len();
        }
        self.slots = slots;
        self.slot_size = slot_size;
        pages_for_items(self.slots.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PartitionModel;
    use geo::Point;
    use slbrin_types::Region;

    fn record(key: u64, id: u64) -> Record {
        Record::new(Point::new(key as f64, 0.0), key, id)
    }

    fn partition(range: Range<usize>) -> Partition {
        Partition {
            item_offset: 1,
            block_number: 0,
            value: 0,
            next_value: 1000,
            length: 2,
            count: range.len(),
            model: PartitionModel::Untrained,
            scope: Region::new(0.0, 0.0, 1.0, 1.0),
            key_range: range,
        }
    }

    fn keys(items: &ItemArray, range: Range<usize>) -> Vec<u64> {
        items.records(range).map(|r| r.key).collect()
    }

    #[test]
    fn test_layout_pads_slots() {
        let records: Vec<_> = [1, 2, 3, 10, 11].iter().map(|&k| record(k, k)).collect();
        let mut partitions = vec![partition(0..3), partition(3..5)];
        let items = ItemArray::layout(records, &mut partitions, 4);

        assert_eq!(items.len(), 8);
        assert_eq!(partitions[0].key_range, 0..3);
        assert_eq!(partitions[1].key_range, 4..6);
        assert_eq!(keys(&items, 4..6), vec![10, 11]);
        assert!(items.get(3).is_none());
        assert_eq!(items.free(&partitions[0]), 1);
    }

    #[test]
    fn test_lower_bound() {
        let records: Vec<_> = [1, 3, 3, 7].iter().map(|&k| record(k, k)).collect();
        let mut partitions = vec![partition(0..4)];
        let items = ItemArray::layout(records, &mut partitions, 6);
        assert_eq!(items.lower_bound(0..4, 3), 1);
        assert_eq!(items.lower_bound(0..4, 4), 3);
        assert_eq!(items.lower_bound(0..4, 9), 4);
    }

    #[test]
    fn test_merge_keeps_order_and_stability() {
        let records: Vec<_> = [2, 5, 9].iter().map(|&k| record(k, k)).collect();
        let mut partitions = vec![partition(0..3)];
        let mut items = ItemArray::layout(records, &mut partitions, 8);

        let delta = vec![record(1, 100), record(5, 105), record(12, 112)];
        items.merge(&mut partitions[0], &delta);

        assert_eq!(partitions[0].count, 6);
        assert_eq!(keys(&items, partitions[0].key_range.clone()), vec![1, 2, 5, 5, 9, 12]);
        let ids: Vec<_> = items.records(0..6).map(|r| r.id).collect();
        assert_eq!(ids, vec![100, 2, 5, 105, 9, 112]);
    }

    #[test]
    fn test_merge_empty_delta_is_noop() {
        let records: Vec<_> = [2, 5].iter().map(|&k| record(k, k)).collect();
        let mut partitions = vec![partition(0..2)];
        let mut items = ItemArray::layout(records, &mut partitions, 4);
        let before = items.clone();
        items.merge(&mut partitions[0], &[]);
        assert_eq!(items, before);
        assert_eq!(partitions[0].key_range, 0..2);
    }

    #[test]
    fn test_grow_relays_partitions() {
        let records: Vec<_> = [1, 2, 10].iter().map(|&k| record(k, k)).collect();
        let mut partitions = vec![partition(0..2), partition(2..3)];
        let mut items = ItemArray::layout(records, &mut partitions, 2);
        let pages = items.grow(&mut partitions, 4);

        assert_eq!(pages, 1);
        assert_eq!(items.slot_size(), 4);
        assert_eq!(partitions[1].key_range, 4..5);
        assert_eq!(keys(&items, 4..5), vec![10]);
        assert_eq!(keys(&items, 0..2), vec![1, 2]);
    }
}
