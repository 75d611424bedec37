//! Meta page and per-partition records.

use crate::geohash::Geohash;
use crate::model::PartitionModel;
use serde::{Deserialize, Serialize};
use slbrin_types::Region;
use std::ops::Range;

pub const META_VERSION: u32 = 0;

/// Index-wide parameters shared by every partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaPage {
    pub version: u32,
    pub pages_per_range: usize,
    pub threshold_number: usize,
    pub threshold_length: u32,
    pub geohash: Geohash,
    /// Longest partition prefix; cell decomposition never descends further
    pub max_length: u32,
    /// Index of the last partition (partition count minus one)
    pub partition_count: usize,
}

/// One block range: a geohash prefix cell and the sorted items it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    /// 1-based position in the partition table
    pub item_offset: usize,
    pub block_number: usize,
    /// Inclusive lower key
    pub value: u64,
    /// Exclusive upper key
    pub next_value: u64,
    /// Prefix length in bits
    pub length: u32,
    pub count: usize,
    pub model: PartitionModel,
    /// Cell geometry inflated by the data precision
    pub scope: Region,
    /// Slots of the item array holding this partition's records
    pub key_range: Range<usize>,
}

impl Partition {
    /// Map a key to the model's input domain `[-0.5, 0.5)`.
    pub fn normalize(&self, key: u64) -> f64 {
        let span = self.next_value.saturating_sub(self.value).max(1) as f64;
        key.saturating_sub(self.value) as f64 / span - 0.5
    }

    /// Predicted absolute position of `key` in the item array.
    ///
    /// `None` for an empty or untrained partition.
    pub fn predict(&self, key: u64) -> Option<usize> {
        let model = self.model.as_trained()?;
        if self.count == 0 {
            return None;
        }
        let rank = model.predict_rank(self.normalize(key), self.count);
        Some(self.key_range.start + rank)
    }

    /// Positions that must be searched for `key`: the model's error window
    /// intersected with the key range, or the whole key range without a model.
    pub fn search_bounds(&self, key: u64) -> Range<usize> {
        let Some(model) = self.model.as_trained() else {
            return self.key_range.clone();
        };
        if self.count == 0 {
            return self.key_range.clone();
        }
        let rank = model.predict_rank(self.normalize(key), self.count) as i64;
        let count = self.count as i64;
        let lo = (rank + model.min_err).clamp(0, count) as usize;
        let hi = (rank + model.max_err + 1).clamp(0, count) as usize;
        let start = self.key_range.start;
        (start + lo)..(start + hi.max(lo))
    }

    pub fn contains_key(&self, key: u64) -> bool {
        self.value <= key && key < self.next_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Layer, LearnedModel};

    fn partition(model: PartitionModel) -> Partition {
        Partition {
            item_offset: 1,
            block_number: 0,
            value: 100,
            next_value: 200,
            length: 4,
            count: 10,
            model,
            scope: Region::new(0.0, 0.0, 1.0, 1.0),
            key_range: 20..30,
        }
    }

    fn linear(min_err: i64, max_err: i64) -> PartitionModel {
        let mut out = Layer::zeros(1, 1);
        out.weights[0] = 1.0;
        out.bias[0] = 0.5;
        let mut model = LearnedModel::new(vec![out]);
        model.min_err = min_err;
        model.max_err = max_err;
        PartitionModel::Trained(model)
    }

    #[test]
    fn test_normalize() {
        let p = partition(PartitionModel::Untrained);
        assert_eq!(p.normalize(100), -0.5);
        assert_eq!(p.normalize(150), 0.0);
        assert!(p.contains_key(199));
        assert!(!p.contains_key(200));
    }

    #[test]
    fn test_untrained_searches_whole_range() {
        let p = partition(PartitionModel::Untrained);
        assert_eq!(p.predict(150), None);
        assert_eq!(p.search_bounds(150), 20..30);
    }

    #[test]
    fn test_predict_and_bounds() {
        let p = partition(linear(-1, 2));
        assert_eq!(p.predict(150), Some(25));
        assert_eq!(p.search_bounds(150), 24..28);
        // clamped at both ends of the key range
        assert_eq!(p.predict(100), Some(20));
        assert_eq!(p.search_bounds(100), 20..23);
        assert_eq!(p.search_bounds(199), 28..30);
    }
}
