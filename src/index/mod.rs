//! The learned block-range index.
//!
//! Records are sorted by geohash key and cut into partitions by adaptive
//! quadrant splitting. Each partition owns a fixed slot of the item array and
//! a learned model predicting a record's position inside its slot.

mod layout;
mod meta;
mod partitioner;
mod query;

pub use layout::ItemArray;
pub use meta::{META_VERSION, MetaPage, Partition};
pub use query::Neighbor;

use crate::config::IndexConfig;
use crate::error::{Result, SlbrinError};
use crate::geohash::Geohash;
use crate::io_cost::{ITEM_SIZE, MODEL_SIZE};
use crate::model::{PartitionModel, TrainJob, Trainer, train_partitions};
use crate::update::{AppendState, DeltaBuffer};
use geo::Point;
use partitioner::{SplitParams, split_partitions};
use serde::{Deserialize, Serialize};
use slbrin_types::{PayloadId, Record};
use std::time::Instant;

/// Bytes charged for the meta page.
pub const META_SIZE: usize = 64;

/// Bytes charged per partition record, model excluded.
pub const PARTITION_RECORD_SIZE: usize = 73;

/// Simulated storage footprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSize {
    /// Meta page, partition records and models
    pub structure_bytes: u64,
    /// Item array slots, padding included
    pub index_entry_bytes: u64,
}

impl IndexSize {
    pub fn total(&self) -> u64 {
        self.structure_bytes + self.index_entry_bytes
    }
}

/// An updatable learned spatial index over 2D points.
///
/// # Examples
///
/// ```rust
/// use slbrin::{IndexConfig, IoCost, MlpTrainer, Region, Slbrin};
/// use geo::Point;
///
/// let config = IndexConfig::new(Region::new(0.0, 0.0, 10.0, 10.0))
///     .with_threshold_number(8)
///     .with_data_precision(2);
/// let points = (0..32u64).map(|i| (Point::new((i % 8) as f64 + 0.5, (i / 8) as f64 + 0.5), i));
/// let index = Slbrin::build(points, &config, &MlpTrainer::default())?;
///
/// let mut io = IoCost::new();
/// let ids = index.point_query(&Point::new(2.5, 1.5), &mut io);
/// assert_eq!(ids.as_slice(), &[10]);
/// # Ok::<(), slbrin::SlbrinError>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slbrin {
    pub(crate) meta: MetaPage,
    pub(crate) partitions: Vec<Partition>,
    pub(crate) items: ItemArray,
    pub(crate) deltas: Vec<DeltaBuffer>,
    pub(crate) append: Option<AppendState>,
}

impl Slbrin {
    /// Build the index from `(point, payload)` pairs and train every
    /// non-empty partition's model.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for malformed thresholds, region or precision;
    /// `Training` if the trainer rejects a partition.
    pub fn build<I>(points: I, config: &IndexConfig, trainer: &dyn Trainer) -> Result<Self>
    where
        I: IntoIterator<Item = (Point<f64>, PayloadId)>,
    {
        config.validate().map_err(SlbrinError::InvalidConfig)?;
        let geohash = Geohash::new(config.region, config.data_precision)?;
        if config.threshold_length > geohash.sum_bits() {
            return Err(SlbrinError::InvalidConfig(format!(
                "threshold length {} exceeds the {}-bit geohash",
                config.threshold_length,
                geohash.sum_bits()
            )));
        }

        let started = Instant::now();
        let mut records: Vec<Record> = points
            .into_iter()
            .map(|(point, id)| Record::new(point, geohash.encode(&point), id))
            .collect();
        records.sort_by_key(|r| r.key);

        let pages_per_range = (config.threshold_number / config.block_size).max(1);
        let params = SplitParams {
            threshold_number: config.threshold_number,
            threshold_length: config.threshold_length,
            data_precision: config.data_precision,
            pages_per_range,
        };
        let mut partitions = split_partitions(&records, &geohash, &params);
        let max_length = partitions.iter().map(|p| p.length).max().unwrap_or(0);

        let jobs = partitions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.count > 0)
            .map(|(i, p)| {
                let slice = &records[p.key_range.clone()];
                TrainJob {
                    partition: i,
                    inputs: slice.iter().map(|r| p.normalize(r.key)).collect(),
                    targets: (0..slice.len()).collect(),
                    initial: None,
                }
            })
            .collect();
        let outcomes = train_partitions(jobs, trainer, config.train_threads)?;
        for (i, outcome) in outcomes {
            partitions[i].model = PartitionModel::Trained(outcome.model);
        }

        let largest = partitions.iter().map(|p| p.count).max().unwrap_or(0);
        let slot_size = config.threshold_number.max(largest);
        let items = ItemArray::layout(records, &mut partitions, slot_size);

        let meta = MetaPage {
            version: META_VERSION,
            pages_per_range,
            threshold_number: config.threshold_number,
            threshold_length: config.threshold_length,
            geohash,
            max_length,
            partition_count: partitions.len() - 1,
        };

        let index = Self {
            meta,
            partitions,
            items,
            deltas: Vec::new(),
            append: None,
        };
        log::info!(
            "Built index: {} records in {} partitions, slot size {}, {:?}",
            index.base_len(),
            index.partitions.len(),
            index.items.slot_size(),
            started.elapsed()
        );
        Ok(index)
    }

    pub fn meta(&self) -> &MetaPage {
        &self.meta
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn items(&self) -> &ItemArray {
        &self.items
    }

    pub fn geohash(&self) -> &Geohash {
        &self.meta.geohash
    }

    /// Records in the partitions, pending deltas excluded.
    pub fn base_len(&self) -> usize {
        self.partitions.iter().map(|p| p.count).sum()
    }

    /// All indexed records, pending deltas included.
    pub fn len(&self) -> usize {
        self.base_len() + self.deltas.iter().map(DeltaBuffer::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records of partition `index`, in key order.
    pub fn partition_records(&self, index: usize) -> impl Iterator<Item = &Record> + '_ {
        let range = self
            .partitions
            .get(index)
            .map_or(0..0, |p| p.key_range.clone());
        self.items.records(range)
    }

    /// Rightmost partition whose lower key is at most `key`.
    pub fn binary_search_partition(&self, key: u64) -> Option<usize> {
        self.partitions
            .partition_point(|p| p.value <= key)
            .checked_sub(1)
    }

    /// Simulated storage footprint.
    pub fn size(&self) -> IndexSize {
        let trained = self
            .partitions
            .iter()
            .filter(|p| p.model.is_trained())
            .count();
        let structure = META_SIZE
            + self.partitions.len() * PARTITION_RECORD_SIZE
            + trained * MODEL_SIZE;
        IndexSize {
            structure_bytes: structure as u64,
            index_entry_bytes: (self.items.len() * ITEM_SIZE) as u64,
        }
    }

    /// Average width of the model error windows over trained partitions.
    pub fn model_err(&self) -> f64 {
        let spans: Vec<u64> = self
            .partitions
            .iter()
            .filter_map(|p| p.model.as_trained())
            .map(|m| m.error_span())
            .collect();
        if spans.is_empty() {
            return 0.0;
        }
        spans.iter().sum::<u64>() as f64 / spans.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainerConfig;
    use crate::model::MlpTrainer;
    use slbrin_types::Region;

    fn square_config() -> IndexConfig {
        IndexConfig::new(Region::new(0.0, 0.0, 2.0, 2.0))
            .with_threshold_number(4)
            .with_threshold_length(8)
            .with_data_precision(1)
    }

    fn trainer() -> MlpTrainer {
        MlpTrainer::new(TrainerConfig::default().with_epochs(50))
    }

    fn five_points() -> Vec<(Point<f64>, PayloadId)> {
        vec![
            (Point::new(0.5, 0.5), 1),
            (Point::new(0.5, 1.5), 2),
            (Point::new(1.5, 0.5), 3),
            (Point::new(1.5, 1.5), 4),
            (Point::new(1.6, 1.6), 5),
        ]
    }

    #[test]
    fn test_build_four_partitions() {
        let index = Slbrin::build(five_points(), &square_config(), &trainer()).unwrap();

        assert_eq!(index.partitions().len(), 4);
        assert_eq!(index.meta().partition_count, 3);
        assert_eq!(index.meta().max_length, 2);
        assert_eq!(index.meta().pages_per_range, 1);
        assert_eq!(index.len(), 5);
        assert_eq!(index.items().slot_size(), 4);
        assert!(index.partitions().iter().all(|p| p.model.is_trained()));

        let ids: Vec<_> = index.partition_records(3).map(|r| r.id).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[test]
    fn test_build_empty() {
        let index = Slbrin::build(Vec::new(), &square_config(), &trainer()).unwrap();
        assert_eq!(index.partitions().len(), 1);
        assert_eq!(index.meta().partition_count, 0);
        assert!(index.is_empty());
        assert!(!index.partitions()[0].model.is_trained());
        assert_eq!(index.model_err(), 0.0);
    }

    #[test]
    fn test_build_rejects_bad_thresholds() {
        let config = square_config().with_threshold_number(0);
        let err = Slbrin::build(five_points(), &config, &trainer());
        assert!(matches!(err, Err(SlbrinError::InvalidConfig(_))));

        let config = square_config().with_threshold_length(0);
        let err = Slbrin::build(five_points(), &config, &trainer());
        assert!(matches!(err, Err(SlbrinError::InvalidConfig(_))));

        let config = square_config().with_threshold_length(17);
        let err = Slbrin::build(five_points(), &config, &trainer());
        assert!(matches!(err, Err(SlbrinError::InvalidConfig(_))));
    }

    #[test]
    fn test_binary_search_partition() {
        let index = Slbrin::build(five_points(), &square_config(), &trainer()).unwrap();
        let quarter = index.geohash().key_space() / 4;
        assert_eq!(index.binary_search_partition(0), Some(0));
        assert_eq!(index.binary_search_partition(quarter - 1), Some(0));
        assert_eq!(index.binary_search_partition(quarter), Some(1));
        assert_eq!(index.binary_search_partition(u64::MAX), Some(3));
    }

    #[test]
    fn test_size_accounting() {
        let index = Slbrin::build(five_points(), &square_config(), &trainer()).unwrap();
        let size = index.size();
        assert_eq!(
            size.structure_bytes,
            (META_SIZE + 4 * PARTITION_RECORD_SIZE + 4 * MODEL_SIZE) as u64
        );
        assert_eq!(size.index_entry_bytes, (16 * ITEM_SIZE) as u64);
        assert_eq!(size.total(), size.structure_bytes + size.index_entry_bytes);
    }
}
