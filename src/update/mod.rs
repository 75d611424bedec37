//! Delta buffers and the merge / retrain cycle.
//!
//! After [`Slbrin::build_append`], inserts go to per-partition delta buffers.
//! Whenever an insert's timestamp enters a new time bucket, one update cycle
//! runs per crossed bucket: deltas are merged into their partitions' slots,
//! touched models are retrained (or replayed from a snapshot) and the model set
//! is optionally saved for later replay.

mod delta;

pub use delta::{DeltaBuffer, DeltaState};

use crate::config::UpdateConfig;
use crate::error::{Result, SlbrinError};
use crate::index::Slbrin;
use crate::io_cost::IoCost;
use crate::model::{PartitionModel, TrainJob, Trainer, residual_bounds, train_partitions};
use crate::storage::ModelSnapshotStore;
use geo::Point;
use serde::{Deserialize, Serialize};
use slbrin_types::{PayloadId, Record};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// Update settings and progress, present once updates are enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendState {
    pub config: UpdateConfig,
    /// Time bucket of the last completed cycle
    pub time_id: i64,
    pub stats: UpdateStats,
    /// Merged partitions whose retraining failed; retrained by the next cycle
    #[serde(default)]
    pub pending_retrain: BTreeSet<usize>,
}

/// Insert counters, in total and since the last cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateStats {
    pub inserts: u64,
    pub insert_time: Duration,
    pub insert_io: u64,
    pub cycles: u64,
    pub cycle_insert_time: Duration,
    pub cycle_insert_io: u64,
}

/// What one update cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub time_id: i64,
    /// Insert time and IO accumulated since the previous cycle
    pub insert_time: Duration,
    pub insert_io: u64,
    pub merged_partitions: usize,
    pub merged_records: usize,
    pub merge_io: u64,
    /// Pages rewritten because a slot overflowed
    pub relayout_io: u64,
    pub retrained_models: usize,
    pub retrain_epochs: usize,
    /// Touched models kept because their error span stayed within `threshold_err`
    pub refreshed_models: usize,
    pub replayed_snapshot: bool,
    pub index_entry_bytes: u64,
    pub model_err: f64,
}

impl Slbrin {
    /// Enable updates: create the delta buffers and start the clock at the
    /// bucket following the build.
    pub fn build_append(&mut self, config: UpdateConfig) -> Result<()> {
        config.validate().map_err(SlbrinError::InvalidConfig)?;
        let time_id = config.initial_time_id();
        self.deltas = (0..self.partitions.len())
            .map(|_| DeltaBuffer::new(config.initial_length))
            .collect();
        log::info!(
            "Updates enabled at time id {time_id}, delta capacity {}",
            config.initial_length
        );
        self.append = Some(AppendState {
            config,
            time_id,
            stats: UpdateStats::default(),
            pending_retrain: BTreeSet::new(),
        });
        Ok(())
    }

    pub fn append_state(&self) -> Option<&AppendState> {
        self.append.as_ref()
    }

    /// Current time bucket, if updates are enabled.
    pub fn time_id(&self) -> Option<i64> {
        self.append.as_ref().map(|a| a.time_id)
    }

    pub fn deltas(&self) -> &[DeltaBuffer] {
        &self.deltas
    }

    /// Insert a point observed at `timestamp`.
    ///
    /// Runs one update cycle per time bucket crossed since the last cycle,
    /// before buffering the point; returns their reports. A failed cycle keeps
    /// the index at the bucket of the last completed one.
    ///
    /// # Errors
    ///
    /// `UpdatesDisabled` before [`Slbrin::build_append`], `DeltaOverflow` when
    /// the owning partition's buffer is full, and any error of a cycle.
    pub fn insert(
        &mut self,
        point: Point<f64>,
        id: PayloadId,
        timestamp: i64,
        trainer: &dyn Trainer,
        io: &mut IoCost,
    ) -> Result<Vec<CycleReport>> {
        let target = self
            .append
            .as_ref()
            .ok_or(SlbrinError::UpdatesDisabled)?
            .config
            .time_id_of(timestamp);

        let mut reports = Vec::new();
        loop {
            let state = self.append.as_mut().ok_or(SlbrinError::UpdatesDisabled)?;
            if state.time_id >= target {
                break;
            }
            let previous = state.time_id;
            state.time_id += 1;
            match self.update(trainer, io) {
                Ok(report) => reports.push(report),
                Err(err) => {
                    if let Some(state) = self.append.as_mut() {
                        state.time_id = previous;
                    }
                    return Err(err);
                }
            }
        }

        let started = Instant::now();
        let before = *io;
        let key = self.meta.geohash.encode(&point);
        let index = self
            .binary_search_partition(key)
            .ok_or(SlbrinError::InvalidFormat)?;
        let delta = self.deltas.get_mut(index).ok_or(SlbrinError::InvalidFormat)?;
        if !delta.push(Record::new(point, key, id)) {
            return Err(SlbrinError::DeltaOverflow {
                partition: index,
                capacity: delta.capacity(),
            });
        }
        io.charge(1);

        if let Some(state) = self.append.as_mut() {
            let elapsed = started.elapsed();
            let pages = io.since(before);
            state.stats.inserts += 1;
            state.stats.insert_time += elapsed;
            state.stats.insert_io += pages;
            state.stats.cycle_insert_time += elapsed;
            state.stats.cycle_insert_io += pages;
        }
        Ok(reports)
    }

    /// Insert `(point, id, timestamp)` triples in order.
    pub fn insert_batch<I>(
        &mut self,
        points: I,
        trainer: &dyn Trainer,
        io: &mut IoCost,
    ) -> Result<Vec<CycleReport>>
    where
        I: IntoIterator<Item = (Point<f64>, PayloadId, i64)>,
    {
        let mut reports = Vec::new();
        for (point, id, timestamp) in points {
            reports.extend(self.insert(point, id, timestamp, trainer, io)?);
        }
        Ok(reports)
    }

    /// Run one update cycle for the current time bucket.
    ///
    /// A replayed snapshot is loaded before anything is merged, so a missing
    /// or mismatched snapshot leaves the index untouched. Partitions whose
    /// retraining fails stay untrained and are retrained by the next cycle.
    pub fn update(&mut self, trainer: &dyn Trainer, io: &mut IoCost) -> Result<CycleReport> {
        let state = self.append.as_ref().ok_or(SlbrinError::UpdatesDisabled)?;
        let config = state.config.clone();
        let time_id = state.time_id;
        let stats = state.stats;
        let pending = state.pending_retrain.clone();
        let retrain = config.retrain && time_id > config.time_retrain;
        let store = config.snapshot_dir.as_ref().map(ModelSnapshotStore::new);

        log::info!("Update time id: {time_id}");
        log::info!(
            "Insert time {:?}, insert io {} since last update",
            stats.cycle_insert_time,
            stats.cycle_insert_io
        );

        let replay = if retrain {
            None
        } else {
            let store = store.as_ref().ok_or_else(|| {
                SlbrinError::InvalidConfig(
                    "replaying models requires a snapshot directory".to_string(),
                )
            })?;
            let models = store.load(time_id)?;
            if models.len() != self.partitions.len() {
                return Err(SlbrinError::SnapshotMismatch {
                    time_id,
                    expected: self.partitions.len(),
                    found: models.len(),
                });
            }
            Some(models)
        };

        let merge_started = Instant::now();
        let merge_start = *io;
        let (touched, merged_records, relayout_io) = self.merge_deltas(io);
        let merge_io = io.since(merge_start);
        log::info!(
            "Merged {merged_records} records into {} partitions in {:?}, io {merge_io}",
            touched.len(),
            merge_started.elapsed()
        );

        let mut retrained_models = 0;
        let mut retrain_epochs = 0;
        let mut refreshed_models = 0;
        match replay {
            Some(models) => {
                for (partition, model) in self.partitions.iter_mut().zip(models) {
                    partition.model = model;
                }
                self.clear_pending_retrain();
                log::info!("Replayed model snapshot for time id {time_id}");
            }
            None => {
                let retrain_started = Instant::now();
                let candidates: BTreeSet<usize> =
                    touched.iter().copied().chain(pending).collect();
                let mut refreshed = Vec::new();
                let mut jobs = Vec::new();
                for i in candidates {
                    let partition = &self.partitions[i];
                    if partition.count == 0 {
                        continue;
                    }
                    let inputs: Vec<f64> = self
                        .items
                        .records(partition.key_range.clone())
                        .map(|r| partition.normalize(r.key))
                        .collect();
                    let targets: Vec<usize> = (0..partition.count).collect();
                    let current = partition.model.as_trained();
                    if let (Some(limit), Some(model)) = (config.threshold_err, current) {
                        let (min_err, max_err) = residual_bounds(model, &inputs, &targets);
                        if max_err.saturating_sub(min_err).unsigned_abs() <= limit {
                            refreshed.push((i, min_err, max_err));
                            continue;
                        }
                    }
                    jobs.push(TrainJob {
                        partition: i,
                        inputs,
                        targets,
                        initial: current.cloned(),
                    });
                }

                for (i, min_err, max_err) in refreshed {
                    if let PartitionModel::Trained(model) = &mut self.partitions[i].model {
                        model.min_err = min_err;
                        model.max_err = max_err;
                        refreshed_models += 1;
                    }
                }

                let failed: Vec<usize> = jobs.iter().map(|job| job.partition).collect();
                match train_partitions(jobs, trainer, config.thread_retrain) {
                    Ok(outcomes) => {
                        for (i, outcome) in outcomes {
                            retrained_models += 1;
                            retrain_epochs += outcome.epochs;
                            self.partitions[i].model = PartitionModel::Trained(outcome.model);
                        }
                        self.clear_pending_retrain();
                    }
                    Err(err) => {
                        // stale bounds are unsafe after the merge; scan until retrained
                        for &i in &failed {
                            self.partitions[i].model = PartitionModel::Untrained;
                        }
                        if let Some(state) = self.append.as_mut() {
                            state.pending_retrain.extend(failed);
                        }
                        log::warn!("Retraining failed at time id {time_id}: {err}");
                        return Err(err);
                    }
                }
                log::info!(
                    "Retrained {retrained_models} models, {retrain_epochs} epochs, \
                     kept {refreshed_models} in {:?}",
                    retrain_started.elapsed()
                );
            }
        }

        if config.save_models {
            if let Some(store) = &store {
                let models: Vec<PartitionModel> =
                    self.partitions.iter().map(|p| p.model.clone()).collect();
                store.save(time_id, &models)?;
            }
        }

        let report = CycleReport {
            time_id,
            insert_time: stats.cycle_insert_time,
            insert_io: stats.cycle_insert_io,
            merged_partitions: touched.len(),
            merged_records,
            merge_io,
            relayout_io,
            retrained_models,
            retrain_epochs,
            refreshed_models,
            replayed_snapshot: !retrain,
            index_entry_bytes: self.size().index_entry_bytes,
            model_err: self.model_err(),
        };
        log::info!(
            "Index entry size: {}, model error: {:.2}",
            report.index_entry_bytes,
            report.model_err
        );

        if let Some(state) = self.append.as_mut() {
            state.stats.cycles += 1;
            state.stats.cycle_insert_time = Duration::ZERO;
            state.stats.cycle_insert_io = 0;
        }
        Ok(report)
    }

    fn clear_pending_retrain(&mut self) {
        if let Some(state) = self.append.as_mut() {
            state.pending_retrain.clear();
        }
    }

    /// Merge every non-empty delta buffer into its partition.
    ///
    /// Returns the merged partitions, the number of merged records and the
    /// pages spent re-laying the item array.
    fn merge_deltas(&mut self, io: &mut IoCost) -> (Vec<usize>, usize, u64) {
        let touched: Vec<usize> = self
            .deltas
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.is_empty())
            .map(|(i, _)| i)
            .collect();

        let needed = touched
            .iter()
            .map(|&i| self.partitions[i].count + self.deltas[i].len())
            .max()
            .unwrap_or(0);
        let mut relayout_io = 0;
        if needed > self.items.slot_size() {
            let mut slot_size = self.items.slot_size().max(1);
            while slot_size < needed {
                slot_size *= 2;
            }
            log::warn!(
                "Partition slot overflow: growing slots from {} to {slot_size}",
                self.items.slot_size()
            );
            relayout_io = self.items.grow(&mut self.partitions, slot_size);
            io.charge(relayout_io);
        }

        let mut merged = 0;
        for &i in &touched {
            let records = self.deltas[i].begin_merge();
            merged += records.len();
            let partition = &mut self.partitions[i];
            self.items.merge(partition, &records);
            io.charge_items(partition.count);
            self.deltas[i].finish_merge();
        }
        (touched, merged, relayout_io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexConfig, TrainerConfig};
    use crate::model::MlpTrainer;
    use slbrin_types::Region;

    fn trainer() -> MlpTrainer {
        MlpTrainer::new(TrainerConfig::default().with_epochs(20))
    }

    fn index() -> Slbrin {
        let config = IndexConfig::new(Region::new(0.0, 0.0, 2.0, 2.0))
            .with_threshold_number(4)
            .with_threshold_length(2)
            .with_data_precision(1);
        let points = vec![
            (Point::new(0.5, 0.5), 1),
            (Point::new(0.5, 1.5), 2),
            (Point::new(1.5, 0.5), 3),
            (Point::new(1.5, 1.5), 4),
            (Point::new(1.6, 1.6), 5),
        ];
        Slbrin::build(points, &config, &trainer()).unwrap()
    }

    #[test]
    fn test_insert_requires_build_append() {
        let mut index = index();
        let mut io = IoCost::new();
        let err = index.insert(Point::new(0.1, 0.1), 9, 0, &trainer(), &mut io);
        assert!(matches!(err, Err(SlbrinError::UpdatesDisabled)));
    }

    #[test]
    fn test_insert_buffers_until_bucket_changes() {
        let mut index = index();
        index.build_append(UpdateConfig::new(0, 100, 100)).unwrap();
        assert_eq!(index.time_id(), Some(1));

        let mut io = IoCost::new();
        let reports = index
            .insert(Point::new(0.2, 0.2), 10, 150, &trainer(), &mut io)
            .unwrap();
        assert!(reports.is_empty());
        assert_eq!(index.deltas()[0].len(), 1);
        assert_eq!(io.pages, 1);
        assert_eq!(index.len(), 6);

        // the buffered point is visible before it is merged
        let ids = index.point_query(&Point::new(0.2, 0.2), &mut io);
        assert_eq!(ids.as_slice(), &[10]);
    }

    #[test]
    fn test_update_merges_and_retrains() {
        let mut index = index();
        index.build_append(UpdateConfig::new(0, 100, 100)).unwrap();
        let mut io = IoCost::new();
        index.insert(Point::new(0.2, 0.2), 10, 150, &trainer(), &mut io).unwrap();
        index.insert(Point::new(0.3, 0.3), 11, 160, &trainer(), &mut io).unwrap();

        let reports = index
            .insert(Point::new(1.9, 1.9), 12, 210, &trainer(), &mut io)
            .unwrap();
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.time_id, 2);
        assert_eq!(report.merged_partitions, 1);
        assert_eq!(report.merged_records, 2);
        assert_eq!(report.retrained_models, 1);
        assert_eq!(report.insert_io, 2);
        assert!(!report.replayed_snapshot);

        assert_eq!(index.partitions()[0].count, 3);
        assert!(index.deltas()[0].is_empty());
        assert_eq!(index.deltas()[0].state(), DeltaState::Active);
        let ids = index.point_query(&Point::new(0.3, 0.3), &mut io);
        assert_eq!(ids.as_slice(), &[11]);
    }

    #[test]
    fn test_update_with_empty_deltas_is_noop() {
        let mut index = index();
        index.build_append(UpdateConfig::new(0, 100, 100)).unwrap();
        let partitions = index.partitions().to_vec();
        let items = index.items().clone();

        let mut io = IoCost::new();
        let report = index.update(&trainer(), &mut io).unwrap();
        assert_eq!(report.merged_partitions, 0);
        assert_eq!(report.merge_io, 0);
        assert_eq!(index.partitions(), partitions.as_slice());
        assert_eq!(index.items(), &items);
    }

    #[test]
    fn test_delta_overflow() {
        let mut index = index();
        index
            .build_append(UpdateConfig::new(0, 100, 100).with_initial_length(1))
            .unwrap();
        let mut io = IoCost::new();
        index.insert(Point::new(0.2, 0.2), 10, 120, &trainer(), &mut io).unwrap();
        let err = index.insert(Point::new(0.3, 0.3), 11, 130, &trainer(), &mut io);
        assert!(matches!(
            err,
            Err(SlbrinError::DeltaOverflow { partition: 0, capacity: 1 })
        ));
    }

    #[test]
    fn test_slot_overflow_grows_item_array() {
        let mut index = index();
        index.build_append(UpdateConfig::new(0, 100, 100)).unwrap();
        let mut io = IoCost::new();
        for i in 0..5 {
            let p = Point::new(0.1 + i as f64 * 0.1, 0.2);
            index.insert(p, 100 + i, 150, &trainer(), &mut io).unwrap();
        }
        let reports = index
            .insert(Point::new(1.9, 0.1), 200, 250, &trainer(), &mut io)
            .unwrap();

        assert!(reports[0].relayout_io > 0);
        assert_eq!(index.items().slot_size(), 8);
        assert_eq!(index.partitions()[0].count, 6);
        assert_eq!(index.partitions()[1].key_range.start, 8);
        let ids = index.point_query(&Point::new(1.5, 0.5), &mut io);
        assert_eq!(ids.as_slice(), &[3]);
    }

    #[test]
    fn test_failed_retrain_leaves_partitions_untrained() {
        struct Failing;
        impl Trainer for Failing {
            fn train(
                &self,
                _inputs: &[f64],
                _targets: &[usize],
                _initial: Option<&crate::model::LearnedModel>,
            ) -> std::result::Result<crate::model::TrainOutcome, crate::model::TrainError> {
                Err(crate::model::TrainError::Diverged { epochs: 1 })
            }
        }

        let mut index = index();
        index.build_append(UpdateConfig::new(0, 100, 100)).unwrap();
        let mut io = IoCost::new();
        index.insert(Point::new(0.2, 0.2), 10, 150, &Failing, &mut io).unwrap();
        let err = index.insert(Point::new(0.2, 0.2), 11, 250, &Failing, &mut io);

        assert!(matches!(err, Err(SlbrinError::Training { partition: 0, .. })));
        assert!(!index.partitions()[0].model.is_trained());
        assert!(index.partitions()[1].model.is_trained());
        assert_eq!(index.time_id(), Some(1));
        // lookups fall back to scanning the whole partition
        let ids = index.point_query(&Point::new(0.2, 0.2), &mut io);
        assert_eq!(ids.as_slice(), &[10]);
        assert!(index.append_state().unwrap().pending_retrain.contains(&0));
    }

    #[test]
    fn test_retry_after_failed_retrain_restores_model() {
        struct Failing;
        impl Trainer for Failing {
            fn train(
                &self,
                _inputs: &[f64],
                _targets: &[usize],
                _initial: Option<&crate::model::LearnedModel>,
            ) -> std::result::Result<crate::model::TrainOutcome, crate::model::TrainError> {
                Err(crate::model::TrainError::Diverged { epochs: 1 })
            }
        }

        let mut index = index();
        index.build_append(UpdateConfig::new(0, 100, 100)).unwrap();
        let mut io = IoCost::new();
        index.insert(Point::new(0.2, 0.2), 10, 150, &trainer(), &mut io).unwrap();
        assert!(index.insert(Point::new(1.9, 1.9), 11, 250, &Failing, &mut io).is_err());
        assert_eq!(index.time_id(), Some(1));
        assert!(!index.partitions()[0].model.is_trained());

        let reports = index
            .insert(Point::new(1.9, 1.9), 11, 250, &trainer(), &mut io)
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].time_id, 2);
        assert_eq!(reports[0].merged_records, 0);
        assert_eq!(reports[0].retrained_models, 1);
        assert!(index.partitions()[0].model.is_trained());
        assert!(index.append_state().unwrap().pending_retrain.is_empty());

        let ids = index.point_query(&Point::new(0.2, 0.2), &mut io);
        assert_eq!(ids.as_slice(), &[10]);
    }

    #[test]
    fn test_threshold_err_keeps_accurate_models() {
        let mut index = index();
        index
            .build_append(UpdateConfig::new(0, 100, 100).with_threshold_err(u64::MAX))
            .unwrap();
        let before = index.partitions()[0].model.as_trained().unwrap().layers.clone();
        let mut io = IoCost::new();
        index.insert(Point::new(0.2, 0.2), 10, 150, &trainer(), &mut io).unwrap();
        index.insert(Point::new(0.3, 0.3), 11, 160, &trainer(), &mut io).unwrap();
        let reports = index
            .insert(Point::new(1.9, 1.9), 12, 210, &trainer(), &mut io)
            .unwrap();

        assert_eq!(reports[0].retrained_models, 0);
        assert_eq!(reports[0].refreshed_models, 1);
        let model = index.partitions()[0].model.as_trained().unwrap();
        assert_eq!(model.layers, before);
        for (rank, record) in index.partition_records(0).enumerate() {
            let predicted = index.partitions()[0].predict(record.key).unwrap();
            let err = rank as i64 - predicted as i64;
            assert!(model.min_err <= err && err <= model.max_err);
        }
        for (point, id) in [(Point::new(0.2, 0.2), 10), (Point::new(0.3, 0.3), 11)] {
            assert_eq!(index.point_query(&point, &mut io).as_slice(), &[id]);
        }
    }

    #[test]
    fn test_threshold_err_zero_retrains_inaccurate_models() {
        let mut index = index();
        index
            .build_append(UpdateConfig::new(0, 100, 100).with_threshold_err(0))
            .unwrap();
        let mut io = IoCost::new();
        for i in 0..4 {
            let p = Point::new(0.1 + i as f64 * 0.2, 0.1 + i as f64 * 0.2);
            index.insert(p, 10 + i, 150, &trainer(), &mut io).unwrap();
        }
        let reports = index
            .insert(Point::new(1.9, 1.9), 20, 210, &trainer(), &mut io)
            .unwrap();
        let report = &reports[0];
        assert_eq!(report.retrained_models + report.refreshed_models, 1);
        assert!(index.partitions()[0].model.is_trained());
    }
}
