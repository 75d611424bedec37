use super::{LearnedModel, TrainOutcome, Trainer};
use crate::error::{Result, SlbrinError};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Owned training input of one partition.
#[derive(Debug, Clone)]
pub struct TrainJob {
    pub partition: usize,
    pub inputs: Vec<f64>,
    pub targets: Vec<usize>,
    pub initial: Option<LearnedModel>,
}

/// Train every job on a dedicated pool of `threads` workers.
///
/// Results are keyed by partition index. Nothing is returned unless every job
/// succeeds; the first failure is reported as [`SlbrinError::Training`].
pub fn train_partitions(
    jobs: Vec<TrainJob>,
    trainer: &dyn Trainer,
    threads: usize,
) -> Result<BTreeMap<usize, TrainOutcome>> {
    if jobs.is_empty() {
        return Ok(BTreeMap::new());
    }
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("slbrin-train-{i}"))
        .build()?;

    pool.install(|| {
        jobs.into_par_iter()
            .map(|job| {
                trainer
                    .train(&job.inputs, &job.targets, job.initial.as_ref())
                    .map(|outcome| (job.partition, outcome))
                    .map_err(|source| SlbrinError::Training {
                        partition: job.partition,
                        source,
                    })
            })
            .collect()
    })
}
