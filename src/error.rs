//! Error types for the learned block-range index.

use crate::model::TrainError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SlbrinError>;

#[derive(Error, Debug)]
pub enum SlbrinError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid file format")]
    InvalidFormat,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Updates are not enabled; call build_append first")]
    UpdatesDisabled,

    #[error("Delta buffer of partition {partition} is full ({capacity} entries)")]
    DeltaOverflow { partition: usize, capacity: usize },

    #[error("No model snapshot for time id {time_id} at {}", path.display())]
    SnapshotMissing { time_id: i64, path: PathBuf },

    #[error(
        "Model snapshot for time id {time_id} holds {found} models, index has {expected} partitions"
    )]
    SnapshotMismatch {
        time_id: i64,
        expected: usize,
        found: usize,
    },

    #[error("Training failed for partition {partition}: {source}")]
    Training {
        partition: usize,
        #[source]
        source: TrainError,
    },

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl From<bincode::Error> for SlbrinError {
    fn from(err: bincode::Error) -> Self {
        SlbrinError::Serialization(err.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for SlbrinError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        SlbrinError::WorkerPool(err.to_string())
    }
}
