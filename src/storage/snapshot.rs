use super::{read_framed, write_framed};
use crate::error::{Result, SlbrinError};
use crate::model::PartitionModel;
use std::path::{Path, PathBuf};

const MODELS_MAGIC: &[u8] = b"SLBRIN_MODELS";
const MODELS_VERSION: u8 = 1;
const MODELS_FILE: &str = "models.bin";

/// Per-cycle model sets, stored as `<dir>/<time_id>/models.bin`.
///
/// A run with retraining saves the models of every cycle so that later runs
/// can replay them instead of training.
#[derive(Debug, Clone)]
pub struct ModelSnapshotStore {
    dir: PathBuf,
}

impl ModelSnapshotStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, time_id: i64) -> PathBuf {
        self.dir.join(time_id.to_string()).join(MODELS_FILE)
    }

    pub fn exists(&self, time_id: i64) -> bool {
        self.path_for(time_id).exists()
    }

    pub fn save(&self, time_id: i64, models: &[PartitionModel]) -> Result<()> {
        let path = self.path_for(time_id);
        write_framed(&path, MODELS_MAGIC, MODELS_VERSION, models)?;
        log::debug!("Saved {} models to {}", models.len(), path.display());
        Ok(())
    }

    /// Load the models of `time_id`.
    ///
    /// # Errors
    ///
    /// `SnapshotMissing` when no snapshot exists for `time_id`.
    pub fn load(&self, time_id: i64) -> Result<Vec<PartitionModel>> {
        let path = self.path_for(time_id);
        if !path.exists() {
            return Err(SlbrinError::SnapshotMissing { time_id, path });
        }
        read_framed(&path, MODELS_MAGIC, MODELS_VERSION)
    }
}
