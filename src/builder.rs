//! Index builder for flexible configuration
//!
//! Collects the build, update and persistence settings of an index and either
//! builds it from points or reopens a previously saved index file.

use crate::config::{IndexConfig, UpdateConfig};
use crate::error::Result;
use crate::index::Slbrin;
use crate::model::Trainer;
use crate::storage::IndexFile;
use geo::Point;
use slbrin_types::PayloadId;
use std::path::{Path, PathBuf};

/// Builder for an index with optional updates and an index file.
#[derive(Debug, Default)]
pub struct SlbrinBuilder {
    config: IndexConfig,
    update: Option<UpdateConfig>,
    index_path: Option<PathBuf>,
}

impl SlbrinBuilder {
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the partitioning configuration.
    pub fn config(mut self, config: IndexConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable updates with the given settings once the index is built.
    pub fn updates(mut self, update: UpdateConfig) -> Self {
        self.update = Some(update);
        self
    }

    /// Set the index file. An existing file is loaded instead of building;
    /// otherwise the freshly built index is saved there.
    pub fn index_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.index_path = Some(path.into());
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.index_path.as_deref()
    }

    /// Build the index from `points`, or load it from the index file.
    pub fn build<I>(self, points: I, trainer: &dyn Trainer) -> Result<Slbrin>
    where
        I: IntoIterator<Item = (Point<f64>, PayloadId)>,
    {
        if let Some(path) = &self.index_path {
            let file = IndexFile::new(path);
            if file.exists() {
                log::info!("Loading index from {}", path.display());
                return file.load();
            }
        }

        let mut index = Slbrin::build(points, &self.config, trainer)?;
        if let Some(update) = self.update {
            index.build_append(update)?;
        }
        if let Some(path) = &self.index_path {
            IndexFile::new(path).save(&index)?;
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainerConfig;
    use crate::model::MlpTrainer;
    use slbrin_types::Region;
    use tempfile::TempDir;

    fn points() -> Vec<(Point<f64>, PayloadId)> {
        (0..20u64)
            .map(|i| (Point::new(i as f64 * 0.4, (i % 5) as f64), i))
            .collect()
    }

    fn trainer() -> MlpTrainer {
        MlpTrainer::new(TrainerConfig::default().with_epochs(10))
    }

    #[test]
    fn test_builder_default() {
        let builder = SlbrinBuilder::new();
        assert!(builder.path().is_none());
        assert!(builder.update.is_none());
    }

    #[test]
    fn test_builder_with_updates() {
        let config = IndexConfig::new(Region::new(0.0, 0.0, 8.0, 8.0)).with_data_precision(1);
        let index = SlbrinBuilder::new()
            .config(config)
            .updates(UpdateConfig::new(0, 30, 10))
            .build(points(), &trainer())
            .unwrap();
        assert_eq!(index.time_id(), Some(3));
        assert_eq!(index.deltas().len(), index.partitions().len());
    }

    #[test]
    fn test_builder_index_path_reopens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");
        let config = IndexConfig::new(Region::new(0.0, 0.0, 8.0, 8.0))
            .with_threshold_number(4)
            .with_data_precision(1);

        let built = SlbrinBuilder::new()
            .config(config.clone())
            .index_path(&path)
            .build(points(), &trainer())
            .unwrap();
        assert!(path.exists());

        let reopened = SlbrinBuilder::new()
            .config(config)
            .index_path(&path)
            .build(Vec::new(), &trainer())
            .unwrap();
        assert_eq!(reopened.len(), built.len());
        assert_eq!(reopened.partitions(), built.partitions());
    }
}
