//! Build, update and training configuration.
//!
//! All configuration types are plain serializable structs so they can be loaded
//! from JSON, or TOML with the `toml` feature, by whatever drives the index.

use serde::de::Error;
use serde::{Deserialize, Serialize};
use slbrin_types::Region;
use std::path::PathBuf;

/// Parameters of the adaptive partition builder.
///
/// # Example
///
/// ```rust
/// use slbrin::IndexConfig;
///
/// let json = r#"{
///     "region": { "rect": { "min": { "x": 0.0, "y": 0.0 }, "max": { "x": 2.0, "y": 2.0 } } },
///     "threshold_number": 4,
///     "threshold_length": 8,
///     "data_precision": 1
/// }"#;
/// let config = IndexConfig::from_json(json).unwrap();
/// assert_eq!(config.block_size, 100);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Spatial extent covered by the geohash codec
    #[serde(default = "IndexConfig::default_region")]
    pub region: Region,

    /// A candidate partition holding at least this many items is split
    #[serde(default = "IndexConfig::default_threshold_number")]
    pub threshold_number: usize,

    /// Splitting stops once a partition's geohash prefix reaches this many bits
    #[serde(default = "IndexConfig::default_threshold_length")]
    pub threshold_length: u32,

    /// Number of decimal digits the coordinates carry
    #[serde(default = "IndexConfig::default_data_precision")]
    pub data_precision: u32,

    /// Items per simulated block; `pages_per_range = threshold_number / block_size`
    #[serde(default = "IndexConfig::default_block_size")]
    pub block_size: usize,

    /// Worker threads used to train the initial models
    #[serde(default = "IndexConfig::default_train_threads")]
    pub train_threads: usize,
}

impl IndexConfig {
    fn default_region() -> Region {
        Region::new(-180.0, -90.0, 180.0, 90.0)
    }

    const fn default_threshold_number() -> usize {
        1000
    }

    const fn default_threshold_length() -> u32 {
        20
    }

    const fn default_data_precision() -> u32 {
        5
    }

    const fn default_block_size() -> usize {
        100
    }

    const fn default_train_threads() -> usize {
        1
    }

    pub fn new(region: Region) -> Self {
        Self {
            region,
            ..Default::default()
        }
    }

    pub fn with_threshold_number(mut self, threshold_number: usize) -> Self {
        self.threshold_number = threshold_number;
        self
    }

    pub fn with_threshold_length(mut self, threshold_length: u32) -> Self {
        self.threshold_length = threshold_length;
        self
    }

    pub fn with_data_precision(mut self, data_precision: u32) -> Self {
        self.data_precision = data_precision;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_train_threads(mut self, threads: usize) -> Self {
        self.train_threads = threads;
        self
    }

    /// Validate configuration values.
    ///
    /// Limits that depend on the geohash width (such as `threshold_length`
    /// against `sum_bits`) are checked by the builder.
    pub fn validate(&self) -> Result<(), String> {
        if !self.region.is_valid() {
            return Err("Region must be finite with a positive width and height".to_string());
        }
        if self.threshold_number == 0 {
            return Err("Threshold number must be greater than zero".to_string());
        }
        if self.threshold_length == 0 {
            return Err("Threshold length must be greater than zero".to_string());
        }
        if self.block_size == 0 {
            return Err("Block size must be greater than zero".to_string());
        }
        if self.train_threads == 0 {
            return Err("Train threads must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: IndexConfig = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(serde_json::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load configuration from TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: IndexConfig = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            region: Self::default_region(),
            threshold_number: Self::default_threshold_number(),
            threshold_length: Self::default_threshold_length(),
            data_precision: Self::default_data_precision(),
            block_size: Self::default_block_size(),
            train_threads: Self::default_train_threads(),
        }
    }
}

/// Parameters of the delta-buffer / merge / retrain cycle.
///
/// Timestamps are plain integers (seconds in practice). A cycle runs every time
/// an inserted point's timestamp crosses into a new `time_interval` bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Origin of the time buckets
    pub start_time: i64,

    /// Timestamp of the last point covered by the initial build
    pub end_time: i64,

    /// Width of one time bucket
    pub time_interval: i64,

    /// Capacity of every per-partition delta buffer
    #[serde(default = "UpdateConfig::default_initial_length")]
    pub initial_length: usize,

    /// Retrain touched partitions instead of replaying stored snapshots
    #[serde(default = "UpdateConfig::default_retrain")]
    pub retrain: bool,

    /// Cycles with `time_id <= time_retrain` replay snapshots even when retraining
    #[serde(default = "UpdateConfig::default_time_retrain")]
    pub time_retrain: i64,

    /// Worker threads used for retraining
    #[serde(default = "UpdateConfig::default_thread_retrain")]
    pub thread_retrain: usize,

    /// Keep a touched model, with refreshed bounds, while its error span on
    /// the merged records stays within this many positions
    #[serde(default)]
    pub threshold_err: Option<u64>,

    /// Persist the full model set after every cycle
    #[serde(default)]
    pub save_models: bool,

    /// Root directory of the per-time-id model snapshots
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
}

impl UpdateConfig {
    const fn default_initial_length() -> usize {
        1000
    }

    const fn default_retrain() -> bool {
        true
    }

    const fn default_time_retrain() -> i64 {
        -1
    }

    const fn default_thread_retrain() -> usize {
        1
    }

    pub fn new(start_time: i64, end_time: i64, time_interval: i64) -> Self {
        Self {
            start_time,
            end_time,
            time_interval,
            initial_length: Self::default_initial_length(),
            retrain: Self::default_retrain(),
            time_retrain: Self::default_time_retrain(),
            thread_retrain: Self::default_thread_retrain(),
            threshold_err: None,
            save_models: false,
            snapshot_dir: None,
        }
    }

    pub fn with_initial_length(mut self, initial_length: usize) -> Self {
        self.initial_length = initial_length;
        self
    }

    pub fn with_retrain(mut self, retrain: bool, time_retrain: i64, thread_retrain: usize) -> Self {
        self.retrain = retrain;
        self.time_retrain = time_retrain;
        self.thread_retrain = thread_retrain;
        self
    }

    pub fn with_threshold_err(mut self, threshold_err: u64) -> Self {
        self.threshold_err = Some(threshold_err);
        self
    }

    pub fn with_snapshots<P: Into<PathBuf>>(mut self, dir: P, save_models: bool) -> Self {
        self.snapshot_dir = Some(dir.into());
        self.save_models = save_models;
        self
    }

    /// Time bucket a timestamp falls into.
    pub fn time_id_of(&self, timestamp: i64) -> i64 {
        (timestamp - self.start_time).div_euclid(self.time_interval)
    }

    /// Bucket the index is in right after the initial build.
    pub fn initial_time_id(&self) -> i64 {
        let elapsed = self.end_time - self.start_time;
        (elapsed + self.time_interval - 1).div_euclid(self.time_interval)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.time_interval <= 0 {
            return Err("Time interval must be positive".to_string());
        }
        if self.end_time < self.start_time {
            return Err("End time must not precede start time".to_string());
        }
        if self.initial_length == 0 {
            return Err("Initial delta length must be greater than zero".to_string());
        }
        if self.thread_retrain == 0 {
            return Err("Retrain threads must be greater than zero".to_string());
        }
        if self.save_models && self.snapshot_dir.is_none() {
            return Err("Saving models requires a snapshot directory".to_string());
        }
        Ok(())
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: UpdateConfig = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(serde_json::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load configuration from TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: UpdateConfig = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }
}

/// Hyper-parameters of the bundled MLP trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Width of every hidden layer
    #[serde(default = "TrainerConfig::default_hidden_units")]
    pub hidden_units: usize,

    /// Number of affine + sigmoid layers before the output layer
    #[serde(default = "TrainerConfig::default_hidden_layers")]
    pub hidden_layers: usize,

    /// Maximum number of epochs
    #[serde(default = "TrainerConfig::default_epochs")]
    pub epochs: usize,

    /// Mini-batch size
    #[serde(default = "TrainerConfig::default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "TrainerConfig::default_learning_rate")]
    pub learning_rate: f64,

    /// Seed of the weight initialisation and batch shuffling
    #[serde(default)]
    pub seed: u64,
}

impl TrainerConfig {
    const fn default_hidden_units() -> usize {
        8
    }

    const fn default_hidden_layers() -> usize {
        1
    }

    const fn default_epochs() -> usize {
        200
    }

    const fn default_batch_size() -> usize {
        64
    }

    const fn default_learning_rate() -> f64 {
        0.01
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_shape(mut self, hidden_layers: usize, hidden_units: usize) -> Self {
        self.hidden_layers = hidden_layers;
        self.hidden_units = hidden_units;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Epochs without loss improvement before training stops early.
    pub fn patience(&self) -> usize {
        (self.epochs / 100).max(1)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.hidden_units == 0 {
            return Err("Hidden units must be greater than zero".to_string());
        }
        if self.batch_size == 0 {
            return Err("Batch size must be greater than zero".to_string());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err("Learning rate must be positive and finite".to_string());
        }
        Ok(())
    }
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            hidden_units: Self::default_hidden_units(),
            hidden_layers: Self::default_hidden_layers(),
            epochs: Self::default_epochs(),
            batch_size: Self::default_batch_size(),
            learning_rate: Self::default_learning_rate(),
            seed: 0,
        }
    }
}
