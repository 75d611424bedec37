//! Updatable learned block-range index for 2D point data.
//!
//! Points are keyed by an integer geohash, sorted, and cut into block ranges
//! by adaptive quadrant splitting. Each block range carries a small learned
//! model that predicts where a key sits inside it, with error bounds that make
//! the prediction exact after a short local search. Inserts are buffered per
//! block range and merged in time-bucketed update cycles.
//!
//! ```rust
//! use slbrin::{IndexConfig, IoCost, MlpTrainer, Region, Slbrin};
//! use geo::Point;
//!
//! let config = IndexConfig::new(Region::new(-74.3, 40.5, -73.7, 40.9))
//!     .with_threshold_number(4)
//!     .with_data_precision(4);
//! let points = vec![
//!     (Point::new(-74.0060, 40.7128), 1),
//!     (Point::new(-73.9857, 40.7484), 2),
//!     (Point::new(-73.9680, 40.7850), 3),
//! ];
//! let index = Slbrin::build(points, &config, &MlpTrainer::default())?;
//!
//! let mut io = IoCost::new();
//! let window = Region::new(-74.01, 40.70, -73.98, 40.76);
//! let mut ids = index.range_query(&window, &mut io);
//! ids.sort_unstable();
//! assert_eq!(ids, vec![1, 2]);
//!
//! let nearest = index.knn_query(&Point::new(-73.97, 40.78), 1, &mut io);
//! assert_eq!(nearest[0].id, 3);
//! # Ok::<(), slbrin::SlbrinError>(())
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod geohash;
pub mod index;
pub mod io_cost;
pub mod model;
pub mod storage;
pub mod sync;
pub mod update;

pub use builder::SlbrinBuilder;
pub use config::{IndexConfig, TrainerConfig, UpdateConfig};
pub use error::{Result, SlbrinError};
pub use geohash::{CellRange, CellRanges, Geohash};
pub use index::{IndexSize, ItemArray, MetaPage, Neighbor, Partition, Slbrin};
pub use io_cost::{ITEM_SIZE, ITEMS_PER_PAGE, IoCost, MODEL_SIZE, PAGE_SIZE};
pub use model::{
    Layer, LearnedModel, MlpTrainer, PartitionModel, TrainError, TrainOutcome, Trainer,
};
pub use storage::{IndexFile, ModelSnapshotStore};
pub use sync::SyncSlbrin;
pub use update::{AppendState, CycleReport, DeltaBuffer, DeltaState, UpdateStats};

pub use slbrin_types::region::{
    RELATION_ALL, RELATION_BOTTOM, RELATION_INSIDE, RELATION_LEFT, RELATION_RIGHT, RELATION_TOP,
};
pub use slbrin_types::{PayloadId, Record, Region};

pub use geo::{Point, Rect};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{IndexConfig, Result, Slbrin, SlbrinBuilder, SlbrinError, UpdateConfig};

    pub use crate::{IoCost, MlpTrainer, Trainer, TrainerConfig};

    pub use crate::{PayloadId, Region, SyncSlbrin};

    pub use geo::Point;
}
