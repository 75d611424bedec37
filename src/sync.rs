//! Thread-safe wrapper for concurrent index access.
//!
//! `SyncSlbrin` shares one [`Slbrin`] behind `Arc<RwLock<_>>` together with the
//! trainer used by its update cycles. Queries take the read lock; inserts and
//! update cycles hold the write lock for their whole duration.
//!
//! # Examples
//!
//! ```rust
//! use slbrin::{IndexConfig, IoCost, MlpTrainer, Region, Slbrin, SyncSlbrin, UpdateConfig};
//! use geo::Point;
//! use std::sync::Arc;
//! use std::thread;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IndexConfig::new(Region::new(0.0, 0.0, 10.0, 10.0)).with_data_precision(2);
//! let trainer = Arc::new(MlpTrainer::default());
//! let mut index = Slbrin::build(vec![(Point::new(1.0, 1.0), 1)], &config, trainer.as_ref())?;
//! index.build_append(UpdateConfig::new(0, 60, 60))?;
//!
//! let shared = SyncSlbrin::new(index, trainer);
//! let writer = shared.clone();
//! let handle = thread::spawn(move || {
//!     let mut io = IoCost::new();
//!     writer.insert(Point::new(2.0, 2.0), 2, 61, &mut io).unwrap();
//! });
//! handle.join().unwrap();
//!
//! let mut io = IoCost::new();
//! assert_eq!(shared.point_query(&Point::new(2.0, 2.0), &mut io).as_slice(), &[2]);
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::index::{IndexSize, Neighbor, Slbrin};
use crate::io_cost::IoCost;
use crate::model::Trainer;
use crate::update::CycleReport;
use geo::Point;
use parking_lot::RwLock;
use slbrin_types::{PayloadId, Region};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Thread-safe handle around `Slbrin` using `Arc<RwLock<Slbrin>>`.
///
/// Cloning is cheap and every clone sees the same index.
#[derive(Clone)]
pub struct SyncSlbrin {
    inner: Arc<RwLock<Slbrin>>,
    trainer: Arc<dyn Trainer>,
}

impl SyncSlbrin {
    pub fn new(index: Slbrin, trainer: Arc<dyn Trainer>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(index)),
            trainer,
        }
    }

    /// Load an index file and share it.
    pub fn open<P: AsRef<Path>>(path: P, trainer: Arc<dyn Trainer>) -> Result<Self> {
        Ok(Self::new(Slbrin::load(path)?, trainer))
    }

    pub fn point_query(&self, point: &Point<f64>, io: &mut IoCost) -> SmallVec<[PayloadId; 4]> {
        self.inner.read().point_query(point, io)
    }

    pub fn range_query(&self, window: &Region, io: &mut IoCost) -> Vec<PayloadId> {
        self.inner.read().range_query(window, io)
    }

    pub fn range_partitions(&self, window: &Region) -> BTreeMap<usize, u8> {
        self.inner.read().range_partitions(window)
    }

    pub fn knn_query(&self, point: &Point<f64>, k: usize, io: &mut IoCost) -> Vec<Neighbor> {
        self.inner.read().knn_query(point, k, io)
    }

    pub fn insert(
        &self,
        point: Point<f64>,
        id: PayloadId,
        timestamp: i64,
        io: &mut IoCost,
    ) -> Result<Vec<CycleReport>> {
        self.inner
            .write()
            .insert(point, id, timestamp, self.trainer.as_ref(), io)
    }

    pub fn update(&self, io: &mut IoCost) -> Result<CycleReport> {
        self.inner.write().update(self.trainer.as_ref(), io)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn size(&self) -> IndexSize {
        self.inner.read().size()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.inner.read().save(path)
    }

    /// Run `f` with shared access to the index.
    pub fn read<R>(&self, f: impl FnOnce(&Slbrin) -> R) -> R {
        f(&self.inner.read())
    }

    /// Consume the handle and return the index if no other clone is alive.
    pub fn into_inner(self) -> std::result::Result<Slbrin, Self> {
        let trainer = self.trainer;
        Arc::try_unwrap(self.inner)
            .map(RwLock::into_inner)
            .map_err(|inner| Self { inner, trainer })
    }
}
