use super::{read_framed, write_framed};
use crate::error::Result;
use crate::index::Slbrin;
use std::path::{Path, PathBuf};

const INDEX_MAGIC: &[u8] = b"SLBRIN_INDEX";
const INDEX_VERSION: u8 = 1;

/// A whole index on disk: meta page, partitions, item array, pending deltas
/// and update state.
#[derive(Debug, Clone)]
pub struct IndexFile {
    path: PathBuf,
}

impl IndexFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn save(&self, index: &Slbrin) -> Result<()> {
        write_framed(&self.path, INDEX_MAGIC, INDEX_VERSION, index)?;
        log::info!(
            "Saved index with {} partitions to {}",
            index.partitions().len(),
            self.path.display()
        );
        Ok(())
    }

    pub fn load(&self) -> Result<Slbrin> {
        read_framed(&self.path, INDEX_MAGIC, INDEX_VERSION)
    }
}

impl Slbrin {
    /// Write the index to `path`, replacing any previous file atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        IndexFile::new(path).save(self)
    }

    /// Read an index written by [`Slbrin::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        IndexFile::new(path).load()
    }
}
