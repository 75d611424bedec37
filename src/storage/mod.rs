//! On-disk persistence of model snapshots and whole indexes.
//!
//! Every file is a magic string, a version byte and a bincode body. Writes go
//! to a temporary sibling that is fsynced and renamed over the target.

mod index_file;
mod snapshot;

pub use index_file::IndexFile;
pub use snapshot::ModelSnapshotStore;

use crate::error::{Result, SlbrinError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub(crate) fn write_framed<T: Serialize + ?Sized>(
    path: &Path,
    magic: &[u8],
    version: u8,
    value: &T,
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let temp_path = temp_path(path);

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(magic)?;
    writer.write_all(&[version])?;
    bincode::serialize_into(&mut writer, value)?;

    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&temp_path, path)?;
    sync_parent_dir(path)?;
    Ok(())
}

pub(crate) fn read_framed<T: DeserializeOwned>(
    path: &Path,
    magic: &[u8],
    version: u8,
) -> Result<T> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut found = vec![0u8; magic.len()];
    reader
        .read_exact(&mut found)
        .map_err(|_| SlbrinError::InvalidFormat)?;
    if found != magic {
        return Err(SlbrinError::InvalidFormat);
    }
    if read_u8(&mut reader)? != version {
        return Err(SlbrinError::InvalidFormat);
    }

    Ok(bincode::deserialize_from(&mut reader)?)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut temp = path.to_path_buf();
    if let Some(name) = temp.file_name() {
        let mut new_name = name.to_string_lossy().into_owned();
        new_name.push_str(".tmp");
        temp.set_file_name(new_name);
    }
    temp
}

fn sync_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let dir = File::open(parent)?;
        dir.sync_all()?;
    }
    Ok(())
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader
        .read_exact(&mut buf)
        .map_err(|_| SlbrinError::InvalidFormat)?;
    Ok(buf[0])
}
