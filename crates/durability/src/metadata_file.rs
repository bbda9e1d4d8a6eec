//! File-backed metadata store
//!
//! The whole metadata table is kept in memory and rewritten on every change.
//!
//! ## File Format
//!
//! ```text
//! +--------+---------+--------+---------------------+
//! | "PSMD" | version | crc32  | MessagePack payload |
//! | 4 B    | u32 LE  | u32 LE | ...                 |
//! +--------+---------+--------+---------------------+
//! ```
//!
//! Writes go to a temp file that is fsynced and renamed over the old one,
//! so a crash leaves either the previous or the new table on disk.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use pagestore_concurrency::TransactionContext;
use pagestore_core::{CheckpointList, Error, Result};
use tracing::{debug, info};

use crate::metadata::{MetadataStore, METADATA_URI};

/// Magic bytes for the metadata file
const METADATA_MAGIC: &[u8; 4] = b"PSMD";
/// Current file format version
const METADATA_VERSION: u32 = 1;
const HEADER_SIZE: usize = 12;

#[derive(Debug, Default, Serialize, Deserialize)]
struct MetadataFile {
    tables: BTreeMap<String, CheckpointList>,
}

/// Metadata store persisted to a single file
#[derive(Debug)]
pub struct FileMetadataStore {
    path: PathBuf,
    tables: RwLock<BTreeMap<String, CheckpointList>>,
}

impl FileMetadataStore {
    /// Open the store at `path`, creating it if missing
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tables = if path.exists() {
            let file = read_metadata(&path)?;
            info!(target: "pagestore::meta", path = %path.display(), tables = file.tables.len(), "Metadata loaded");
            file.tables
        } else {
            let mut tables = BTreeMap::new();
            tables.insert(METADATA_URI.to_string(), CheckpointList::new());
            write_metadata(&path, &tables)?;
            info!(target: "pagestore::meta", path = %path.display(), "Metadata created");
            tables
        };

        Ok(FileMetadataStore {
            path,
            tables: RwLock::new(tables),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, CheckpointList>) -> Result<T>,
    ) -> Result<T> {
        let mut tables = self.tables.write();
        let mut next = tables.clone();
        let out = f(&mut next)?;
        write_metadata(&self.path, &next)?;
        *tables = next;
        Ok(out)
    }
}

impl MetadataStore for FileMetadataStore {
    fn get_checkpoint_list(&self, uri: &str) -> Result<Option<CheckpointList>> {
        Ok(self.tables.read().get(uri).cloned())
    }

    fn set_checkpoint_list(
        &self,
        uri: &str,
        checkpoints: &CheckpointList,
        txn: &TransactionContext,
    ) -> Result<()> {
        let mut persisted = checkpoints.clone();
        persisted.clear_flags();
        self.update(|tables| {
            tables.insert(uri.to_string(), persisted);
            Ok(())
        })?;
        debug!(target: "pagestore::meta", uri, isolation = %txn.isolation(), "Checkpoint list persisted");
        Ok(())
    }

    fn create(&self, uri: &str) -> Result<()> {
        self.update(|tables| {
            if tables.contains_key(uri) {
                return Err(Error::invalid_input(format!("{}: table already exists", uri)));
            }
            tables.insert(uri.to_string(), CheckpointList::new());
            Ok(())
        })
    }

    fn remove(&self, uri: &str) -> Result<bool> {
        if !self.tables.read().contains_key(uri) {
            return Ok(false);
        }
        self.update(|tables| Ok(tables.remove(uri).is_some()))
    }

    fn tables(&self) -> Result<Vec<String>> {
        Ok(self.tables.read().keys().cloned().collect())
    }
}

fn write_metadata(path: &Path, tables: &BTreeMap<String, CheckpointList>) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let file = MetadataFile {
        tables: tables.clone(),
    };
    let payload = rmp_serde::to_vec_named(&file)
        .map_err(|e| Error::Serialization(format!("metadata encode: {}", e)))?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(METADATA_MAGIC);
    buf.extend_from_slice(&METADATA_VERSION.to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    buf.extend_from_slice(&payload);

    let tmp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn read_metadata(path: &Path) -> Result<MetadataFile> {
    let buf = std::fs::read(path)?;
    if buf.len() < HEADER_SIZE {
        return Err(Error::Serialization("metadata file too small".to_string()));
    }
    if &buf[0..4] != METADATA_MAGIC {
        return Err(Error::Serialization("bad metadata magic".to_string()));
    }
    let version = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    if version != METADATA_VERSION {
        return Err(Error::Serialization(format!(
            "unsupported metadata version {}",
            version
        )));
    }
    let expected = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    let payload = &buf[HEADER_SIZE..];
    if crc32fast::hash(payload) != expected {
        return Err(Error::Serialization("metadata checksum mismatch".to_string()));
    }
    rmp_serde::from_slice(payload)
        .map_err(|e| Error::Serialization(format!("metadata decode: {}", e)))
}
