//! Local file cache: content object id -> downloaded file.
//!
//! The index is a JSON object persisted next to the client config. Entries
//! whose file has disappeared are treated as absent and purged on lookup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::CacheError;

/// Longest accepted content object id.
pub const MAX_OID_LEN: usize = 40;
/// Longest accepted cached path.
pub const MAX_PATH_LEN: usize = 255;

#[derive(Debug, Default)]
pub struct FileCache {
    index: Option<PathBuf>,
    entries: BTreeMap<String, PathBuf>,
    enabled: bool,
}

impl FileCache {
    /// Opens the index at `path`, or returns a disabled cache (every
    /// lookup misses) when it cannot be read.
    pub fn open(path: &Path) -> Self {
        match Self::try_open(path) {
            Ok(cache) => cache,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "file cache disabled");
                Self::default()
            }
        }
    }

    /// Opens the index at `path`; a missing index starts empty.
    pub fn try_open(path: &Path) -> Result<Self, CacheError> {
        let entries = match std::fs::read(path) {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            index: Some(path.to_path_buf()),
            entries,
            enabled: true,
        })
    }

    /// A cache that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached path for `oid`, if it still points at a file.
    pub fn get(&mut self, oid: &str) -> Option<PathBuf> {
        let path = self.entries.get(oid)?;
        if path.is_file() {
            return Some(path.clone());
        }

        debug!(oid, path = %path.display(), "cached file missing, purging");
        self.entries.remove(oid);
        if let Err(e) = self.persist() {
            warn!(error = %e, "failed to persist file cache");
        }
        None
    }

    /// Records `path` for `oid`.
    ///
    /// Oversized ids or paths are ignored. A path that is not an existing
    /// file removes the entry instead.
    pub fn set(&mut self, oid: &str, path: &Path) -> Result<(), CacheError> {
        if !self.enabled {
            return Err(CacheError::Disabled);
        }
        if oid.is_empty() || oid.len() > MAX_OID_LEN || path.as_os_str().len() > MAX_PATH_LEN {
            debug!(oid, "cache entry out of bounds, ignored");
            return Ok(());
        }
        if !path.is_file() {
            return self.remove(oid);
        }
        self.entries.insert(oid.to_string(), path.to_path_buf());
        self.persist()
    }

    pub fn remove(&mut self, oid: &str) -> Result<(), CacheError> {
        if !self.enabled {
            return Err(CacheError::Disabled);
        }
        if self.entries.remove(oid).is_some() {
            self.persist()?;
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), CacheError> {
        let Some(index) = &self.index else {
            return Ok(());
        };
        let tmp = index.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&self.entries)?)?;
        std::fs::rename(&tmp, index)?;
        Ok(())
    }
}
