//! Local file selection for downloads and source validation for uploads.

use std::path::{Component, Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tracing::{debug, warn};

use crate::TransferError;

/// Highest `(n)` suffix tried before giving up.
pub const MAX_COLLISION_SUFFIX: usize = 9;

/// Picks collision-free download targets and validates upload sources.
#[derive(Debug, Clone, Copy)]
pub struct LocalPathAllocator {
    max_suffix: usize,
}

impl Default for LocalPathAllocator {
    fn default() -> Self {
        Self {
            max_suffix: MAX_COLLISION_SUFFIX,
        }
    }
}

impl LocalPathAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidate paths in the order they are tried: `name.ext`, then
    /// `name (1).ext` up to `name (9).ext`.
    pub fn candidates(&self, dir: &Path, file_name: &str) -> Vec<PathBuf> {
        std::iter::once(dir.join(file_name))
            .chain((1..=self.max_suffix).map(|n| dir.join(numbered(file_name, n))))
            .collect()
    }

    /// Creates the first free candidate in `dir`.
    ///
    /// Files are created with `create_new`, so two tasks can never end up
    /// writing the same path. The directory itself is not created.
    pub async fn allocate(
        &self,
        dir: &Path,
        file_name: &str,
    ) -> Result<PartialDownload, TransferError> {
        validate_file_name(file_name)?;

        for path in self.candidates(dir, file_name) {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    debug!(path = %path.display(), "download target allocated");
                    return Ok(PartialDownload::new(path, file));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "exists");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(dir = %dir.display(), file_name, "no alternative file name available");
        Err(TransferError::NameExhausted(dir.join(file_name)))
    }

    /// Checks that `path` is a regular file and returns its canonical path
    /// and length.
    pub async fn validate_source(&self, path: &Path) -> Result<(PathBuf, u64), TransferError> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta,
            _ => return Err(TransferError::SourceMissing(path.to_path_buf())),
        };
        let canonical = tokio::fs::canonicalize(path).await?;
        Ok((canonical, meta.len()))
    }
}

/// Rejects names that are empty or would leave the target directory.
pub fn validate_file_name(file_name: &str) -> Result<(), TransferError> {
    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !file_name.contains(['/', '\\']) => Ok(()),
        _ => Err(TransferError::InvalidFileName(file_name.to_string())),
    }
}

/// `a.tar.gz` -> `a (n).tar.gz`; names without an extension, and dotfiles
/// like `.bashrc`, get the suffix appended.
fn numbered(file_name: &str, n: usize) -> String {
    let split = file_name
        .char_indices()
        .skip(1)
        .find(|&(_, c)| c == '.')
        .map(|(i, _)| i);
    match split {
        Some(i) => format!("{} ({n}){}", &file_name[..i], &file_name[i..]),
        None => format!("{file_name} ({n})"),
    }
}

/// A download target being written.
///
/// Removes the file when dropped unless [`keep`](Self::keep) was called, so
/// an aborted or canceled download never leaves a partial file behind.
#[derive(Debug)]
pub struct PartialDownload {
    path: PathBuf,
    file: Option<File>,
}

impl PartialDownload {
    fn new(path: PathBuf, file: File) -> Self {
        Self {
            path,
            file: Some(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The open file handle.
    pub fn file(&mut self) -> Result<&mut File, TransferError> {
        self.file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("download target already closed").into())
    }

    /// Closes the file and disarms the cleanup.
    pub fn keep(mut self) -> PathBuf {
        self.file = None;
        std::mem::take(&mut self.path)
    }
}

impl Drop for PartialDownload {
    fn drop(&mut self) {
        // Close before unlinking.
        let Some(file) = self.file.take() else {
            return;
        };
        drop(file);
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove partial download");
        } else {
            debug!(path = %self.path.display(), "partial download removed");
        }
    }
}
