// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Filesystem helpers with explicit best-effort policies

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

/// Discard the listed error kinds, propagate everything else.
///
/// Returns `Ok(None)` when an expected failure was swallowed.
pub fn ignore_kinds<T>(result: io::Result<T>, kinds: &[ErrorKind]) -> io::Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if kinds.contains(&e.kind()) => {
            tracing::debug!("ignoring expected {:?}: {e}", e.kind());
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Rename, falling back to copy + remove when the rename cannot be done in place
pub async fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    match tokio::fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(e),
        Err(e) => {
            tracing::debug!(
                "rename {} -> {} failed ({e}), copying instead",
                src.display(),
                dst.display()
            );
            tokio::fs::copy(src, dst).await.map_err(|_| e)?;
            tokio::fs::remove_file(src).await
        }
    }
}

/// Move that treats a missing source as a normal outcome; returns whether anything moved
pub async fn move_if_exists(src: &Path, dst: &Path) -> io::Result<bool> {
    Ok(ignore_kinds(move_file(src, dst).await, &[ErrorKind::NotFound])?.is_some())
}

/// Remove a file or directory tree; a missing path is not an error
pub async fn remove_if_exists(path: &Path) -> io::Result<()> {
    let meta = match ignore_kinds(tokio::fs::symlink_metadata(path).await, &[ErrorKind::NotFound])?
    {
        Some(meta) => meta,
        None => return Ok(()),
    };
    let result = if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    ignore_kinds(result, &[ErrorKind::NotFound]).map(|_| ())
}

/// Remove `path` when cleaning up after a failure; anything but a missing path is logged
pub async fn discard(path: &Path) {
    if let Err(e) = remove_if_exists(path).await {
        tracing::warn!("Failed to remove {}: {e}", path.display());
    }
}

pub async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// `path` with `suffix` appended to its file name
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
