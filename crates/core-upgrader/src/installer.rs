// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Backup-and-swap installation of a downloaded core asset
//!
//! The asset is fully extracted into a staging location before the live binary is
//! touched, so a corrupt download never costs the current install or its backup.

use crate::config::Branch;
use crate::error::{Result, UpgraderError};
use crate::fsops::{self, ignore_kinds};
use crate::platform::{BranchPaths, core_file_name};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Gzip,
}

impl ArchiveKind {
    pub fn from_asset_name(name: &str) -> Result<Self> {
        if name.ends_with(".zip") {
            Ok(Self::Zip)
        } else if name.ends_with(".gz") {
            Ok(Self::Gzip)
        } else {
            Err(UpgraderError::Install(format!("unsupported asset type: {name}")))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Whether a previous binary was moved to the backup path
    pub backed_up: bool,
}

enum Staged {
    File(PathBuf),
    Dir(PathBuf),
}

impl Staged {
    async fn discard(&self) {
        let (Self::File(path) | Self::Dir(path)) = self;
        fsops::discard(path).await;
    }
}

/// Install `cache_file` as the branch's binary.
///
/// Order: stage, back up the current binary, swap the staged artifact in, drop the
/// cache file, mark executable.
pub async fn install(
    branch: Branch,
    paths: &BranchPaths,
    cache_file: &Path,
    scratch_dir: &Path,
) -> Result<InstallReport> {
    let asset_name = cache_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let kind = ArchiveKind::from_asset_name(&asset_name)?;

    tokio::fs::create_dir_all(&paths.working_dir).await?;

    tracing::info!("[{branch}] Extracting {asset_name}");
    let staged = stage(kind, paths, cache_file, scratch_dir).await?;
    if let Err(e) = validate_staged(branch, &staged).await {
        staged.discard().await;
        return Err(e);
    }

    let backed_up = fsops::move_if_exists(&paths.binary, &paths.backup)
        .await
        .map_err(|e| {
            UpgraderError::Install(format!(
                "failed to back up {}: {e}",
                paths.binary.display()
            ))
        })?;
    if backed_up {
        tracing::info!("[{branch}] Backed up previous core to {}", paths.backup.display());
    }

    let swapped = swap_in(branch, paths, &staged).await;
    staged.discard().await;
    swapped?;

    fsops::discard(cache_file).await;

    if !cfg!(windows) && !paths.binary.to_string_lossy().ends_with(".exe") {
        let chmod = set_executable(&paths.binary).await;
        ignore_kinds(chmod, &[ErrorKind::PermissionDenied, ErrorKind::Unsupported])
            .map_err(|e| UpgraderError::Install(format!("failed to mark executable: {e}")))?;
    }

    tracing::info!("[{branch}] Installed core at {}", paths.binary.display());
    Ok(InstallReport { backed_up })
}

async fn stage(
    kind: ArchiveKind,
    paths: &BranchPaths,
    cache_file: &Path,
    scratch_dir: &Path,
) -> Result<Staged> {
    let src = cache_file.to_path_buf();
    match kind {
        ArchiveKind::Gzip => {
            let dst = fsops::with_suffix(&paths.binary, ".new");
            let out = dst.clone();
            let result = tokio::task::spawn_blocking(move || gunzip_file(&src, &out))
                .await
                .map_err(|e| UpgraderError::Install(format!("extraction task failed: {e}")))?;
            if let Err(e) = result {
                fsops::discard(&dst).await;
                return Err(UpgraderError::Install(format!(
                    "failed to decompress {}: {e}",
                    cache_file.display()
                )));
            }
            Ok(Staged::File(dst))
        }
        ArchiveKind::Zip => {
            fsops::remove_if_exists(scratch_dir).await?;
            let dir = scratch_dir.to_path_buf();
            let result = tokio::task::spawn_blocking(move || unzip_to_dir(&src, &dir))
                .await
                .map_err(|e| UpgraderError::Install(format!("extraction task failed: {e}")))?;
            if let Err(e) = result {
                fsops::discard(scratch_dir).await;
                return Err(e);
            }
            Ok(Staged::Dir(scratch_dir.to_path_buf()))
        }
    }
}

/// Zip archives carry the binary under the stable file name for both branches
async fn validate_staged(branch: Branch, staged: &Staged) -> Result<()> {
    if let Staged::Dir(dir) = staged {
        let expected = dir.join(core_file_name(Branch::Main));
        if !fsops::exists(&expected).await {
            return Err(UpgraderError::Install(format!(
                "[{branch}] archive does not contain {}",
                core_file_name(Branch::Main)
            )));
        }
    }
    Ok(())
}

async fn swap_in(branch: Branch, paths: &BranchPaths, staged: &Staged) -> Result<()> {
    let fail = |what: &Path, e: io::Error| {
        UpgraderError::Install(format!("failed to move {} into place: {e}", what.display()))
    };

    match (staged, branch) {
        (Staged::File(file), _) => fsops::move_file(file, &paths.binary)
            .await
            .map_err(|e| fail(file.as_path(), e)),
        (Staged::Dir(dir), Branch::Alpha) => {
            // alpha archives may carry extra metadata; only the binary is kept
            let src = dir.join(core_file_name(Branch::Main));
            fsops::move_file(&src, &paths.binary)
                .await
                .map_err(|e| fail(src.as_path(), e))
        }
        (Staged::Dir(dir), Branch::Main) => {
            let mut entries = tokio::fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let src = entry.path();
                let dst = paths.working_dir.join(entry.file_name());
                if entry.file_type().await?.is_dir() {
                    fsops::remove_if_exists(&dst).await?;
                }
                fsops::move_file(&src, &dst)
                    .await
                    .map_err(|e| fail(src.as_path(), e))?;
            }
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o755);
    tokio::fs::set_permissions(path, perms).await
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn gunzip_file(src: &Path, dst: &Path) -> io::Result<u64> {
    let input = File::open(src)?;
    let mut decoder = GzDecoder::new(BufReader::new(input));
    let mut out = File::create(dst)?;
    let written = io::copy(&mut decoder, &mut out)?;
    out.sync_all()?;
    Ok(written)
}

fn unzip_to_dir(src: &Path, dir: &Path) -> Result<()> {
    let zip_err = |e: zip::result::ZipError| {
        UpgraderError::Install(format!("invalid zip {}: {e}", src.display()))
    };

    let file = File::open(src)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(zip_err)?;
    std::fs::create_dir_all(dir)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(zip_err)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(UpgraderError::Install(format!(
                "archive entry escapes target directory: {}",
                entry.name()
            )));
        };
        let out_path = dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))?;
        }
    }

    Ok(())
}
