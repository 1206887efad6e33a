// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Platform-specific file and asset naming

use crate::config::{Branch, UpgraderConfig};
use crate::fsops::with_suffix;
use std::path::PathBuf;

#[cfg(target_os = "windows")]
pub const OS: &str = "windows";
#[cfg(target_os = "macos")]
pub const OS: &str = "darwin";
#[cfg(target_os = "freebsd")]
pub const OS: &str = "freebsd";
#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "freebsd")))]
pub const OS: &str = "linux";

#[cfg(target_arch = "x86_64")]
pub const ARCH: &str = "amd64";
#[cfg(target_arch = "aarch64")]
pub const ARCH: &str = "arm64";
#[cfg(target_arch = "x86")]
pub const ARCH: &str = "386";
#[cfg(target_arch = "arm")]
pub const ARCH: &str = "armv7";
#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "x86",
    target_arch = "arm"
)))]
pub const ARCH: &str = std::env::consts::ARCH;

const CORE_NAME: &str = "mihomo";

/// File name of a branch's binary inside the core directory
pub fn core_file_name(branch: Branch) -> String {
    let suffix = if branch.is_alpha() { "-alpha" } else { "" };
    format!("{CORE_NAME}{suffix}{}", std::env::consts::EXE_SUFFIX)
}

/// Release asset name for this platform, e.g. `mihomo-linux-amd64-v1.19.0.gz`
pub fn asset_file_name(version: &str) -> String {
    asset_file_name_for(OS, ARCH, version)
}

pub fn asset_file_name_for(os: &str, arch: &str, version: &str) -> String {
    let ext = if os == "windows" { "zip" } else { "gz" };
    format!("{CORE_NAME}-{os}-{arch}-{version}.{ext}")
}

/// Windows runs binaries unrestricted; everywhere else the core needs capabilities granted
pub fn requires_permission_grant() -> bool {
    !cfg!(windows)
}

/// Fixed on-disk locations of one branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchPaths {
    pub binary: PathBuf,
    pub backup: PathBuf,
    pub working_dir: PathBuf,
}

impl BranchPaths {
    pub fn new(config: &UpgraderConfig, branch: Branch) -> Self {
        let binary = config.core_dir.join(core_file_name(branch));
        Self {
            backup: with_suffix(&binary, ".bak"),
            binary,
            working_dir: config.core_dir.clone(),
        }
    }

    /// Cache location for a downloaded asset
    pub fn cache_file(config: &UpgraderConfig, asset_name: &str) -> PathBuf {
        config.cache_dir.join(asset_name)
    }
}
