// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Core Upgrader - install, upgrade and roll back the proxy core binary
//!
//! Tracks the stable ("main") and alpha builds of the core side by side. Each
//! branch probes its installed and latest published version, downloads release
//! assets through mirrors, installs them with a backup of the previous binary, and
//! coordinates restarts of the running core with its supervisor.

pub mod branch;
pub mod config;
pub mod downloader;
pub mod error;
pub mod fsops;
pub mod installer;
pub mod permission;
pub mod platform;
pub mod prompt;
pub mod release;
pub mod supervisor;
pub mod version;

pub use branch::{BranchState, CoreBranch};
pub use config::{Branch, UpgraderConfig};
pub use error::{Result, UpgraderError};
pub use supervisor::{CoreSupervisor, RestartOutcome};
