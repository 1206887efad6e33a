// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Error types for the upgrader crate

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpgraderError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("version probe failed: {0}")]
    Probe(String),

    #[error("Asset Not Found: {name}")]
    AssetNotFound { name: String },

    #[error("asset was uploaded by {uploader}, not the release bot; download declined")]
    UntrustedAsset { uploader: String },

    #[error("download failed: {0}")]
    Download(String),

    #[error("download cancelled")]
    Cancelled,

    #[error("{0} declined")]
    Declined(String),

    #[error("install failed: {0}")]
    Install(String),

    #[error("rollback failed: {0}")]
    Rollback(String),

    #[error("restart failed: {0}")]
    Restart(String),

    #[error("permission grant failed: {0}")]
    Permission(String),
}

impl UpgraderError {
    /// Whether the user asked for this outcome (declined prompt or cancelled download)
    pub fn is_user_abort(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Declined(_) | Self::UntrustedAsset { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, UpgraderError>;
