// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Configuration module for the upgrader

use crate::error::{Result, UpgraderError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Tag the alpha channel is published under
pub const ALPHA_TAG: &str = "Prerelease-Alpha";

/// Shortest quiet window allowed for the rollback availability check
pub const MIN_ROLLBACK_DEBOUNCE_MS: u64 = 500;

fn default_core_dir() -> PathBuf {
    PathBuf::from("data/mihomo")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/.cache")
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_download_base_url() -> String {
    "https://github.com".to_string()
}

fn default_repo() -> String {
    "MetaCubeX/mihomo".to_string()
}

fn default_user_agent() -> String {
    concat!("core-upgrader/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_500() -> u64 {
    500
}

fn default_1000() -> u64 {
    1000
}

fn default_600() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgraderConfig {
    /// Working directory of the core; both branch binaries live here
    #[serde(default = "default_core_dir")]
    pub core_dir: PathBuf,

    /// Where release assets are downloaded to before install
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Branch the supervisor runs: "main" or "alpha"
    #[serde(default)]
    pub active_branch: Branch,

    /// GitHub token, sent as a bearer token on API requests (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,

    /// GitHub API base URL (overridable for testing)
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Base URL release downloads and pages live under
    #[serde(default = "default_download_base_url")]
    pub download_base_url: String,

    /// Repository publishing the core, as "owner/name"
    #[serde(default = "default_repo")]
    pub repo: String,

    /// Download mirror prefixes, tried in order after the direct URL
    #[serde(default)]
    pub mirrors: Vec<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Quiet window before backup existence is rechecked (milliseconds)
    #[serde(default = "default_500")]
    pub rollback_debounce_ms: u64,

    /// Delay before a cancelled download's cache file is removed (milliseconds)
    #[serde(default = "default_1000")]
    pub cancel_grace_ms: u64,

    /// How long the download progress notice may stay up (seconds)
    #[serde(default = "default_600")]
    pub progress_timeout_secs: u64,

    /// Arguments the core is started with; empty means `-d <core_dir>`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub core_args: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    #[default]
    Main,
    Alpha,
}

impl Branch {
    pub fn all() -> [Branch; 2] {
        [Self::Main, Self::Alpha]
    }

    pub fn is_alpha(self) -> bool {
        matches!(self, Self::Alpha)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Alpha => "alpha",
        }
    }

    /// Release API path relative to `repos/<repo>/`
    pub fn release_api_path(self) -> String {
        match self {
            Self::Main => "releases/latest".to_string(),
            Self::Alpha => format!("releases/tags/{ALPHA_TAG}"),
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Branch {
    type Err = UpgraderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "main" | "stable" => Ok(Self::Main),
            "alpha" => Ok(Self::Alpha),
            other => Err(UpgraderError::Config(format!(
                "Unknown branch: '{other}'. Supported branches: main, alpha"
            ))),
        }
    }
}

impl UpgraderConfig {
    pub fn release_api_url(&self, branch: Branch) -> String {
        format!(
            "{}/repos/{}/{}",
            self.api_base_url.trim_end_matches('/'),
            self.repo,
            branch.release_api_path()
        )
    }

    /// Plain-text file holding the current alpha version
    pub fn alpha_version_url(&self) -> String {
        format!(
            "{}/{}/releases/download/{ALPHA_TAG}/version.txt",
            self.download_base_url.trim_end_matches('/'),
            self.repo
        )
    }

    pub fn release_page_url(&self, branch: Branch) -> String {
        let base = self.download_base_url.trim_end_matches('/');
        match branch {
            Branch::Main => format!("{base}/{}/releases/latest", self.repo),
            Branch::Alpha => format!("{base}/{}/releases/tag/{ALPHA_TAG}", self.repo),
        }
    }

    pub fn authorization(&self) -> Option<String> {
        self.github_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(|t| format!("Bearer {}", t.trim()))
    }

    pub fn rollback_debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.rollback_debounce_ms.max(MIN_ROLLBACK_DEBOUNCE_MS))
    }

    pub fn cancel_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn core_args(&self) -> Vec<String> {
        if self.core_args.is_empty() {
            vec!["-d".to_string(), self.core_dir.display().to_string()]
        } else {
            self.core_args.clone()
        }
    }

    pub fn pid_file(&self) -> PathBuf {
        self.core_dir.join("pid.txt")
    }
}

impl Default for UpgraderConfig {
    fn default() -> Self {
        Self {
            core_dir: default_core_dir(),
            cache_dir: default_cache_dir(),
            active_branch: Branch::default(),
            github_token: None,
            api_base_url: default_api_base_url(),
            download_base_url: default_download_base_url(),
            repo: default_repo(),
            mirrors: Vec::new(),
            user_agent: default_user_agent(),
            rollback_debounce_ms: 500,
            cancel_grace_ms: 1000,
            progress_timeout_secs: 600,
            core_args: Vec::new(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<UpgraderConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| UpgraderError::Config(format!("Failed to parse config: {e}")))
    } else {
        // Create with defaults
        let config = UpgraderConfig::default();
        save_config(path, &config)?;
        Ok(config)
    }
}

pub fn save_config(path: &Path, config: &UpgraderConfig) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("tmp");
    let content = serde_json::to_string_pretty(config)?;

    // Atomic write
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = UpgraderConfig::default();
        assert_eq!(config.core_dir, PathBuf::from("data/mihomo"));
        assert_eq!(config.cache_dir, PathBuf::from("data/.cache"));
        assert_eq!(config.active_branch, Branch::Main);
        assert_eq!(config.rollback_debounce_ms, 500);
        assert_eq!(config.cancel_grace_ms, 1000);
        assert!(config.github_token.is_none());
        assert!(config.mirrors.is_empty());
    }

    #[test]
    fn test_branch_urls() {
        let config = UpgraderConfig::default();
        assert_eq!(
            config.release_api_url(Branch::Main),
            "https://api.github.com/repos/MetaCubeX/mihomo/releases/latest"
        );
        assert_eq!(
            config.release_api_url(Branch::Alpha),
            "https://api.github.com/repos/MetaCubeX/mihomo/releases/tags/Prerelease-Alpha"
        );
        assert_eq!(
            config.alpha_version_url(),
            "https://github.com/MetaCubeX/mihomo/releases/download/Prerelease-Alpha/version.txt"
        );
        assert_eq!(
            config.release_page_url(Branch::Alpha),
            "https://github.com/MetaCubeX/mihomo/releases/tag/Prerelease-Alpha"
        );
    }

    #[test]
    fn test_branch_from_str() {
        assert_eq!("main".parse::<Branch>().unwrap(), Branch::Main);
        assert_eq!("Stable".parse::<Branch>().unwrap(), Branch::Main);
        assert_eq!("ALPHA".parse::<Branch>().unwrap(), Branch::Alpha);
        assert!("nightly".parse::<Branch>().is_err());
    }

    #[test]
    fn test_authorization_header() {
        let mut config = UpgraderConfig::default();
        assert!(config.authorization().is_none());

        config.github_token = Some("   ".to_string());
        assert!(config.authorization().is_none());

        config.github_token = Some("ghp_test".to_string());
        assert_eq!(config.authorization().as_deref(), Some("Bearer ghp_test"));
    }

    #[test]
    fn test_debounce_has_floor() {
        let config = UpgraderConfig {
            rollback_debounce_ms: 10,
            ..Default::default()
        };
        assert_eq!(config.rollback_debounce().as_millis(), 500);
    }

    #[test]
    fn test_default_core_args_point_at_core_dir() {
        let config = UpgraderConfig::default();
        assert_eq!(config.core_args(), vec!["-d", "data/mihomo"]);
    }

    #[test]
    fn test_load_creates_defaults_then_roundtrips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("upgrader.json");

        let created = load_config(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.repo, "MetaCubeX/mihomo");

        let config = UpgraderConfig {
            active_branch: Branch::Alpha,
            github_token: Some("token".to_string()),
            mirrors: vec!["https://mirror.example/".to_string()],
            ..Default::default()
        };
        save_config(&path, &config).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.active_branch, Branch::Alpha);
        assert_eq!(loaded.github_token, config.github_token);
        assert_eq!(loaded.mirrors, config.mirrors);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: UpgraderConfig = serde_json::from_str(r#"{"active_branch":"alpha"}"#).unwrap();
        assert_eq!(config.active_branch, Branch::Alpha);
        assert_eq!(config.api_base_url, "https://api.github.com");
        assert_eq!(config.progress_timeout_secs, 600);
    }
}
