// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! GitHub release checker

use crate::config::{Branch, UpgraderConfig};
use crate::error::{Result, UpgraderError};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};

/// Uploader type GitHub reports for automated release workflows
pub const BOT_UPLOADER: &str = "Bot";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Uploader {
    #[serde(default)]
    pub login: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// GitHub release asset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseAsset {
    /// Asset name (e.g., "mihomo-linux-amd64-v1.19.0.gz")
    pub name: String,
    /// Download URL
    pub browser_download_url: String,
    /// Asset size in bytes
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub uploader: Uploader,
}

impl ReleaseAsset {
    pub fn is_bot_upload(&self) -> bool {
        self.uploader.kind == BOT_UPLOADER
    }
}

/// GitHub release information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Release {
    /// Tag name (e.g., "v1.19.0")
    #[serde(default)]
    pub tag_name: String,
    /// Release name; for the stable channel this is the version
    #[serde(default)]
    pub name: Option<String>,
    /// Release assets
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
    /// Error message GitHub embeds instead of a release (rate limits, bad tokens)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Release {
    pub fn find_asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|a| a.name == name)
    }

    /// Version this release advertises: its name, or the tag when unnamed
    pub fn version(&self) -> &str {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.tag_name)
    }
}

/// Release checker for the core's GitHub releases
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    client: reqwest::Client,
    main_url: String,
    alpha_url: String,
    alpha_marker_url: String,
    authorization: Option<String>,
}

impl ReleaseClient {
    pub fn new(config: &UpgraderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| UpgraderError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            main_url: config.release_api_url(Branch::Main),
            alpha_url: config.release_api_url(Branch::Alpha),
            alpha_marker_url: config.alpha_version_url(),
            authorization: config.authorization(),
        })
    }

    /// Fetch the release a branch installs from
    pub async fn fetch_release(&self, branch: Branch) -> Result<Release> {
        let url = match branch {
            Branch::Main => &self.main_url,
            Branch::Alpha => &self.alpha_url,
        };

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "application/vnd.github.v3+json");

        if let Some(ref auth) = self.authorization {
            request = request.header(AUTHORIZATION, auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UpgraderError::Probe(format!("Request failed: {e}")))?;

        // Check rate limit
        if let Some(remaining) = response.headers().get("x-ratelimit-remaining")
            && let Ok(remaining_str) = remaining.to_str()
            && let Ok(remaining_int) = remaining_str.parse::<u32>()
            && remaining_int < 10
        {
            tracing::warn!("GitHub rate limit low: {remaining_int} remaining");
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UpgraderError::Probe(format!("Failed to read response: {e}")))?;

        let parsed = serde_json::from_str::<Release>(&body);

        // GitHub reports errors as {"message": ...}, sometimes with a 200
        if let Ok(Release {
            message: Some(message),
            ..
        }) = &parsed
        {
            return Err(UpgraderError::Probe(message.clone()));
        }

        if !status.is_success() {
            return Err(UpgraderError::Probe(format!(
                "GitHub API error {status}: {body}"
            )));
        }

        parsed.map_err(|e| UpgraderError::Probe(format!("Failed to parse release: {e}")))
    }

    /// Fetch the plain-text alpha version marker
    pub async fn fetch_alpha_marker(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.alpha_marker_url)
            .send()
            .await
            .map_err(|e| UpgraderError::Probe(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(UpgraderError::Probe(format!(
                "Failed to fetch alpha version: {}",
                response.status()
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| UpgraderError::Probe(format!("Failed to read response: {e}")))?;

        let version = text.trim();
        if version.is_empty() {
            return Err(UpgraderError::Probe("alpha version marker is empty".to_string()));
        }
        Ok(version.to_string())
    }

    /// Latest version published for a branch
    pub async fn remote_version(&self, branch: Branch) -> Result<String> {
        match branch {
            Branch::Alpha => self.fetch_alpha_marker().await,
            Branch::Main => {
                let release = self.fetch_release(branch).await?;
                Ok(release.version().to_string())
            }
        }
    }
}
