// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Release asset downloader with mirror fallback and cooperative cancellation

use crate::config::UpgraderConfig;
use crate::error::{Result, UpgraderError};
use crate::fsops;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancellation tokens of in-flight downloads, keyed by cache file path
#[derive(Debug, Clone, Default)]
pub struct CancelRegistry {
    tokens: Arc<Mutex<HashMap<PathBuf, CancellationToken>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh token for `key`, cancelling any download already holding it
    pub fn register(&self, key: &Path) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.tokens.lock().insert(key.to_path_buf(), token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancel the download registered under `key`; false when there is none
    pub fn cancel(&self, key: &Path) -> bool {
        match self.tokens.lock().get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn unregister(&self, key: &Path) {
        self.tokens.lock().remove(key);
    }

    pub fn is_registered(&self, key: &Path) -> bool {
        self.tokens.lock().contains_key(key)
    }
}

/// Clamps progress so a fallback mirror starting over never moves it backwards
#[derive(Debug, Default)]
pub struct MonotonicProgress {
    best: f64,
}

impl MonotonicProgress {
    /// Fraction to report for `received` of `total` bytes, if it is not a regression
    pub fn observe(&mut self, received: u64, total: u64) -> Option<f64> {
        if total == 0 {
            return None;
        }
        #[expect(clippy::cast_precision_loss, reason = "progress display only")]
        let fraction = (received as f64 / total as f64).min(1.0);
        if fraction < self.best {
            return None;
        }
        self.best = fraction;
        Some(fraction)
    }
}

/// Primary URL first, then each mirror prefix applied to it, without duplicates
pub fn candidate_urls(url: &str, mirrors: &[String]) -> Vec<String> {
    let mut urls = vec![url.to_string()];
    for mirror in mirrors {
        let mirror = mirror.trim();
        if mirror.is_empty() {
            continue;
        }
        let candidate = format!("{mirror}{url}");
        if !urls.contains(&candidate) {
            urls.push(candidate);
        }
    }
    urls
}

pub fn part_path(dest: &Path) -> PathBuf {
    fsops::with_suffix(dest, ".part")
}

/// Remove a cancelled download's cache file once in-flight writes had time to flush
pub fn schedule_cache_cleanup(path: PathBuf, grace: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        for p in [part_path(&path), path] {
            fsops::discard(&p).await;
        }
    })
}

#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    mirrors: Vec<String>,
}

impl Downloader {
    pub fn new(config: &UpgraderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| UpgraderError::Download(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            mirrors: config.mirrors.clone(),
        })
    }

    /// Download `url` to `dest`, trying each mirror in turn.
    ///
    /// `dest` only appears once the body was fully written. `size_hint` is used as the
    /// total when the server sends no content length.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        size_hint: u64,
        token: &CancellationToken,
        on_progress: &mut (dyn FnMut(f64) + Send),
    ) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut progress = MonotonicProgress::default();
        let mut last_error = None;

        for candidate in candidate_urls(url, &self.mirrors) {
            if token.is_cancelled() {
                return Err(UpgraderError::Cancelled);
            }

            tracing::info!("Downloading {candidate}");
            match self
                .fetch_once(&candidate, dest, size_hint, token, &mut progress, on_progress)
                .await
            {
                Ok(()) => return Ok(()),
                Err(UpgraderError::Cancelled) => return Err(UpgraderError::Cancelled),
                Err(e) => {
                    tracing::warn!("Download from {candidate} failed: {e}");
                    fsops::discard(&part_path(dest)).await;
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| UpgraderError::Download("No error recorded".to_string())))
    }

    async fn fetch_once(
        &self,
        url: &str,
        dest: &Path,
        size_hint: u64,
        token: &CancellationToken,
        progress: &mut MonotonicProgress,
        on_progress: &mut (dyn FnMut(f64) + Send),
    ) -> Result<()> {
        let response = tokio::select! {
            biased;
            () = token.cancelled() => return Err(UpgraderError::Cancelled),
            response = self.client.get(url).send() => response
                .map_err(|e| UpgraderError::Download(format!("Request failed: {e}")))?,
        };

        if !response.status().is_success() {
            return Err(UpgraderError::Download(format!(
                "Download failed with status: {}",
                response.status()
            )));
        }

        let expected = response.content_length();
        let total = expected.unwrap_or(size_hint);
        let part = part_path(dest);
        let mut file = tokio::fs::File::create(&part).await?;
        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => {
                    // let the partial file be removed by the cancel cleanup
                    file.flush().await?;
                    return Err(UpgraderError::Cancelled);
                }
                next = stream.next() => next,
            };

            let Some(chunk) = next else { break };
            let chunk =
                chunk.map_err(|e| UpgraderError::Download(format!("Failed to read body: {e}")))?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;

            if let Some(fraction) = progress.observe(received, total) {
                on_progress(fraction);
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = expected
            && expected != received
        {
            return Err(UpgraderError::Download(format!(
                "Truncated download: expected {expected} bytes, got {received}"
            )));
        }

        tokio::fs::rename(&part, dest).await?;
        Ok(())
    }
}
