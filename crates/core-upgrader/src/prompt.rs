// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! User-facing confirmation, notification and progress surfaces

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;

/// Invoked when the user asks to cancel the operation behind a progress notice
pub type CancelAction = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Success(String),
    Error(String),
}

pub trait ProgressHandle: Send + Sync {
    /// `fraction` is in `0.0..=1.0`
    fn update(&self, fraction: f64);

    fn finish(&self);
}

#[async_trait]
pub trait Prompter: Send + Sync {
    /// Blocking yes/no question; `ok_label` names the affirmative action
    async fn confirm(&self, title: &str, message: &str, ok_label: &str) -> bool;

    fn notify(&self, notice: Notice);

    /// Long-lived notice for an operation the user may cancel through `on_cancel`
    fn progress(&self, message: &str, on_cancel: CancelAction) -> Box<dyn ProgressHandle>;
}

/// Prompter for an interactive terminal
#[derive(Debug, Clone)]
pub struct TerminalPrompter {
    auto_yes: bool,
    progress_timeout: Duration,
}

impl TerminalPrompter {
    pub fn new(auto_yes: bool, progress_timeout: Duration) -> Self {
        Self {
            auto_yes,
            progress_timeout,
        }
    }
}

fn is_affirmative(answer: &str, ok_label: &str) -> bool {
    let answer = answer.trim().to_lowercase();
    answer == "y" || answer == "yes" || (!answer.is_empty() && answer == ok_label.to_lowercase())
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn confirm(&self, title: &str, message: &str, ok_label: &str) -> bool {
        if self.auto_yes {
            tracing::info!("{title}: {message} (auto-confirmed)");
            return true;
        }

        eprintln!("{title}\n{message}\n[{ok_label}: y / cancel: N] ");
        let mut line = String::new();
        let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(_) => is_affirmative(&line, ok_label),
            Err(e) => {
                tracing::warn!("Failed to read confirmation: {e}");
                false
            }
        }
    }

    fn notify(&self, notice: Notice) {
        match notice {
            Notice::Info(msg) => tracing::info!("{msg}"),
            Notice::Success(msg) => tracing::info!("Done: {msg}"),
            Notice::Error(msg) => tracing::error!("{msg}"),
        }
    }

    fn progress(&self, message: &str, on_cancel: CancelAction) -> Box<dyn ProgressHandle> {
        let done = CancellationToken::new();
        let watch = done.clone();
        let timeout = self.progress_timeout;
        let label = message.to_string();

        // Ctrl-C while the notice is up cancels the operation instead of the process
        tokio::spawn(async move {
            tokio::select! {
                () = watch.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    tracing::debug!("Progress notice for '{label}' expired");
                }
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        tracing::warn!("Cancelling: {label}");
                        on_cancel();
                    }
                }
            }
        });

        tracing::info!("{message}");
        Box::new(TerminalProgress {
            label: message.to_string(),
            last_decile: AtomicU8::new(0),
            done,
        })
    }
}

struct TerminalProgress {
    label: String,
    last_decile: AtomicU8,
    done: CancellationToken,
}

impl ProgressHandle for TerminalProgress {
    fn update(&self, fraction: f64) {
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let decile = (fraction.clamp(0.0, 1.0) * 10.0).floor() as u8;
        if decile > self.last_decile.fetch_max(decile, Ordering::Relaxed) {
            tracing::info!("{}: {}%", self.label, u16::from(decile) * 10);
        }
    }

    fn finish(&self) {
        self.done.cancel();
    }
}

impl Drop for TerminalProgress {
    fn drop(&mut self) {
        self.done.cancel();
    }
}
