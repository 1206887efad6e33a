// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Per-branch upgrade state and the operations that mutate it
//!
//! One [`CoreBranch`] exists per [`Branch`]. Every mutation goes through
//! [`CoreBranch::update`], which re-arms the debounced backup check whenever the
//! local version or the completion flag changed. The other guards are computed on
//! demand from a state snapshot.

use crate::config::{Branch, UpgraderConfig};
use crate::downloader::{CancelRegistry, Downloader, schedule_cache_cleanup};
use crate::error::{Result, UpgraderError};
use crate::fsops;
use crate::installer;
use crate::permission;
use crate::platform::{self, BranchPaths};
use crate::prompt::{CancelAction, Notice, Prompter};
use crate::release::ReleaseClient;
use crate::supervisor::{CoreSupervisor, PreStartAction, RestartOutcome};
use crate::version::{parse_local, version_output};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Snapshot of one branch's upgrade state
#[derive(Debug, Clone, Serialize)]
pub struct BranchState {
    pub branch: Branch,
    pub binary_path: PathBuf,
    pub backup_path: PathBuf,
    pub local_version: String,
    pub remote_version: String,
    /// Raw output of the last successful version command
    pub version_detail: String,
    pub local_version_loading: bool,
    pub remote_version_loading: bool,
    pub downloading: bool,
    /// Set by a successful install in this session; cleared on restart or branch switch
    pub download_completed: bool,
    /// Whether a backup existed at the last debounced check
    pub rollbackable: bool,
    pub remote_checked_at: Option<DateTime<Utc>>,
}

impl BranchState {
    fn new(branch: Branch, paths: &BranchPaths) -> Self {
        Self {
            branch,
            binary_path: paths.binary.clone(),
            backup_path: paths.backup.clone(),
            local_version: String::new(),
            remote_version: String::new(),
            version_detail: String::new(),
            local_version_loading: false,
            remote_version_loading: false,
            downloading: false,
            download_completed: false,
            rollbackable: false,
            remote_checked_at: None,
        }
    }

    pub fn updatable(&self) -> bool {
        !self.remote_version.is_empty() && self.remote_version != self.local_version
    }

    pub fn grantable(&self) -> bool {
        !self.local_version.is_empty() && platform::requires_permission_grant()
    }

    /// `running` and `active` are the supervisor's view of the live core
    pub fn restartable(&self, running: bool, active: Branch) -> bool {
        running
            && !self.local_version.is_empty()
            && self.download_completed
            && active == self.branch
    }
}

/// Debounced backup-existence check feeding `rollbackable`.
///
/// Each trigger aborts the pending check and schedules a new one after the quiet
/// window, so a burst of changes costs one filesystem probe.
#[derive(Debug)]
pub struct RollbackWatcher {
    backup: PathBuf,
    quiet: Duration,
    state: Arc<RwLock<BranchState>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl RollbackWatcher {
    fn new(backup: PathBuf, quiet: Duration, state: Arc<RwLock<BranchState>>) -> Self {
        Self {
            backup,
            quiet,
            state,
            pending: Mutex::new(None),
        }
    }

    pub fn trigger(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime, rollback check skipped");
            return;
        };

        let backup = self.backup.clone();
        let quiet = self.quiet;
        let state = self.state.clone();

        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(runtime.spawn(async move {
            tokio::time::sleep(quiet).await;
            let exists = fsops::exists(&backup).await;
            state.write().rollbackable = exists;
        }));
    }

    /// Skip the quiet window and check right away
    pub async fn check_now(&self) -> bool {
        if let Some(previous) = self.pending.lock().take() {
            previous.abort();
        }
        let exists = fsops::exists(&self.backup).await;
        self.state.write().rollbackable = exists;
        exists
    }
}

impl Drop for RollbackWatcher {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.lock().take() {
            pending.abort();
        }
    }
}

pub struct CoreBranch {
    branch: Branch,
    config: UpgraderConfig,
    paths: BranchPaths,
    releases: ReleaseClient,
    downloader: Downloader,
    cancels: CancelRegistry,
    supervisor: Arc<dyn CoreSupervisor>,
    prompter: Arc<dyn Prompter>,
    state: Arc<RwLock<BranchState>>,
    watcher: RollbackWatcher,
    /// Cache file of the download in flight, while it can still be cancelled
    active_download: Mutex<Option<PathBuf>>,
}

impl fmt::Debug for CoreBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreBranch")
            .field("branch", &self.branch)
            .field("paths", &self.paths)
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

impl CoreBranch {
    pub fn new(
        branch: Branch,
        config: &UpgraderConfig,
        cancels: CancelRegistry,
        supervisor: Arc<dyn CoreSupervisor>,
        prompter: Arc<dyn Prompter>,
    ) -> Result<Self> {
        let paths = BranchPaths::new(config, branch);
        let state = Arc::new(RwLock::new(BranchState::new(branch, &paths)));
        let watcher = RollbackWatcher::new(
            paths.backup.clone(),
            config.rollback_debounce(),
            state.clone(),
        );

        Ok(Self {
            branch,
            config: config.clone(),
            releases: ReleaseClient::new(config)?,
            downloader: Downloader::new(config)?,
            paths,
            cancels,
            supervisor,
            prompter,
            state,
            watcher,
            active_download: Mutex::new(None),
        })
    }

    /// Construct the branch and fire both version probes without waiting for them
    pub fn spawn(
        branch: Branch,
        config: &UpgraderConfig,
        cancels: CancelRegistry,
        supervisor: Arc<dyn CoreSupervisor>,
        prompter: Arc<dyn Prompter>,
    ) -> Result<Arc<Self>> {
        let this = Arc::new(Self::new(branch, config, cancels, supervisor, prompter)?);
        this.watcher.trigger();

        let local = this.clone();
        tokio::spawn(async move {
            local.refresh_local_version(false).await;
        });
        let remote = this.clone();
        tokio::spawn(async move {
            remote.refresh_remote_version(false).await;
        });

        Ok(this)
    }

    pub fn branch(&self) -> Branch {
        self.branch
    }

    pub fn paths(&self) -> &BranchPaths {
        &self.paths
    }

    pub fn state(&self) -> BranchState {
        self.state.read().clone()
    }

    pub fn updatable(&self) -> bool {
        self.state.read().updatable()
    }

    pub fn grantable(&self) -> bool {
        self.state.read().grantable()
    }

    pub fn restartable(&self) -> bool {
        let running = self.supervisor.is_running();
        let active = self.supervisor.active_branch();
        self.state.read().restartable(running, active)
    }

    pub fn release_page_url(&self) -> String {
        self.config.release_page_url(self.branch)
    }

    /// Recheck backup existence now instead of after the quiet window
    pub async fn recheck_rollbackable(&self) -> bool {
        self.watcher.check_now().await
    }

    fn update(&self, mutate: impl FnOnce(&mut BranchState)) {
        let changed = {
            let mut state = self.state.write();
            let before = (state.local_version.clone(), state.download_completed);
            mutate(&mut state);
            before.0 != state.local_version || before.1 != state.download_completed
        };
        if changed {
            self.watcher.trigger();
        }
    }

    fn report<T>(&self, result: &Result<T>, success: &str) {
        match result {
            Ok(_) => self.prompter.notify(Notice::Success(success.to_string())),
            Err(e) if e.is_user_abort() => self.prompter.notify(Notice::Info(e.to_string())),
            Err(e) => self.prompter.notify(Notice::Error(e.to_string())),
        }
    }

    /// Probe the installed binary; failures leave the version empty
    pub async fn refresh_local_version(&self, show_tips: bool) -> String {
        self.update(|s| s.local_version_loading = true);

        let probed = version_output(&self.paths.binary).await.and_then(|detail| {
            // kept even when no version can be read from it
            self.update(|s| s.version_detail.clone_from(&detail));
            parse_local(self.branch, detail)
        });
        let version = match probed {
            Ok(local) => {
                tracing::debug!("[{}] Local version: {}", self.branch, local.version);
                let version = local.version.clone();
                self.update(|s| s.local_version = local.version);
                version
            }
            Err(e) => {
                tracing::debug!("[{}] Local probe failed: {e}", self.branch);
                if show_tips {
                    self.prompter.notify(Notice::Error(e.to_string()));
                }
                self.update(|s| s.local_version.clear());
                String::new()
            }
        };

        self.update(|s| s.local_version_loading = false);
        version
    }

    /// Fetch the latest published version; failures leave the version empty
    pub async fn refresh_remote_version(&self, show_tips: bool) -> String {
        self.update(|s| s.remote_version_loading = true);

        let version = match self.releases.remote_version(self.branch).await {
            Ok(version) => {
                tracing::debug!("[{}] Remote version: {version}", self.branch);
                self.update(|s| s.remote_checked_at = Some(Utc::now()));
                version
            }
            Err(e) => {
                tracing::debug!("[{}] Remote probe failed: {e}", self.branch);
                if show_tips {
                    self.prompter.notify(Notice::Error(e.to_string()));
                }
                String::new()
            }
        };

        self.update(|s| {
            s.remote_version.clone_from(&version);
            s.remote_version_loading = false;
        });
        version
    }

    /// Download the latest release asset and install it over the current binary
    pub async fn download_core(&self) -> Result<()> {
        let previously_completed = self.state.read().download_completed;
        self.update(|s| {
            s.downloading = true;
            s.download_completed = false;
        });

        let result = self.fetch_and_install().await;

        self.update(|s| {
            s.downloading = false;
            s.download_completed = match &result {
                Ok(()) => true,
                // nothing was touched, so the branch stays as it was
                Err(e) if e.is_user_abort() => previously_completed,
                Err(_) => false,
            };
        });
        self.report(&result, &format!("{} core updated", self.branch));
        result
    }

    async fn fetch_and_install(&self) -> Result<()> {
        let release = self.releases.fetch_release(self.branch).await?;

        let version = match self.branch {
            Branch::Alpha => self.state.read().remote_version.clone(),
            Branch::Main => release.version().to_string(),
        };
        let asset_name = platform::asset_file_name(&version);
        let asset = release
            .find_asset(&asset_name)
            .ok_or_else(|| UpgraderError::AssetNotFound {
                name: asset_name.clone(),
            })?;

        if !asset.is_bot_upload() {
            let uploader = asset.uploader.login.clone();
            let message = format!(
                "{asset_name} was uploaded by {uploader}, not by the release bot. \
                 It may not be an official build."
            );
            if !self
                .prompter
                .confirm("Warning", &message, "Download anyway")
                .await
            {
                return Err(UpgraderError::UntrustedAsset { uploader });
            }
        }

        let cache_file = BranchPaths::cache_file(&self.config, &asset_name);
        tokio::fs::create_dir_all(&self.paths.working_dir).await?;

        self.download_asset(&asset.browser_download_url, &cache_file, asset.size)
            .await?;

        let scratch = self.config.cache_dir.join(self.branch.as_str());
        let report = installer::install(self.branch, &self.paths, &cache_file, &scratch).await?;
        tracing::info!(
            "[{}] Installed {version} (backup kept: {})",
            self.branch,
            report.backed_up
        );
        self.watcher.trigger();

        self.refresh_local_version(false).await;
        Ok(())
    }

    async fn download_asset(&self, url: &str, cache_file: &Path, size: u64) -> Result<()> {
        let token = self.cancels.register(cache_file);
        *self.active_download.lock() = Some(cache_file.to_path_buf());

        let on_cancel: CancelAction = {
            let cancels = self.cancels.clone();
            let path = cache_file.to_path_buf();
            let grace = self.config.cancel_grace();
            Arc::new(move || {
                cancel_and_cleanup(&cancels, &path, grace);
            })
        };
        let progress = self
            .prompter
            .progress(&format!("Downloading {}", display_name(cache_file)), on_cancel);

        let result = self
            .downloader
            .download(url, cache_file, size, &token, &mut |f: f64| {
                progress.update(f);
            })
            .await;

        progress.finish();
        // once install begins the download can no longer be cancelled
        self.active_download.lock().take();
        self.cancels.unregister(cache_file);
        match result {
            // cancelled after the last chunk, the cleanup is already scheduled
            Ok(()) if token.is_cancelled() => Err(UpgraderError::Cancelled),
            other => other,
        }
    }

    /// Cancel the in-flight download; false when nothing can be cancelled
    pub fn cancel_download(&self) -> bool {
        let Some(path) = self.active_download.lock().clone() else {
            return false;
        };
        cancel_and_cleanup(&self.cancels, &path, self.config.cancel_grace())
    }

    /// Restart the running core; a no-op when nothing runs
    pub async fn restart_core(&self) -> Result<RestartOutcome> {
        if !self.supervisor.is_running() {
            return Ok(RestartOutcome::NotRunning);
        }

        let result = self.supervisor.restart_active_core(None).await;
        match &result {
            Ok(RestartOutcome::Restarted) => {
                self.update(|s| s.download_completed = false);
                self.report(&result, "Core restarted");
            }
            Ok(RestartOutcome::NotRunning) => {
                tracing::info!("[{}] Supervisor refused the restart", self.branch);
            }
            Err(_) => self.report(&result, ""),
        }
        result
    }

    /// Put the backup back in place of the current binary
    pub async fn rollback_core(&self) -> Result<()> {
        let result = self.try_rollback().await;
        self.report(&result, &format!("{} core rolled back", self.branch));
        result
    }

    async fn try_rollback(&self) -> Result<()> {
        let confirmed = self
            .prompter
            .confirm(
                "Warning",
                "Replace the current core with the backed up one? The current core is discarded.",
                "Rollback",
            )
            .await;
        if !confirmed {
            return Err(UpgraderError::Declined("rollback".to_string()));
        }

        if !fsops::exists(&self.paths.backup).await {
            return Err(UpgraderError::Rollback(format!(
                "no backup at {}",
                self.paths.backup.display()
            )));
        }

        let is_current_running =
            self.supervisor.is_running() && self.supervisor.active_branch() == self.branch;

        if is_current_running {
            let backup = self.paths.backup.clone();
            let binary = self.paths.binary.clone();
            let swap: PreStartAction =
                Box::pin(async move { restore_backup(&backup, &binary).await });
            tracing::info!("[{}] Rolling back through a core restart", self.branch);
            let outcome = self.supervisor.restart_active_core(Some(swap)).await?;
            if outcome == RestartOutcome::NotRunning {
                // stopped in the meantime, nothing holds the binary any more
                restore_backup(&self.paths.backup, &self.paths.binary).await?;
            }
        } else {
            restore_backup(&self.paths.backup, &self.paths.binary).await?;
        }
        // the backup is gone even when the restored core reports the same version
        self.watcher.trigger();

        self.refresh_local_version(false).await;
        Ok(())
    }

    pub async fn grant_core_permission(&self) -> Result<()> {
        let result = permission::grant_core_permission(&self.paths.binary).await;
        self.report(&result, "Permission granted");
        result
    }

    pub fn open_release_page(&self) -> Result<()> {
        let url = self.release_page_url();
        tracing::info!("Opening {url}");
        open::that(&url)?;
        Ok(())
    }

    /// The supervisor switched branches; a pending "restart to apply" no longer applies
    pub fn on_active_branch_changed(&self) {
        self.update(|s| s.download_completed = false);
    }
}

fn cancel_and_cleanup(cancels: &CancelRegistry, path: &Path, grace: Duration) -> bool {
    if !cancels.cancel(path) {
        return false;
    }
    tracing::info!("Download of {} cancelled", path.display());
    drop(schedule_cache_cleanup(path.to_path_buf(), grace));
    true
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

async fn restore_backup(backup: &Path, binary: &Path) -> Result<()> {
    fsops::move_file(backup, binary).await.map_err(|e| {
        UpgraderError::Rollback(format!(
            "failed to move {} to {}: {e}",
            backup.display(),
            binary.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    use crate::prompt::ProgressHandle;

    #[derive(Debug, Default)]
    struct MockPrompter {
        answer: AtomicBool,
        confirms: Mutex<Vec<String>>,
        notices: Mutex<Vec<Notice>>,
    }

    impl MockPrompter {
        fn answering(answer: bool) -> Arc<Self> {
            Arc::new(Self {
                answer: AtomicBool::new(answer),
                ..Default::default()
            })
        }
    }

    struct NoProgress;

    impl ProgressHandle for NoProgress {
        fn update(&self, _fraction: f64) {}
        fn finish(&self) {}
    }

    #[async_trait]
    impl Prompter for MockPrompter {
        async fn confirm(&self, title: &str, _message: &str, _ok_label: &str) -> bool {
            self.confirms.lock().push(title.to_string());
            self.answer.load(Ordering::SeqCst)
        }

        fn notify(&self, notice: Notice) {
            self.notices.lock().push(notice);
        }

        fn progress(&self, _message: &str, _on_cancel: CancelAction) -> Box<dyn ProgressHandle> {
            Box::new(NoProgress)
        }
    }

    #[derive(Debug)]
    struct MockSupervisor {
        running: AtomicBool,
        active: Branch,
        restarts: AtomicUsize,
    }

    impl MockSupervisor {
        fn new(running: bool, active: Branch) -> Arc<Self> {
            Arc::new(Self {
                running: AtomicBool::new(running),
                active,
                restarts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CoreSupervisor for MockSupervisor {
        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        fn active_branch(&self) -> Branch {
            self.active
        }

        async fn restart_active_core(
            &self,
            pre_start: Option<PreStartAction>,
        ) -> Result<RestartOutcome> {
            if !self.is_running() {
                return Ok(RestartOutcome::NotRunning);
            }
            self.restarts.fetch_add(1, Ordering::SeqCst);
            if let Some(action) = pre_start {
                action.await?;
            }
            Ok(RestartOutcome::Restarted)
        }
    }

    fn test_config(dir: &TempDir) -> UpgraderConfig {
        UpgraderConfig {
            core_dir: dir.path().join("core"),
            cache_dir: dir.path().join("cache"),
            // unroutable, probes in these tests must not reach the network
            api_base_url: "http://127.0.0.1:9".to_string(),
            download_base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        }
    }

    fn branch_with(
        dir: &TempDir,
        branch: Branch,
        supervisor: Arc<MockSupervisor>,
        prompter: Arc<MockPrompter>,
    ) -> CoreBranch {
        let config = test_config(dir);
        std::fs::create_dir_all(&config.core_dir).unwrap();
        CoreBranch::new(
            branch,
            &config,
            CancelRegistry::new(),
            supervisor,
            prompter,
        )
        .unwrap()
    }

    fn state_with(local: &str, remote: &str, completed: bool) -> BranchState {
        let paths = BranchPaths::new(&UpgraderConfig::default(), Branch::Main);
        BranchState {
            local_version: local.to_string(),
            remote_version: remote.to_string(),
            download_completed: completed,
            ..BranchState::new(Branch::Main, &paths)
        }
    }

    #[test]
    fn test_updatable() {
        assert!(!state_with("v1.28.0", "", false).updatable());
        assert!(!state_with("v1.29.0", "v1.29.0", false).updatable());
        assert!(state_with("v1.28.0", "v1.29.0", false).updatable());
        assert!(state_with("", "v1.29.0", false).updatable());
    }

    #[test]
    fn test_grantable() {
        assert!(!state_with("", "v1.29.0", false).grantable());
        assert_eq!(
            state_with("v1.29.0", "", false).grantable(),
            platform::requires_permission_grant()
        );
    }

    #[test]
    fn test_restartable() {
        let state = state_with("v1.29.0", "v1.29.0", true);
        assert!(state.restartable(true, Branch::Main));
        assert!(!state.restartable(false, Branch::Main));
        assert!(!state.restartable(true, Branch::Alpha));
        assert!(!state_with("v1.29.0", "", false).restartable(true, Branch::Main));
        assert!(!state_with("", "", true).restartable(true, Branch::Main));
    }

    #[tokio::test]
    async fn test_active_branch_change_clears_completion() {
        let dir = TempDir::new().unwrap();
        let core = branch_with(
            &dir,
            Branch::Main,
            MockSupervisor::new(false, Branch::Main),
            MockPrompter::answering(true),
        );
        core.update(|s| s.download_completed = true);
        core.on_active_branch_changed();
        assert!(!core.state().download_completed);
    }

    #[tokio::test]
    async fn test_rollbackable_follows_backup_after_quiet_window() {
        let dir = TempDir::new().unwrap();
        let core = branch_with(
            &dir,
            Branch::Main,
            MockSupervisor::new(false, Branch::Main),
            MockPrompter::answering(true),
        );
        std::fs::write(&core.paths().backup, b"old core").unwrap();

        core.update(|s| s.local_version = "v1.28.0".to_string());
        assert!(!core.state().rollbackable);

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(core.state().rollbackable);

        std::fs::remove_file(&core.paths().backup).unwrap();
        assert!(!core.recheck_rollbackable().await);
        assert!(!core.state().rollbackable);
    }

    #[tokio::test]
    async fn test_rollbackable_checks_coalesce() {
        let dir = TempDir::new().unwrap();
        let core = branch_with(
            &dir,
            Branch::Main,
            MockSupervisor::new(false, Branch::Main),
            MockPrompter::answering(true),
        );
        std::fs::write(&core.paths().backup, b"old core").unwrap();

        // a burst of changes, each one pushing the check back
        core.update(|s| s.local_version = "v1.28.0".to_string());
        tokio::time::sleep(Duration::from_millis(100)).await;
        core.update(|s| s.download_completed = true);
        tokio::time::sleep(Duration::from_millis(200)).await;
        core.update(|s| s.local_version = "v1.29.0".to_string());

        // past the windows of the earlier changes, not yet past the last one
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!core.state().rollbackable);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(core.state().rollbackable);
    }

    #[tokio::test]
    async fn test_rollbackable_reflects_last_change_in_burst() {
        let dir = TempDir::new().unwrap();
        let core = branch_with(
            &dir,
            Branch::Main,
            MockSupervisor::new(false, Branch::Main),
            MockPrompter::answering(true),
        );
        core.update(|s| s.local_version = "v1.28.0".to_string());
        std::fs::write(&core.paths().backup, b"old core").unwrap();
        core.update(|s| s.local_version = "v1.29.0".to_string());
        std::fs::remove_file(&core.paths().backup).unwrap();
        core.update(|s| s.download_completed = true);

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(!core.state().rollbackable);
    }

    #[cfg(unix)]
    fn write_core(path: &Path, output: &str) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::write(path, format!("#!/bin/sh\necho '{output}'\n")).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rollback_to_same_version_clears_rollbackable() {
        let dir = TempDir::new().unwrap();
        let core = branch_with(
            &dir,
            Branch::Main,
            MockSupervisor::new(false, Branch::Main),
            MockPrompter::answering(true),
        );
        write_core(&core.paths().binary, "Mihomo Meta v1.29.0 linux amd64");
        write_core(&core.paths().backup, "Mihomo Meta v1.29.0 linux amd64");

        assert_eq!(core.refresh_local_version(false).await, "v1.29.0");
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(core.state().rollbackable);

        core.rollback_core().await.unwrap();
        assert_eq!(core.state().local_version, "v1.29.0");
        assert!(!core.paths().backup.exists());

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(!core.state().rollbackable);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_version_output_is_kept() {
        let dir = TempDir::new().unwrap();
        let prompter = MockPrompter::answering(true);
        let core = branch_with(
            &dir,
            Branch::Main,
            MockSupervisor::new(false, Branch::Main),
            prompter.clone(),
        );
        write_core(&core.paths().binary, "Mihomo Meta unknown-build linux amd64");

        assert_eq!(core.refresh_local_version(true).await, "");
        let state = core.state();
        assert!(state.local_version.is_empty());
        assert_eq!(state.version_detail, "Mihomo Meta unknown-build linux amd64");
        assert!(matches!(prompter.notices.lock()[0], Notice::Error(_)));
    }

    #[tokio::test]
    async fn test_rollback_declined_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let prompter = MockPrompter::answering(false);
        let core = branch_with(
            &dir,
            Branch::Main,
            MockSupervisor::new(false, Branch::Main),
            prompter.clone(),
        );
        std::fs::write(&core.paths().binary, b"new").unwrap();
        std::fs::write(&core.paths().backup, b"old").unwrap();

        let err = core.rollback_core().await.unwrap_err();
        assert!(matches!(err, UpgraderError::Declined(_)));
        assert_eq!(std::fs::read(&core.paths().binary).unwrap(), b"new");
        assert_eq!(std::fs::read(&core.paths().backup).unwrap(), b"old");
        assert!(matches!(prompter.notices.lock()[0], Notice::Info(_)));
    }

    #[tokio::test]
    async fn test_rollback_is_consuming() {
        let dir = TempDir::new().unwrap();
        let supervisor = MockSupervisor::new(false, Branch::Main);
        let core = branch_with(
            &dir,
            Branch::Main,
            supervisor.clone(),
            MockPrompter::answering(true),
        );
        std::fs::write(&core.paths().binary, b"new").unwrap();
        std::fs::write(&core.paths().backup, b"old").unwrap();

        core.rollback_core().await.unwrap();
        assert_eq!(std::fs::read(&core.paths().binary).unwrap(), b"old");
        assert!(!core.paths().backup.exists());
        assert_eq!(supervisor.restarts.load(Ordering::SeqCst), 0);

        let err = core.rollback_core().await.unwrap_err();
        assert!(matches!(err, UpgraderError::Rollback(_)));
        assert_eq!(std::fs::read(&core.paths().binary).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_rollback_of_running_branch_goes_through_restart() {
        let dir = TempDir::new().unwrap();
        let supervisor = MockSupervisor::new(true, Branch::Alpha);
        let core = branch_with(
            &dir,
            Branch::Alpha,
            supervisor.clone(),
            MockPrompter::answering(true),
        );
        std::fs::write(&core.paths().backup, b"old alpha").unwrap();

        core.rollback_core().await.unwrap();
        assert_eq!(supervisor.restarts.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(&core.paths().binary).unwrap(), b"old alpha");
    }

    #[tokio::test]
    async fn test_rollback_of_inactive_branch_is_direct() {
        let dir = TempDir::new().unwrap();
        let supervisor = MockSupervisor::new(true, Branch::Main);
        let core = branch_with(
            &dir,
            Branch::Alpha,
            supervisor.clone(),
            MockPrompter::answering(true),
        );
        std::fs::write(&core.paths().backup, b"old alpha").unwrap();

        core.rollback_core().await.unwrap();
        assert_eq!(supervisor.restarts.load(Ordering::SeqCst), 0);
        assert!(core.paths().binary.exists());
    }

    #[tokio::test]
    async fn test_restart_core() {
        let dir = TempDir::new().unwrap();
        let supervisor = MockSupervisor::new(false, Branch::Main);
        let core = branch_with(
            &dir,
            Branch::Main,
            supervisor.clone(),
            MockPrompter::answering(true),
        );
        core.update(|s| s.download_completed = true);

        assert_eq!(core.restart_core().await.unwrap(), RestartOutcome::NotRunning);
        assert!(core.state().download_completed);

        supervisor.running.store(true, Ordering::SeqCst);
        assert_eq!(core.restart_core().await.unwrap(), RestartOutcome::Restarted);
        assert!(!core.state().download_completed);
        assert_eq!(supervisor.restarts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_without_download() {
        let dir = TempDir::new().unwrap();
        let core = branch_with(
            &dir,
            Branch::Main,
            MockSupervisor::new(false, Branch::Main),
            MockPrompter::answering(true),
        );
        assert!(!core.cancel_download());
    }

    #[tokio::test]
    async fn test_failed_local_probe_leaves_version_empty() {
        let dir = TempDir::new().unwrap();
        let prompter = MockPrompter::answering(true);
        let core = branch_with(
            &dir,
            Branch::Main,
            MockSupervisor::new(false, Branch::Main),
            prompter.clone(),
        );

        assert_eq!(core.refresh_local_version(false).await, "");
        assert!(prompter.notices.lock().is_empty());

        assert_eq!(core.refresh_local_version(true).await, "");
        let state = core.state();
        assert!(state.local_version.is_empty());
        assert!(!state.local_version_loading);
        assert!(matches!(prompter.notices.lock()[0], Notice::Error(_)));
    }
}
