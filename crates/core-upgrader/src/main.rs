// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Core Upgrader - command-line host for the upgrade manager
//!
//! Wires the stable and alpha branches to a terminal prompter and a pid-file
//! supervisor of the running core.

use anyhow::Context;
use clap::{Parser, Subcommand};
use core_upgrader::branch::{BranchState, CoreBranch};
use core_upgrader::config::{Branch, load_config};
use core_upgrader::downloader::CancelRegistry;
use core_upgrader::prompt::TerminalPrompter;
use core_upgrader::supervisor::{PidFileSupervisor, RestartOutcome};
use core_upgrader::{Result as UpgradeResult, UpgraderError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "core-upgrader")]
#[command(author, version, about = "Install, upgrade and roll back the proxy core")]
struct Cli {
    /// JSON config file, created with defaults when missing
    #[arg(long, default_value = "data/core-upgrader.json")]
    config: PathBuf,

    /// Branch to operate on (main or alpha); defaults to the active branch
    #[arg(long)]
    branch: Option<Branch>,

    /// Answer yes to every confirmation
    #[arg(long, short = 'y', default_value_t = false)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show installed and latest versions of both branches
    Status,

    /// Fetch the latest published version of the branch
    Check,

    /// Download and install the latest release of the branch
    Download,

    /// Restart the running core
    Restart,

    /// Restore the previous core from its backup
    Rollback,

    /// Grant the core the privileges TUN mode needs
    Grant,

    /// Open the branch's release page in a browser
    ReleasePage,
}

#[derive(Serialize)]
struct BranchStatus {
    #[serde(flatten)]
    state: BranchState,
    updatable: bool,
    grantable: bool,
    restartable: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("core_upgrader=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config = load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    info!(
        "Loaded config: active_branch={}, core_dir={}",
        config.active_branch,
        config.core_dir.display()
    );

    let supervisor = Arc::new(PidFileSupervisor::new(&config));
    let prompter = Arc::new(TerminalPrompter::new(
        cli.yes,
        Duration::from_secs(config.progress_timeout_secs),
    ));
    let cancels = CancelRegistry::new();

    let make = |branch: Branch| {
        CoreBranch::new(
            branch,
            &config,
            cancels.clone(),
            supervisor.clone(),
            prompter.clone(),
        )
    };
    let selected = cli.branch.unwrap_or(config.active_branch);

    match cli.command {
        Commands::Status => {
            let mut report = Vec::new();
            for branch in Branch::all() {
                let core = make(branch)?;
                tokio::join!(
                    core.refresh_local_version(false),
                    core.refresh_remote_version(false)
                );
                core.recheck_rollbackable().await;
                report.push(BranchStatus {
                    updatable: core.updatable(),
                    grantable: core.grantable(),
                    restartable: core.restartable(),
                    state: core.state(),
                });
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Check => {
            let core = make(selected)?;
            let local = core.refresh_local_version(false).await;
            let remote = core.refresh_remote_version(true).await;
            if remote.is_empty() {
                anyhow::bail!("could not determine the latest {selected} version");
            }
            let local = if local.is_empty() { "not installed" } else { &local };
            if core.updatable() {
                println!("{selected}: {local} -> {remote} available");
            } else {
                println!("{selected}: {local} is up to date");
            }
        }
        Commands::Download => {
            let core = make(selected)?;
            core.refresh_local_version(false).await;
            core.refresh_remote_version(true).await;
            if !core.updatable() {
                info!("[{selected}] Already up to date, reinstalling anyway");
            }
            finish(core.download_core().await)?;
            if core.restartable() {
                println!("Installed. Run `core-upgrader restart` to apply.");
            }
        }
        Commands::Restart => {
            let core = make(selected)?;
            if core.restart_core().await? == RestartOutcome::NotRunning {
                println!("Core is not running");
            }
        }
        Commands::Rollback => {
            let core = make(selected)?;
            finish(core.rollback_core().await)?;
        }
        Commands::Grant => {
            let core = make(selected)?;
            core.grant_core_permission().await?;
        }
        Commands::ReleasePage => {
            let core = make(selected)?;
            core.open_release_page()?;
        }
    }

    Ok(())
}

/// A declined prompt or cancelled download is not a failure of the tool
fn finish(result: UpgradeResult<()>) -> std::result::Result<(), UpgraderError> {
    match result {
        Err(e) if e.is_user_abort() => {
            info!("{e}");
            Ok(())
        }
        other => other,
    }
}
