// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Local version probing: run the core with `-v` and pick out its version token

use crate::config::Branch;
use crate::error::{Result, UpgraderError};
use crate::fsops;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tokio::process::Command;

static STABLE_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"v\S+").expect("static regex"));
static ALPHA_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"alpha-\S+").expect("static regex"));

/// Result of a successful local probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVersion {
    pub version: String,
    /// Trimmed raw output of the version command
    pub detail: String,
}

/// Extract the branch's version token from `-v` output
pub fn extract_version(branch: Branch, output: &str) -> Option<String> {
    let pattern = match branch {
        Branch::Main => &*STABLE_VERSION,
        Branch::Alpha => &*ALPHA_VERSION,
    };
    pattern.find(output).map(|m| m.as_str().to_string())
}

/// Run `binary -v` and return its trimmed stdout and stderr
pub async fn version_output(binary: &Path) -> Result<String> {
    if !fsops::exists(binary).await {
        return Err(UpgraderError::Probe(format!(
            "core binary not found: {}",
            binary.display()
        )));
    }

    let output = Command::new(binary)
        .arg("-v")
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| UpgraderError::Probe(format!("failed to run {}: {e}", binary.display())))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(UpgraderError::Probe(format!(
            "{} -v exited with {}: {}",
            binary.display(),
            output.status,
            combined.trim()
        )));
    }

    Ok(combined.trim().to_string())
}

/// Pick the branch's version out of `detail`, keeping the output alongside it
pub fn parse_local(branch: Branch, detail: String) -> Result<LocalVersion> {
    let version = extract_version(branch, &detail).ok_or_else(|| {
        UpgraderError::Probe(format!("no {branch} version in output: {detail}"))
    })?;

    tracing::debug!("[{branch}] local version {version}");
    Ok(LocalVersion { version, detail })
}
