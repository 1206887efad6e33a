// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Grant the core the privileges it needs to run TUN mode

use crate::error::{Result, UpgraderError};
use std::path::Path;

/// Capabilities the core needs for TUN and low ports on Linux
pub const LINUX_CAPABILITIES: &str = "cap_net_bind_service,cap_net_admin,cap_dac_override=+ep";

/// Elevated command that grants the binary its privileges on this OS
pub fn grant_command(binary: &Path) -> Result<(String, Vec<String>)> {
    let path = binary.display().to_string();
    if cfg!(target_os = "windows") {
        Err(UpgraderError::Permission(
            "not required on this platform".to_string(),
        ))
    } else if cfg!(target_os = "macos") {
        let quoted = path.replace('\\', "\\\\").replace('"', "\\\"");
        let script = format!(
            "do shell script \"chown root:admin \\\"{quoted}\\\" && chmod +sx \\\"{quoted}\\\"\" with administrator privileges"
        );
        Ok(("osascript".to_string(), vec!["-e".to_string(), script]))
    } else {
        Ok((
            "pkexec".to_string(),
            vec!["setcap".to_string(), LINUX_CAPABILITIES.to_string(), path],
        ))
    }
}

pub async fn grant_core_permission(binary: &Path) -> Result<()> {
    let absolute = std::path::absolute(binary)?;
    let (program, args) = grant_command(&absolute)?;

    tracing::info!("Granting core permission: {program} {}", args.join(" "));
    let output = tokio::process::Command::new(&program)
        .args(&args)
        .output()
        .await
        .map_err(|e| UpgraderError::Permission(format!("Failed to run {program}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(UpgraderError::Permission(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}
