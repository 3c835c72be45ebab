//! Best-effort dependency install after the lock file changes

use std::process::Stdio;

use filesync_fs::NormalizedPath;
use tokio::process::Command;
use tracing::{info, warn};

/// Run `command` in `root`. Failures are logged and swallowed; a stale
/// `node_modules` must never stop a sync.
pub async fn run_install(command: &[String], root: &NormalizedPath) -> bool {
    let Some((program, args)) = command.split_first() else {
        return false;
    };

    info!(command = %command.join(" "), "installing dependencies");
    let output = Command::new(program)
        .args(args)
        .current_dir(root.to_native())
        .stdin(Stdio::null())
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            warn!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "dependency install failed"
            );
            false
        }
        Err(e) => {
            warn!(program = %program, error = %e, "could not run dependency install");
            false
        }
    }
}
