//! Claude CLI availability probe

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Default ceiling for the `--version` probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Check whether the Claude CLI can be started.
///
/// `true` only when `<binary> --version` exits 0 after writing something to
/// stdout. Spawn errors, non-zero exits, missing output and timeouts all
/// yield `false`; a timed-out probe process is killed.
pub async fn check_claude_cli(binary: &Path, timeout: Duration) -> bool {
    let mut child = match Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::debug!(binary = %binary.display(), "Claude CLI probe failed to spawn: {}", e);
            return false;
        }
    };

    let mut stdout = child.stdout.take();
    let probe = async {
        let mut output = Vec::new();
        if let Some(ref mut stdout) = stdout {
            if let Err(e) = stdout.read_to_end(&mut output).await {
                tracing::debug!("Claude CLI probe read failed: {}", e);
            }
        }
        let status = child.wait().await;
        (status, output)
    };

    let result = tokio::time::timeout(timeout, probe).await;
    match result {
        Ok((Ok(status), output)) => {
            let installed = status.success() && !output.is_empty();
            tracing::debug!(
                binary = %binary.display(),
                exit_code = ?status.code(),
                output_bytes = output.len(),
                installed,
                "Claude CLI probe finished"
            );
            installed
        }
        Ok((Err(e), _)) => {
            tracing::debug!("Claude CLI probe wait failed: {}", e);
            false
        }
        Err(_) => {
            tracing::warn!(
                binary = %binary.display(),
                timeout_ms = timeout.as_millis() as u64,
                "Claude CLI probe timed out"
            );
            let _ = child.kill().await;
            false
        }
    }
}
