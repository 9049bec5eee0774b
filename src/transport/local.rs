//! Local hook execution.

use super::{run, ExecOutput, Invocation};
use std::path::Path;
use std::time::Duration;

/// Execute a hook command locally via `bash -c` inside `dir`.
/// Uses bash (not sh/dash) so hooks may rely on `set -o pipefail`.
pub async fn exec_hook(command: &str, dir: &Path, timeout: Duration) -> Result<ExecOutput, String> {
    let inv = Invocation::new("bash", timeout)
        .args(["-c", command])
        .current_dir(dir);
    run(&inv).await
}

/// Run hooks in order, stopping at the first failure.
/// Returns the number of hooks that completed successfully.
pub async fn exec_hooks(hooks: &[String], dir: &Path, timeout: Duration) -> Result<usize, String> {
    for (i, hook) in hooks.iter().enumerate() {
        let out = exec_hook(hook, dir, timeout).await?;
        if !out.success() {
            return Err(format!("hook `{}` failed: {}", hook, out.failure_message()));
        }
        tracing::debug!(hook = %hook, index = i, "hook completed");
    }
    Ok(hooks.len())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_hook_runs_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = exec_hook("touch marker", dir.path(), T).await.unwrap();
        assert!(out.success());
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_hook_pipefail() {
        let dir = tempfile::tempdir().unwrap();
        let out = exec_hook("set -euo pipefail\nfalse | true", dir.path(), T)
            .await
            .unwrap();
        assert!(!out.success(), "pipefail should catch false in pipeline");
    }

    #[tokio::test]
    async fn test_hooks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = vec![
            "echo one >> log".to_string(),
            "echo two >> log".to_string(),
        ];
        assert_eq!(exec_hooks(&hooks, dir.path(), T).await.unwrap(), 2);
        let log = std::fs::read_to_string(dir.path().join("log")).unwrap();
        assert_eq!(log, "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_hooks_stop_at_failure() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = vec![
            "exit 7".to_string(),
            "touch never".to_string(),
        ];
        let err = exec_hooks(&hooks, dir.path(), T).await.unwrap_err();
        assert!(err.contains("exit 7"));
        assert!(!dir.path().join("never").exists());
    }
}
