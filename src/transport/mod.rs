//! External process transport: cue, aws, aws-vault, ykman, sops, hooks.
//!
//! Every collaborator is driven through its executable rather than a linked
//! SDK. Calls are async, bounded by a timeout, and kill the child on expiry.
//! Credentials are injected into the child's environment only.

pub mod aws;
pub mod local;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Output from running an external command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Best single-line description of a failure.
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exit code {}", self.exit_code)
        } else {
            stderr.to_string()
        }
    }
}

/// A command line plus its environment and working directory.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub program: &'a str,
    pub args: Vec<String>,
    pub env: Vec<(&'static str, String)>,
    pub cwd: Option<&'a Path>,
    pub timeout: Duration,
}

impl<'a> Invocation<'a> {
    pub fn new(program: &'a str, timeout: Duration) -> Self {
        Self {
            program,
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.env.push((key, value.into()));
        self
    }

    pub fn current_dir(mut self, dir: &'a Path) -> Self {
        self.cwd = Some(dir);
        self
    }

    pub fn display(&self) -> String {
        let mut line = self.program.to_string();
        for a in &self.args {
            line.push(' ');
            line.push_str(a);
        }
        line
    }
}

/// Run an invocation to completion. Spawn failures and timeouts are errors;
/// a non-zero exit is reported through [`ExecOutput::exit_code`].
pub async fn run(inv: &Invocation<'_>) -> Result<ExecOutput, String> {
    let mut cmd = Command::new(inv.program);
    cmd.args(&inv.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (k, v) in &inv.env {
        cmd.env(k, v);
    }
    if let Some(dir) = inv.cwd {
        cmd.current_dir(dir);
    }

    tracing::debug!(command = %inv.display(), "spawning");
    let child = cmd
        .spawn()
        .map_err(|e| format!("failed to spawn {}: {}", inv.program, e))?;

    let output = tokio::time::timeout(inv.timeout, child.wait_with_output())
        .await
        .map_err(|_| {
            format!(
                "{} timed out after {}s",
                inv.program,
                inv.timeout.as_secs()
            )
        })?
        .map_err(|e| format!("wait error: {}", e))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run and require success, returning stdout.
pub async fn run_ok(inv: &Invocation<'_>) -> Result<String, String> {
    let out = run(inv).await?;
    if out.success() {
        Ok(out.stdout)
    } else {
        Err(out.failure_message())
    }
}
