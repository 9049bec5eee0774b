//! Unit evaluation through the `cue` executable.

use super::error::{EvaluationError, Position};
use super::tree::EvaluatedTree;
use super::types::ConfigurationUnit;
use crate::transport::{run, Invocation};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

/// Turns one configuration unit into its evaluated tree.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, unit: &ConfigurationUnit) -> Result<EvaluatedTree, EvaluationError>;
}

/// [`Evaluator`] running `cue export --out json .:<package>` in the unit directory.
#[derive(Debug, Clone)]
pub struct CueCli {
    pub command: String,
    pub timeout: Duration,
}

impl CueCli {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Evaluator for CueCli {
    async fn evaluate(&self, unit: &ConfigurationUnit) -> Result<EvaluatedTree, EvaluationError> {
        let inv = Invocation::new(&self.command, self.timeout)
            .args(["export", "--out", "json"])
            .arg(format!(".:{}", unit.package))
            .current_dir(&unit.dir);
        tracing::debug!(unit = %unit, cmd = %inv.display(), "evaluating");

        let out = run(&inv).await.map_err(EvaluationError::new)?;
        if !out.success() {
            return Err(parse_diagnostic(&out.stderr, &unit.display_path)
                .unwrap_or_else(|| EvaluationError::new(out.failure_message())));
        }
        EvaluatedTree::from_json(&out.stdout)
            .map_err(|e| EvaluationError::new(format!("invalid cue output: {}", e)))
    }
}

fn position_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([^\s:]+\.cue):(\d+):(\d+)")
            .unwrap_or_else(|e| unreachable!("position regex: {e}"))
    })
}

/// First diagnostic of cue's stderr: message line plus the first position.
/// Positions are rewritten to be relative to the operator's working directory.
pub fn parse_diagnostic(stderr: &str, display_path: &str) -> Option<EvaluationError> {
    let message = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())?
        .trim_end_matches(':')
        .to_string();
    let position = position_regex().captures(stderr).and_then(|c| {
        let file = c.get(1)?.as_str();
        let file = match file.strip_prefix("./") {
            Some(rel) => format!("{}/{}", display_path, rel),
            _ => file.to_string(),
        };
        Some(Position {
            file,
            line: c.get(2)?.as_str().parse().ok()?,
            column: c.get(3)?.as_str().parse().ok()?,
        })
    });
    Some(EvaluationError { message, position })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_diagnostic_with_position() {
        let stderr = "Stacks.a.Name: conflicting values \"x\" and \"y\":\n    ./stacks.cue:3:9\n    ./template.cfn.cue:1:1\n";
        let err = parse_diagnostic(stderr, "./vpc/dev").unwrap();
        assert_eq!(err.message, "Stacks.a.Name: conflicting values \"x\" and \"y\"");
        assert_eq!(
            err.position,
            Some(Position {
                file: "./vpc/dev/stacks.cue".into(),
                line: 3,
                column: 9
            })
        );
    }

    #[test]
    fn test_parse_diagnostic_absolute_file() {
        let err = parse_diagnostic("bad\n  /abs/x.cue:10:2\n", "./a").unwrap();
        assert_eq!(err.position.unwrap().file, "/abs/x.cue");
    }

    #[test]
    fn test_parse_diagnostic_without_position() {
        let err = parse_diagnostic("\n  no package found\n", "./a").unwrap();
        assert_eq!(err.message, "no package found");
        assert!(err.position.is_none());
        assert!(parse_diagnostic("   \n", "./a").is_none());
    }

    #[cfg(unix)]
    mod cli {
        use super::super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        fn fake_cue(dir: &Path, body: &str) -> String {
            let path = dir.join("cue");
            std::fs::write(&path, format!("#!/bin/bash\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().to_string()
        }

        fn unit(dir: &Path) -> ConfigurationUnit {
            ConfigurationUnit {
                dir: dir.to_path_buf(),
                root: dir.to_path_buf(),
                display_path: "./u".into(),
                package: "cfn".into(),
            }
        }

        #[tokio::test]
        async fn test_cue_success() {
            let bin = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let cmd = fake_cue(
                bin.path(),
                r#"[ "$*" = "export --out json .:cfn" ] || { echo "bad args: $*" >&2; exit 2; }
echo '{"Stacks":{"b":{},"a":{}}}'"#,
            );
            let cue = CueCli::new(cmd, Duration::from_secs(10));
            let tree = cue.evaluate(&unit(work.path())).await.unwrap();
            let labels: Vec<&str> = tree.fields(&["Stacks"]).unwrap().map(|(l, _)| l).collect();
            assert_eq!(labels, vec!["b", "a"]);
        }

        #[tokio::test]
        async fn test_cue_failure_has_position() {
            let bin = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let cmd = fake_cue(
                bin.path(),
                r#"echo 'A: reference "B" not found:' >&2
echo '    ./stacks.cue:4:5' >&2
exit 1"#,
            );
            let cue = CueCli::new(cmd, Duration::from_secs(10));
            let err = cue.evaluate(&unit(work.path())).await.unwrap_err();
            assert_eq!(err.message, "A: reference \"B\" not found");
            assert_eq!(err.position.unwrap().to_string(), "./u/stacks.cue:4:5");
        }

        #[tokio::test]
        async fn test_cue_garbage_output() {
            let bin = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let cmd = fake_cue(bin.path(), "echo not-json");
            let cue = CueCli::new(cmd, Duration::from_secs(10));
            let err = cue.evaluate(&unit(work.path())).await.unwrap_err();
            assert!(err.message.starts_with("invalid cue output"));
        }

        #[tokio::test]
        async fn test_cue_missing_binary() {
            let work = tempfile::tempdir().unwrap();
            let cue = CueCli::new("/nonexistent/cue", Duration::from_secs(10));
            assert!(cue.evaluate(&unit(work.path())).await.is_err());
        }
    }
}
