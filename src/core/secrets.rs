//! Parameter overrides from sops-encrypted dotenv files.

use super::error::StxError;
use super::types::Stack;
use crate::auth::{Session, SessionBroker};
use crate::transport::{run, Invocation};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::path::Path;
use std::time::Duration;

/// Decrypts a secrets file to dotenv text.
#[async_trait]
pub trait SecretDecrypter: Send + Sync {
    async fn decrypt(&self, session: &Session, file: &Path) -> Result<String, String>;
}

/// [`SecretDecrypter`] backed by `sops --decrypt --output-type dotenv`.
#[derive(Debug, Clone)]
pub struct SopsCli {
    pub command: String,
    pub timeout: Duration,
}

impl SopsCli {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SecretDecrypter for SopsCli {
    async fn decrypt(&self, session: &Session, file: &Path) -> Result<String, String> {
        let inv = Invocation::new(&self.command, self.timeout)
            .args(["--decrypt", "--output-type", "dotenv"])
            .arg(file.to_string_lossy());
        let inv = session.apply_env(inv);
        let out = run(&inv).await?;
        if out.success() {
            Ok(out.stdout)
        } else {
            Err(out.failure_message())
        }
    }
}

/// Parse `KEY=VALUE` lines. Blank lines and `#` comments are ignored, an
/// `export ` prefix is accepted and matching outer quotes are stripped.
pub fn parse_dotenv(content: &str) -> IndexMap<String, String> {
    let mut vars = IndexMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            tracing::debug!(line, "ignoring dotenv line without '='");
            continue;
        };
        let value = value.trim();
        let value = if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value[1..value.len() - 1].replace("\\n", "\n")
        } else if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
            value[1..value.len() - 1].to_string()
        } else {
            value.to_string()
        };
        vars.insert(key.trim().to_string(), value);
    }
    vars
}

/// Resolve every `Overrides` entry of `stack` into parameter values.
///
/// Each entry's key is a secrets file relative to `unit_dir`. `SopsProfile`
/// (or the stack's own `Profile`) selects the session used to decrypt it.
pub async fn resolve_overrides(
    stack: &Stack,
    unit_dir: &Path,
    broker: &SessionBroker,
    decrypter: &dyn SecretDecrypter,
) -> Result<IndexMap<String, String>, StxError> {
    let mut params = IndexMap::new();
    for (file, spec) in &stack.overrides {
        let profile = if spec.sops_profile.is_empty() {
            stack.profile.as_str()
        } else {
            spec.sops_profile.as_str()
        };
        let session = broker.session(profile).await?;
        let path = unit_dir.join(file);
        tracing::debug!(stack = %stack.name, file = %path.display(), profile, "decrypting overrides");
        let plain = decrypter
            .decrypt(&session, &path)
            .await
            .map_err(|message| StxError::Override {
                file: file.clone(),
                message,
            })?;
        let secrets = parse_dotenv(&plain);
        for (param, key) in &spec.map {
            let value = secrets.get(key).ok_or_else(|| StxError::Override {
                file: file.clone(),
                message: format!("secret {} not found", key),
            })?;
            params.insert(param.clone(), value.clone());
        }
    }
    Ok(params)
}
