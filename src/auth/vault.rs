//! aws-vault credential source with optional MFA via ykman or a prompt.

use super::cache::ProfileCache;
use super::profile::AwsConfigFile;
use super::{CredentialRecord, CredentialSource};
use crate::core::error::StxError;
use crate::transport::{run_ok, Invocation};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable aws-vault sets inside `aws-vault exec`.
pub const NESTED_SESSION_VAR: &str = "AWS_VAULT";

/// Fail when already running inside a delegated aws-vault session.
pub fn ensure_not_nested(marker: &str) -> Result<(), StxError> {
    if std::env::var_os(marker).is_some() {
        return Err(StxError::Credential(
            "cannot run in nested aws-vault session".to_string(),
        ));
    }
    Ok(())
}

/// Source of one-time MFA codes when no hardware token helper is configured.
pub trait MfaPrompt: Send + Sync {
    fn read_code(&self, profile: &str) -> Result<String, String>;
}

/// Interactive terminal prompt.
pub struct TerminalPrompt;

impl MfaPrompt for TerminalPrompt {
    fn read_code(&self, profile: &str) -> Result<String, String> {
        dialoguer::Input::<String>::new()
            .with_prompt(format!("MFA code for {}", profile))
            .interact_text()
            .map_err(|e| format!("cannot read MFA code: {}", e))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VaultCredentials {
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    session_token: String,
}

/// Parse the JSON payload of `aws-vault exec --json`.
pub fn parse_vault_json(json: &str) -> Result<CredentialRecord, String> {
    let raw: VaultCredentials =
        serde_json::from_str(json).map_err(|e| format!("invalid aws-vault output: {}", e))?;
    Ok(CredentialRecord {
        access_key_id: raw.access_key_id,
        secret_access_key: raw.secret_access_key,
        session_token: raw.session_token,
    })
}

pub struct VaultSource {
    aws_config: AwsConfigFile,
    vault_command: String,
    /// `ykman` executable when hardware-token MFA is enabled
    ykman_command: Option<String>,
    prompt: Arc<dyn MfaPrompt>,
    nested_marker: String,
    timeout: Duration,
    cache: ProfileCache<CredentialRecord, StxError>,
    /// Serializes interactive prompts across profiles.
    prompt_lock: tokio::sync::Mutex<()>,
}

impl VaultSource {
    pub fn new(aws_config: AwsConfigFile, vault_command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            aws_config,
            vault_command: vault_command.into(),
            ykman_command: None,
            prompt: Arc::new(TerminalPrompt),
            nested_marker: NESTED_SESSION_VAR.to_string(),
            timeout,
            cache: ProfileCache::new(),
            prompt_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_ykman(mut self, command: impl Into<String>) -> Self {
        self.ykman_command = Some(command.into());
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn MfaPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_nested_marker(mut self, marker: impl Into<String>) -> Self {
        self.nested_marker = marker.into();
        self
    }

    async fn mfa_code(&self, profile: &str, source_profile: &str) -> Result<String, StxError> {
        if let Some(ykman) = &self.ykman_command {
            let inv = Invocation::new(ykman, self.timeout).args(["oath", "code", "-s", source_profile]);
            let code = run_ok(&inv)
                .await
                .map_err(|e| StxError::Credential(format!("ykman: {}", e)))?;
            tracing::debug!(source_profile, "pulled MFA code from ykman");
            return Ok(code.trim().to_string());
        }

        let _guard = self.prompt_lock.lock().await;
        let prompt = self.prompt.clone();
        let profile = profile.to_string();
        let code = tokio::task::spawn_blocking(move || prompt.read_code(&profile))
            .await
            .map_err(|e| StxError::Credential(format!("MFA prompt aborted: {}", e)))?
            .map_err(StxError::Credential)?;
        Ok(code.trim().to_string())
    }

    async fn acquire(&self, profile: &str) -> Result<CredentialRecord, StxError> {
        ensure_not_nested(&self.nested_marker)?;

        let section = self.aws_config.profile(profile).ok_or_else(|| {
            StxError::Credential(format!("{} does not exist in .aws/config", profile))
        })?;

        let mut inv = Invocation::new(&self.vault_command, self.timeout).args(["exec", "--no-session"]);
        if section.requires_mfa() {
            let code = self.mfa_code(profile, section.mfa_source()).await?;
            inv = inv.args(["-t".to_string(), code]);
        }
        inv = inv.args(["--json", profile]);

        tracing::debug!(profile, "requesting credentials from aws-vault");
        let stdout = run_ok(&inv)
            .await
            .map_err(|e| StxError::Credential(format!("aws-vault: {}", e)))?;
        parse_vault_json(&stdout).map_err(StxError::Credential)
    }
}

#[async_trait]
impl CredentialSource for VaultSource {
    async fn credentials(&self, profile: &str) -> Result<Option<CredentialRecord>, StxError> {
        self.cache
            .get_or_try_init(profile, || self.acquire(profile))
            .await
            .map(Some)
            .map_err(StxError::from)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const T: Duration = Duration::from_secs(10);

    const AWS_CONFIG: &str = r#"
[profile plain]
region = us-west-2

[profile x]
source_profile = identity
mfa_serial = arn:aws:iam::111:mfa/ops
"#;

    fn write_script(path: &Path, body: &str) {
        std::fs::write(path, format!("#!/bin/bash\n{}\n", body)).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// Fake aws-vault that logs its arguments and prints credentials.
    fn fake_vault(dir: &Path) -> (String, std::path::PathBuf) {
        let log = dir.join("vault.log");
        let script = dir.join("aws-vault");
        write_script(
            &script,
            &format!(
                "echo \"$@\" >> {}\nsleep 0.1\necho '{{\"Version\":1,\"AccessKeyId\":\"AKIA\",\"SecretAccessKey\":\"s3cr3t\",\"SessionToken\":\"tok\"}}'",
                log.display()
            ),
        );
        (script.to_string_lossy().to_string(), log)
    }

    struct FixedPrompt(&'static str);

    impl MfaPrompt for FixedPrompt {
        fn read_code(&self, _profile: &str) -> Result<String, String> {
            Ok(self.0.to_string())
        }
    }

    fn source(dir: &Path, marker: &str) -> (VaultSource, std::path::PathBuf) {
        let (vault, log) = fake_vault(dir);
        let src = VaultSource::new(AwsConfigFile::parse(AWS_CONFIG), vault, T)
            .with_prompt(Arc::new(FixedPrompt("123456")))
            .with_nested_marker(marker);
        (src, log)
    }

    #[test]
    fn test_parse_vault_json() {
        let rec = parse_vault_json(
            r#"{"Version":1,"AccessKeyId":"A","SecretAccessKey":"S","SessionToken":"T","Expiration":"2020-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(rec.access_key_id, "A");
        assert_eq!(rec.session_token, "T");
        assert!(parse_vault_json("{}").is_err());
    }

    #[tokio::test]
    async fn test_no_mfa_args() {
        let dir = tempfile::tempdir().unwrap();
        let (src, log) = source(dir.path(), "STX_TEST_VAULT_MARKER_A");
        let creds = src.credentials("plain").await.unwrap().unwrap();
        assert_eq!(creds.access_key_id, "AKIA");
        let args = std::fs::read_to_string(log).unwrap();
        assert_eq!(args.trim(), "exec --no-session --json plain");
    }

    #[tokio::test]
    async fn test_prompt_mfa_args() {
        let dir = tempfile::tempdir().unwrap();
        let (src, log) = source(dir.path(), "STX_TEST_VAULT_MARKER_B");
        src.credentials("x").await.unwrap();
        let args = std::fs::read_to_string(log).unwrap();
        assert_eq!(args.trim(), "exec --no-session -t 123456 --json x");
    }

    #[tokio::test]
    async fn test_ykman_uses_source_profile() {
        let dir = tempfile::tempdir().unwrap();
        let ykman = dir.path().join("ykman");
        let ykman_log = dir.path().join("ykman.log");
        write_script(
            &ykman,
            &format!("echo \"$@\" > {}\necho ' 654321 '", ykman_log.display()),
        );
        let (src, log) = source(dir.path(), "STX_TEST_VAULT_MARKER_C");
        let src = src.with_ykman(ykman.to_string_lossy());
        src.credentials("x").await.unwrap();

        assert_eq!(
            std::fs::read_to_string(ykman_log).unwrap().trim(),
            "oath code -s identity"
        );
        assert!(std::fs::read_to_string(log).unwrap().contains("-t 654321 --json x"));
    }

    #[tokio::test]
    async fn test_unknown_profile() {
        let dir = tempfile::tempdir().unwrap();
        let (src, _) = source(dir.path(), "STX_TEST_VAULT_MARKER_D");
        let err = src.credentials("nope").await.unwrap_err();
        assert!(matches!(err, StxError::Credential(ref m) if m.contains("nope does not exist")));
    }

    #[tokio::test]
    async fn test_nested_session_rejected() {
        let marker = "STX_TEST_VAULT_MARKER_NESTED";
        std::env::set_var(marker, "dev");
        let dir = tempfile::tempdir().unwrap();
        let (src, log) = source(dir.path(), marker);
        let err = src.credentials("plain").await.unwrap_err();
        std::env::remove_var(marker);
        assert!(err.to_string().contains("nested"));
        assert!(!log.exists(), "vault must not run inside a nested session");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mfa_profile_invokes_vault_once() {
        let dir = tempfile::tempdir().unwrap();
        let (src, log) = source(dir.path(), "STX_TEST_VAULT_MARKER_E");
        let src = Arc::new(src);

        let a = tokio::spawn({
            let src = src.clone();
            async move { src.credentials("x").await }
        });
        let b = tokio::spawn({
            let src = src.clone();
            async move { src.credentials("x").await }
        });
        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        assert_eq!(a, b);

        let content = std::fs::read_to_string(log).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    struct CountingPrompt(AtomicUsize);

    impl MfaPrompt for CountingPrompt {
        fn read_code(&self, _profile: &str) -> Result<String, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok("000000".to_string())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rejected_mfa_prompts_once() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("aws-vault");
        let log = dir.path().join("vault.log");
        write_script(
            &vault,
            &format!("echo \"$@\" >> {}\nsleep 0.1\necho 'invalid MFA code' >&2\nexit 1", log.display()),
        );
        let prompt = Arc::new(CountingPrompt(AtomicUsize::new(0)));
        let src = Arc::new(
            VaultSource::new(AwsConfigFile::parse(AWS_CONFIG), vault.to_string_lossy(), T)
                .with_prompt(prompt.clone())
                .with_nested_marker("STX_TEST_VAULT_MARKER_G"),
        );

        let mut handles = Vec::new();
        for _ in 0..6 {
            let src = src.clone();
            handles.push(tokio::spawn(async move { src.credentials("x").await }));
        }
        for h in handles {
            let err = h.await.unwrap().unwrap_err();
            assert!(err.is_fatal());
            assert!(err.to_string().contains("invalid MFA code"));
        }
        assert_eq!(prompt.0.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_to_string(log).unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn test_vault_failure_is_credential_error() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("aws-vault");
        write_script(&vault, "echo 'keyring locked' >&2\nexit 1");
        let src = VaultSource::new(AwsConfigFile::parse(AWS_CONFIG), vault.to_string_lossy(), T)
            .with_nested_marker("STX_TEST_VAULT_MARKER_F");
        let err = src.credentials("plain").await.unwrap_err();
        assert!(matches!(err, StxError::Credential(ref m) if m.contains("keyring locked")));
    }
}
