//! Session broker: one cloud session per credential profile.
//!
//! Sessions and credentials are memoized for the broker's lifetime. The broker
//! is constructed once per run and shared by `Arc` across evaluation tasks;
//! concurrent first requests for a profile coalesce into a single credential
//! acquisition. Expired credentials are not refreshed.

pub mod cache;
pub mod profile;
pub mod vault;

use crate::core::config::Settings;
use crate::core::error::StxError;
use crate::transport::Invocation;
use async_trait::async_trait;
use cache::ProfileCache;
use std::fmt;
use std::sync::Arc;

/// Static credentials for one profile.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .finish()
    }
}

impl CredentialRecord {
    /// Environment variables for child processes (aws, sops).
    pub fn env(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            ("AWS_ACCESS_KEY_ID", self.access_key_id.clone()),
            ("AWS_SECRET_ACCESS_KEY", self.secret_access_key.clone()),
        ];
        if !self.session_token.is_empty() {
            vars.push(("AWS_SESSION_TOKEN", self.session_token.clone()));
        }
        vars
    }
}

/// Where credentials for a profile come from.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// `None` defers resolution to the AWS CLI's own provider chain.
    async fn credentials(&self, profile: &str) -> Result<Option<CredentialRecord>, StxError>;
}

/// Defers to `~/.aws/credentials`, SSO and the rest of the CLI provider chain.
pub struct ProviderChain;

#[async_trait]
impl CredentialSource for ProviderChain {
    async fn credentials(&self, _profile: &str) -> Result<Option<CredentialRecord>, StxError> {
        Ok(None)
    }
}

/// A cloud API session bound to a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub profile: String,
    credentials: Option<CredentialRecord>,
}

impl Session {
    pub fn from_profile(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            credentials: None,
        }
    }

    pub fn with_credentials(profile: impl Into<String>, credentials: CredentialRecord) -> Self {
        Self {
            profile: profile.into(),
            credentials: Some(credentials),
        }
    }

    pub fn credentials(&self) -> Option<&CredentialRecord> {
        self.credentials.as_ref()
    }

    /// Bind an invocation of an AWS-aware tool to this session.
    pub fn apply<'a>(&self, mut inv: Invocation<'a>) -> Invocation<'a> {
        match &self.credentials {
            Some(creds) => {
                inv.env.extend(creds.env());
                inv
            }
            None if !self.profile.is_empty() => inv.args(["--profile", self.profile.as_str()]),
            None => inv,
        }
    }

    /// Bind a tool that takes no `--profile` flag (sops): profile goes via `AWS_PROFILE`.
    pub fn apply_env<'a>(&self, mut inv: Invocation<'a>) -> Invocation<'a> {
        match &self.credentials {
            Some(creds) => {
                inv.env.extend(creds.env());
                inv
            }
            None if !self.profile.is_empty() => inv.env("AWS_PROFILE", self.profile.clone()),
            None => inv,
        }
    }
}

pub struct SessionBroker {
    source: Arc<dyn CredentialSource>,
    sessions: ProfileCache<Arc<Session>, StxError>,
}

impl SessionBroker {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self {
            source,
            sessions: ProfileCache::new(),
        }
    }

    /// Vault-backed when `Auth.AwsVault.Enabled`, provider chain otherwise.
    /// A missing `.aws/config` surfaces later as an unknown-profile error.
    pub fn from_settings(settings: &Settings) -> Self {
        let auth = &settings.auth;
        if !auth.aws_vault.enabled {
            return Self::new(Arc::new(ProviderChain));
        }
        let aws_config = profile::AwsConfigFile::load_default().unwrap_or_else(|e| {
            tracing::warn!("{}", e);
            profile::AwsConfigFile::default()
        });
        let mut source = vault::VaultSource::new(
            aws_config,
            auth.aws_vault.command.clone(),
            settings.timeouts.external(),
        );
        if auth.ykman.enabled {
            source = source.with_ykman(auth.ykman.command.clone());
        }
        Self::new(Arc::new(source))
    }

    /// Session for `profile`, acquiring credentials on first use.
    pub async fn session(&self, profile: &str) -> Result<Arc<Session>, StxError> {
        self.sessions
            .get_or_try_init(profile, || async {
                tracing::debug!(profile, "creating session");
                let session = match self.source.credentials(profile).await? {
                    Some(creds) => Session::with_credentials(profile, creds),
                    None => Session::from_profile(profile),
                };
                Ok::<_, StxError>(Arc::new(session))
            })
            .await
            .map_err(StxError::from)
    }

    pub async fn cached_sessions(&self) -> usize {
        self.sessions.len().await
    }
}
