//! Error kinds for discovery, evaluation, filtering, credentials and artifacts.

use std::path::PathBuf;
use std::sync::Arc;

/// Source position reported by the evaluator (file, line, column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Failure to evaluate one configuration unit.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct EvaluationError {
    pub message: String,
    pub position: Option<Position>,
}

impl EvaluationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StxError {
    #[error("no cue.mod found in {} or any parent directory", .0.display())]
    Discovery(PathBuf),

    #[error("invalid {flag} pattern: {source}")]
    FilterCompile {
        flag: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("Stacks is undefined")]
    StacksNotFound,

    #[error("cannot decode stack {label}: {message}")]
    Decode { label: String, message: String },

    #[error("credential error: {0}")]
    Credential(String),

    #[error("cloudformation error for {stack}: {message}")]
    CloudApi { stack: String, message: String },

    #[error("cannot write {}: {source}", path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Usage(String),

    /// Run aborted after the batch because a unit hit a fatal error.
    #[error("{0}")]
    Aborted(String),

    #[error("override {file}: {message}")]
    Override { file: String, message: String },

    #[error("external command {command} failed: {message}")]
    External { command: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// One failure observed by every caller of a coalesced request.
    #[error(transparent)]
    Shared(Arc<StxError>),
}

impl From<Arc<StxError>> for StxError {
    /// The last holder gets the error back unwrapped.
    fn from(e: Arc<StxError>) -> Self {
        Arc::try_unwrap(e).unwrap_or_else(StxError::Shared)
    }
}

impl StxError {
    /// Errors that end the whole run rather than a single unit or stack.
    pub fn is_fatal(&self) -> bool {
        if let StxError::Shared(inner) = self {
            return inner.is_fatal();
        }
        matches!(
            self,
            StxError::Discovery(_)
                | StxError::FilterCompile { .. }
                | StxError::Credential(_)
                | StxError::Config(_)
                | StxError::Usage(_)
                | StxError::Aborted(_)
        )
    }
}
