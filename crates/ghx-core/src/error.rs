use thiserror::Error;
use uuid::Uuid;

use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Api(#[from] ghx_api::ApiError),

    #[error("repository not found: {owner}/{repo}")]
    RepositoryNotFound { owner: String, repo: String },

    #[error("not a file: {path} ({kind})")]
    NotAFile { path: String, kind: String },

    #[error("file too large: {path} is {size} bytes, limit is {limit}")]
    FileTooLarge { path: String, size: u64, limit: u64 },

    #[error(
        "batch byte budget exceeded after {processed} of {requested} files: \
         {attempted} bytes would exceed limit of {limit}"
    )]
    BatchBudgetExceeded {
        processed: usize,
        requested: usize,
        attempted: u64,
        limit: u64,
    },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("invalid session patch: {0}")]
    InvalidPatch(String),

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("session {0} has no repository bound")]
    RepositoryNotBound(Uuid),

    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// Returns true for failures caused by a byte budget.
    ///
    /// These are never retried and abort batch reads.
    pub fn is_budget_violation(&self) -> bool {
        matches!(
            self,
            Self::FileTooLarge { .. } | Self::BatchBudgetExceeded { .. }
        )
    }
}
