use thiserror::Error;

use crate::replication::OperationType;

pub type Result<T> = std::result::Result<T, AppError>;

/// Errors surfaced by the persistent store. Always propagated to the
/// immediate caller; the failing transaction has already rolled back.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store worker unavailable: {0}")]
    Connection(String),
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(e) => StoreError::Sqlite(e),
            other => StoreError::Connection(other.to_string()),
        }
    }
}

/// Renderer failures. Never escape the repository: the plain-text tier
/// absorbs them.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer timed out after {0}ms")]
    Timeout(u64),

    #[error("renderer failed")]
    Failed,
}

/// Replication failures, split into retryable and terminal classes.
/// Retryable failures feed the health state machine; terminal failures
/// force the type to Failed until the host resets it.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("replication request timed out")]
    Timeout,

    #[error("transient replication failure: {0}")]
    Transient(String),

    #[error("replication http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("replication auth rejected: {0}")]
    Auth(String),

    #[error("replica schema incompatible: {0}")]
    Incompatible(String),

    #[error("replication queue full for {0}")]
    QueueFull(OperationType),

    #[error("outbound {0} suppressed while replica is failed")]
    Suppressed(OperationType),

    #[error("replication request cancelled")]
    Cancelled,
}

impl ReplicationError {
    /// Terminal errors stop retrying; everything else degrades health
    /// and gets retried later.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplicationError::Auth(_) | ReplicationError::Incompatible(_))
    }

    /// Local bookkeeping errors never reach the health machine.
    pub fn counts_toward_health(&self) -> bool {
        !matches!(
            self,
            ReplicationError::QueueFull(_)
                | ReplicationError::Suppressed(_)
                | ReplicationError::Cancelled
        )
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("migration cursor corrupt: {0}")]
    Resume(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Store(StoreError::Sqlite(err))
    }
}

impl From<tokio_rusqlite::Error> for AppError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        AppError::Store(err.into())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(err.to_string())
    }
}
