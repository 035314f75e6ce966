use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("repository error: {0}")]
    Repository(#[from] sn_repository::RepositoryError),

    #[error("notification error: {0}")]
    Notification(#[from] sn_common::NotificationError),

    #[error("adapter error: {0}")]
    Adapter(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("duplicate notification")]
    Duplicate,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("shutdown in progress")]
    ShutdownInProgress,

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
