use thiserror::Error;

#[derive(Debug, Error)]
pub enum PalaverError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PalaverError>;
