use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid batch: duplicate entity id {id}")]
    InvalidBatch { id: String },

    #[error("Invalid sort field: {0}")]
    InvalidSortField(String),

    #[error("Invalid category: {0}")]
    InvalidCategory(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine service is no longer running")]
    ServiceClosed,

    #[error("Entity source error: {0}")]
    Source(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
