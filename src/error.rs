use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tiling failed: {0}")]
    Tiling(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Defaults error: {0}")]
    Defaults(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PlanError>;
