use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dump producer '{name}' unavailable: {reason}")]
    Producer { name: String, reason: String },

    #[error("Unsupported destination: {0}")]
    UnsupportedDestination(String),

    #[error("Upload of {artifact} to {destination} failed: {reason}")]
    Dispatch {
        destination: String,
        artifact: String,
        reason: String,
    },

    #[error("Error syncing {item}: {reason}")]
    Transfer { item: String, reason: String },

    #[error("Authentication failed: invalid key or corrupted data")]
    Authentication,

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Storage operation failed: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
