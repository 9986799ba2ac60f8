use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{tool} is not installed")]
    Precondition { tool: &'static str },

    #[error("Request to {url} failed: {message}")]
    Remote { url: String, message: String },

    #[error("Unexpected JSON shape: {0}")]
    Schema(String),

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn remote(url: &str, message: impl Into<String>) -> Self {
        Self::Remote {
            url: url.to_string(),
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
