use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatastoreError {
    #[error("Parsing error")]
    Serde(#[from] serde_json::Error),

    #[error("IO error")]
    IO(#[from] std::io::Error),

    #[error("Failed to open store at {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: Box<DatastoreError>,
    },

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("No database registered as {0:?}")]
    UnknownDb(String),

    #[error("Invalid value {value:?} for property {key}")]
    Config { key: String, value: String },
}

impl DatastoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatastoreError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, DatastoreError>;
