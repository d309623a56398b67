use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("fetch failed for {url}: {reason}")]
    FetchFailure { url: String, reason: String },

    #[error("catalog store {path:?} is corrupt: {source}")]
    StoreCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read catalog store {path:?}: {source}")]
    StoreRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write catalog store {path:?}: {source}")]
    StoreWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog store {path:?} uses schema version {found}, newest supported is {supported}")]
    UnsupportedSchema {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid CSS selector '{0}'")]
    InvalidSelector(String),

    #[error("site profile error: {0}")]
    Profile(String),

    #[error("input error: {0}")]
    Input(String),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
