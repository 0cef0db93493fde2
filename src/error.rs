use std::path::PathBuf;

use thiserror::Error;

/// Failures of the file-backed record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("collection {collection} does not support {operation}")]
    WrongMode {
        collection: &'static str,
        operation: &'static str,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures of the browser session itself (not of individual DOM reads,
/// which are modelled as absent values).
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("WebDriver HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebDriver protocol error: {0}")]
    Protocol(String),

    #[error("browser session lost")]
    SessionLost,
}

/// Failures inside one scrape cycle of a task.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("could not switch view: {0}")]
    Navigation(String),

    #[error("element not found: {0}")]
    NotFound(String),

    #[error("could not parse {what} from {raw:?}")]
    Parse { what: &'static str, raw: String },

    #[error("{record} is missing {field}")]
    Missing {
        record: &'static str,
        field: &'static str,
    },
}

impl ScrapeError {
    pub fn parse(what: &'static str, raw: impl Into<String>) -> Self {
        ScrapeError::Parse {
            what,
            raw: raw.into(),
        }
    }
}
