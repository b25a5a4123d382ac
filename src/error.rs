use reqwest::StatusCode;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::block::Block;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("no source address was given")]
    MissingAddress,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to probe {url}: {reason}")]
    Probe { url: String, reason: String },

    #[error("{url} does not support range requests, parallel download is impossible")]
    UnsupportedResource { url: String },

    #[error("transient network failure fetching block {block}: {source}")]
    TransientFetch {
        block: Block,
        #[source]
        source: reqwest::Error,
    },

    #[error("server answered {status} for block {block}")]
    UnexpectedStatus { block: Block, status: StatusCode },

    #[error("block {block} expected {expected} bytes, received {received}")]
    SizeMismatch {
        block: Block,
        expected: u64,
        received: u64,
    },

    #[error("failed to fetch block {block}: {reason}")]
    Fetch { block: Block, reason: String },

    #[error("block {block} failed after {attempts} attempts: {last_error}")]
    BlockRetryExhausted {
        block: Block,
        attempts: usize,
        last_error: String,
    },

    #[error("could not {action} progress snapshot {path:?}: {source}")]
    Persistence {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("download incomplete: {missing_bytes} bytes missing, first gap at {first_gap}")]
    IncompleteDownload { missing_bytes: u64, first_gap: Block },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("download cancelled")]
    Cancelled,

    #[error("download did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}

impl DownloadError {
    /// Whether a block fetch failing with this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::TransientFetch { .. } | DownloadError::SizeMismatch { .. } => true,
            DownloadError::UnexpectedStatus { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DownloadError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn persistence(action: &'static str, path: impl Into<PathBuf>, source: impl Into<io::Error>) -> Self {
        DownloadError::Persistence {
            action,
            path: path.into(),
            source: source.into(),
        }
    }
}

pub type Result<T, E = DownloadError> = std::result::Result<T, E>;
