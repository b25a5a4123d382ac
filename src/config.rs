use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DownloadError, Result};

pub const DEFAULT_RETRY_TIMES: usize = 5;

/// Settings of one download run.
#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    pub threads: usize,
    pub output_dir: PathBuf,
    pub meta_dir: PathBuf,
    pub retry_times: usize,
    pub retry_delay: Duration,
    /// Explicit block size; derived from size and thread count when unset.
    pub block_size: Option<u64>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub deadline: Option<Duration>,
    pub keep_parts: bool,
    pub show_progress: bool,
}

impl Config {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            threads: num_cpus::get(),
            output_dir: PathBuf::from("downloads"),
            meta_dir: PathBuf::from("meta"),
            retry_times: DEFAULT_RETRY_TIMES,
            retry_delay: Duration::from_millis(500),
            block_size: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            deadline: None,
            keep_parts: false,
            show_progress: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(DownloadError::MissingAddress);
        }
        if self.threads == 0 {
            return Err(DownloadError::InvalidConfig("thread count must be at least 1".into()));
        }
        if self.retry_times == 0 {
            return Err(DownloadError::InvalidConfig("retry times must be at least 1".into()));
        }
        if self.block_size == Some(0) {
            return Err(DownloadError::InvalidConfig("block size must be at least 1 byte".into()));
        }
        Ok(())
    }

    /// Block size for a resource of `total_size` bytes.
    pub fn block_size_for(&self, total_size: u64) -> u64 {
        match self.block_size {
            Some(size) => size.max(1),
            None => total_size.div_ceil(self.threads.max(1) as u64).max(1),
        }
    }
}
