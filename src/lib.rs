//! Resumable, parallel, range-based download of a single HTTP resource.
//!
//! A run probes the resource, plans the byte ranges still missing against the
//! progress saved by earlier runs, fetches them with a fixed pool of workers and
//! merges the block payloads into the final file in byte order.

pub mod block;
pub mod commands;
pub mod config;
pub mod downloader;
pub mod error;
pub mod hashing;
pub mod lru;
pub mod merger;
pub mod planner;
pub mod probe;
pub mod state;
pub mod store;
pub mod utils;
pub mod worker;

pub use config::Config;
pub use downloader::Downloader;
pub use error::DownloadError;
