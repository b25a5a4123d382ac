use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::block::Block;
use crate::config::Config;
use crate::error::{DownloadError, Result};
use crate::hashing::ResourceKey;
use crate::merger;
use crate::planner;
use crate::probe::{self, ResourceInfo};
use crate::state::Snapshot;
use crate::store::MetadataStore;
use crate::utils::display_name;
use crate::worker::{BlockFetcher, CompletionLog, WorkerPool};

/// Everything one download run needs, created per run and shared with its workers.
pub struct Downloader {
    client: Client,
    config: Config,
    store: MetadataStore,
    cancel: CancellationToken,
}

impl Downloader {
    pub fn new(config: Config) -> Self {
        let client = Client::builder()
            .user_agent(concat!("blockdl/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        let store = MetadataStore::new(config.meta_dir.clone());

        Self {
            client,
            config,
            store,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts this and every later run, including in-flight block requests.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Downloads the configured resource and returns the path of the finished file.
    pub async fn run(&self) -> Result<PathBuf> {
        self.config.validate()?;
        let url = self.config.url.as_str();
        let name = display_name(url)?;

        let info = probe::probe(&self.client, url).await?;
        if !info.supports_ranges {
            return Err(DownloadError::UnsupportedResource { url: url.to_string() });
        }

        fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| DownloadError::io(&self.config.output_dir, e))?;

        let key = ResourceKey::from_url(url);
        let prior = self.load_prior(&key, &info).await?;
        let block_size = self.config.block_size_for(info.total_size);
        let plan = planner::plan(info.total_size, block_size, prior);

        let mut snapshot = Snapshot::new(url, &name, info.total_size, info.identity.clone());
        snapshot.completed = plan.completed.clone();
        self.store.save(&key, &snapshot).await?;

        info!(
            url,
            total_size = info.total_size,
            block_size,
            resumed = plan.completed.len(),
            discarded_prior = plan.discarded_prior,
            pending = plan.pending.len(),
            threads = self.config.threads,
            "starting download"
        );

        let progress = self.progress_bar(info.total_size, &name);
        progress.set_position(snapshot.completed_bytes());

        let log = Arc::new(CompletionLog::new(self.store.clone(), key.clone(), snapshot));
        let fetcher = Arc::new(BlockFetcher::new(
            self.client.clone(),
            url.to_string(),
            info.total_size,
            self.store.clone(),
            key.clone(),
            self.config.retry_times,
            self.config.retry_delay,
            progress.clone(),
        ));

        // A child token, so a deadline ends this run only and not the downloader.
        let cancel = self.cancel.child_token();
        let pool = WorkerPool::new(self.config.threads);
        let work = pool.run(plan.pending, fetcher, log.clone(), cancel.clone());
        let outcome = match self.config.deadline {
            Some(limit) => {
                tokio::pin!(work);
                let finished = tokio::select! {
                    outcome = &mut work => Some(outcome),
                    _ = tokio::time::sleep(limit) => None,
                };
                match finished {
                    Some(outcome) => outcome,
                    None => {
                        cancel.cancel();
                        // Let workers finish any snapshot write before returning.
                        let _ = work.await;
                        Err(DownloadError::DeadlineExceeded(limit))
                    }
                }
            }
            None => work.await,
        };
        if let Err(e) = outcome {
            progress.abandon_with_message(format!("Failed      {}", name));
            return Err(e);
        }

        let completed = log.completed().await;
        let output = self.config.output_dir.join(&name);
        let parts_dir = self.store.resource_dir(&key);
        if let Err(e) = merger::merge(&completed, info.total_size, &parts_dir, &output).await {
            progress.abandon_with_message(format!("Incomplete  {}", name));
            return Err(e);
        }
        progress.finish_with_message(format!("Completed   {}", name));

        if !self.config.keep_parts {
            self.store.remove(&key).await?;
        }
        Ok(output)
    }

    /// Completed blocks from an earlier run, if that run saw the same resource version.
    async fn load_prior(&self, key: &ResourceKey, info: &ResourceInfo) -> Result<Vec<Block>> {
        let Some(snapshot) = self.store.load(key).await? else {
            return Ok(vec![]);
        };

        if snapshot.url != self.config.url || !snapshot.matches(info.total_size, &info.identity) {
            warn!(
                url = %self.config.url,
                stored_etag = ?snapshot.identity.etag,
                etag = ?info.identity.etag,
                stored_size = snapshot.total_size,
                size = info.total_size,
                "resource changed since last run, discarding progress"
            );
            return Ok(vec![]);
        }

        let mut kept = Vec::with_capacity(snapshot.completed.len());
        for block in snapshot.completed {
            if self.store.has_payload(key, &block).await {
                kept.push(block);
            } else {
                warn!(%block, "payload missing or truncated, fetching again");
            }
        }
        Ok(kept)
    }

    fn progress_bar(&self, total_size: u64, name: &str) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::with_draw_target(Some(total_size), ProgressDrawTarget::stderr_with_hz(5));
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {bytes_per_sec:>12} {eta:>4} {msg}")
            .map(|s| s.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.set_message(format!("Downloading {}", name));
        pb
    }
}
