use futures::StreamExt;
use indicatif::ProgressBar;
use reqwest::{header, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::block::Block;
use crate::error::{DownloadError, Result};
use crate::hashing::ResourceKey;
use crate::state::Snapshot;
use crate::store::MetadataStore;

/// Completed blocks of one resource, mirrored to its persisted snapshot.
///
/// The lock covers both the in-memory list and the snapshot write, so two
/// workers finishing at once never overwrite each other's record.
pub struct CompletionLog {
    snapshot: Mutex<Snapshot>,
    store: MetadataStore,
    key: ResourceKey,
}

impl CompletionLog {
    pub fn new(store: MetadataStore, key: ResourceKey, snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            store,
            key,
        }
    }

    pub async fn record(&self, block: Block) -> Result<()> {
        let mut snapshot = self.snapshot.lock().await;
        snapshot.completed.push(block);
        self.store.save(&self.key, &snapshot).await
    }

    pub async fn completed(&self) -> Vec<Block> {
        self.snapshot.lock().await.completed.clone()
    }
}

/// Fetches single blocks into their payload files, retrying transient failures.
pub struct BlockFetcher {
    client: Client,
    url: String,
    total_size: u64,
    store: MetadataStore,
    key: ResourceKey,
    max_attempts: usize,
    retry_delay: Duration,
    progress: ProgressBar,
}

impl BlockFetcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Client,
        url: String,
        total_size: u64,
        store: MetadataStore,
        key: ResourceKey,
        max_attempts: usize,
        retry_delay: Duration,
        progress: ProgressBar,
    ) -> Self {
        Self {
            client,
            url,
            total_size,
            store,
            key,
            max_attempts: max_attempts.max(1),
            retry_delay,
            progress,
        }
    }

    /// Fetches `block`, retrying up to the attempt budget.
    ///
    /// Retryable failures that persist become `BlockRetryExhausted`; any other
    /// failure is returned as soon as it happens.
    pub async fn fetch_with_retry(&self, block: Block) -> Result<()> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.fetch(block).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    warn!(%block, attempt, max_attempts = self.max_attempts, error = %e, "block attempt failed");
                    last_error = e.to_string();
                    if attempt < self.max_attempts && !self.retry_delay.is_zero() {
                        tokio::time::sleep(self.retry_delay * attempt as u32).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(DownloadError::BlockRetryExhausted {
            block,
            attempts: self.max_attempts,
            last_error,
        })
    }

    /// One range request for `block`, streamed into its payload file.
    ///
    /// Bytes shown on the progress bar by a failed attempt are taken back off.
    pub async fn fetch(&self, block: Block) -> Result<()> {
        let mut shown = 0u64;
        let result = self.stream_block(block, &mut shown).await;
        if result.is_err() && shown > 0 {
            self.progress
                .set_position(self.progress.position().saturating_sub(shown));
        }
        result
    }

    async fn stream_block(&self, block: Block, shown: &mut u64) -> Result<()> {
        let path = self.store.part_path(&self.key, &block);
        let mut file = File::create(&path)
            .await
            .map_err(|e| DownloadError::io(&path, e))?;

        let response = self
            .client
            .get(&self.url)
            .header(header::RANGE, format!("bytes={}-{}", block.start, block.end))
            .send()
            .await
            .map_err(|e| classify(block, e))?;

        let status = response.status();
        let whole_resource = block.start == 0 && block.end + 1 == self.total_size;
        if status != StatusCode::PARTIAL_CONTENT && !(status == StatusCode::OK && whole_resource) {
            return Err(DownloadError::UnexpectedStatus { block, status });
        }

        let expected = block.len();
        let mut received = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(item) = stream.next().await {
            let chunk = item.map_err(|e| classify(block, e))?;
            received += chunk.len() as u64;
            if received > expected {
                return Err(DownloadError::SizeMismatch { block, expected, received });
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(&path, e))?;
            self.progress.inc(chunk.len() as u64);
            *shown += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| DownloadError::io(&path, e))?;

        if received != expected {
            return Err(DownloadError::SizeMismatch { block, expected, received });
        }
        Ok(())
    }
}

fn classify(block: Block, err: reqwest::Error) -> DownloadError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        DownloadError::TransientFetch { block, source: err }
    } else {
        DownloadError::Fetch {
            block,
            reason: err.to_string(),
        }
    }
}

/// Fixed-size pool of workers draining one shared queue of blocks.
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Runs every pending block through `fetcher`, recording successes in `log`.
    ///
    /// Returns once all workers have drained the queue. Blocks that exhaust
    /// their retries do not stop the other workers, but the run still fails.
    /// Any other error cancels `cancel` so siblings stop early.
    pub async fn run(
        &self,
        pending: Vec<Block>,
        fetcher: Arc<BlockFetcher>,
        log: Arc<CompletionLog>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let total = pending.len();
        let (tx, rx) = mpsc::channel::<Block>(self.workers);
        let rx = Arc::new(Mutex::new(rx));

        let dispatcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                for block in pending {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = tx.send(block) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                // Dropping the sender closes the queue.
            })
        };

        let mut handles = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let rx = rx.clone();
            let fetcher = fetcher.clone();
            let log = log.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(id, rx, fetcher, log, cancel).await
            }));
        }

        let mut exhausted = vec![];
        let mut fatal: Option<DownloadError> = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(failed)) => exhausted.extend(failed),
                Ok(Err(e)) => keep_most_relevant(&mut fatal, e),
                Err(join_err) => keep_most_relevant(&mut fatal, DownloadError::Worker(join_err.to_string())),
            }
        }
        let _ = dispatcher.await;

        if let Some(e) = fatal {
            return Err(e);
        }
        if let Some(first) = exhausted.into_iter().next() {
            return Err(first);
        }
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        info!(blocks = total, "all blocks fetched");
        Ok(())
    }
}

// Cancellation is usually a consequence of another worker's failure, so that
// failure wins when both are present.
fn keep_most_relevant(slot: &mut Option<DownloadError>, err: DownloadError) {
    match slot {
        None => *slot = Some(err),
        Some(DownloadError::Cancelled) if !matches!(err, DownloadError::Cancelled) => *slot = Some(err),
        Some(_) => {}
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Block>>>,
    fetcher: Arc<BlockFetcher>,
    log: Arc<CompletionLog>,
    cancel: CancellationToken,
) -> Result<Vec<DownloadError>> {
    let mut exhausted = vec![];

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            block = async { rx.lock().await.recv().await } => block,
        };
        let Some(block) = next else { break };

        debug!(worker = id, %block, "fetching block");
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            outcome = fetcher.fetch_with_retry(block) => outcome,
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = log.record(block).await {
                    error!(worker = id, %block, error = %e, "failed to persist progress");
                    cancel.cancel();
                    return Err(e);
                }
                debug!(worker = id, %block, "block complete");
            }
            Err(e @ DownloadError::BlockRetryExhausted { .. }) => {
                error!(worker = id, %block, error = %e, "giving up on block");
                exhausted.push(e);
            }
            Err(e) => {
                error!(worker = id, %block, error = %e, "fatal block failure");
                cancel.cancel();
                return Err(e);
            }
        }
    }

    Ok(exhausted)
}
