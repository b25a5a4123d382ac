use anyhow::{Context, Result};
use indicatif::HumanBytes;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::Config;
use crate::downloader::Downloader;
use crate::store::MetadataStore;

pub async fn run_single_download(config: Config) -> Result<()> {
    let url = config.url.clone();
    let downloader = Downloader::new(config);

    let cancel = downloader.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping workers; progress is kept for the next run");
            cancel.cancel();
        }
    });

    let output = downloader
        .run()
        .await
        .with_context(|| format!("Failed to download {}", url))?;

    info!(path = %output.display(), "download finished");
    println!("Saved {}", output.display());
    Ok(())
}

pub async fn list_downloads(meta_dir: PathBuf) -> Result<()> {
    let store = MetadataStore::new(meta_dir.clone());
    let snapshots = store
        .list()
        .await
        .with_context(|| format!("Failed to read working state in {:?}", meta_dir))?;

    if snapshots.is_empty() {
        println!("No resumable downloads found in '{:?}'.", meta_dir);
        return Ok(());
    }

    println!("{:<50} {:<10} {:<15} {:<15}", "Filename", "Blocks", "Progress", "Size");
    println!("{:-<50} {:-<10} {:-<15} {:-<15}", "", "", "", "");

    for snapshot in snapshots {
        let done = snapshot.completed_bytes();
        let progress = if snapshot.total_size > 0 {
            (done as f64 / snapshot.total_size as f64) * 100.0
        } else {
            100.0
        };
        println!(
            "{:<50} {:<10} {:<15} {:<15}",
            snapshot.display_name,
            snapshot.completed.len(),
            format!("{:.2}%", progress),
            format!("{}", HumanBytes(snapshot.total_size))
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::ResourceKey;
    use tempfile::TempDir;

    #[tokio::test]
    async fn listing_survives_inverted_block_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());
        let key = ResourceKey::from_url("http://host/bad.bin");
        store.ensure_resource_dir(&key).await.unwrap();
        let json = r#"{"url":"http://host/bad.bin","display_name":"bad.bin","total_size":100,
            "identity":{"etag":null,"last_modified":null},"completed":[{"start":50,"end":10}]}"#;
        std::fs::write(store.snapshot_path(&key), json).unwrap();

        list_downloads(dir.path().to_path_buf()).await.unwrap();
    }
}
