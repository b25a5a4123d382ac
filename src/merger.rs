use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::block::{self, Block};
use crate::error::{DownloadError, Result};

/// Checks that `blocks` cover `[0, total_size - 1]` exactly once and returns them sorted.
pub fn ordered_cover(blocks: &[Block], total_size: u64) -> Result<Vec<Block>> {
    let mut sorted = blocks.to_vec();
    sorted.sort();
    sorted.dedup();

    if let Some((_, second)) = block::find_overlap(&sorted) {
        return Err(DownloadError::IncompleteDownload {
            missing_bytes: 0,
            first_gap: second,
        });
    }

    let missing = block::gaps(&sorted, total_size);
    if let Some(first_gap) = missing.first().copied() {
        return Err(DownloadError::IncompleteDownload {
            missing_bytes: missing.iter().map(Block::len).sum(),
            first_gap,
        });
    }
    if let Some(last) = sorted.last() {
        if last.end >= total_size {
            return Err(DownloadError::IncompleteDownload {
                missing_bytes: 0,
                first_gap: *last,
            });
        }
    }
    Ok(sorted)
}

/// Concatenates the payload files in `parts_dir` into `output`, in byte order.
///
/// Nothing is written to `output` unless every block is present with the right
/// length; the file is assembled next to it and renamed into place at the end.
pub async fn merge(blocks: &[Block], total_size: u64, parts_dir: &Path, output: &Path) -> Result<PathBuf> {
    let sorted = ordered_cover(blocks, total_size)?;

    let staging = staging_path(output);
    let result = assemble(&sorted, parts_dir, &staging).await;
    if let Err(e) = result {
        if let Err(cleanup) = fs::remove_file(&staging).await {
            warn!(path = %staging.display(), error = %cleanup, "could not remove partial output");
        }
        return Err(e);
    }

    fs::rename(&staging, output)
        .await
        .map_err(|e| DownloadError::io(output, e))?;
    info!(path = %output.display(), blocks = sorted.len(), total_size, "merged download");
    Ok(output.to_path_buf())
}

async fn assemble(sorted: &[Block], parts_dir: &Path, staging: &Path) -> Result<()> {
    let mut out = File::create(staging)
        .await
        .map_err(|e| DownloadError::io(staging, e))?;

    for block in sorted {
        let part = parts_dir.join(block.file_name());
        let mut payload = File::open(&part).await.map_err(|_| DownloadError::IncompleteDownload {
            missing_bytes: block.len(),
            first_gap: *block,
        })?;
        let copied = tokio::io::copy(&mut payload, &mut out)
            .await
            .map_err(|e| DownloadError::io(&part, e))?;
        if copied != block.len() {
            return Err(DownloadError::IncompleteDownload {
                missing_bytes: block.len().abs_diff(copied),
                first_gap: *block,
            });
        }
    }

    out.flush().await.map_err(|e| DownloadError::io(staging, e))?;
    out.sync_all().await.map_err(|e| DownloadError::io(staging, e))?;
    Ok(())
}

fn staging_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    output.with_file_name(name)
}
