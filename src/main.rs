use anyhow::Result;
use blockdl::{Config, DownloadError};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the resource to download
    #[arg(index = 1)]
    url: Option<String>,

    /// Number of parallel workers (defaults to number of logical CPUs)
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Directory to save downloaded files
    #[arg(short = 'd', long = "download-dir", default_value = "downloads")]
    download_dir: PathBuf,

    /// Directory holding resumable progress and block payloads
    #[arg(short = 'm', long = "meta-dir", default_value = "meta")]
    meta_dir: PathBuf,

    /// Attempts per block before the download fails
    #[arg(short = 'r', long = "retry-times", default_value_t = blockdl::config::DEFAULT_RETRY_TIMES)]
    retry_times: usize,

    /// Block size in bytes (defaults to file size divided by thread count)
    #[arg(short = 'b', long = "block-size")]
    block_size: Option<u64>,

    /// Backoff step between attempts of the same block, in milliseconds
    #[arg(long = "retry-delay-ms", default_value_t = 500)]
    retry_delay_ms: u64,

    /// Connect timeout per request, in seconds
    #[arg(long = "connect-timeout", default_value_t = 10)]
    connect_timeout: u64,

    /// Timeout per request, in seconds
    #[arg(long = "timeout", default_value_t = 300)]
    timeout: u64,

    /// Give up if the whole download takes longer than this many seconds
    #[arg(long)]
    deadline: Option<u64>,

    /// Keep progress and block payloads after a successful merge
    #[arg(long = "keep-parts")]
    keep_parts: bool,

    /// List resumable downloads in the meta directory
    #[arg(short = 'l', long)]
    list: bool,

    /// Hide the progress bar
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Log debug output
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let mut args = Args::parse();
    init_logging(args.verbose);

    // Resolve paths to absolute so they do not depend on later directory changes
    if let Ok(cwd) = std::env::current_dir() {
        if args.download_dir.is_relative() {
            args.download_dir = cwd.join(&args.download_dir);
        }
        if args.meta_dir.is_relative() {
            args.meta_dir = cwd.join(&args.meta_dir);
        }
    }

    let rt = tokio::runtime::Runtime::new()?;

    if args.list {
        return rt.block_on(blockdl::commands::list_downloads(args.meta_dir));
    }

    let Some(url) = args.url.clone() else {
        return Err(DownloadError::MissingAddress.into());
    };
    let config = build_config(url, &args);

    rt.block_on(blockdl::commands::run_single_download(config))
}

fn build_config(url: String, args: &Args) -> Config {
    let mut config = Config::new(url);
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    config.output_dir = args.download_dir.clone();
    config.meta_dir = args.meta_dir.clone();
    config.retry_times = args.retry_times;
    config.retry_delay = Duration::from_millis(args.retry_delay_ms);
    config.block_size = args.block_size;
    config.connect_timeout = Duration::from_secs(args.connect_timeout);
    config.request_timeout = Duration::from_secs(args.timeout);
    config.deadline = args.deadline.map(Duration::from_secs);
    config.keep_parts = args.keep_parts;
    config.show_progress = !args.quiet;
    config
}

fn init_logging(verbose: bool) {
    let default = if verbose { "blockdl=debug" } else { "blockdl=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
