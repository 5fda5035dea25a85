use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use convoy::pipeline::PipelineConfig;
use convoy::retry::RetryPolicy;
use convoy::scheduler::SchedulerConfig;
use convoy::service::DEFAULT_MAX_BATCH;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub(crate) struct Args {
    /// Address to listen on.
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)))]
    pub(crate) listen: IpAddr,
    /// (TCP) port to listen on.
    #[arg(short, long, default_value_t = 11400)]
    pub(crate) port: u16,
    /// Maximum number of jobs processed at once.
    #[arg(short, long, default_value_t = 10)]
    pub(crate) concurrency: usize,
    /// Number of worker tasks. Defaults to the concurrency limit.
    #[arg(short, long)]
    pub(crate) workers: Option<usize>,
    /// Bounded wait on each lane per dequeue attempt, in milliseconds. At
    /// least 1.
    #[arg(long, default_value_t = 1000)]
    pub(crate) poll_wait_ms: u64,
    /// Pause after re-queueing a job that found no free capacity, in
    /// milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub(crate) backpressure_pause_ms: u64,
    /// Pause after an unexpected scheduler error, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub(crate) error_pause_ms: u64,
    /// Total download attempts per provider.
    #[arg(long, default_value_t = 3)]
    pub(crate) download_attempts: u32,
    /// Download backoff unit, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub(crate) download_backoff_ms: u64,
    /// Time allowed for a single download attempt, in seconds.
    #[arg(long, default_value_t = 600)]
    pub(crate) download_timeout_secs: u64,
    /// Total upload attempts.
    #[arg(long, default_value_t = 3)]
    pub(crate) upload_attempts: u32,
    /// Upload backoff unit, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub(crate) upload_backoff_ms: u64,
    /// Time allowed for a single upload attempt, in seconds.
    #[arg(long, default_value_t = 120)]
    pub(crate) upload_timeout_secs: u64,
    /// Downloader program to run. Repeat to configure fallbacks, tried in
    /// order.
    #[arg(long = "downloader", default_values_t = [String::from("yt-dlp")])]
    pub(crate) downloaders: Vec<String>,
    /// Prefix that turns a source reference into a URL.
    #[arg(long, default_value = "https://www.youtube.com/watch?v=")]
    pub(crate) source_url_prefix: String,
    /// Directory holding per-job scratch directories.
    #[arg(long, default_value_os_t = std::env::temp_dir().join("convoy"))]
    pub(crate) scratch_dir: PathBuf,
    /// Directory that finished artifacts are published into.
    #[arg(long)]
    pub(crate) publish_dir: PathBuf,
    /// Public URL that `publish_dir` is served at.
    #[arg(long)]
    pub(crate) public_base_url: String,
    /// Most job lines a single convert-batch may carry.
    #[arg(long, default_value_t = DEFAULT_MAX_BATCH)]
    pub(crate) max_batch: u32,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub(crate) debug: bool,
}

impl Args {
    pub(crate) fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            concurrency: self.concurrency,
            workers: self.workers.unwrap_or(self.concurrency),
            poll_wait: Duration::from_millis(self.poll_wait_ms),
            backpressure_pause: Duration::from_millis(
                self.backpressure_pause_ms,
            ),
            error_pause: Duration::from_millis(self.error_pause_ms),
        }
    }

    pub(crate) fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            download: RetryPolicy::new(
                self.download_attempts,
                Duration::from_millis(self.download_backoff_ms),
            ),
            upload: RetryPolicy::new(
                self.upload_attempts,
                Duration::from_millis(self.upload_backoff_ms),
            ),
            scratch_root: self.scratch_dir.clone(),
        }
    }
}
