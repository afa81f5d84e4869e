use anyhow::{Context, Result};
use clap::Parser;
use listwatch::clock::SystemClock;
use listwatch::config::Config;
use listwatch::feed::HttpFetcher;
use listwatch::sink::JsonlSink;
use listwatch::Scheduler;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser, Debug)]
#[command(
    name = "listwatch",
    about = "Poll classified-ads RSS feeds and log new listings"
)]
struct Args {
    /// Directory for per-feed `.jsonl` logs (created if missing)
    output_dir: PathBuf,

    /// Feed catalog and schedule (TOML); built-in defaults when omitted
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset (e.g. "debug", "listwatch=trace")
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("Invalid --log-level filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => Config::default(),
    };
    let feeds = config.feeds().context("Invalid feed catalog")?;

    let sink = JsonlSink::new(&args.output_dir).with_context(|| {
        format!(
            "Failed to create output directory '{}'",
            args.output_dir.display()
        )
    })?;
    let fetcher = HttpFetcher::new(&config.http).context("Failed to build HTTP client")?;

    tracing::info!(
        feeds = feeds.len(),
        output_dir = %sink.dir().display(),
        delay_secs = config.schedule.inter_request_delay_secs,
        "Watching feeds"
    );

    let mut scheduler = Scheduler::new(feeds, &config.schedule, fetcher, sink, SystemClock);

    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_fut = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_fut = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, shutting down");
        }
        _ = sigterm_fut => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }

    Ok(())
}
