use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use refeed::config::Config;
use refeed::fetch::Fetcher;
use refeed::history::{HistoryCache, HistoryStatus};
use refeed::server::{self, AppState};

#[derive(Parser, Debug)]
#[command(
    name = "refeed",
    about = "Rebuilds the full history of an RSS/Atom feed"
)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, value_name = "FILE", default_value = "refeed.toml")]
    config: PathBuf,

    /// Reconstruct one feed, print the Atom document to stdout, and exit
    #[arg(long, value_name = "URL")]
    feed: Option<String>,

    /// Override the bind address from the config
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config).context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    let fetcher = Arc::new(Fetcher::new(&config).context("Failed to set up the fetcher")?);
    let history = Arc::new(HistoryCache::new(fetcher.clone(), &config));

    if let Some(feed) = args.feed {
        let document = export_once(&fetcher, &history, &feed).await?;
        print!("{document}");
        return Ok(());
    }

    server::serve(&config, AppState { fetcher, history }).await
}

/// One-shot mode: poll the history cache until the traversal lands, then
/// render the document.
async fn export_once(
    fetcher: &Fetcher,
    history: &Arc<HistoryCache>,
    feed: &str,
) -> Result<String> {
    let mut reported = 0;
    let entries = loop {
        match history.get(feed).await {
            HistoryStatus::Finished(outcome) => {
                break outcome.with_context(|| format!("Reconstructing {feed} failed"))?
            }
            HistoryStatus::InProgress(events) => {
                for event in &events[reported..] {
                    eprintln!("{}", event.message);
                }
                reported = events.len();
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    };

    server::build_document(fetcher, feed, &entries, "reader.xsl")
        .await
        .with_context(|| format!("Rendering {feed} failed"))
}
