mod reset;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rss_watch_core::{logger, FileStore, HttpFeedSource, KvStore, WatchConfig, WatchError, Watchdog};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// A watchdog tool for monitoring RSS feeds.
#[derive(Debug, Parser)]
#[command(name = "rss-watch", version, about)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Where to store the database (overrides DBPath)
    #[arg(long)]
    dbpath: Option<PathBuf>,

    /// Wipe the database after confirmation, then exit
    #[arg(long)]
    destroy_db: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "rss-watch stopped");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn run(cli: Cli) -> Result<(), WatchError> {
    let mut config = WatchConfig::from_file(&cli.config)?;
    if let Some(dbpath) = cli.dbpath {
        config.db_path = Some(dbpath);
    }

    let db_path = config.resolved_db_path();
    let store = FileStore::open(&db_path)
        .map_err(|source| WatchError::store(db_path.display().to_string(), source))?;

    if cli.destroy_db {
        warn!("this will clear the entire database and cannot be undone");
        warn!("are you sure you want to continue? y/N");
        let confirmed = reset::confirm(std::io::stdin().lock())
            .map_err(|source| WatchError::store(db_path.display().to_string(), source.into()))?;
        if confirmed {
            store
                .flush_all()
                .map_err(|source| WatchError::store(db_path.display().to_string(), source))?;
            info!("deleted all data");
        } else {
            info!("did not delete any data");
        }
        return Ok(());
    }

    let source =
        HttpFeedSource::new(config.dispatch_limits().fetch_timeout).map_err(WatchError::HttpClient)?;

    info!(
        feeds = config.feeds.len(),
        db = %db_path.display(),
        "starting rss-watch"
    );
    let watchdog = Watchdog::new(config, Arc::new(store), Arc::new(source));
    logger::attach(&watchdog.bus());

    watchdog
        .spawn()
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("interrupt received, shutting down");
        })
        .await
}
