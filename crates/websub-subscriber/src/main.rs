//! websub-subscriber server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`), opens the
//! SQLite subscription store, and serves the callback endpoint until
//! interrupted.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use websub_store_sqlite::SqliteStore;
use websub_subscriber::{Subscriber, SubscriberConfig};

#[derive(Parser)]
#[command(author, version, about = "WebSub subscriber service")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .set_default("host", "127.0.0.1")?
    .set_default("port", 4000)?
    .set_default("store_path", "websub.db")?
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("WEBSUB"))
    .build()
    .context("failed to read configuration")?;

  let subscriber_cfg: SubscriberConfig = settings
    .try_deserialize()
    .context("failed to deserialise SubscriberConfig")?;

  let store = SqliteStore::open(&subscriber_cfg.store_path)
    .await
    .with_context(|| {
      format!("failed to open store at {:?}", subscriber_cfg.store_path)
    })?;

  let subscriber = Arc::new(Subscriber::new(subscriber_cfg, Arc::new(store))?);

  // Ctrl-c begins the graceful sequence; `run` finishes it.
  let handle = Arc::clone(&subscriber);
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::info!("interrupt received, shutting down");
      handle.shutdown();
    }
  });

  subscriber.run().await.context("server error")?;

  Ok(())
}
