use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use trainloop::cache::{CacheEntryStore, FetchGateway, HttpTransport};
use trainloop::config::Config;
use trainloop::session::{ProgressStore, SqliteProgressStore};

#[derive(Parser, Debug)]
#[command(name = "trainloop")]
#[command(about = "Offline cache and session tooling for the training app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/trainloop/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the static manifest and activate the current generation
  Warm,
  /// Print cache partitions with their sizes and keys
  Inspect,
  /// List locally persisted session state
  Sessions,
}

/// Logs go to a file, not stderr, so `inspect` output stays clean. Returns
/// the guard that flushes the appender on drop.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = dirs::cache_dir()?.join("trainloop");
  let appender = tracing_appender::rolling::daily(log_dir, "trainloop.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Some(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = init_tracing();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  match args.command {
    Command::Warm => warm(&config).await,
    Command::Inspect => inspect(),
    Command::Sessions => sessions(),
  }
}

async fn warm(config: &Config) -> Result<()> {
  let store = Arc::new(CacheEntryStore::open_default()?);
  let gateway = FetchGateway::new(HttpTransport::new(), Arc::clone(&store), config)?;

  gateway.install(&config.cache.static_manifest).await?;
  gateway.activate()?;

  println!(
    "precached {} entries into {}",
    store.partition_len(&config.cache.static_partition)?,
    config.cache.static_partition
  );

  Ok(())
}

fn inspect() -> Result<()> {
  let store = CacheEntryStore::open_default()?;

  for partition in store.partitions()? {
    println!("{} ({} entries)", partition, store.partition_len(&partition)?);
    for key in store.keys(&partition)? {
      println!("  {}", key);
    }
  }

  Ok(())
}

fn sessions() -> Result<()> {
  let tiers: [(&str, SqliteProgressStore); 2] = [
    ("primary", SqliteProgressStore::open_primary()?),
    ("backup", SqliteProgressStore::open_backup()?),
  ];

  for (name, store) in &tiers {
    let ids = store.session_ids()?;
    if ids.is_empty() {
      println!("{}: no persisted sessions", name);
      continue;
    }
    for id in ids {
      println!("{}: {}", name, id);
    }
  }

  Ok(())
}
