mod app;
mod cache;
mod config;
mod connectivity;
mod feed;
mod flickr;
mod logging;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "photosync")]
#[command(about = "An offline-first client for the Flickr recent photos feed")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/photosync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Skip the network and serve cached photos
  #[arg(long, global = true)]
  offline: bool,

  /// Write logs to stderr instead of the log file
  #[arg(long, global = true)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch recent photos and cache them locally
  Sync {
    /// Page to start from
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    page: u32,

    /// Number of pages to load
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pages: u32,
  },

  /// Show cached photos without touching the network
  List,

  /// Remove dangling cache records and orphaned photo files
  Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Keep the guard alive so buffered log lines are flushed on exit
  let _log_guard = logging::init(&config::data_dir()?.join("logs"), args.log_stderr)?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let app = app::App::new(config, args.offline)?;
  match args.command {
    Command::Sync { page, pages } => app.sync(page, pages).await?,
    Command::List => app.list().await?,
    Command::Prune => app.prune().await?,
  }

  Ok(())
}
