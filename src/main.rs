mod app;
mod config;
mod logging;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "coursesync")]
#[command(about = "Offline-first cache for learning platform course modules")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/coursesync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// List a course's modules and their items
  Modules {
    course: String,
    /// Ignore the cache TTL and fetch now
    #[arg(short, long)]
    force: bool,
  },
  /// Show one module item
  Item {
    course: String,
    module: String,
    item: String,
    #[arg(short, long)]
    force: bool,
  },
  /// Mark a module item as done
  Done {
    course: String,
    module: String,
    item: String,
  },
  /// Show when a cache key was last refreshed
  Status { key: String },
  /// Force the next read of a cache key to hit the network
  Invalidate {
    /// Cache key, or key prefix with --prefix
    #[arg(required_unless_present = "all")]
    key: Option<String>,
    #[arg(long, conflicts_with = "all")]
    prefix: bool,
    #[arg(long)]
    all: bool,
  },
  /// Refresh a course periodically and print a module's items when they change
  Watch {
    course: String,
    module: String,
    /// Seconds between refreshes
    #[arg(short, long, default_value_t = 300)]
    interval: u64,
  },
  /// Delete all cached data
  Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _guard = logging::init(&config.log_dir()?, &config.log.level)?;

  let app = app::App::new(&config)?;
  app.run(args.command).await?;

  Ok(())
}
