mod cli;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use offcache::config::Config;
use offcache::generation::GenerationId;
use offcache::logging;

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "Offline-first resource cache with versioned generations")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./offcache.yaml or $XDG_CONFIG_HOME/offcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Increase log verbosity (-v debug, -vv trace)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the manifest into a new generation and leave it waiting
  Install {
    /// Generation tag (overrides the config file)
    #[arg(short, long)]
    generation: Option<String>,
  },
  /// Activate an installed generation and delete all others
  Activate {
    #[arg(short, long)]
    generation: Option<String>,
  },
  /// Install, then skip waiting and activate
  Deploy {
    #[arg(short, long)]
    generation: Option<String>,
  },
  /// Serve one request through the cache
  Fetch {
    /// Path or URL, resolved against the configured origin
    path: String,
    /// Treat the request as a top-level navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Print the notification a push message would show
  Push {
    /// Message text (default: a generic update notice)
    payload: Option<String>,
  },
  /// Print the page a notification click opens
  Click {
    /// Action button id, e.g. "explore"
    action: Option<String>,
  },
  /// Show the active generation, stored buckets and navigation settings
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override generation if specified on command line
  let generation = match &args.command {
    Command::Install { generation }
    | Command::Activate { generation }
    | Command::Deploy { generation } => generation.clone(),
    _ => None,
  };
  if let Some(tag) = generation {
    config.generation = GenerationId::new(tag)?;
  }

  let _guard = logging::init(&config.logging, args.verbose)?;

  let ctx = cli::Context::open(&config)?;
  match args.command {
    Command::Install { .. } => cli::install(&ctx, &config).await,
    Command::Activate { .. } => cli::activate(&ctx, &config).await,
    Command::Deploy { .. } => cli::deploy(&ctx, &config).await,
    Command::Fetch { path, navigate } => cli::fetch(&ctx, &config, &path, navigate).await,
    Command::Push { payload } => cli::push(&ctx, &config, payload.as_deref()),
    Command::Click { action } => cli::click(&ctx, &config, action.as_deref()),
    Command::Status => cli::status(&ctx, &config).await,
  }
}
