mod cmd;
mod output;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wcsc_lib::config::{EncodingPolicy, EngineConfig};
use wcsc_lib::consts::ENV_LOG;

use cmd::{cmd_config, cmd_probe};
use output::{OutputFormat, print_error};

/// wcsc - unified certificate store diagnostics
#[derive(Parser)]
#[command(name = "wcsc")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
  format: OutputFormat,

  /// Override the aggregate limit
  #[arg(long, global = true)]
  max_stores: Option<usize>,

  /// Override the store opened for unnamed requests
  #[arg(long, global = true)]
  default_store: Option<String>,

  /// Override whether the default aggregate is built at activation
  #[arg(long, global = true, value_name = "BOOL")]
  eager_default: Option<bool>,

  /// Override whether CertOpenSystemStoreW is redirected
  #[arg(long, global = true, value_name = "BOOL")]
  hook_wide: Option<bool>,

  /// Override the encoding policy (per-encoding or unified)
  #[arg(long, global = true)]
  encoding_policy: Option<String>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Show the configuration the hook would use in this environment
  Config,

  /// Build aggregates for store names and report what they contain
  Probe {
    /// Store names to probe (default store when empty)
    names: Vec<String>,

    /// List the subject of every item
    #[arg(short, long)]
    list: bool,

    /// Treat names as wide requests
    #[arg(long)]
    wide: bool,
  },
}

fn main() {
  let cli = Cli::parse();
  if let Err(err) = run(cli) {
    print_error(&format!("{:#}", err));
    std::process::exit(1);
  }
}

fn run(cli: Cli) -> Result<()> {
  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let config = resolve_config(&cli)?;
  tracing::debug!(?config, "resolved configuration");

  match cli.command {
    Commands::Config => cmd_config(&config, cli.format),
    Commands::Probe { ref names, list, wide } => cmd_probe(&config, names, wide, list, cli.format),
  }
}

/// Environment first, then command-line overrides.
fn resolve_config(cli: &Cli) -> Result<EngineConfig> {
  let mut config = EngineConfig::from_env()?;

  if let Some(max_stores) = cli.max_stores {
    if max_stores == 0 {
      return Err(anyhow!("--max-stores must be a positive integer"));
    }
    config.max_stores = max_stores;
  }
  if let Some(default_store) = &cli.default_store {
    config.default_store = default_store.clone();
  }
  if let Some(eager_default) = cli.eager_default {
    config.eager_default = eager_default;
  }
  if let Some(hook_wide) = cli.hook_wide {
    config.hook_wide = hook_wide;
  }
  if let Some(policy) = &cli.encoding_policy {
    config.encoding_policy = policy
      .parse::<EncodingPolicy>()
      .map_err(|_| anyhow!("invalid encoding policy '{}' (expected per-encoding or unified)", policy))?;
  }

  Ok(config)
}
