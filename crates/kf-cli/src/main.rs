//! k-Forward: inspect port forwarding state for remote sessions
//!
//! Usage:
//!   k-forward attributes 3000           # Resolve configured attributes for a port
//!   k-forward parse db:5432             # Parse an address into host and port
//!   k-forward stored --workspace /src   # Show persisted forwarded ports
//!   k-forward forget --workspace /src   # Drop persisted forwarded ports
//!   k-forward config init               # Write a default configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use k_forward::commands;
use k_forward::output::print_error;

#[derive(Parser)]
#[command(name = "k-forward")]
#[command(author, version, about = "Port forwarding inspector for remote sessions")]
#[command(propagate_version = true)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, env = "K_FORWARD_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the configured attributes for a port
    Attributes {
        /// Remote port
        port: u16,

        /// Host the port is bound on
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Command line of the process that owns the port
        #[arg(long)]
        command_line: Option<String>,
    },

    /// Parse a `host:port` address or bare port
    Parse {
        /// Address to parse
        address: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show forwarded ports persisted for a workspace
    Stored {
        #[command(flatten)]
        scope: Scope,

        /// Show protocol, source and process columns
        #[arg(short, long)]
        long: bool,
    },

    /// Remove forwarded ports persisted for a workspace
    Forget {
        #[command(flatten)]
        scope: Scope,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Which persisted record to read
#[derive(clap::Args)]
struct Scope {
    /// Remote authority (omit for local sessions)
    #[arg(short, long)]
    authority: Option<String>,

    /// Workspace identity the ports were saved for
    #[arg(short, long)]
    workspace: String,

    /// Storage file (defaults to the config directory)
    #[arg(short, long)]
    storage: Option<PathBuf>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the configuration file path
    Path,

    /// Show current configuration
    Show,

    /// Write a default configuration
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(e) = run(cli) {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.config.as_ref();

    match cli.command {
        Commands::Attributes {
            port,
            host,
            command_line,
        } => commands::attributes_command(config, port, &host, command_line.as_deref()),

        Commands::Parse { address, json } => commands::parse_command(&address, json),

        Commands::Stored { scope, long } => commands::stored_command(
            scope.storage.as_ref(),
            scope.authority.as_deref(),
            &scope.workspace,
            long,
        ),

        Commands::Forget { scope } => commands::forget_command(
            scope.storage.as_ref(),
            scope.authority.as_deref(),
            &scope.workspace,
        ),

        Commands::Config { action } => match action {
            ConfigAction::Path => commands::config_path(config),
            ConfigAction::Show => commands::config_show(config),
            ConfigAction::Init { force } => commands::config_init(config, force),
        },
    }
}
