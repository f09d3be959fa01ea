use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use taskboard::config::{BoardConfig, CliOverrides};
use taskboard::logging;

mod cmd;

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(version, about = "Kanban task board backend")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file. Defaults to ./taskboard.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP and WebSocket server
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS, bind on all interfaces)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and attachment directory, then exit
    Init {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View, validate or create the configuration file
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Validate the configuration and report every problem
    Validate,
    /// Write a default taskboard.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Commands {
    fn overrides(&self) -> CliOverrides {
        match self {
            Commands::Serve { port, db_path, dev } => CliOverrides {
                port: *port,
                db_path: db_path.clone(),
                dev_mode: *dev,
            },
            Commands::Init { db_path } => CliOverrides {
                db_path: db_path.clone(),
                ..CliOverrides::default()
            },
            Commands::Config { .. } => CliOverrides::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(cli.config.as_deref(), command.clone());
    }

    let config = BoardConfig::resolve(cli.config.as_deref(), &cli.command.overrides())?;
    logging::init_logging(&config.logging, cli.verbose)?;

    match &cli.command {
        Commands::Serve { .. } => cmd::cmd_serve(config).await?,
        Commands::Init { .. } => cmd::cmd_init(&config).await?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
