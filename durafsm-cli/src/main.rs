//! durafsm-cli - Command-line interface for durafsm

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use durafsm_client::{Client, ClientConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "durafsm-cli")]
#[command(about = "Command-line interface for the durafsm workflow engine")]
#[command(version)]
struct Cli {
    /// Server URL
    #[arg(short, long, env = "DURAFSM_SERVER", default_value = "http://127.0.0.1:7480")]
    server: String,

    /// Authentication token
    #[arg(short = 't', long, env = "DURAFSM_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the server is up
    Health,

    /// Create a new instance in the initial state
    Create {
        /// Instance ID (generated by the server if not provided)
        #[arg(short, long)]
        id: Option<String>,
    },

    /// Fire a trigger on an instance
    Transition {
        /// Instance ID
        id: String,

        /// Trigger name
        trigger: String,

        /// Payload JSON (or @file.json to read from file)
        #[arg(short, long)]
        payload: Option<String>,
    },

    /// Show the latest record of an instance
    Describe {
        /// Instance ID
        id: String,
    },

    /// Generate SHA-256 hash of a token for config files
    HashToken {
        /// The token to hash
        token: String,
    },

    /// Validate a JSON or YAML machine definition without a server
    CheckMachine {
        /// Definition file (.json, .yaml or .yml)
        file: PathBuf,
    },
}

impl Commands {
    /// Whether the command talks to a server.
    fn is_remote(&self) -> bool {
        !matches!(self, Commands::HashToken { .. } | Commands::CheckMachine { .. })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = if cli.command.is_remote() {
        let mut config = ClientConfig::new(&cli.server);
        if let Some(ref token) = cli.token {
            config = config.with_token(token);
        }
        let client = Client::new(config)?;
        commands::execute(&client, cli.command).await
    } else {
        commands::execute_local(cli.command)
    };

    match result {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
