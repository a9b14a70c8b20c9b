//! NURD CLI
//!
//! A command-line tool for querying the job usage snapshots and service
//! health served by the NURD query API.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{health, jobs};

/// Nomad usage and resource digest CLI
#[derive(Parser)]
#[command(name = "nurdctl")]
#[command(author, version, about = "CLI for the Nomad usage and resource digest", long_about = None)]
pub struct Cli {
    /// API endpoint URL (falls back to ~/.config/nurdctl/config.json, then http://localhost:8080)
    #[arg(long, env = "NURD_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List every stored job snapshot
    Jobs,

    /// Show a job's latest usage, or its history within a time range
    Job {
        /// Job ID
        id: String,

        /// Range start, 'YYYY-MM-DD HH:MM:SS' (UTC) or RFC 3339
        #[arg(long, requires = "end")]
        begin: Option<String>,

        /// Range end, inclusive
        #[arg(long, requires = "begin")]
        end: Option<String>,
    },

    /// Show service health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::Config::load()?;
    let api_url = config::resolve_api_url(cli.api_url, &config);

    // Initialize client
    let client = client::ApiClient::new(&api_url)?;

    // Execute command
    match cli.command {
        Commands::Jobs => {
            jobs::list_jobs(&client, cli.format).await?;
        }
        Commands::Job { id, begin, end } => {
            jobs::show_job(&client, &id, begin, end, cli.format).await?;
        }
        Commands::Health => {
            health::show_health(&client, cli.format).await?;
        }
    }

    Ok(())
}
