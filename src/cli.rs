//! Command-line interface

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::Result;
use crate::orchestrator::{run_invocation, BatchReport};
use crate::server::{serve, LiveRunner};
use crate::store::SqliteLeadStore;

#[derive(Parser, Debug)]
#[command(name = "lead-ingest")]
#[command(version)]
#[command(about = "Ingest portal leads from the shared sales mailbox", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", env = "LEAD_INGEST_CONFIG")]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the HTTP trigger endpoint
    Serve {
        /// Override server.bind_address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run one invocation and print the JSON result
    Run {
        /// Pretty-print the result
        #[arg(long)]
        pretty: bool,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Default filter when `RUST_LOG` is unset
pub fn default_log_directive(verbose: bool) -> &'static str {
    if verbose {
        "lead_ingest=debug,info"
    } else {
        "lead_ingest=info,warn"
    }
}

pub fn init_tracing(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_directive(verbose)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load the configuration the way every subcommand needs it
pub async fn load_config(cli: &Cli) -> Result<Config> {
    let config = Config::load(&cli.config).await?;
    config.require_mailbox()?;
    Ok(config)
}

/// One invocation against the configured mailbox and database
pub async fn run_once(config: &Config) -> Result<BatchReport> {
    let store = SqliteLeadStore::open(&config.storage.database_path)?;
    Ok(run_invocation(config, &store).await)
}

pub async fn run_server(config: Config, bind: Option<String>) -> Result<()> {
    let bind_address = bind.unwrap_or_else(|| config.server.bind_address.clone());
    let store = Arc::new(SqliteLeadStore::open(&config.storage.database_path)?);
    info!(
        "Serving ingest trigger for {} (database {:?})",
        config.mailbox.address, config.storage.database_path
    );

    serve(&bind_address, Arc::new(LiveRunner::new(config, store))).await
}
