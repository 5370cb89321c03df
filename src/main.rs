use anyhow::Result;
use clap::Parser;
use lead_ingest::cli::{self, Cli, Commands};
use lead_ingest::config::Config;
use lead_ingest::error::IngestError;
use std::process;

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        eprintln!("\nFor help, run: lead-ingest --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Install default crypto provider for rustls
    // On non-Windows platforms, use aws-lc-rs; on Windows, use ring
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();
    cli::init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Serve { ref bind } => {
            let config = cli::load_config(&cli).await?;
            cli::run_server(config, bind.clone()).await?;
            Ok(())
        }

        Commands::Run { pretty } => {
            let config = cli::load_config(&cli).await?;
            let report = cli::run_once(&config).await?;

            let output = if pretty {
                serde_json::to_string_pretty(&report)?
            } else {
                serde_json::to_string(&report)?
            };
            println!("{}", output);

            if !report.success {
                process::exit(2);
            }
            Ok(())
        }

        Commands::InitConfig { ref output, force } => {
            if output.exists() && !force {
                return Err(IngestError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nPlease edit this file before the first run.");
            println!("Key settings to review:");
            println!("  - mailbox.address: The shared mailbox to ingest from");
            println!("  - mailbox.service_account_key: Service account key with domain-wide delegation");
            println!("  - batch.max_messages / batch.time_budget_secs: Per-invocation limits");
            println!("  - storage.database_path: Where leads are stored");

            Ok(())
        }
    }
}
