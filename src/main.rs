//! agenthq - Command-line interface for the agent fleet Gateway
//!
//! One-shot RPC calls and a live event stream over the Gateway client.

mod commands;

use agenthq_client::{ClientConfig, GatewayClient, TlsClientConfig};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agenthq")]
#[command(about = "Command-line interface for the agent fleet Gateway")]
#[command(version)]
struct Cli {
    /// Gateway URL (ws:// or wss://)
    #[arg(short, long, env = "OPENCLAW_GATEWAY_URL")]
    url: Option<String>,

    /// Authentication token
    #[arg(short = 't', long, env = "OPENCLAW_GATEWAY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// YAML config file
    #[arg(short, long, env = "AGENTHQ_CONFIG")]
    config: Option<PathBuf>,

    /// Request timeout in milliseconds
    #[arg(long)]
    timeout: Option<u64>,

    // ===== TLS Options =====
    /// Path to CA certificate for server verification
    #[arg(long, env = "AGENTHQ_CA_CERT")]
    ca_cert: Option<PathBuf>,

    /// Skip server certificate verification (INSECURE)
    #[arg(long, short = 'k')]
    insecure: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show connection status and server info
    Status,

    /// List the RPC methods and events the Gateway advertises
    Methods,

    /// Call an RPC method
    Call {
        /// Method name
        method: String,

        /// Params JSON (or @file.json to read from file)
        params: Option<String>,
    },

    /// Stream events until Ctrl+C
    Watch {
        /// Only these event names (repeatable)
        #[arg(short, long)]
        event: Vec<String>,
    },
}

fn build_config(cli: &Cli) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = match cli.config {
        Some(ref path) => ClientConfig::from_file(path)?,
        None => ClientConfig::load()?,
    };
    if let Some(ref url) = cli.url {
        config.url = Some(url.clone());
    }
    if let Some(ref token) = cli.token {
        config.token = Some(token.clone());
    }
    if let Some(ms) = cli.timeout {
        config = config.with_request_timeout(Duration::from_millis(ms));
    }
    if cli.insecure || cli.ca_cert.is_some() {
        config = config.with_tls(TlsClientConfig {
            ca_cert_path: cli.ca_cert.clone(),
            insecure: cli.insecure,
            ..TlsClientConfig::default()
        });
    }
    // Only `watch` is long-lived enough to benefit from reconnection.
    if !matches!(cli.command, Commands::Watch { .. }) {
        config = config.without_reconnect();
    }
    Ok(config)
}

/// Connects for a one-shot command, exiting on failure.
async fn connect_or_exit(client: &GatewayClient) {
    if let Err(e) = client.connect().await {
        eprintln!("{}: {}", "Connection failed".red(), e);
        client.disconnect().await;
        std::process::exit(1);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;
    if !config.is_configured() {
        eprintln!(
            "{}: no gateway URL (use --url or OPENCLAW_GATEWAY_URL)",
            "Error".red()
        );
        std::process::exit(2);
    }
    let client = GatewayClient::new(config)?;

    let result = match cli.command {
        Commands::Watch { event } => commands::watch(&client, event).await,
        Commands::Status => {
            connect_or_exit(&client).await;
            Ok(commands::status(&client))
        }
        Commands::Methods => {
            connect_or_exit(&client).await;
            Ok(commands::methods(&client))
        }
        Commands::Call { method, params } => {
            connect_or_exit(&client).await;
            commands::call(&client, &method, params.as_deref()).await
        }
    };

    client.disconnect().await;

    match result {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
