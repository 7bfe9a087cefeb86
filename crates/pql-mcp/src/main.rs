use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rmcp::{transport::stdio, ServiceExt};
use tracing_subscriber::EnvFilter;

use pql_core::{mask_secret, Config, ConfigStore};

mod server;

use server::PromptQlServer;

/// Log level for tracing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Parser)]
#[command(name = "promptql-mcp")]
#[command(author, version, about = "MCP server for natural-language data querying", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Save query service credentials to the config file
    Setup {
        /// API key for the query service
        #[arg(long, env = pql_core::config::ENV_API_KEY)]
        api_key: String,

        /// Base URL of the query service
        #[arg(long, env = pql_core::config::ENV_SERVICE_URL)]
        service_url: String,

        /// Optional data-plane auth token
        #[arg(long, env = pql_core::config::ENV_AUTH_TOKEN)]
        auth_token: Option<String>,
    },
    /// Run the MCP server on stdio (default)
    Run,
    /// Show the current configuration with secrets masked
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries the MCP protocol; all diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    let store = ConfigStore::open_default()?;

    match cli.command {
        Some(Commands::Setup {
            api_key,
            service_url,
            auth_token,
        }) => setup(&store, api_key, service_url, auth_token),
        Some(Commands::Config) => show_config(&store),
        Some(Commands::Run) | None => run_server(store).await,
    }
}

fn setup(
    store: &ConfigStore,
    api_key: String,
    service_url: String,
    auth_token: Option<String>,
) -> Result<()> {
    let config = Config::new(api_key, service_url, auth_token);
    store
        .save(&config)
        .context("Failed to save configuration")?;
    println!("Configuration saved to {}", store.path().display());
    Ok(())
}

fn show_config(store: &ConfigStore) -> Result<()> {
    let config = store.load()?;
    println!("Configuration ({}):", store.path().display());
    match config.api_key.as_deref() {
        Some(key) => println!("  API key: {}", mask_secret(key, 5, 5)),
        None => println!("  API key: (not set)"),
    }
    match config.service_url.as_deref() {
        Some(url) => println!("  Service URL: {}", url),
        None => println!("  Service URL: (not set)"),
    }
    match config.auth_token.as_deref() {
        Some(token) => println!("  Auth token: {}", mask_secret(token, 8, 4)),
        None => println!("  Auth token: (not set)"),
    }
    Ok(())
}

async fn run_server(store: ConfigStore) -> Result<()> {
    // A corrupt config file is fatal; a merely incomplete one is not, since
    // credentials can arrive later through the setup_config tool.
    let config = store
        .load()
        .with_context(|| format!("Failed to load config from {}", store.path().display()))?;

    if !config.is_valid() {
        tracing::warn!(
            missing = config.missing_fields().join(", "),
            "Starting without complete credentials; configure via the setup_config tool"
        );
    }

    tracing::info!("Starting MCP server on stdio");
    let service = PromptQlServer::new(store, config)
        .serve(stdio())
        .await
        .context("Failed to start MCP server")?;

    service.waiting().await?;
    Ok(())
}
