//! ns-auth server - Entry Point
//!
//! Loads configuration, runs the deployment bootstrap and serves the line protocol.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info};

use ns_auth_server::config::ServerConfig;
use ns_auth_server::error::ServerError;
use ns_auth_server::error::handlers::{exit_code, handle_error};
use ns_auth_server::provision::ProvisionOutcome;
use ns_auth_server::{Server, ServerContext};

#[derive(Parser)]
#[command(name = "ns-auth-server", version, about = "Credential service for the notes system")]
struct Cli {
    /// Path to config.toml (defaults to ns-auth-server/config.toml, then ./config.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Install the admin, provision the configured identity and serve (default)
    Serve,
    /// Install the admin and provision the configured identity, then exit
    Bootstrap,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize the logger (env_logger picks up RUST_LOG environment variable)
    env_logger::init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            handle_error(&e);
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<(), ServerError> {
    let config = ServerConfig::load(cli.config.as_deref())?;
    let (startup, runtime, bootstrap) = config.split();
    let ctx = Arc::new(ServerContext::new(startup, runtime)?);

    let report = ctx.bootstrap(bootstrap.as_ref())?;
    match &report.outcome {
        ProvisionOutcome::Provisioned(identity) => info!("Provisioned {}", identity),
        ProvisionOutcome::AlreadyProvisioned { name, scope } => {
            info!("{}@{} already provisioned", name, scope)
        }
        ProvisionOutcome::Skipped => {}
    }
    if ctx.store.admin().is_none() {
        error!("No administrative identity is installed");
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Bootstrap => {
            info!("Bootstrap complete");
            Ok(())
        }
        Commands::Serve => {
            info!("Launching ns-auth server...");
            let server = Server::bind(ctx).await?;
            server.start().await;
            Ok(())
        }
    }
}
