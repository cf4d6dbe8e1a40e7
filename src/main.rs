//! devicelink CLI binary entry point.

use std::sync::Arc;

use clap::Parser;
use devicelink::cli::{Cli, Commands};
use devicelink::config::DeviceLinkConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = std::env::var("DEVICELINK_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> devicelink::error::Result<()> {
    let config = match cli.config {
        Some(path) => {
            let _ = dotenvy::dotenv();
            let mut config = DeviceLinkConfig::load_from_path(path)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            config
        }
        None => DeviceLinkConfig::from_env()?,
    };
    let session = Arc::new(config.session_manager()?);
    session.restore().await;

    match cli.command {
        Commands::Login => devicelink::cli::auth::handle_login(&config, &session).await,
        Commands::Logout(args) => {
            devicelink::cli::auth::handle_logout(&session, args.keep_credential).await
        }
        Commands::Switch(args) => {
            devicelink::cli::auth::handle_switch(&session, &args.username).await
        }
        Commands::Status => devicelink::cli::auth::handle_status(&session).await,
        Commands::Accounts => devicelink::cli::auth::handle_accounts(&session).await,
    }
}
