use anyhow::{Context, Result};
use axum::Router;
use clap::{Parser, Subcommand};
use gatehouse::auth::{generate_api_key, hash_password};
use gatehouse::state::SWEEP_INTERVAL;
use gatehouse::{AppConfig, AppState, create_router, resolve_config_path};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Log directives used when `RUST_LOG` is unset or unparseable.
const DEFAULT_LOG_DIRECTIVES: &str = "gatehouse=info,tower_http=info";

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(about = "Single-user authentication gateway with local, OIDC and API key login")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Path to the JSON configuration file
        #[arg(short, long, env = "GATEHOUSE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Print a {bcrypt} digest for the `user.password` setting
    HashPassword {
        /// Plaintext password, 4-64 characters
        password: String,
    },
    /// Generate an API key and the digest for the `api_key` setting
    GenerateApiKey,
}

#[tokio::main]
async fn main() -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(rust_log.as_deref()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            let path = resolve_config_path(config)?;
            info!("Loading configuration from {}", path.display());
            let config = AppConfig::load(&path)?;
            let addr = config.socket_addr()?;

            let state = AppState::from_config(config).await?;
            let sweepers = state.spawn_sweepers(SWEEP_INTERVAL);

            let app = create_router(state, Router::new(), Router::new());

            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            info!("Listening on http://{}", addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            for handle in sweepers {
                handle.abort();
            }
            info!("Server stopped");
        }
        Commands::HashPassword { password } => {
            let digest = hash_password(&password)?;
            println!("{}", digest);
        }
        Commands::GenerateApiKey => {
            let generated = generate_api_key()?;
            println!("API key (give to clients): {}", generated.key);
            println!("Digest (set as api_key):   {}", generated.digest);
        }
    }

    Ok(())
}

fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_DIRECTIVES))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
