use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use storm_session_lib::agent_port::DefaultAgentProvider;
use storm_session_lib::config::Settings;
use storm_session_lib::registry::{RegistryConfig, SessionRegistry};
use storm_session_lib::server::{self, generate_auth_token, ServerAppState};
use storm_session_lib::shutdown::{register_signal_handlers, ShutdownState};

/// Interactive research session orchestrator
#[derive(Parser, Debug)]
#[command(name = "storm-session")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to <config dir>/storm-session/config.toml)
    #[arg(long, env = "STORM_SESSION_CONFIG")]
    config: Option<PathBuf>,

    /// Port to bind the server to
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind the server to
    #[arg(long)]
    bind: Option<String>,

    /// Fixed auth token (or set STORM_SESSION_TOKEN env var)
    /// If not provided, a random token is generated on each startup
    #[arg(long, env = "STORM_SESSION_TOKEN")]
    auth_token: Option<String>,

    /// Allowed CORS origin; repeat for several
    #[arg(long = "cors-origin")]
    cors_origins: Vec<String>,

    /// Seconds a suspension waits for a decision before the session fails
    #[arg(long)]
    suspension_timeout_secs: Option<u64>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let settings = load_settings(&cli)?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    rt.block_on(run(settings))
}

/// Defaults, then config file, then environment, then CLI flags
fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    settings.apply_env();

    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(bind) = &cli.bind {
        settings.server.bind = bind.clone();
    }
    if let Some(token) = &cli.auth_token {
        settings.server.auth_token = Some(token.clone());
    }
    if !cli.cors_origins.is_empty() {
        settings.server.cors_origins = cli.cors_origins.clone();
    }
    if let Some(secs) = cli.suspension_timeout_secs {
        settings.session.suspension_timeout_secs = secs;
    }
    Ok(settings)
}

async fn run(settings: Settings) -> Result<()> {
    let shutdown_state = ShutdownState::new();
    if let Err(e) = register_signal_handlers(shutdown_state.clone()) {
        log::warn!("Failed to register signal handlers: {}", e);
    }

    let provider = DefaultAgentProvider::new(
        settings.providers.clone(),
        settings.session.agent_call_timeout(),
    )?;
    let config = RegistryConfig::from_settings(&settings)
        .map_err(|e| anyhow!("Invalid interview.closing_signal: {}", e))?;
    let registry = Arc::new(SessionRegistry::new(Arc::new(provider), config));

    // Use provided token or generate a random one
    let auth_token = settings
        .server
        .auth_token
        .clone()
        .unwrap_or_else(generate_auth_token);

    let state = ServerAppState::new(auth_token, registry, shutdown_state.clone());

    server::run_server(
        &settings.server.bind,
        settings.server.port,
        state,
        settings.server.cors_origins.clone(),
    )
    .await
    .map_err(|e| anyhow!(e))?;

    log::info!("Server stopped");
    Ok(())
}
