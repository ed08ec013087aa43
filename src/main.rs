//! modhost CLI entry point.
//!
//! Loads the configuration file, initializes the module registry and
//! serves it over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use modhost_common::{ConfigFile, DeploymentMode};
use modhost_core::EmbeddedResources;
use modhost_server::{AppState, ModhostServer, ServerConfig};

/// WebAssembly module host with per-deployment execution strategies.
#[derive(Debug, Parser)]
#[command(name = "modhost", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "MODHOST_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind, overriding `[server].bind_addr`.
    #[arg(short, long, env = "BIND_ADDR")]
    bind: Option<SocketAddr>,

    /// Deployment mode, overriding `[runtime].deployment`.
    #[arg(short, long, env = "MODHOST_DEPLOYMENT")]
    deployment: Option<DeploymentMode>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,modhost=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => ConfigFile::default(),
    };
    if let Some(deployment) = args.deployment {
        config.runtime.deployment = deployment;
    }

    let mut server_config =
        ServerConfig::from_file(&config.server).context("Invalid [server] section")?;
    if let Some(bind) = args.bind {
        server_config = server_config.with_bind_addr(bind);
    }

    info!(
        deployment = %config.runtime.deployment,
        modules = config.modules.len(),
        bind_addr = %server_config.bind_addr,
        "Starting modhost"
    );

    let mut resources = EmbeddedResources::new();
    if let Some(dir) = &config.resource_dir {
        resources = resources.with_dir(dir);
    }

    let state = AppState::new(&config.runtime, resources).context("Failed to set up engines")?;
    let report = state
        .registry()
        .init(&config.modules)
        .context("Failed to initialize module registry")?;
    if !report.is_clean() {
        warn!(rejected = report.rejected.len(), "Serving without rejected modules");
    }

    let mut server = ModhostServer::new(state, server_config);
    if config.admin.is_configured() {
        if let Some(token) = &config.admin.token {
            info!(prefix = %config.admin.prefix, "Admin API enabled");
            server = server.with_admin(&config.admin.prefix, token);
        }
    } else if config.admin.enabled {
        warn!("Admin API enabled without a token; not mounting it");
    }

    info!("Registry initialized. Available endpoints:");
    info!("  GET  /health                        - Health check");
    info!("  GET  /ready                         - Readiness check");
    info!("  GET  /modules                       - List registered modules");
    info!("  POST /modules/:name/call/:export    - Call an exported function");

    server.run().await?;

    Ok(())
}
