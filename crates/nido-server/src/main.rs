//! Nido Server — Application entry point.

mod settings;

use nido_authz::DelegationService;
use nido_db::DbManager;
use tracing_subscriber::EnvFilter;

use crate::settings::ServerConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nido=info"));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();

    tracing::info!("Starting Nido server...");

    let config = ServerConfig::load()?;
    tracing::debug!(?config, "Configuration loaded");
    let manager = DbManager::connect(&config.db).await?;

    let _service = DelegationService::new(
        manager.communities(),
        manager.auth_nodes(),
        manager.org_units(),
        config.authz,
    );
    tracing::info!("Delegation service ready");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Nido server stopped.");
    Ok(())
}
