//! Server configuration loaded from the environment.

use nido_authz::AuthzConfig;
use nido_db::DbConfig;
use serde::Deserialize;

/// Aggregated configuration for the server process.
///
/// Every field can be overridden with a `NIDO__<SECTION>__<FIELD>`
/// environment variable, e.g. `NIDO__DB__URL` or
/// `NIDO__AUTHZ__ADMIN_CACHE_ENABLED`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub db: DbConfig,
    pub authz: AuthzConfig,
}

impl ServerConfig {
    /// Load `.env` if present, then read `NIDO__*` variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();

        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("NIDO")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
