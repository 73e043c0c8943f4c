//! Connection to a remote SurrealDB server.
//!
//! [`DbManager::connect`] signs in, selects the Nido namespace and brings
//! the schema up to date, so the handle it returns is ready for the
//! repositories. Tests use the in-memory engine directly instead.

use std::fmt;

use serde::Deserialize;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tracing::info;

use crate::error::DbError;
use crate::repository::{
    SurrealAuthNodeRepository, SurrealCommunityRepository, SurrealOrgUnitRepository,
    SurrealUserRepository,
};
use crate::schema::run_migrations;

/// Where the Nido store lives. Loaded from the `db` section of the
/// server settings (`NIDO__DB__URL`, `NIDO__DB__PASSWORD`, ...).
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// WebSocket address without scheme, e.g. `127.0.0.1:8000`.
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "127.0.0.1:8000".into(),
            namespace: "nido".into(),
            database: "main".into(),
            username: "root".into(),
            password: "root".into(),
        }
    }
}

// Settings are logged at startup; keep the password out of them.
impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("url", &self.url)
            .field("namespace", &self.namespace)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An open, migrated connection and the repositories built on it.
#[derive(Clone)]
pub struct DbManager {
    db: Surreal<Client>,
}

impl DbManager {
    /// Sign in as root, select the configured namespace and database,
    /// then apply pending migrations.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            url = %config.url,
            namespace = %config.namespace,
            database = %config.database,
            "Connecting to the Nido store"
        );

        let db = Surreal::new::<Ws>(&config.url).await?;
        db.signin(Root {
            username: config.username.clone(),
            password: config.password.clone(),
        })
        .await?;
        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;

        run_migrations(&db).await?;
        info!("Nido store ready");

        Ok(Self { db })
    }

    pub fn client(&self) -> &Surreal<Client> {
        &self.db
    }

    pub fn communities(&self) -> SurrealCommunityRepository<Client> {
        SurrealCommunityRepository::new(self.db.clone())
    }

    pub fn auth_nodes(&self) -> SurrealAuthNodeRepository<Client> {
        SurrealAuthNodeRepository::new(self.db.clone())
    }

    pub fn org_units(&self) -> SurrealOrgUnitRepository<Client> {
        SurrealOrgUnitRepository::new(self.db.clone())
    }

    pub fn users(&self) -> SurrealUserRepository<Client> {
        SurrealUserRepository::new(self.db.clone())
    }
}
