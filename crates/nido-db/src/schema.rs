//! Schema definitions and migration runner for SurrealDB.
//!
//! All table definitions use SCHEMAFULL mode for data integrity.
//! UUIDs are stored as strings and permission sets as the integer
//! bitset. Memberships are `member_of` graph edges, unique per
//! user/org-unit pair.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
    #[allow(dead_code)]
    name: String,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Schema v1 — initial table definitions
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Communities (global scope)
-- =======================================================================
DEFINE TABLE community SCHEMAFULL;
DEFINE FIELD name ON TABLE community TYPE string;
DEFINE FIELD country ON TABLE community TYPE string;
DEFINE FIELD created_at ON TABLE community TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE community TYPE datetime \
    DEFAULT time::now();

-- =======================================================================
-- Users (community scope)
-- =======================================================================
DEFINE TABLE user SCHEMAFULL;
DEFINE FIELD community_id ON TABLE user TYPE string;
DEFINE FIELD personal_name ON TABLE user TYPE string;
DEFINE FIELD family_name ON TABLE user TYPE string;
DEFINE FIELD email ON TABLE user TYPE option<string>;
DEFINE FIELD phone ON TABLE user TYPE option<string>;
DEFINE FIELD created_at ON TABLE user TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE user TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_user_community ON TABLE user \
    COLUMNS community_id;

-- =======================================================================
-- Authorization nodes (community scope, hierarchical)
-- The root has no parent_id and holds every permission bit.
-- =======================================================================
DEFINE TABLE auth_node SCHEMAFULL;
DEFINE FIELD community_id ON TABLE auth_node TYPE string;
DEFINE FIELD parent_id ON TABLE auth_node TYPE option<string>;
DEFINE FIELD name ON TABLE auth_node TYPE string;
DEFINE FIELD permissions ON TABLE auth_node TYPE int \
    ASSERT $value >= 0;
DEFINE FIELD created_at ON TABLE auth_node TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE auth_node TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_auth_node_community ON TABLE auth_node \
    COLUMNS community_id;
DEFINE INDEX idx_auth_node_parent ON TABLE auth_node \
    COLUMNS community_id, parent_id;

-- =======================================================================
-- Org units (community scope, bound to one auth_node)
-- =======================================================================
DEFINE TABLE org_unit SCHEMAFULL;
DEFINE FIELD community_id ON TABLE org_unit TYPE string;
DEFINE FIELD auth_node_id ON TABLE org_unit TYPE string;
DEFINE FIELD name ON TABLE org_unit TYPE string;
DEFINE FIELD min_size ON TABLE org_unit TYPE option<int>;
DEFINE FIELD max_size ON TABLE org_unit TYPE option<int>;
DEFINE FIELD created_at ON TABLE org_unit TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE org_unit TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_org_unit_community_name ON TABLE org_unit \
    COLUMNS community_id, name UNIQUE;
DEFINE INDEX idx_org_unit_auth_node ON TABLE org_unit \
    COLUMNS auth_node_id;

-- =======================================================================
-- Graph Edge Tables (relations)
-- =======================================================================

-- User -> OrgUnit membership
DEFINE TABLE member_of TYPE RELATION SCHEMAFULL;
DEFINE INDEX idx_member_of_pair ON TABLE member_of \
    COLUMNS in, out UNIQUE;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Run all pending migrations against the given SurrealDB client.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum.
/// All DEFINE statements are idempotent so re-running is safe.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    // Ensure migration tracking table exists (idempotent).
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    // Determine current schema version.
    let mut result = db
        .query("SELECT * FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version > current_version {
            info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            db.query(migration.sql).await?.check().map_err(|e| {
                DbError::Migration(format!(
                    "Migration v{} '{}' failed: {}",
                    migration.version, migration.name, e,
                ))
            })?;

            // Record the applied migration.
            db.query(
                "CREATE _migration SET version = $version, \
                 name = $name",
            )
            .bind(("version", migration.version))
            .bind(("name", migration.name))
            .await?
            .check()
            .map_err(|e| {
                DbError::Migration(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e,
                ))
            })?;

            info!(
                version = migration.version,
                "Migration applied successfully"
            );
        }
    }

    Ok(())
}

/// Returns the raw schema DDL for version 1.
///
/// Exposed for testing with in-memory SurrealDB instances that
/// bypass the migration runner.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}
