//! SurrealDB repository implementations.

mod auth_node;
mod community;
mod org_unit;
mod user;

pub use auth_node::SurrealAuthNodeRepository;
pub use community::SurrealCommunityRepository;
pub use org_unit::SurrealOrgUnitRepository;
pub use user::SurrealUserRepository;

use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::DbError;

/// Row struct for count queries.
#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

fn parse_uuid(value: &str, what: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(value).map_err(|e| DbError::Decode(format!("invalid {what} UUID: {e}")))
}

fn parse_optional_uuid(value: Option<String>, what: &str) -> Result<Option<Uuid>, DbError> {
    value.as_deref().map(|v| parse_uuid(v, what)).transpose()
}
