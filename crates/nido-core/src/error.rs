//! Error types for the Nido system.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NidoError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Entity already exists: {entity}")]
    AlreadyExists { entity: String },

    #[error("Not authorized: {reason}")]
    NotAuthorized { reason: String },

    /// A grant or update asked for a bit the parent node does not hold.
    #[error("{name}.{bit} cannot be granted because parent has {parent_value}")]
    PermissionEscalation {
        name: String,
        bit: String,
        parent_value: String,
    },

    #[error("Org unit {org_unit_id} is full ({max_size} members)")]
    CapacityExceeded { org_unit_id: Uuid, max_size: u32 },

    #[error("Org unit {org_unit_id} cannot drop below {min_size} members")]
    BelowMinimum { org_unit_id: Uuid, min_size: u32 },

    #[error("The root authorization {node_id} cannot be {action}")]
    RootMutationForbidden { node_id: Uuid, action: String },

    #[error("{entity} {id} is still referenced by {referenced_by}")]
    ReferentialConflict {
        entity: String,
        id: String,
        referenced_by: String,
    },

    #[error("Validation error: {message}")]
    Validation { message: String },

    /// A concurrent writer changed the data a mutation depended on; the
    /// transaction was rolled back.
    #[error("Conflicting concurrent modification: {reason}")]
    Conflict { reason: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NidoError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

pub type NidoResult<T> = Result<T, NidoError>;
