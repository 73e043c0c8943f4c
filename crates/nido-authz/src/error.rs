//! Delegation error types.

use nido_core::error::NidoError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthzError {
    /// The acting user holds no membership on the node whose standing
    /// the operation requires.
    #[error("user {user_id} holds no membership on {node_name}")]
    NoStanding { user_id: Uuid, node_name: String },

    /// The acting user holds no membership on the node or any of its
    /// ancestors.
    #[error("user {user_id} holds no membership at or above {node_name}")]
    NoStandingAbove { user_id: Uuid, node_name: String },

    #[error("{node_name} does not hold CAN_DELEGATE")]
    CannotDelegate { node_name: String },
}

impl From<AuthzError> for NidoError {
    fn from(err: AuthzError) -> Self {
        NidoError::NotAuthorized {
            reason: err.to_string(),
        }
    }
}
