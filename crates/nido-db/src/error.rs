//! Database-specific error types and conversions.

use nido_core::error::NidoError;
use surrealdb::IndexedResults;

/// Prefix of the messages thrown by transactional guards.
pub(crate) const GUARD_PREFIX: &str = "nido_guard:";

/// Marker SurrealDB puts on the statements of a rolled-back transaction.
const NOT_EXECUTED: &str = "not executed due to a failed transaction";

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Invalid stored value: {0}")]
    Decode(String),

    #[error("Unique constraint violated: {0}")]
    Duplicate(String),

    /// A guard inside a write transaction failed; the transaction was
    /// rolled back. Carries the guard tag.
    #[error("Transaction guard failed: {0}")]
    Guard(String),

    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },
}

impl DbError {
    /// Classify a single query failure message.
    fn classify(message: String) -> Self {
        if let Some(tag) = guard_tag(&message) {
            return DbError::Guard(tag.to_string());
        }
        if message.contains("already contains") {
            return DbError::Duplicate(message);
        }
        if message.to_ascii_lowercase().contains("conflict") {
            return DbError::Conflict(message);
        }
        DbError::Query(message)
    }

    /// Pick the error that explains a failed response.
    ///
    /// When a transaction fails, every other statement reports that it was
    /// not executed, so the statement carrying the cause is not necessarily
    /// the first one. A guard tag anywhere wins; otherwise the first message
    /// that is not a "not executed" marker.
    fn from_messages(messages: Vec<String>) -> Option<Self> {
        if let Some(tag) = messages.iter().find_map(|m| guard_tag(m)) {
            return Some(DbError::Guard(tag.to_string()));
        }
        let cause = messages
            .iter()
            .position(|m| !m.contains(NOT_EXECUTED))
            .unwrap_or(0);
        messages.into_iter().nth(cause).map(DbError::classify)
    }

    pub(crate) fn not_found(entity: &str, id: impl ToString) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// The guard tag, if this error came from a failed guard.
    pub(crate) fn guard(&self) -> Option<&str> {
        match self {
            DbError::Guard(tag) => Some(tag),
            _ => None,
        }
    }
}

/// Fail with the most specific error carried by a multi-statement response.
pub(crate) fn check_response(mut response: IndexedResults) -> Result<IndexedResults, DbError> {
    let mut errors: Vec<(usize, surrealdb::Error)> = response.take_errors().into_iter().collect();
    errors.sort_by_key(|(index, _)| *index);
    let messages = errors.into_iter().map(|(_, e)| e.to_string()).collect();
    match DbError::from_messages(messages) {
        Some(err) => Err(err),
        None => Ok(response),
    }
}

fn guard_tag(message: &str) -> Option<&str> {
    let start = message.find(GUARD_PREFIX)? + GUARD_PREFIX.len();
    let rest = &message[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

impl From<DbError> for NidoError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => NidoError::NotFound { entity, id },
            DbError::Duplicate(message) => NidoError::AlreadyExists { entity: message },
            DbError::Guard(tag) => NidoError::Conflict { reason: tag },
            DbError::Conflict(message) => NidoError::Conflict { reason: message },
            other => NidoError::Database(other.to_string()),
        }
    }
}
