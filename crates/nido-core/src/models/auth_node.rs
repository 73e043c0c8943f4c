//! Authorization node domain model.
//!
//! Nodes form one tree per community. The root has no parent, holds
//! every permission and is never validated against anything; every other
//! node holds a subset of its parent's permissions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::permission::Permissions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthNode {
    pub id: Uuid,
    pub community_id: Uuid,
    /// `None` marks the community's root authorization.
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub permissions: Permissions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuthNode {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// The permissions this node actually exercises. The root exercises
    /// every flag regardless of what is stored.
    pub fn effective_permissions(&self) -> Permissions {
        if self.is_root() {
            Permissions::all_flags()
        } else {
            self.permissions
        }
    }

    /// `true` iff every flag in `required` is held. Always `true` for
    /// the root.
    pub fn permits(&self, required: Permissions) -> bool {
        required.is_subset_of(self.effective_permissions())
    }

    pub fn can_delegate(&self) -> bool {
        self.permits(Permissions::CanDelegate)
    }

    /// Human-readable permission summary used by admin listings.
    pub fn describe_permissions(&self) -> String {
        if self.is_root() {
            "All".into()
        } else {
            self.permissions.to_string()
        }
    }
}

impl fmt::Display for AuthNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.describe_permissions())
    }
}

/// A validated child node ready to be written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAuthNode {
    pub community_id: Uuid,
    pub parent_id: Uuid,
    pub name: String,
    pub permissions: Permissions,
}
