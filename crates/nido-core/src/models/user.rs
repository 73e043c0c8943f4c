//! User domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A resident of a community. Administrative authority is never stored
/// on the user; it comes from org unit memberships.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub community_id: Uuid,
    pub personal_name: String,
    pub family_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.personal_name, self.family_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub community_id: Uuid,
    pub personal_name: String,
    pub family_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}
