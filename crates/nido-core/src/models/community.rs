//! Community domain model.
//!
//! A community is the tenant boundary: every user, authorization node
//! and org unit belongs to exactly one community.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::auth_node::AuthNode;
use super::org_unit::OrgUnit;
use super::user::User;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub id: Uuid,
    pub name: String,
    pub country: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to provision a new community.
///
/// Provisioning creates the root authorization, a root org unit bound to
/// it and the founding user as that unit's first member, so a fresh
/// community always has an administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCommunity {
    pub name: String,
    pub country: String,
    /// Name of the root authorization node.
    pub root_name: String,
    /// Name of the org unit bound to the root node (e.g. `Board`).
    pub root_unit_name: String,
    pub founder: CreateFounder,
}

/// The founding administrator. Joins the community being provisioned,
/// so unlike [`CreateUser`](super::user::CreateUser) it carries no
/// community id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFounder {
    pub personal_name: String,
    pub family_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Everything created by a successful provisioning.
#[derive(Debug, Clone)]
pub struct ProvisionedCommunity {
    pub community: Community,
    pub root: AuthNode,
    pub root_unit: OrgUnit,
    pub founder: User,
}
