//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Community-scoped repositories
//! require a `community_id` parameter to enforce data isolation.
//!
//! Mutating operations that depend on other rows (parent permissions,
//! member counts, references) take the values they were validated
//! against and re-assert them inside the write transaction. A changed
//! value rolls the transaction back with [`NidoError::Conflict`].
//!
//! [`NidoError::Conflict`]: crate::error::NidoError::Conflict

use uuid::Uuid;

use crate::error::NidoResult;
use crate::models::{
    auth_node::{AuthNode, CreateAuthNode},
    community::{Community, CreateCommunity, ProvisionedCommunity},
    org_unit::{CreateOrgUnit, OrgUnit, UpdateOrgUnit},
    permission::Permissions,
    user::{CreateUser, User},
};

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

// ---------------------------------------------------------------------------
// Community (global scope)
// ---------------------------------------------------------------------------

pub trait CommunityRepository: Send + Sync {
    /// Create the community, its root authorization, the root org unit
    /// and the founding member in one transaction.
    fn provision(
        &self,
        input: CreateCommunity,
    ) -> impl Future<Output = NidoResult<ProvisionedCommunity>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = NidoResult<Community>> + Send;
    fn list(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = NidoResult<PaginatedResult<Community>>> + Send;
}

// ---------------------------------------------------------------------------
// Community-scoped repositories
// ---------------------------------------------------------------------------

pub trait UserRepository: Send + Sync {
    fn create(&self, input: CreateUser) -> impl Future<Output = NidoResult<User>> + Send;
    fn get_by_id(
        &self,
        community_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = NidoResult<User>> + Send;
    /// Directory listing ordered by family name, then personal name.
    fn list(
        &self,
        community_id: Uuid,
        pagination: Pagination,
    ) -> impl Future<Output = NidoResult<PaginatedResult<User>>> + Send;
}

pub trait AuthNodeRepository: Send + Sync {
    fn get_by_id(
        &self,
        community_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = NidoResult<AuthNode>> + Send;
    fn get_root(&self, community_id: Uuid) -> impl Future<Output = NidoResult<AuthNode>> + Send;
    /// Every node of the community, in creation order.
    fn list(&self, community_id: Uuid) -> impl Future<Output = NidoResult<Vec<AuthNode>>> + Send;
    fn get_children(
        &self,
        community_id: Uuid,
        parent_id: Uuid,
    ) -> impl Future<Output = NidoResult<Vec<AuthNode>>> + Send;
    fn count(&self, community_id: Uuid) -> impl Future<Output = NidoResult<u64>> + Send;

    /// Insert a validated child. Fails with `Conflict` if the parent's
    /// stored permissions no longer equal `parent_permissions`.
    fn create_child(
        &self,
        input: CreateAuthNode,
        parent_permissions: Permissions,
    ) -> impl Future<Output = NidoResult<AuthNode>> + Send;

    /// Write new permissions for a set of nodes of one community in a
    /// single transaction. `guard` is a node whose stored permissions
    /// must still equal the given value. `subtree` is the edited node and
    /// its descendants as the changes were computed from; the write fails
    /// with `Conflict` if any of them moved, changed bits or gained a
    /// child in the meantime.
    fn set_permissions(
        &self,
        community_id: Uuid,
        changes: Vec<(Uuid, Permissions)>,
        guard: (Uuid, Permissions),
        subtree: Vec<(Uuid, Permissions)>,
    ) -> impl Future<Output = NidoResult<()>> + Send;

    fn rename(
        &self,
        community_id: Uuid,
        id: Uuid,
        name: String,
    ) -> impl Future<Output = NidoResult<AuthNode>> + Send;

    /// Move a non-root node beneath `new_parent_id`, guarded like
    /// [`AuthNodeRepository::create_child`].
    fn reparent(
        &self,
        community_id: Uuid,
        id: Uuid,
        new_parent_id: Uuid,
        parent_permissions: Permissions,
    ) -> impl Future<Output = NidoResult<AuthNode>> + Send;

    /// Delete a non-root node that has no children and no org unit bound
    /// to it. Both conditions are re-checked inside the transaction.
    fn delete(&self, community_id: Uuid, id: Uuid) -> impl Future<Output = NidoResult<()>> + Send;
}

pub trait OrgUnitRepository: Send + Sync {
    fn create(&self, input: CreateOrgUnit) -> impl Future<Output = NidoResult<OrgUnit>> + Send;
    fn get_by_id(
        &self,
        community_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = NidoResult<OrgUnit>> + Send;
    fn update(
        &self,
        community_id: Uuid,
        id: Uuid,
        input: UpdateOrgUnit,
    ) -> impl Future<Output = NidoResult<OrgUnit>> + Send;
    /// Delete the org unit together with its membership edges.
    fn delete(&self, community_id: Uuid, id: Uuid) -> impl Future<Output = NidoResult<()>> + Send;
    fn list(&self, community_id: Uuid) -> impl Future<Output = NidoResult<Vec<OrgUnit>>> + Send;
    /// Org units bound to the given authorization node.
    fn list_by_auth_node(
        &self,
        community_id: Uuid,
        auth_node_id: Uuid,
    ) -> impl Future<Output = NidoResult<Vec<OrgUnit>>> + Send;

    /// Add a user to an org unit. Fails with `CapacityExceeded` when the
    /// distinct member count has reached `max_size`.
    fn add_member(
        &self,
        community_id: Uuid,
        org_unit_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = NidoResult<()>> + Send;

    /// Remove a user from an org unit. Fails with `BelowMinimum` when the
    /// distinct member count is at or below `min_size`.
    fn remove_member(
        &self,
        community_id: Uuid,
        org_unit_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = NidoResult<()>> + Send;

    fn count_members(
        &self,
        community_id: Uuid,
        org_unit_id: Uuid,
    ) -> impl Future<Output = NidoResult<u64>> + Send;

    fn get_members(
        &self,
        community_id: Uuid,
        org_unit_id: Uuid,
        pagination: Pagination,
    ) -> impl Future<Output = NidoResult<PaginatedResult<User>>> + Send;

    /// Org units of the community the user is a member of.
    fn get_user_org_units(
        &self,
        community_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = NidoResult<Vec<OrgUnit>>> + Send;
}
