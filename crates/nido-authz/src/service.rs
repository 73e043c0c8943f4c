//! Delegation service: tree and membership mutations on behalf of an
//! acting user.
//!
//! Standing comes from membership. A user stands on a node when they are
//! a member of an org unit bound to it. Editing a node requires standing
//! on its parent (the root is edited from itself), delegating requires
//! standing on the delegating node, and managing an org unit requires
//! standing on its node or any ancestor.

use std::collections::HashSet;

use nido_core::error::{NidoError, NidoResult};
use nido_core::models::auth_node::{AuthNode, CreateAuthNode};
use nido_core::models::community::{CreateCommunity, CreateFounder, ProvisionedCommunity};
use nido_core::models::org_unit::{CreateOrgUnit, OrgUnit, UpdateOrgUnit};
use nido_core::models::permission::Permissions;
use nido_core::models::user::User;
use nido_core::repository::{
    AuthNodeRepository, CommunityRepository, OrgUnitRepository, PaginatedResult, Pagination,
};
use nido_core::tree::{self, AuthTree};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::AdminCache;
use crate::config::AuthzConfig;
use crate::error::AuthzError;

/// Who is acting, and in which community. Supplied by the identity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActingContext {
    pub community_id: Uuid,
    pub user_id: Uuid,
}

impl ActingContext {
    pub fn new(community_id: Uuid, user_id: Uuid) -> Self {
        Self {
            community_id,
            user_id,
        }
    }
}

/// Fields for a new org unit; the community comes from the acting
/// context.
#[derive(Debug, Clone)]
pub struct NewOrgUnit {
    pub auth_node_id: Uuid,
    pub name: String,
    pub min_size: Option<u32>,
    pub max_size: Option<u32>,
}

/// Delegation service.
///
/// Generic over repository implementations so that the authz layer
/// has no dependency on the database crate.
pub struct DelegationService<C: CommunityRepository, N: AuthNodeRepository, O: OrgUnitRepository> {
    community_repo: C,
    node_repo: N,
    org_unit_repo: O,
    admin_cache: Option<AdminCache>,
    config: AuthzConfig,
}

impl<C: CommunityRepository, N: AuthNodeRepository, O: OrgUnitRepository>
    DelegationService<C, N, O>
{
    pub fn new(community_repo: C, node_repo: N, org_unit_repo: O, config: AuthzConfig) -> Self {
        let admin_cache = config.admin_cache_enabled.then(AdminCache::new);
        Self {
            community_repo,
            node_repo,
            org_unit_repo,
            admin_cache,
            config,
        }
    }

    // -----------------------------------------------------------------
    // Provisioning
    // -----------------------------------------------------------------

    /// Create a community with its root authorization, the root org unit
    /// and the founder as that unit's only member.
    pub async fn provision(
        &self,
        name: &str,
        country: &str,
        root_name: &str,
        founder: CreateFounder,
    ) -> NidoResult<ProvisionedCommunity> {
        tree::check_name(root_name)?;
        let provisioned = self
            .community_repo
            .provision(CreateCommunity {
                name: name.trim().to_string(),
                country: country.trim().to_string(),
                root_name: root_name.trim().to_string(),
                root_unit_name: self.config.root_unit_name.clone(),
                founder,
            })
            .await?;

        info!(
            community_id = %provisioned.community.id,
            node_id = %provisioned.root.id,
            user_id = %provisioned.founder.id,
            "Community provisioned with founding administrator"
        );
        Ok(provisioned)
    }

    // -----------------------------------------------------------------
    // Tree mutations
    // -----------------------------------------------------------------

    /// Delegate a subset of `parent_id`'s permissions to a new child.
    pub async fn create_child(
        &self,
        ctx: ActingContext,
        parent_id: Uuid,
        name: &str,
        requested: Permissions,
    ) -> NidoResult<AuthNode> {
        let result = async {
            tree::check_name(name)?;
            let parent = self.node_repo.get_by_id(ctx.community_id, parent_id).await?;
            self.require_standing(ctx, &parent).await?;
            tree::check_delegation(name, requested, &parent)?;

            self.node_repo
                .create_child(
                    CreateAuthNode {
                        community_id: ctx.community_id,
                        parent_id,
                        name: name.trim().to_string(),
                        permissions: requested,
                    },
                    parent.permissions,
                )
                .await
        }
        .await;

        let node = rejected("create_child", ctx, result)?;
        info!(
            community_id = %ctx.community_id,
            node_id = %node.id,
            parent_id = %parent_id,
            permissions = %node.permissions,
            "Authorization delegated"
        );
        Ok(node)
    }

    /// Replace a node's permissions. Descendants are narrowed to the new
    /// set in the same transaction.
    pub async fn update_bits(
        &self,
        ctx: ActingContext,
        node_id: Uuid,
        new_bits: Permissions,
    ) -> NidoResult<AuthNode> {
        let result = async {
            let tree = self.load_tree(ctx.community_id).await?;
            let node = tree.node(node_id)?;
            let Some(parent) = tree.parent(node_id) else {
                return Err(NidoError::RootMutationForbidden {
                    node_id,
                    action: "updated".into(),
                });
            };
            self.require_standing(ctx, parent).await?;
            tree::check_delegation(&node.name, new_bits, parent)?;

            let mut changes = vec![(node_id, new_bits)];
            changes.extend(tree.narrowed_descendants(node_id, new_bits));
            let narrowed = changes.len() - 1;
            let subtree = tree
                .subtree_ids(node_id)
                .into_iter()
                .filter_map(|id| tree.get(id))
                .map(|n| (n.id, n.permissions))
                .collect();

            self.node_repo
                .set_permissions(
                    ctx.community_id,
                    changes,
                    (parent.id, parent.permissions),
                    subtree,
                )
                .await?;
            Ok((self.node_repo.get_by_id(ctx.community_id, node_id).await?, narrowed))
        }
        .await;

        let (node, narrowed) = rejected("update_bits", ctx, result)?;
        info!(
            community_id = %ctx.community_id,
            node_id = %node_id,
            permissions = %node.permissions,
            narrowed,
            "Authorization permissions updated"
        );
        Ok(node)
    }

    /// Rename a node. The root may be renamed by its own members.
    pub async fn rename(&self, ctx: ActingContext, node_id: Uuid, name: &str) -> NidoResult<AuthNode> {
        let result = async {
            tree::check_name(name)?;
            let node = self.node_repo.get_by_id(ctx.community_id, node_id).await?;
            let editor = self.editor_of(&node).await?;
            self.require_standing(ctx, &editor).await?;
            self.node_repo
                .rename(ctx.community_id, node_id, name.trim().to_string())
                .await
        }
        .await;

        let node = rejected("rename", ctx, result)?;
        info!(community_id = %ctx.community_id, node_id = %node_id, name = %node.name, "Authorization renamed");
        Ok(node)
    }

    /// Move a node (with its subtree) beneath another delegating node.
    pub async fn reparent(
        &self,
        ctx: ActingContext,
        node_id: Uuid,
        new_parent_id: Uuid,
    ) -> NidoResult<AuthNode> {
        let result = async {
            let tree = self.load_tree(ctx.community_id).await?;
            let node = tree.node(node_id)?;
            let Some(parent) = tree.parent(node_id) else {
                return Err(NidoError::RootMutationForbidden {
                    node_id,
                    action: "re-parented".into(),
                });
            };
            self.require_standing(ctx, parent).await?;

            let new_parent = tree.node(new_parent_id)?;
            self.require_standing(ctx, new_parent).await?;
            if !new_parent.can_delegate() {
                return Err(AuthzError::CannotDelegate {
                    node_name: new_parent.name.clone(),
                }
                .into());
            }
            if tree.is_within(node_id, new_parent_id) {
                return Err(NidoError::validation(format!(
                    "{} cannot be moved beneath its own subtree",
                    node.name
                )));
            }
            if parent.id == new_parent_id {
                return Ok(node.clone());
            }
            tree::check_grant(&node.name, node.permissions, new_parent)?;

            self.node_repo
                .reparent(ctx.community_id, node_id, new_parent_id, new_parent.permissions)
                .await
        }
        .await;

        let node = rejected("reparent", ctx, result)?;
        info!(
            community_id = %ctx.community_id,
            node_id = %node_id,
            parent_id = %new_parent_id,
            "Authorization re-parented"
        );
        Ok(node)
    }

    /// Delete a leaf node no org unit is bound to.
    pub async fn delete(&self, ctx: ActingContext, node_id: Uuid) -> NidoResult<()> {
        let result = async {
            let node = self.node_repo.get_by_id(ctx.community_id, node_id).await?;
            let Some(parent_id) = node.parent_id else {
                return Err(NidoError::RootMutationForbidden {
                    node_id,
                    action: "deleted".into(),
                });
            };
            let parent = self.node_repo.get_by_id(ctx.community_id, parent_id).await?;
            self.require_standing(ctx, &parent).await?;
            self.node_repo.delete(ctx.community_id, node_id).await
        }
        .await;

        rejected("delete", ctx, result)?;
        info!(community_id = %ctx.community_id, node_id = %node_id, "Authorization deleted");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Permission queries
    // -----------------------------------------------------------------

    /// `true` iff the node holds every flag in `required`.
    pub async fn permits(
        &self,
        community_id: Uuid,
        node_id: Uuid,
        required: Permissions,
    ) -> NidoResult<bool> {
        let node = self.node_repo.get_by_id(community_id, node_id).await?;
        Ok(node.permits(required))
    }

    /// `true` iff one of the acting user's memberships grants every flag
    /// in `required`.
    pub async fn user_permits(&self, ctx: ActingContext, required: Permissions) -> NidoResult<bool> {
        for node_id in self.standing_nodes(ctx).await? {
            let node = self.node_repo.get_by_id(ctx.community_id, node_id).await?;
            if node.permits(required) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// A user is an administrator of a community when they are a member
    /// of at least one of its org units.
    pub async fn is_admin(&self, community_id: Uuid, user_id: Uuid) -> NidoResult<bool> {
        if let Some(cached) = self
            .admin_cache
            .as_ref()
            .and_then(|cache| cache.get(community_id, user_id))
        {
            return Ok(cached);
        }

        let is_admin = !self
            .org_unit_repo
            .get_user_org_units(community_id, user_id)
            .await?
            .is_empty();
        if let Some(cache) = &self.admin_cache {
            cache.insert(community_id, user_id, is_admin);
        }
        Ok(is_admin)
    }

    /// Human-readable summary of a node's permissions.
    pub async fn describe_permissions(&self, community_id: Uuid, node_id: Uuid) -> NidoResult<String> {
        let node = self.node_repo.get_by_id(community_id, node_id).await?;
        Ok(node.describe_permissions())
    }

    // -----------------------------------------------------------------
    // Presentation reads
    // -----------------------------------------------------------------

    /// The whole authorization tree of a community.
    pub async fn tree(&self, community_id: Uuid) -> NidoResult<AuthTree> {
        self.load_tree(community_id).await
    }

    pub async fn children(&self, community_id: Uuid, node_id: Uuid) -> NidoResult<Vec<AuthNode>> {
        self.node_repo.get_by_id(community_id, node_id).await?;
        self.node_repo.get_children(community_id, node_id).await
    }

    /// Delegating nodes the acting user stands on: the candidate parents
    /// offered when creating or moving an authorization.
    pub async fn delegable_parents(&self, ctx: ActingContext) -> NidoResult<Vec<AuthNode>> {
        let tree = self.load_tree(ctx.community_id).await?;
        let standing = self.standing_nodes(ctx).await?;
        let mut parents: Vec<AuthNode> = tree
            .iter()
            .filter(|node| standing.contains(&node.id) && node.can_delegate())
            .cloned()
            .collect();
        parents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(parents)
    }

    // -----------------------------------------------------------------
    // Org units and membership
    // -----------------------------------------------------------------

    pub async fn create_org_unit(&self, ctx: ActingContext, input: NewOrgUnit) -> NidoResult<OrgUnit> {
        let result = async {
            self.require_standing_above(ctx, input.auth_node_id).await?;
            self.org_unit_repo
                .create(CreateOrgUnit {
                    community_id: ctx.community_id,
                    auth_node_id: input.auth_node_id,
                    name: input.name.trim().to_string(),
                    min_size: input.min_size,
                    max_size: input.max_size,
                })
                .await
        }
        .await;

        let unit = rejected("create_org_unit", ctx, result)?;
        info!(
            community_id = %ctx.community_id,
            org_unit_id = %unit.id,
            node_id = %unit.auth_node_id,
            "Org unit created"
        );
        Ok(unit)
    }

    pub async fn update_org_unit(
        &self,
        ctx: ActingContext,
        org_unit_id: Uuid,
        input: UpdateOrgUnit,
    ) -> NidoResult<OrgUnit> {
        let result = async {
            let unit = self.org_unit_repo.get_by_id(ctx.community_id, org_unit_id).await?;
            self.require_standing_above(ctx, unit.auth_node_id).await?;
            self.org_unit_repo
                .update(ctx.community_id, org_unit_id, input)
                .await
        }
        .await;

        let unit = rejected("update_org_unit", ctx, result)?;
        info!(community_id = %ctx.community_id, org_unit_id = %org_unit_id, "Org unit updated");
        Ok(unit)
    }

    /// Delete an org unit and its memberships. The unit bound to the root
    /// cannot be deleted.
    pub async fn delete_org_unit(&self, ctx: ActingContext, org_unit_id: Uuid) -> NidoResult<()> {
        let result = async {
            let unit = self.org_unit_repo.get_by_id(ctx.community_id, org_unit_id).await?;
            let node = self
                .node_repo
                .get_by_id(ctx.community_id, unit.auth_node_id)
                .await?;
            if node.is_root() {
                return Err(NidoError::RootMutationForbidden {
                    node_id: node.id,
                    action: "left without its org unit".into(),
                });
            }
            self.require_standing_above(ctx, unit.auth_node_id).await?;
            self.org_unit_repo.delete(ctx.community_id, org_unit_id).await
        }
        .await;

        rejected("delete_org_unit", ctx, result)?;
        if let Some(cache) = &self.admin_cache {
            cache.invalidate_community(ctx.community_id);
        }
        info!(community_id = %ctx.community_id, org_unit_id = %org_unit_id, "Org unit deleted");
        Ok(())
    }

    pub async fn add_member(&self, ctx: ActingContext, org_unit_id: Uuid, user_id: Uuid) -> NidoResult<()> {
        let result = async {
            let unit = self.org_unit_repo.get_by_id(ctx.community_id, org_unit_id).await?;
            self.require_standing_above(ctx, unit.auth_node_id).await?;
            self.org_unit_repo
                .add_member(ctx.community_id, org_unit_id, user_id)
                .await
        }
        .await;

        rejected("add_member", ctx, result)?;
        if let Some(cache) = &self.admin_cache {
            cache.invalidate(ctx.community_id, user_id);
        }
        info!(
            community_id = %ctx.community_id,
            org_unit_id = %org_unit_id,
            user_id = %user_id,
            "Member added"
        );
        Ok(())
    }

    pub async fn remove_member(
        &self,
        ctx: ActingContext,
        org_unit_id: Uuid,
        user_id: Uuid,
    ) -> NidoResult<()> {
        let result = async {
            let unit = self.org_unit_repo.get_by_id(ctx.community_id, org_unit_id).await?;
            self.require_standing_above(ctx, unit.auth_node_id).await?;
            self.org_unit_repo
                .remove_member(ctx.community_id, org_unit_id, user_id)
                .await
        }
        .await;

        rejected("remove_member", ctx, result)?;
        if let Some(cache) = &self.admin_cache {
            cache.invalidate(ctx.community_id, user_id);
        }
        info!(
            community_id = %ctx.community_id,
            org_unit_id = %org_unit_id,
            user_id = %user_id,
            "Member removed"
        );
        Ok(())
    }

    pub async fn members(
        &self,
        community_id: Uuid,
        org_unit_id: Uuid,
        pagination: Pagination,
    ) -> NidoResult<PaginatedResult<User>> {
        self.org_unit_repo.get_by_id(community_id, org_unit_id).await?;
        self.org_unit_repo
            .get_members(community_id, org_unit_id, pagination)
            .await
    }

    pub async fn user_org_units(&self, community_id: Uuid, user_id: Uuid) -> NidoResult<Vec<OrgUnit>> {
        self.org_unit_repo
            .get_user_org_units(community_id, user_id)
            .await
    }

    // -----------------------------------------------------------------
    // Standing
    // -----------------------------------------------------------------

    async fn load_tree(&self, community_id: Uuid) -> NidoResult<AuthTree> {
        let nodes = self.node_repo.list(community_id).await?;
        AuthTree::from_nodes(community_id, nodes)
    }

    /// Nodes the acting user is bound to through org unit membership.
    async fn standing_nodes(&self, ctx: ActingContext) -> NidoResult<HashSet<Uuid>> {
        Ok(self
            .org_unit_repo
            .get_user_org_units(ctx.community_id, ctx.user_id)
            .await?
            .into_iter()
            .map(|unit| unit.auth_node_id)
            .collect())
    }

    /// The node whose members may edit `node`: its parent, or the root
    /// itself.
    async fn editor_of(&self, node: &AuthNode) -> NidoResult<AuthNode> {
        match node.parent_id {
            Some(parent_id) => self.node_repo.get_by_id(node.community_id, parent_id).await,
            None => Ok(node.clone()),
        }
    }

    async fn require_standing(&self, ctx: ActingContext, node: &AuthNode) -> NidoResult<()> {
        if self.standing_nodes(ctx).await?.contains(&node.id) {
            Ok(())
        } else {
            Err(AuthzError::NoStanding {
                user_id: ctx.user_id,
                node_name: node.name.clone(),
            }
            .into())
        }
    }

    async fn require_standing_above(&self, ctx: ActingContext, node_id: Uuid) -> NidoResult<()> {
        let tree = self.load_tree(ctx.community_id).await?;
        let node = tree.node(node_id)?;
        let standing = self.standing_nodes(ctx).await?;
        let stands = standing.contains(&node_id)
            || tree
                .ancestors(node_id)
                .iter()
                .any(|ancestor| standing.contains(&ancestor.id));
        if stands {
            Ok(())
        } else {
            Err(AuthzError::NoStandingAbove {
                user_id: ctx.user_id,
                node_name: node.name.clone(),
            }
            .into())
        }
    }
}

/// Log a rejected mutation and pass the result through.
fn rejected<T>(operation: &str, ctx: ActingContext, result: NidoResult<T>) -> NidoResult<T> {
    if let Err(err) = &result {
        warn!(
            community_id = %ctx.community_id,
            user_id = %ctx.user_id,
            operation,
            error = %err,
            "Mutation rejected"
        );
    }
    result
}
