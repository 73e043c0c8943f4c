//! SurrealDB implementation of [`AuthNodeRepository`].
//!
//! Every write runs in one transaction that first re-reads the values
//! the caller validated against and `THROW`s if they moved, then touches
//! the rows the decision depended on so that a concurrent writer of the
//! same rows conflicts instead of interleaving.

use chrono::{DateTime, Utc};
use nido_core::error::{NidoError, NidoResult};
use nido_core::models::auth_node::{AuthNode, CreateAuthNode};
use nido_core::models::permission::Permissions;
use nido_core::repository::AuthNodeRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{CountRow, parse_optional_uuid, parse_uuid};
use crate::error::{DbError, check_response};

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct AuthNodeRowWithId {
    record_id: String,
    community_id: String,
    parent_id: Option<String>,
    name: String,
    permissions: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AuthNodeRowWithId {
    fn try_into_node(self) -> Result<AuthNode, DbError> {
        Ok(AuthNode {
            id: parse_uuid(&self.record_id, "auth_node")?,
            community_id: parse_uuid(&self.community_id, "community")?,
            parent_id: parse_optional_uuid(self.parent_id, "parent")?,
            name: self.name,
            permissions: Permissions::from_bits_truncate(self.permissions),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Re-reads the parent inside a transaction and aborts unless it still
/// belongs to the community with the validated permissions. Expects
/// `$parent_id`, `$community_id` and `$parent_permissions`.
const PARENT_GUARD: &str = "\
LET $parent = (SELECT community_id, permissions \
    FROM type::record('auth_node', $parent_id))[0]; \
IF $parent = NONE OR $parent.community_id != $community_id \
    { THROW 'nido_guard:missing_parent' }; \
IF $parent.permissions != $parent_permissions \
    { THROW 'nido_guard:stale_parent' }; \
UPDATE type::record('auth_node', $parent_id) SET updated_at = time::now();";

/// SurrealDB implementation of the authorization node repository.
#[derive(Clone)]
pub struct SurrealAuthNodeRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealAuthNodeRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn select(&self, query: &str, community_id: Uuid, id: Option<Uuid>) -> NidoResult<Vec<AuthNode>> {
        let mut builder = self
            .db
            .query(query)
            .bind(("community_id", community_id.to_string()));
        if let Some(id) = id {
            builder = builder.bind(("id", id.to_string()));
        }
        let mut result = builder.await.map_err(DbError::from)?;

        let rows: Vec<AuthNodeRowWithId> = result.take(0).map_err(DbError::from)?;
        let nodes = rows
            .into_iter()
            .map(|row| row.try_into_node())
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(nodes)
    }
}

impl<C: Connection> AuthNodeRepository for SurrealAuthNodeRepository<C> {
    async fn get_by_id(&self, community_id: Uuid, id: Uuid) -> NidoResult<AuthNode> {
        self.select(
            "SELECT meta::id(id) AS record_id, * \
             FROM type::record('auth_node', $id) \
             WHERE community_id = $community_id",
            community_id,
            Some(id),
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| NidoError::not_found("auth_node", id))
    }

    async fn get_root(&self, community_id: Uuid) -> NidoResult<AuthNode> {
        self.select(
            "SELECT meta::id(id) AS record_id, * FROM auth_node \
             WHERE community_id = $community_id AND parent_id = NONE",
            community_id,
            None,
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| NidoError::not_found("root auth_node", community_id))
    }

    async fn list(&self, community_id: Uuid) -> NidoResult<Vec<AuthNode>> {
        self.select(
            "SELECT meta::id(id) AS record_id, * FROM auth_node \
             WHERE community_id = $community_id \
             ORDER BY created_at ASC",
            community_id,
            None,
        )
        .await
    }

    async fn get_children(&self, community_id: Uuid, parent_id: Uuid) -> NidoResult<Vec<AuthNode>> {
        self.select(
            "SELECT meta::id(id) AS record_id, * FROM auth_node \
             WHERE community_id = $community_id AND parent_id = $id \
             ORDER BY name ASC",
            community_id,
            Some(parent_id),
        )
        .await
    }

    async fn count(&self, community_id: Uuid) -> NidoResult<u64> {
        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM auth_node \
                 WHERE community_id = $community_id GROUP ALL",
            )
            .bind(("community_id", community_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }

    async fn create_child(
        &self,
        input: CreateAuthNode,
        parent_permissions: Permissions,
    ) -> NidoResult<AuthNode> {
        let id = Uuid::new_v4();
        let query = format!(
            "BEGIN TRANSACTION; \
             {PARENT_GUARD} \
             CREATE type::record('auth_node', $id) SET \
                 community_id = $community_id, \
                 parent_id = $parent_id, \
                 name = $name, \
                 permissions = $permissions; \
             COMMIT TRANSACTION;"
        );

        self.db
            .query(query)
            .bind(("id", id.to_string()))
            .bind(("community_id", input.community_id.to_string()))
            .bind(("parent_id", input.parent_id.to_string()))
            .bind(("parent_permissions", parent_permissions.bits()))
            .bind(("name", input.name))
            .bind(("permissions", input.permissions.bits()))
            .await
            .map_err(DbError::from)
            .and_then(check_response)?;

        self.get_by_id(input.community_id, id).await
    }

    async fn set_permissions(
        &self,
        community_id: Uuid,
        changes: Vec<(Uuid, Permissions)>,
        guard: (Uuid, Permissions),
        subtree: Vec<(Uuid, Permissions)>,
    ) -> NidoResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        // Ids are UUIDs and bits are integers, so both are safe to embed.
        let mut statements = String::new();
        for (id, seen) in &subtree {
            statements.push_str(&format!(
                "IF (SELECT VALUE permissions FROM auth_node:`{id}` \
                     WHERE community_id = $community_id)[0] != {bits} \
                     {{ THROW 'nido_guard:stale_subtree' }}; ",
                bits = seen.bits()
            ));
        }
        for (id, _) in &subtree {
            match changes.iter().find(|(changed, _)| changed == id) {
                Some((_, perms)) => statements.push_str(&format!(
                    "UPDATE auth_node:`{id}` SET permissions = {bits}, \
                     updated_at = time::now() \
                     WHERE community_id = $community_id; ",
                    bits = perms.bits()
                )),
                None => statements.push_str(&format!(
                    "UPDATE auth_node:`{id}` SET updated_at = time::now() \
                     WHERE community_id = $community_id; "
                )),
            }
        }
        for (id, perms) in changes
            .iter()
            .filter(|(id, _)| !subtree.iter().any(|(seen, _)| seen == id))
        {
            statements.push_str(&format!(
                "UPDATE auth_node:`{id}` SET permissions = {bits}, \
                 updated_at = time::now() \
                 WHERE community_id = $community_id; ",
                bits = perms.bits()
            ));
        }

        let subtree_ids: Vec<String> = subtree.iter().map(|(id, _)| id.to_string()).collect();
        let descendant_ids: Vec<String> = subtree_ids.iter().skip(1).cloned().collect();
        let query = format!(
            "BEGIN TRANSACTION; \
             {PARENT_GUARD} \
             LET $kids = (SELECT VALUE meta::id(id) FROM auth_node \
                 WHERE community_id = $community_id AND parent_id IN $subtree_ids); \
             IF array::len($kids) != array::len($descendant_ids) \
                 OR array::len(array::complement($kids, $descendant_ids)) > 0 \
                 {{ THROW 'nido_guard:stale_subtree' }}; \
             {statements}\
             COMMIT TRANSACTION;"
        );

        self.db
            .query(query)
            .bind(("community_id", community_id.to_string()))
            .bind(("parent_id", guard.0.to_string()))
            .bind(("parent_permissions", guard.1.bits()))
            .bind(("subtree_ids", subtree_ids))
            .bind(("descendant_ids", descendant_ids))
            .await
            .map_err(DbError::from)
            .and_then(check_response)?;

        Ok(())
    }

    async fn rename(&self, community_id: Uuid, id: Uuid, name: String) -> NidoResult<AuthNode> {
        self.db
            .query(
                "UPDATE type::record('auth_node', $id) SET \
                 name = $name, updated_at = time::now() \
                 WHERE community_id = $community_id",
            )
            .bind(("id", id.to_string()))
            .bind(("community_id", community_id.to_string()))
            .bind(("name", name))
            .await
            .map_err(DbError::from)
            .and_then(check_response)?;

        self.get_by_id(community_id, id).await
    }

    async fn reparent(
        &self,
        community_id: Uuid,
        id: Uuid,
        new_parent_id: Uuid,
        parent_permissions: Permissions,
    ) -> NidoResult<AuthNode> {
        let query = format!(
            "BEGIN TRANSACTION; \
             {PARENT_GUARD} \
             LET $node = (SELECT parent_id FROM type::record('auth_node', $id) \
                 WHERE community_id = $community_id)[0]; \
             IF $node = NONE {{ THROW 'nido_guard:missing_node' }}; \
             IF $node.parent_id = NONE {{ THROW 'nido_guard:root' }}; \
             UPDATE type::record('auth_node', $id) SET \
                 parent_id = $parent_id, updated_at = time::now(); \
             COMMIT TRANSACTION;"
        );

        let result = self
            .db
            .query(query)
            .bind(("id", id.to_string()))
            .bind(("community_id", community_id.to_string()))
            .bind(("parent_id", new_parent_id.to_string()))
            .bind(("parent_permissions", parent_permissions.bits()))
            .await
            .map_err(DbError::from)
            .and_then(check_response);

        if let Err(err) = result {
            return Err(match err.guard() {
                Some("root") => NidoError::RootMutationForbidden {
                    node_id: id,
                    action: "re-parented".into(),
                },
                Some("missing_node") => NidoError::not_found("auth_node", id),
                _ => err.into(),
            });
        }

        self.get_by_id(community_id, id).await
    }

    async fn delete(&self, community_id: Uuid, id: Uuid) -> NidoResult<()> {
        let result = self
            .db
            .query(
                "BEGIN TRANSACTION; \
                 LET $node = (SELECT parent_id FROM type::record('auth_node', $id) \
                     WHERE community_id = $community_id)[0]; \
                 IF $node = NONE { THROW 'nido_guard:missing_node' }; \
                 IF $node.parent_id = NONE { THROW 'nido_guard:root' }; \
                 IF array::len((SELECT VALUE id FROM auth_node \
                     WHERE community_id = $community_id AND parent_id = $id)) > 0 \
                     { THROW 'nido_guard:has_children' }; \
                 IF array::len((SELECT VALUE id FROM org_unit \
                     WHERE community_id = $community_id AND auth_node_id = $id)) > 0 \
                     { THROW 'nido_guard:referenced' }; \
                 DELETE type::record('auth_node', $id); \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_string()))
            .bind(("community_id", community_id.to_string()))
            .await
            .map_err(DbError::from)
            .and_then(check_response);

        match result {
            Ok(_) => Ok(()),
            Err(err) => Err(match err.guard() {
                Some("missing_node") => NidoError::not_found("auth_node", id),
                Some("root") => NidoError::RootMutationForbidden {
                    node_id: id,
                    action: "deleted".into(),
                },
                Some("has_children") => NidoError::ReferentialConflict {
                    entity: "auth_node".into(),
                    id: id.to_string(),
                    referenced_by: "child authorizations".into(),
                },
                Some("referenced") => NidoError::ReferentialConflict {
                    entity: "auth_node".into(),
                    id: id.to_string(),
                    referenced_by: "org units".into(),
                },
                _ => err.into(),
            }),
        }
    }
}
