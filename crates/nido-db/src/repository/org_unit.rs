//! SurrealDB implementation of [`OrgUnitRepository`].
//!
//! Memberships are `member_of` edges from `user` to `org_unit`. Size
//! bounds are checked twice: once against a fresh count to report a
//! typed error, and again inside the write transaction so that two
//! concurrent writers cannot both pass the check.

use chrono::{DateTime, Utc};
use nido_core::error::{NidoError, NidoResult};
use nido_core::models::org_unit::{CreateOrgUnit, OrgUnit, UpdateOrgUnit, validate_size_bounds};
use nido_core::models::user::User;
use nido_core::repository::{OrgUnitRepository, PaginatedResult, Pagination, UserRepository};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::debug;
use uuid::Uuid;

use super::{CountRow, SurrealUserRepository, parse_uuid};
use crate::error::{DbError, check_response};

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct OrgUnitRowWithId {
    record_id: String,
    community_id: String,
    auth_node_id: String,
    name: String,
    min_size: Option<u32>,
    max_size: Option<u32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrgUnitRowWithId {
    fn try_into_org_unit(self) -> Result<OrgUnit, DbError> {
        Ok(OrgUnit {
            id: parse_uuid(&self.record_id, "org_unit")?,
            community_id: parse_uuid(&self.community_id, "community")?,
            auth_node_id: parse_uuid(&self.auth_node_id, "auth_node")?,
            name: self.name,
            min_size: self.min_size,
            max_size: self.max_size,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// DB-side row struct for user members returned from edge queries.
#[derive(Debug, SurrealValue)]
struct MemberRow {
    record_id: String,
}

/// Re-reads the org unit and its live member count inside a write
/// transaction. Expects `$org_unit_id` and `$community_id`; defines
/// `$unit` and `$total`.
const UNIT_SNAPSHOT: &str = "\
LET $unit = (SELECT min_size, max_size FROM type::record('org_unit', $org_unit_id) \
    WHERE community_id = $community_id)[0]; \
IF $unit = NONE { THROW 'nido_guard:missing_org_unit' }; \
LET $total = array::len((SELECT VALUE id FROM member_of \
    WHERE out = type::record('org_unit', $org_unit_id)));";

/// SurrealDB implementation of the org unit repository.
#[derive(Clone)]
pub struct SurrealOrgUnitRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealOrgUnitRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn select(&self, query: &str, binds: Vec<(&'static str, String)>) -> NidoResult<Vec<OrgUnit>> {
        let mut builder = self.db.query(query);
        for bind in binds {
            builder = builder.bind(bind);
        }
        let mut result = builder.await.map_err(DbError::from)?;

        let rows: Vec<OrgUnitRowWithId> = result.take(0).map_err(DbError::from)?;
        let units = rows
            .into_iter()
            .map(|row| row.try_into_org_unit())
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(units)
    }

    async fn is_member(&self, org_unit_id: Uuid, user_id: Uuid) -> NidoResult<bool> {
        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM member_of \
                 WHERE in = type::record('user', $user_id) \
                 AND out = type::record('org_unit', $org_unit_id) GROUP ALL",
            )
            .bind(("user_id", user_id.to_string()))
            .bind(("org_unit_id", org_unit_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0) > 0)
    }
}

impl<C: Connection> OrgUnitRepository for SurrealOrgUnitRepository<C> {
    async fn create(&self, input: CreateOrgUnit) -> NidoResult<OrgUnit> {
        validate_size_bounds(input.min_size, input.max_size)?;
        if input.name.trim().is_empty() {
            return Err(NidoError::validation("org unit name must not be empty"));
        }

        let id = Uuid::new_v4();

        // The bound node is touched so that a concurrent delete of it
        // conflicts with this insert.
        let result = self
            .db
            .query(
                "BEGIN TRANSACTION; \
                 LET $node = (SELECT community_id FROM type::record('auth_node', $auth_node_id))[0]; \
                 IF $node = NONE OR $node.community_id != $community_id \
                     { THROW 'nido_guard:missing_auth_node' }; \
                 UPDATE type::record('auth_node', $auth_node_id) SET updated_at = time::now(); \
                 CREATE type::record('org_unit', $id) SET \
                     community_id = $community_id, \
                     auth_node_id = $auth_node_id, \
                     name = $name, \
                     min_size = $min_size, \
                     max_size = $max_size; \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_string()))
            .bind(("community_id", input.community_id.to_string()))
            .bind(("auth_node_id", input.auth_node_id.to_string()))
            .bind(("name", input.name))
            .bind(("min_size", input.min_size))
            .bind(("max_size", input.max_size))
            .await
            .map_err(DbError::from)
            .and_then(check_response);

        if let Err(err) = result {
            return Err(match err.guard() {
                Some("missing_auth_node") => NidoError::not_found("auth_node", input.auth_node_id),
                _ => err.into(),
            });
        }

        self.get_by_id(input.community_id, id).await
    }

    async fn get_by_id(&self, community_id: Uuid, id: Uuid) -> NidoResult<OrgUnit> {
        self.select(
            "SELECT meta::id(id) AS record_id, * \
             FROM type::record('org_unit', $id) \
             WHERE community_id = $community_id",
            vec![
                ("id", id.to_string()),
                ("community_id", community_id.to_string()),
            ],
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| NidoError::not_found("org_unit", id))
    }

    async fn update(&self, community_id: Uuid, id: Uuid, input: UpdateOrgUnit) -> NidoResult<OrgUnit> {
        let current = self.get_by_id(community_id, id).await?;
        let (min_size, max_size) = input.resulting_bounds(&current);
        validate_size_bounds(min_size, max_size)?;

        let members = self.count_members(community_id, id).await?;
        if let Some(max) = max_size {
            if members > u64::from(max) {
                return Err(NidoError::validation(format!(
                    "max_size {max} is below the current {members} members"
                )));
            }
        }
        if let Some(min) = min_size {
            if members < u64::from(min) {
                return Err(NidoError::validation(format!(
                    "min_size {min} is above the current {members} members"
                )));
            }
        }

        let mut sets = Vec::new();
        if let Some(name) = &input.name {
            if name.trim().is_empty() {
                return Err(NidoError::validation("org unit name must not be empty"));
            }
            sets.push("name = $name");
        }
        if input.min_size.is_some() {
            sets.push("min_size = $min_size");
        }
        if input.max_size.is_some() {
            sets.push("max_size = $max_size");
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "BEGIN TRANSACTION; \
             {UNIT_SNAPSHOT} \
             IF $max_size != NONE AND $total > $max_size \
                 {{ THROW 'nido_guard:bounds_below_count' }}; \
             IF $min_size != NONE AND $total < $min_size \
                 {{ THROW 'nido_guard:bounds_above_count' }}; \
             UPDATE type::record('org_unit', $org_unit_id) SET {} \
                 WHERE community_id = $community_id; \
             COMMIT TRANSACTION;",
            sets.join(", ")
        );

        let mut builder = self
            .db
            .query(query)
            .bind(("org_unit_id", id.to_string()))
            .bind(("community_id", community_id.to_string()))
            .bind(("min_size", min_size))
            .bind(("max_size", max_size));
        if let Some(name) = input.name {
            builder = builder.bind(("name", name));
        }

        builder
            .await
            .map_err(DbError::from)
            .and_then(check_response)?;

        self.get_by_id(community_id, id).await
    }

    async fn delete(&self, community_id: Uuid, id: Uuid) -> NidoResult<()> {
        let id_str = id.to_string();

        // Delete associated membership edges first, then the org unit.
        let query = format!(
            "BEGIN TRANSACTION; \
             DELETE member_of WHERE out = org_unit:`{id_str}`; \
             DELETE type::record('org_unit', $id) WHERE community_id = $community_id; \
             COMMIT TRANSACTION;"
        );

        self.db
            .query(query)
            .bind(("id", id_str))
            .bind(("community_id", community_id.to_string()))
            .await
            .map_err(DbError::from)
            .and_then(check_response)?;

        Ok(())
    }

    async fn list(&self, community_id: Uuid) -> NidoResult<Vec<OrgUnit>> {
        self.select(
            "SELECT meta::id(id) AS record_id, * FROM org_unit \
             WHERE community_id = $community_id \
             ORDER BY name ASC",
            vec![("community_id", community_id.to_string())],
        )
        .await
    }

    async fn list_by_auth_node(&self, community_id: Uuid, auth_node_id: Uuid) -> NidoResult<Vec<OrgUnit>> {
        self.select(
            "SELECT meta::id(id) AS record_id, * FROM org_unit \
             WHERE community_id = $community_id AND auth_node_id = $auth_node_id \
             ORDER BY name ASC",
            vec![
                ("community_id", community_id.to_string()),
                ("auth_node_id", auth_node_id.to_string()),
            ],
        )
        .await
    }

    async fn add_member(&self, community_id: Uuid, org_unit_id: Uuid, user_id: Uuid) -> NidoResult<()> {
        let unit = self.get_by_id(community_id, org_unit_id).await?;
        SurrealUserRepository::new(self.db.clone())
            .get_by_id(community_id, user_id)
            .await?;
        if self.is_member(org_unit_id, user_id).await? {
            return Err(NidoError::AlreadyExists {
                entity: format!("membership of user {user_id} in org unit {org_unit_id}"),
            });
        }

        let current = self.count_members(community_id, org_unit_id).await?;
        unit.check_can_add(current)?;
        debug!(%org_unit_id, %user_id, current, "Adding org unit member");

        // RELATE requires literal record-id syntax; UUIDs are safe to embed.
        let query = format!(
            "BEGIN TRANSACTION; \
             {UNIT_SNAPSHOT} \
             IF $unit.max_size != NONE AND $total >= $unit.max_size \
                 {{ THROW 'nido_guard:capacity_exceeded' }}; \
             RELATE user:`{user_id}` -> member_of -> org_unit:`{org_unit_id}`; \
             UPDATE type::record('org_unit', $org_unit_id) SET updated_at = time::now(); \
             COMMIT TRANSACTION;"
        );

        let result = self
            .db
            .query(query)
            .bind(("org_unit_id", org_unit_id.to_string()))
            .bind(("community_id", community_id.to_string()))
            .await
            .map_err(DbError::from)
            .and_then(check_response);

        match result {
            Ok(_) => Ok(()),
            Err(err) => Err(match err.guard() {
                Some("capacity_exceeded") => NidoError::CapacityExceeded {
                    org_unit_id,
                    max_size: unit.max_size.unwrap_or_default(),
                },
                Some("missing_org_unit") => NidoError::not_found("org_unit", org_unit_id),
                _ => err.into(),
            }),
        }
    }

    async fn remove_member(&self, community_id: Uuid, org_unit_id: Uuid, user_id: Uuid) -> NidoResult<()> {
        let unit = self.get_by_id(community_id, org_unit_id).await?;
        if !self.is_member(org_unit_id, user_id).await? {
            return Err(NidoError::NotFound {
                entity: "membership".into(),
                id: format!("{user_id} in {org_unit_id}"),
            });
        }

        let current = self.count_members(community_id, org_unit_id).await?;
        unit.check_can_remove(current)?;
        debug!(%org_unit_id, %user_id, current, "Removing org unit member");

        let query = format!(
            "BEGIN TRANSACTION; \
             {UNIT_SNAPSHOT} \
             IF $unit.min_size != NONE AND $total <= $unit.min_size \
                 {{ THROW 'nido_guard:below_minimum' }}; \
             IF array::len((SELECT VALUE id FROM member_of \
                 WHERE in = type::record('user', $user_id) \
                 AND out = type::record('org_unit', $org_unit_id))) = 0 \
                 {{ THROW 'nido_guard:not_member' }}; \
             DELETE member_of WHERE in = type::record('user', $user_id) \
                 AND out = type::record('org_unit', $org_unit_id); \
             UPDATE type::record('org_unit', $org_unit_id) SET updated_at = time::now(); \
             COMMIT TRANSACTION;"
        );

        let result = self
            .db
            .query(query)
            .bind(("org_unit_id", org_unit_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .bind(("community_id", community_id.to_string()))
            .await
            .map_err(DbError::from)
            .and_then(check_response);

        match result {
            Ok(_) => Ok(()),
            Err(err) => Err(match err.guard() {
                Some("below_minimum") => NidoError::BelowMinimum {
                    org_unit_id,
                    min_size: unit.min_size.unwrap_or_default(),
                },
                Some("not_member") => NidoError::NotFound {
                    entity: "membership".into(),
                    id: format!("{user_id} in {org_unit_id}"),
                },
                Some("missing_org_unit") => NidoError::not_found("org_unit", org_unit_id),
                _ => err.into(),
            }),
        }
    }

    async fn count_members(&self, community_id: Uuid, org_unit_id: Uuid) -> NidoResult<u64> {
        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM member_of \
                 WHERE out = type::record('org_unit', $org_unit_id) \
                 AND out.community_id = $community_id GROUP ALL",
            )
            .bind(("org_unit_id", org_unit_id.to_string()))
            .bind(("community_id", community_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }

    async fn get_members(
        &self,
        community_id: Uuid,
        org_unit_id: Uuid,
        pagination: Pagination,
    ) -> NidoResult<PaginatedResult<User>> {
        let total = self.count_members(community_id, org_unit_id).await?;

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id FROM user \
                 WHERE community_id = $community_id \
                 AND id IN (\
                     SELECT VALUE in FROM member_of \
                     WHERE out = type::record('org_unit', $org_unit_id)\
                 ) \
                 ORDER BY family_name ASC, personal_name ASC \
                 LIMIT $limit START $offset",
            )
            .bind(("community_id", community_id.to_string()))
            .bind(("org_unit_id", org_unit_id.to_string()))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<MemberRow> = result.take(0).map_err(DbError::from)?;
        let users = SurrealUserRepository::new(self.db.clone());
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let user_id = parse_uuid(&row.record_id, "user")?;
            items.push(users.get_by_id(community_id, user_id).await?);
        }

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn get_user_org_units(&self, community_id: Uuid, user_id: Uuid) -> NidoResult<Vec<OrgUnit>> {
        self.select(
            "SELECT meta::id(id) AS record_id, * FROM org_unit \
             WHERE community_id = $community_id \
             AND id IN (\
                 SELECT VALUE out FROM member_of \
                 WHERE in = type::record('user', $user_id)\
             ) \
             ORDER BY name ASC",
            vec![
                ("community_id", community_id.to_string()),
                ("user_id", user_id.to_string()),
            ],
        )
        .await
    }
}
