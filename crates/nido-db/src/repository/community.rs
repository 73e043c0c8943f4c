//! SurrealDB implementation of [`CommunityRepository`].

use chrono::{DateTime, Utc};
use nido_core::error::{NidoError, NidoResult};
use nido_core::models::community::{Community, CreateCommunity, ProvisionedCommunity};
use nido_core::models::permission::Permissions;
use nido_core::repository::{
    AuthNodeRepository, CommunityRepository, OrgUnitRepository, PaginatedResult, Pagination,
    UserRepository,
};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;
use uuid::Uuid;

use super::{
    CountRow, SurrealAuthNodeRepository, SurrealOrgUnitRepository, SurrealUserRepository,
    parse_uuid,
};
use crate::error::{DbError, check_response};

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct CommunityRowWithId {
    record_id: String,
    name: String,
    country: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CommunityRowWithId {
    fn try_into_community(self) -> Result<Community, DbError> {
        Ok(Community {
            id: parse_uuid(&self.record_id, "community")?,
            name: self.name,
            country: self.country,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SurrealDB implementation of the Community repository.
#[derive(Clone)]
pub struct SurrealCommunityRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealCommunityRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> CommunityRepository for SurrealCommunityRepository<C> {
    async fn provision(&self, input: CreateCommunity) -> NidoResult<ProvisionedCommunity> {
        for (field, value) in [
            ("community name", &input.name),
            ("country", &input.country),
            ("root authorization name", &input.root_name),
            ("root org unit name", &input.root_unit_name),
            ("founder personal name", &input.founder.personal_name),
            ("founder family name", &input.founder.family_name),
        ] {
            if value.trim().is_empty() {
                return Err(NidoError::validation(format!("{field} must not be empty")));
            }
        }

        let users = SurrealUserRepository::new(self.db.clone());
        if let Some(email) = &input.founder.email {
            users.ensure_contact_unique("email", email).await?;
        }
        if let Some(phone) = &input.founder.phone {
            users.ensure_contact_unique("phone", phone).await?;
        }

        let community_id = Uuid::new_v4();
        let root_id = Uuid::new_v4();
        let unit_id = Uuid::new_v4();
        let founder_id = Uuid::new_v4();

        // RELATE requires literal record-id syntax; UUIDs are safe to embed.
        let query = format!(
            "BEGIN TRANSACTION; \
             CREATE type::record('community', $community_id) SET \
                 name = $name, country = $country; \
             CREATE type::record('auth_node', $root_id) SET \
                 community_id = $community_id, \
                 parent_id = NONE, \
                 name = $root_name, \
                 permissions = $root_permissions; \
             CREATE type::record('org_unit', $unit_id) SET \
                 community_id = $community_id, \
                 auth_node_id = $root_id, \
                 name = $root_unit_name, \
                 min_size = 1, \
                 max_size = NONE; \
             CREATE type::record('user', $founder_id) SET \
                 community_id = $community_id, \
                 personal_name = $personal_name, \
                 family_name = $family_name, \
                 email = $email, phone = $phone; \
             RELATE user:`{founder_id}` -> member_of -> org_unit:`{unit_id}`; \
             COMMIT TRANSACTION;"
        );

        self.db
            .query(query)
            .bind(("community_id", community_id.to_string()))
            .bind(("root_id", root_id.to_string()))
            .bind(("unit_id", unit_id.to_string()))
            .bind(("founder_id", founder_id.to_string()))
            .bind(("name", input.name))
            .bind(("country", input.country))
            .bind(("root_name", input.root_name))
            .bind(("root_permissions", Permissions::all_flags().bits()))
            .bind(("root_unit_name", input.root_unit_name))
            .bind(("personal_name", input.founder.personal_name))
            .bind(("family_name", input.founder.family_name))
            .bind(("email", input.founder.email))
            .bind(("phone", input.founder.phone))
            .await
            .map_err(DbError::from)
            .and_then(check_response)?;

        info!(%community_id, %root_id, %founder_id, "Community provisioned");

        let community = self.get_by_id(community_id).await?;
        let root = SurrealAuthNodeRepository::new(self.db.clone())
            .get_by_id(community_id, root_id)
            .await?;
        let root_unit = SurrealOrgUnitRepository::new(self.db.clone())
            .get_by_id(community_id, unit_id)
            .await?;
        let founder = users.get_by_id(community_id, founder_id).await?;

        Ok(ProvisionedCommunity {
            community,
            root,
            root_unit,
            founder,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> NidoResult<Community> {
        let mut result = self
            .db
            .query("SELECT meta::id(id) AS record_id, * FROM type::record('community', $id)")
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CommunityRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("community", id))?;

        Ok(row.try_into_community()?)
    }

    async fn list(&self, pagination: Pagination) -> NidoResult<PaginatedResult<Community>> {
        let mut count_result = self
            .db
            .query("SELECT count() AS total FROM community GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM community \
                 ORDER BY name ASC LIMIT $limit START $offset",
            )
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CommunityRowWithId> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(|row| row.try_into_community())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
