//! SurrealDB implementation of [`UserRepository`].

use chrono::{DateTime, Utc};
use nido_core::error::{NidoError, NidoResult};
use nido_core::models::user::{CreateUser, User};
use nido_core::repository::{PaginatedResult, Pagination, UserRepository};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{CountRow, parse_uuid};
use crate::error::{DbError, check_response};

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct UserRowWithId {
    record_id: String,
    community_id: String,
    personal_name: String,
    family_name: String,
    email: Option<String>,
    phone: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRowWithId {
    fn try_into_user(self) -> Result<User, DbError> {
        Ok(User {
            id: parse_uuid(&self.record_id, "user")?,
            community_id: parse_uuid(&self.community_id, "community")?,
            personal_name: self.personal_name,
            family_name: self.family_name,
            email: self.email,
            phone: self.phone,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SurrealDB implementation of the User repository.
#[derive(Clone)]
pub struct SurrealUserRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealUserRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    /// Email and phone are unique across all communities when present.
    pub(super) async fn ensure_contact_unique(&self, field: &'static str, value: &str) -> NidoResult<()> {
        let query = format!("SELECT count() AS total FROM user WHERE {field} = $value GROUP ALL");
        let mut result = self
            .db
            .query(query)
            .bind(("value", value.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        if rows.first().map(|r| r.total).unwrap_or(0) > 0 {
            return Err(NidoError::AlreadyExists {
                entity: format!("user with {field} {value}"),
            });
        }
        Ok(())
    }
}

impl<C: Connection> UserRepository for SurrealUserRepository<C> {
    async fn create(&self, input: CreateUser) -> NidoResult<User> {
        if input.personal_name.trim().is_empty() || input.family_name.trim().is_empty() {
            return Err(NidoError::validation("user names must not be empty"));
        }
        if let Some(email) = &input.email {
            self.ensure_contact_unique("email", email).await?;
        }
        if let Some(phone) = &input.phone {
            self.ensure_contact_unique("phone", phone).await?;
        }

        let id = Uuid::new_v4();
        let community_id_str = input.community_id.to_string();

        let mut check = self
            .db
            .query(
                "SELECT count() AS total FROM community \
                 WHERE id = type::record('community', $community_id) GROUP ALL",
            )
            .bind(("community_id", community_id_str.clone()))
            .await
            .map_err(DbError::from)?;
        let community_count: Vec<CountRow> = check.take(0).map_err(DbError::from)?;
        if community_count.first().map(|r| r.total).unwrap_or(0) == 0 {
            return Err(DbError::not_found("community", input.community_id).into());
        }

        self.db
            .query(
                "CREATE type::record('user', $id) SET \
                 community_id = $community_id, \
                 personal_name = $personal_name, \
                 family_name = $family_name, \
                 email = $email, phone = $phone",
            )
            .bind(("id", id.to_string()))
            .bind(("community_id", community_id_str))
            .bind(("personal_name", input.personal_name))
            .bind(("family_name", input.family_name))
            .bind(("email", input.email))
            .bind(("phone", input.phone))
            .await
            .map_err(DbError::from)
            .and_then(check_response)?;

        self.get_by_id(input.community_id, id).await
    }

    async fn get_by_id(&self, community_id: Uuid, id: Uuid) -> NidoResult<User> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * \
                 FROM type::record('user', $id) \
                 WHERE community_id = $community_id",
            )
            .bind(("id", id.to_string()))
            .bind(("community_id", community_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("user", id))?;

        Ok(row.try_into_user()?)
    }

    async fn list(
        &self,
        community_id: Uuid,
        pagination: Pagination,
    ) -> NidoResult<PaginatedResult<User>> {
        let community_id_str = community_id.to_string();

        let mut count_result = self
            .db
            .query(
                "SELECT count() AS total FROM user \
                 WHERE community_id = $community_id GROUP ALL",
            )
            .bind(("community_id", community_id_str.clone()))
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM user \
                 WHERE community_id = $community_id \
                 ORDER BY family_name ASC, personal_name ASC \
                 LIMIT $limit START $offset",
            )
            .bind(("community_id", community_id_str))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserRowWithId> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(|row| row.try_into_user())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
