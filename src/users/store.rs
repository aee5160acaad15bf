use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::error::{UserError, UserResult};

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,                              // unique user ID, never reused
    pub name: String,                          // free-form display name
    pub email: String,                         // unique among active users
    pub created_at: OffsetDateTime,            // fixed at creation
    pub updated_at: OffsetDateTime,            // refreshed on every mutation
    pub deleted_at: Option<OffsetDateTime>,    // set once by soft delete
}

/// Listing filter; `search` matches emails case-insensitively, as a plain
/// substring.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub search: Option<String>,
}

/// Persistence contract the directory is constructed with. Absence is
/// `None`, never an error; soft-deleted rows are invisible to every
/// method here.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> UserResult<Option<User>>;

    async fn find_by_id(&self, id: Uuid) -> UserResult<Option<User>>;

    async fn insert(&self, name: &str, email: &str) -> UserResult<User>;

    async fn update(&self, id: Uuid, name: &str, email: &str) -> UserResult<User>;

    async fn soft_delete(&self, id: Uuid) -> UserResult<User>;

    /// One page of matching users plus the total matching count, both
    /// computed from the same snapshot.
    async fn list_page(
        &self,
        filter: &UserFilter,
        skip: i64,
        limit: i64,
    ) -> UserResult<(Vec<User>, i64)>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// SQLSTATE 23505 here means the partial unique index on active emails
/// rejected a concurrent duplicate that slipped past the application check.
fn map_unique_violation(err: sqlx::Error) -> UserError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            UserError::EmailTaken
        }
        _ => UserError::Store(err),
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> UserResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, created_at, updated_at, deleted_at
            FROM users
            WHERE lower(email) = lower($1) AND deleted_at IS NULL
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> UserResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, created_at, updated_at, deleted_at
            FROM users
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert(&self, name: &str, email: &str) -> UserResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email)
            VALUES ($1, $2)
            RETURNING id, name, email, created_at, updated_at, deleted_at
            "#,
        )
        .bind(name)
        .bind(email)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique_violation)?;
        Ok(user)
    }

    async fn update(&self, id: Uuid, name: &str, email: &str) -> UserResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET name = $2, email = $3, updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING id, name, email, created_at, updated_at, deleted_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .map_err(map_unique_violation)?;
        user.ok_or(UserError::NotFound)
    }

    async fn soft_delete(&self, id: Uuid) -> UserResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET deleted_at = now(), updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING id, name, email, created_at, updated_at, deleted_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        user.ok_or(UserError::NotFound)
    }

    async fn list_page(
        &self,
        filter: &UserFilter,
        skip: i64,
        limit: i64,
    ) -> UserResult<(Vec<User>, i64)> {
        // Page and count must see the same snapshot; the default READ
        // COMMITTED level re-snapshots per statement.
        let mut tx = self.db.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        // strpos instead of LIKE: the needle carries no wildcard semantics
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, created_at, updated_at, deleted_at
            FROM users
            WHERE deleted_at IS NULL
              AND ($1::text IS NULL OR strpos(lower(email), lower($1)) > 0)
            ORDER BY created_at ASC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(filter.search.as_deref())
        .bind(limit)
        .bind(skip)
        .fetch_all(&mut *tx)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM users
            WHERE deleted_at IS NULL
              AND ($1::text IS NULL OR strpos(lower(email), lower($1)) > 0)
            "#,
        )
        .bind(filter.search.as_deref())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((users, total))
    }
}
