use std::sync::Arc;

use sqlx::{PgPool, Row};
use tracing::instrument;

use warden_auth::Role;
use warden_core::UserId;

use super::{DirectoryError, UserAccount, UserDirectory};

const SELECT_COLUMNS: &str = "id, username, email, password_hash, roles, enabled, created_at";

/// Postgres-backed user directory (`users` table).
#[derive(Debug, Clone)]
pub struct PostgresUserDirectory {
    pool: Arc<PgPool>,
}

impl PostgresUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait::async_trait]
impl UserDirectory for PostgresUserDirectory {
    #[instrument(skip(self, account), fields(user_id = %account.id, username = %account.username), err)]
    async fn insert(&self, account: UserAccount) -> Result<(), DirectoryError> {
        let roles: Vec<String> = account.roles.iter().map(|r| r.as_str().to_string()).collect();

        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, roles, enabled, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(account.id.as_uuid())
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&roles)
        .bind(account.enabled)
        .bind(account.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                DirectoryError::UsernameTaken(account.username.clone())
            }
            _ => DirectoryError::Storage(format!("insert user failed: {e}")),
        })?;

        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn find_by_id(&self, id: UserId) -> Result<Option<UserAccount>, DirectoryError> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM users WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| DirectoryError::Storage(format!("find user by id failed: {e}")))?;

        row.map(|row| account_from_row(&row)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_by_username(&self, username: &str) -> Result<Option<UserAccount>, DirectoryError> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM users WHERE username = $1"))
            .bind(username)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| DirectoryError::Storage(format!("find user by username failed: {e}")))?;

        row.map(|row| account_from_row(&row)).transpose()
    }
}

fn account_from_row(row: &sqlx::postgres::PgRow) -> Result<UserAccount, DirectoryError> {
    let read = |e: sqlx::Error| DirectoryError::Storage(format!("failed to read user row: {e}"));

    let id: uuid::Uuid = row.try_get("id").map_err(read)?;
    let roles: Vec<String> = row.try_get("roles").map_err(read)?;

    Ok(UserAccount {
        id: UserId::from_uuid(id),
        username: row.try_get("username").map_err(read)?,
        email: row.try_get("email").map_err(read)?,
        password_hash: row.try_get("password_hash").map_err(read)?,
        roles: roles.into_iter().map(Role::new).collect(),
        enabled: row.try_get("enabled").map_err(read)?,
        created_at: row.try_get("created_at").map_err(read)?,
    })
}
