//! Postgres-backed refresh token ledger.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError |
//! |------------|----------------------|-------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |
//!
//! ## Atomic rotation
//!
//! `rotate` runs in one transaction:
//! 1. `UPDATE ... SET revoked = TRUE, replaced_by = $child WHERE jti = $old AND revoked = FALSE`
//! 2. require exactly one affected row, otherwise roll back
//! 3. insert the child record
//! 4. commit
//!
//! Under concurrent rotation the second `UPDATE` waits on the row lock and
//! then matches zero rows, so at most one rotation per `jti` commits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use warden_core::{RecordId, TokenId, UserId};

use super::r#trait::{LedgerError, RefreshTokenLedger, RefreshTokenRecord};

const SELECT_COLUMNS: &str =
    "record_id, user_id, jti, expires_at, revoked, created_at, replaced_by";

#[derive(Debug, Clone)]
pub struct PostgresRefreshTokenLedger {
    pool: Arc<PgPool>,
}

impl PostgresRefreshTokenLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self, record), fields(jti = %record.jti, user_id = %record.user_id), err)]
    pub async fn insert_record(&self, record: &RefreshTokenRecord) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (
                record_id,
                user_id,
                jti,
                expires_at,
                revoked,
                created_at,
                replaced_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.record_id.as_uuid())
        .bind(record.user_id.as_uuid())
        .bind(record.jti.as_str())
        .bind(record.expires_at)
        .bind(record.revoked)
        .bind(record.created_at)
        .bind(record.replaced_by.as_ref().map(TokenId::as_str))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", record.jti.as_str(), e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(jti = %jti), err)]
    pub async fn find_record(&self, jti: &TokenId) -> Result<Option<RefreshTokenRecord>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM refresh_tokens WHERE jti = $1"
        ))
        .bind(jti.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_jti", jti.as_str(), e))?;

        row.map(|row| record_from_row(&row)).transpose()
    }

    #[instrument(skip(self, child), fields(old_jti = %old_jti, new_jti = %child.jti), err)]
    pub async fn rotate_record(
        &self,
        old_jti: &TokenId,
        child: &RefreshTokenRecord,
    ) -> Result<(), LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", old_jti.as_str(), e))?;

        let updated = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, replaced_by = $2
            WHERE jti = $1 AND revoked = FALSE
            "#,
        )
        .bind(old_jti.as_str())
        .bind(child.jti.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("revoke_for_rotation", old_jti.as_str(), e))?;

        if updated.rows_affected() != 1 {
            let exists = sqlx::query("SELECT 1 FROM refresh_tokens WHERE jti = $1")
                .bind(old_jti.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("rotation_lookup", old_jti.as_str(), e))?
                .is_some();
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", old_jti.as_str(), e))?;
            return Err(if exists {
                LedgerError::AlreadyRevoked(old_jti.to_string())
            } else {
                LedgerError::NotFound(old_jti.to_string())
            });
        }

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (
                record_id,
                user_id,
                jti,
                expires_at,
                revoked,
                created_at,
                replaced_by
            )
            VALUES ($1, $2, $3, $4, FALSE, $5, NULL)
            "#,
        )
        .bind(child.record_id.as_uuid())
        .bind(child.user_id.as_uuid())
        .bind(child.jti.as_str())
        .bind(child.expires_at)
        .bind(child.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_child", child.jti.as_str(), e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", old_jti.as_str(), e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn revoke_user_records(&self, user_id: UserId) -> Result<u64, LedgerError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1 AND revoked = FALSE",
        )
        .bind(user_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("revoke_all_for_user", &user_id.to_string(), e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn load_active(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, LedgerError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM refresh_tokens
            WHERE user_id = $1 AND revoked = FALSE AND expires_at > $2
            ORDER BY created_at ASC
            "#
        ))
        .bind(user_id.as_uuid())
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("active_for_user", &user_id.to_string(), e))?;

        rows.iter().map(record_from_row).collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn load_history(&self, user_id: UserId) -> Result<Vec<RefreshTokenRecord>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM refresh_tokens WHERE user_id = $1 ORDER BY created_at ASC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("history_for_user", &user_id.to_string(), e))?;

        rows.iter().map(record_from_row).collect()
    }
}

#[async_trait::async_trait]
impl RefreshTokenLedger for PostgresRefreshTokenLedger {
    async fn insert(&self, record: RefreshTokenRecord) -> Result<(), LedgerError> {
        self.insert_record(&record).await
    }

    async fn find_by_jti(&self, jti: &TokenId) -> Result<Option<RefreshTokenRecord>, LedgerError> {
        self.find_record(jti).await
    }

    async fn rotate(&self, old_jti: &TokenId, child: RefreshTokenRecord) -> Result<(), LedgerError> {
        self.rotate_record(old_jti, &child).await
    }

    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64, LedgerError> {
        self.revoke_user_records(user_id).await
    }

    async fn active_for_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, LedgerError> {
        self.load_active(user_id, now).await
    }

    async fn history_for_user(&self, user_id: UserId) -> Result<Vec<RefreshTokenRecord>, LedgerError> {
        self.load_history(user_id).await
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<RefreshTokenRecord, LedgerError> {
    let read = |e: sqlx::Error| LedgerError::Storage(format!("failed to read ledger row: {e}"));

    let record_id: uuid::Uuid = row.try_get("record_id").map_err(read)?;
    let user_id: uuid::Uuid = row.try_get("user_id").map_err(read)?;
    let jti: String = row.try_get("jti").map_err(read)?;
    let replaced_by: Option<String> = row.try_get("replaced_by").map_err(read)?;

    Ok(RefreshTokenRecord {
        record_id: RecordId::from_uuid(record_id),
        user_id: UserId::from_uuid(user_id),
        jti: TokenId::new(jti),
        expires_at: row.try_get("expires_at").map_err(read)?,
        revoked: row.try_get("revoked").map_err(read)?,
        created_at: row.try_get("created_at").map_err(read)?,
        replaced_by: replaced_by.map(TokenId::new),
    })
}

fn map_sqlx_error(operation: &str, key: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                LedgerError::Duplicate(key.to_string())
            } else {
                LedgerError::Storage(format!(
                    "database error in {operation}: {}",
                    db_err.message()
                ))
            }
        }
        sqlx::Error::PoolClosed => {
            LedgerError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => LedgerError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}
