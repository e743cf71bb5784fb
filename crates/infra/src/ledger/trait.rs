use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use warden_core::{RecordId, TokenId, UserId};

/// A persisted refresh token.
///
/// Records are never deleted. `revoked` only ever moves from `false` to
/// `true`; `replaced_by` is set at most once, by rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub record_id: RecordId,
    /// Owning principal.
    pub user_id: UserId,
    /// Unique across every record ever written.
    pub jti: TokenId,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    /// `jti` of the record that superseded this one through rotation.
    pub replaced_by: Option<TokenId>,
}

impl RefreshTokenRecord {
    /// A fresh, unrevoked record.
    pub fn active(
        user_id: UserId,
        jti: TokenId,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id: RecordId::new(),
            user_id,
            jti,
            expires_at,
            revoked: false,
            created_at,
            replaced_by: None,
        }
    }

    /// Unrevoked and not yet expired. Expiry is inclusive of `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

/// Ledger operation error.
///
/// These are storage-level outcomes; the rotation protocol turns them into
/// token-level errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A record with this `jti` already exists.
    #[error("duplicate token id: {0}")]
    Duplicate(String),

    #[error("no record for token id: {0}")]
    NotFound(String),

    /// The conditional revoke found the record already revoked.
    #[error("record already revoked: {0}")]
    AlreadyRevoked(String),

    #[error("ledger storage error: {0}")]
    Storage(String),
}

/// Append-mostly store of refresh token records.
///
/// Implementations must make [`RefreshTokenLedger::rotate`] atomic: of any
/// number of concurrent rotations of one `jti`, at most one succeeds.
#[async_trait::async_trait]
pub trait RefreshTokenLedger: Send + Sync {
    /// Persist a new record. Fails with `Duplicate` if the `jti` exists.
    async fn insert(&self, record: RefreshTokenRecord) -> Result<(), LedgerError>;

    async fn find_by_jti(&self, jti: &TokenId) -> Result<Option<RefreshTokenRecord>, LedgerError>;

    /// Revoke `old_jti` (only if still unrevoked), point it at the child and
    /// insert the child, all or nothing.
    async fn rotate(&self, old_jti: &TokenId, child: RefreshTokenRecord) -> Result<(), LedgerError>;

    /// Revoke every unrevoked record of the user, leaving `replaced_by` empty.
    /// Returns how many records changed.
    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64, LedgerError>;

    /// Records that are unrevoked and unexpired at `now`.
    async fn active_for_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, LedgerError>;

    /// Every record of the user, oldest first.
    async fn history_for_user(&self, user_id: UserId) -> Result<Vec<RefreshTokenRecord>, LedgerError>;
}

#[async_trait::async_trait]
impl<L> RefreshTokenLedger for Arc<L>
where
    L: RefreshTokenLedger + ?Sized,
{
    async fn insert(&self, record: RefreshTokenRecord) -> Result<(), LedgerError> {
        (**self).insert(record).await
    }

    async fn find_by_jti(&self, jti: &TokenId) -> Result<Option<RefreshTokenRecord>, LedgerError> {
        (**self).find_by_jti(jti).await
    }

    async fn rotate(&self, old_jti: &TokenId, child: RefreshTokenRecord) -> Result<(), LedgerError> {
        (**self).rotate(old_jti, child).await
    }

    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64, LedgerError> {
        (**self).revoke_all_for_user(user_id).await
    }

    async fn active_for_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, LedgerError> {
        (**self).active_for_user(user_id, now).await
    }

    async fn history_for_user(&self, user_id: UserId) -> Result<Vec<RefreshTokenRecord>, LedgerError> {
        (**self).history_for_user(user_id).await
    }
}
