use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use warden_core::{TokenId, UserId};

use super::r#trait::{LedgerError, RefreshTokenLedger, RefreshTokenRecord};

/// In-memory refresh token ledger.
///
/// Intended for tests/dev. The write lock is the serialisation point that
/// makes `rotate` atomic.
#[derive(Debug, Default)]
pub struct InMemoryRefreshTokenLedger {
    records: RwLock<HashMap<TokenId, RefreshTokenRecord>>,
}

impl InMemoryRefreshTokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> LedgerError {
        LedgerError::Storage("lock poisoned".to_string())
    }
}

#[async_trait::async_trait]
impl RefreshTokenLedger for InMemoryRefreshTokenLedger {
    async fn insert(&self, record: RefreshTokenRecord) -> Result<(), LedgerError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        if records.contains_key(&record.jti) {
            return Err(LedgerError::Duplicate(record.jti.to_string()));
        }
        records.insert(record.jti.clone(), record);
        Ok(())
    }

    async fn find_by_jti(&self, jti: &TokenId) -> Result<Option<RefreshTokenRecord>, LedgerError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.get(jti).cloned())
    }

    async fn rotate(&self, old_jti: &TokenId, child: RefreshTokenRecord) -> Result<(), LedgerError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;

        // Check everything before mutating anything.
        if records.contains_key(&child.jti) {
            return Err(LedgerError::Duplicate(child.jti.to_string()));
        }
        let old = records
            .get_mut(old_jti)
            .ok_or_else(|| LedgerError::NotFound(old_jti.to_string()))?;
        if old.revoked {
            return Err(LedgerError::AlreadyRevoked(old_jti.to_string()));
        }

        old.revoked = true;
        old.replaced_by = Some(child.jti.clone());
        records.insert(child.jti.clone(), child);
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64, LedgerError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        let mut revoked = 0;
        for record in records.values_mut() {
            if record.user_id == user_id && !record.revoked {
                record.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn active_for_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, LedgerError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        let mut active: Vec<_> = records
            .values()
            .filter(|r| r.user_id == user_id && r.is_active_at(now))
            .cloned()
            .collect();
        active.sort_by_key(|r| r.created_at);
        Ok(active)
    }

    async fn history_for_user(&self, user_id: UserId) -> Result<Vec<RefreshTokenRecord>, LedgerError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        let mut history: Vec<_> = records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        history.sort_by_key(|r| r.created_at);
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn record(user_id: UserId, now: DateTime<Utc>) -> RefreshTokenRecord {
        RefreshTokenRecord::active(user_id, TokenId::generate(), now, now + Duration::days(7))
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_jti() {
        let ledger = InMemoryRefreshTokenLedger::new();
        let rec = record(UserId::new(), Utc::now());

        ledger.insert(rec.clone()).await.unwrap();
        let err = ledger.insert(rec.clone()).await.unwrap_err();
        assert_eq!(err, LedgerError::Duplicate(rec.jti.to_string()));
    }

    #[tokio::test]
    async fn rotate_links_old_to_child_exactly_once() {
        let ledger = InMemoryRefreshTokenLedger::new();
        let user = UserId::new();
        let now = Utc::now();
        let old = record(user, now);
        ledger.insert(old.clone()).await.unwrap();

        let child = record(user, now);
        ledger.rotate(&old.jti, child.clone()).await.unwrap();

        let stored = ledger.find_by_jti(&old.jti).await.unwrap().unwrap();
        assert!(stored.revoked);
        assert_eq!(stored.replaced_by, Some(child.jti.clone()));
        assert!(!ledger.find_by_jti(&child.jti).await.unwrap().unwrap().revoked);

        let again = ledger.rotate(&old.jti, record(user, now)).await.unwrap_err();
        assert_eq!(again, LedgerError::AlreadyRevoked(old.jti.to_string()));
        assert_eq!(ledger.active_for_user(user, now).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rotate_unknown_jti_is_not_found() {
        let ledger = InMemoryRefreshTokenLedger::new();
        let missing = TokenId::generate();
        let err = ledger
            .rotate(&missing, record(UserId::new(), Utc::now()))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::NotFound(missing.to_string()));
    }

    #[tokio::test]
    async fn rotate_with_duplicate_child_leaves_old_untouched() {
        let ledger = InMemoryRefreshTokenLedger::new();
        let user = UserId::new();
        let now = Utc::now();
        let old = record(user, now);
        let existing = record(user, now);
        ledger.insert(old.clone()).await.unwrap();
        ledger.insert(existing.clone()).await.unwrap();

        let mut child = record(user, now);
        child.jti = existing.jti.clone();
        assert!(matches!(
            ledger.rotate(&old.jti, child).await,
            Err(LedgerError::Duplicate(_))
        ));
        assert!(!ledger.find_by_jti(&old.jti).await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn revoke_all_only_touches_the_users_unrevoked_records() {
        let ledger = InMemoryRefreshTokenLedger::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let now = Utc::now();

        let rotated = record(alice, now);
        ledger.insert(rotated.clone()).await.unwrap();
        ledger.rotate(&rotated.jti, record(alice, now)).await.unwrap();
        ledger.insert(record(alice, now)).await.unwrap();
        ledger.insert(record(bob, now)).await.unwrap();

        assert_eq!(ledger.revoke_all_for_user(alice).await.unwrap(), 2);
        assert!(ledger.active_for_user(alice, now).await.unwrap().is_empty());
        assert_eq!(ledger.active_for_user(bob, now).await.unwrap().len(), 1);

        // Rotation links survive revocation.
        let stored = ledger.find_by_jti(&rotated.jti).await.unwrap().unwrap();
        assert!(stored.replaced_by.is_some());
        assert_eq!(ledger.history_for_user(alice).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn expired_records_are_not_active() {
        let ledger = InMemoryRefreshTokenLedger::new();
        let user = UserId::new();
        let now = Utc::now();
        let rec = RefreshTokenRecord::active(user, TokenId::generate(), now, now + Duration::seconds(10));
        ledger.insert(rec.clone()).await.unwrap();

        assert_eq!(ledger.active_for_user(user, now).await.unwrap().len(), 1);
        assert!(ledger
            .active_for_user(user, rec.expires_at)
            .await
            .unwrap()
            .is_empty());
    }
}
