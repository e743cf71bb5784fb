use std::collections::HashMap;
use std::sync::RwLock;

use warden_core::UserId;

use super::{DirectoryError, UserAccount, UserDirectory};

/// In-memory user directory (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, UserAccount>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> DirectoryError {
        DirectoryError::Storage("lock poisoned".to_string())
    }
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn insert(&self, account: UserAccount) -> Result<(), DirectoryError> {
        let mut users = self.users.write().map_err(|_| Self::poisoned())?;
        if users.values().any(|u| u.username == account.username) {
            return Err(DirectoryError::UsernameTaken(account.username));
        }
        users.insert(account.id, account);
        Ok(())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<UserAccount>, DirectoryError> {
        let users = self.users.read().map_err(|_| Self::poisoned())?;
        Ok(users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserAccount>, DirectoryError> {
        let users = self.users.read().map_err(|_| Self::poisoned())?;
        Ok(users.values().find(|u| u.username == username).cloned())
    }
}
