//! User directory: the account records that refresh tokens belong to.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use warden_auth::Role;
use warden_core::UserId;

pub use in_memory::InMemoryUserDirectory;
pub use postgres::PostgresUserDirectory;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub username: String,
    pub email: String,
    /// Argon2id PHC string.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub roles: Vec<Role>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    /// A new, enabled account with a fresh id.
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
        roles: Vec<Role>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: UserId::new(),
            username: username.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            roles,
            enabled: true,
            created_at,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("username already taken: {0}")]
    UsernameTaken(String),

    #[error("user directory storage error: {0}")]
    Storage(String),
}

#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    /// Persist a new account. Usernames are unique.
    async fn insert(&self, account: UserAccount) -> Result<(), DirectoryError>;

    async fn find_by_id(&self, id: UserId) -> Result<Option<UserAccount>, DirectoryError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<UserAccount>, DirectoryError>;
}

#[async_trait::async_trait]
impl<D> UserDirectory for Arc<D>
where
    D: UserDirectory + ?Sized,
{
    async fn insert(&self, account: UserAccount) -> Result<(), DirectoryError> {
        (**self).insert(account).await
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<UserAccount>, DirectoryError> {
        (**self).find_by_id(id).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserAccount>, DirectoryError> {
        (**self).find_by_username(username).await
    }
}
