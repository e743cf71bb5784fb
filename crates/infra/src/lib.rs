//! Infrastructure layer: the refresh token ledger, rotation, user storage,
//! password hashing and configuration.

pub mod config;
pub mod ledger;
pub mod password;
pub mod rotation;
pub mod users;

pub use config::{AdminConfig, ConfigError, ServiceConfig, ServiceDefaults};
pub use ledger::{
    InMemoryRefreshTokenLedger, LedgerError, PostgresRefreshTokenLedger, RefreshTokenLedger,
    RefreshTokenRecord,
};
pub use password::{PasswordError, PasswordManager, PasswordParams};
pub use rotation::{IssuedRefreshToken, RotatedToken, RotationError, RotationProtocol};
pub use users::{
    DirectoryError, InMemoryUserDirectory, PostgresUserDirectory, UserAccount, UserDirectory,
};

/// Database wiring shared by the Postgres-backed stores.
pub mod db {
    use sqlx::PgPool;

    /// Connect to Postgres and apply the bundled migrations.
    pub async fn connect_and_migrate(database_url: &str) -> Result<PgPool, sqlx::Error> {
        let pool = PgPool::connect(database_url).await?;
        sqlx::migrate!("../../migrations").run(&pool).await?;
        tracing::info!("database migrations applied");
        Ok(pool)
    }
}
