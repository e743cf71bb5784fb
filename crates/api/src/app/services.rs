//! Service wiring: stores, codec and protocol for each binary.

use std::sync::Arc;

use warden_auth::TokenCodec;
use warden_core::{Clock, SystemClock};
use warden_infra::{
    db, AdminConfig, InMemoryRefreshTokenLedger, InMemoryUserDirectory, PasswordManager,
    PostgresRefreshTokenLedger, PostgresUserDirectory, RefreshTokenLedger, RotationProtocol,
    ServiceConfig, UserDirectory,
};

use crate::middleware::GateState;
use crate::s2s_client::UserServiceClient;

/// Everything the user-service handlers need.
#[derive(Clone)]
pub struct UserServices {
    pub codec: Arc<TokenCodec>,
    pub protocol: Arc<RotationProtocol>,
    pub ledger: Arc<dyn RefreshTokenLedger>,
    pub users: Arc<dyn UserDirectory>,
    pub passwords: PasswordManager,
    pub gates: GateState,
}

impl UserServices {
    pub fn new(
        config: &ServiceConfig,
        codec: Arc<TokenCodec>,
        ledger: Arc<dyn RefreshTokenLedger>,
        users: Arc<dyn UserDirectory>,
        passwords: PasswordManager,
    ) -> Self {
        let protocol = Arc::new(RotationProtocol::new(codec.clone(), ledger.clone(), users.clone()));
        let gates = GateState::new(codec.clone(), &config.service_id, &config.internal_prefixes);
        Self {
            codec,
            protocol,
            ledger,
            users,
            passwords,
            gates,
        }
    }

    /// In-memory stores.
    pub fn in_memory(config: &ServiceConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let codec = Arc::new(config.build_codec(clock)?);
        Ok(Self::new(
            config,
            codec,
            Arc::new(InMemoryRefreshTokenLedger::new()),
            Arc::new(InMemoryUserDirectory::new()),
            PasswordManager::default(),
        ))
    }

    /// Postgres when `USE_PERSISTENT_STORES` selected it, otherwise in-memory.
    pub async fn from_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let Some(database_url) = &config.database_url else {
            tracing::info!("using in-memory stores");
            return Self::in_memory(config, clock);
        };

        let pool = db::connect_and_migrate(database_url).await?;
        tracing::info!("using postgres stores");
        let codec = Arc::new(config.build_codec(clock)?);
        Ok(Self::new(
            config,
            codec,
            Arc::new(PostgresRefreshTokenLedger::new(pool.clone())),
            Arc::new(PostgresUserDirectory::new(pool)),
            PasswordManager::default(),
        ))
    }
}

/// Everything the admin-service handlers need.
#[derive(Clone)]
pub struct AdminServices {
    pub codec: Arc<TokenCodec>,
    pub admin: Arc<AdminConfig>,
    pub passwords: PasswordManager,
    pub users: UserServiceClient,
    pub gates: GateState,
}

impl AdminServices {
    pub fn new(
        config: &ServiceConfig,
        admin: AdminConfig,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let codec = Arc::new(config.build_codec(clock)?);
        let users = UserServiceClient::new(codec.clone(), &admin.peer_url, &admin.peer_audience)?;
        let gates = GateState::new(codec.clone(), &config.service_id, &config.internal_prefixes);
        Ok(Self {
            codec,
            admin: Arc::new(admin),
            passwords: PasswordManager::default(),
            users,
            gates,
        })
    }
}
