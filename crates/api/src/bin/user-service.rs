use anyhow::Context;

use warden_api::app::{build_user_app, services::UserServices};
use warden_infra::{ServiceConfig, ServiceDefaults};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    warden_observability::init("user-service");

    let config = ServiceConfig::from_env(ServiceDefaults::USER_SERVICE).context("invalid configuration")?;
    let services = UserServices::from_config(&config).await?;
    let app = build_user_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %listener.local_addr()?, service_id = %config.service_id, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
