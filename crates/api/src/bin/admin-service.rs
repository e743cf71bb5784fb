use std::sync::Arc;

use anyhow::Context;

use warden_api::app::{build_admin_app, services::AdminServices};
use warden_core::SystemClock;
use warden_infra::{AdminConfig, ServiceConfig, ServiceDefaults};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    warden_observability::init("admin-service");

    let config = ServiceConfig::from_env(ServiceDefaults::ADMIN_SERVICE).context("invalid configuration")?;
    let admin = AdminConfig::from_env().context("invalid admin configuration")?;
    tracing::info!(peer = %admin.peer_url, audience = %admin.peer_audience, "user-service peer");

    let services = AdminServices::new(&config, admin, Arc::new(SystemClock))?;
    let app = build_admin_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %listener.local_addr()?, service_id = %config.service_id, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
