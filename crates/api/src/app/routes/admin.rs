//! Admin-service endpoints. User data lives in the user-service and is reached
//! through [`UserServiceClient`](crate::s2s_client::UserServiceClient).

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    Json,
};
use serde_json::Value;

use warden_auth::Role;
use warden_core::UserId;

use crate::app::dto::{LoginRequest, TokenResponse};
use crate::app::errors::ApiError;
use crate::app::services::AdminServices;
use crate::middleware::{require_role, RequirePrincipal};

pub async fn login(
    Extension(services): Extension<Arc<AdminServices>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    if body.username != services.admin.username {
        return Err(ApiError::InvalidCredentials);
    }

    let passwords = services.passwords.clone();
    let stored = services.admin.password_hash.clone();
    tokio::task::spawn_blocking(move || passwords.verify_password(body.password, &stored))
        .await?
        .map_err(|_| ApiError::InvalidCredentials)?;

    let (access, _) = services
        .codec
        .mint_access(&services.admin.username, vec![Role::ADMIN], Vec::new())?;
    tracing::info!(admin = %services.admin.username, "admin logged in");

    Ok(Json(TokenResponse::bearer(
        access,
        None,
        services.codec.ttl().access.num_seconds(),
    )))
}

pub async fn get_user(
    Extension(services): Extension<Arc<AdminServices>>,
    RequirePrincipal(principal): RequirePrincipal,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_role(&principal, &Role::ADMIN)?;
    let user_id = parse_user_id(&id)?;
    Ok(Json(services.users.get_user(user_id).await?))
}

pub async fn revoke_sessions(
    Extension(services): Extension<Arc<AdminServices>>,
    RequirePrincipal(principal): RequirePrincipal,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_role(&principal, &Role::ADMIN)?;
    let user_id = parse_user_id(&id)?;
    let result = services.users.revoke_sessions(user_id).await?;
    tracing::info!(admin = principal.subject(), user_id = %user_id, "sessions revoked by admin");
    Ok(Json(result))
}

/// Only well-formed ids are forwarded, so the peer URL path stays fixed.
fn parse_user_id(id: &str) -> Result<UserId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::NotFound(format!("user {id} not found")))
}
