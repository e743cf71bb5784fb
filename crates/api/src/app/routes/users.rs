use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    Json,
};
use serde_json::{json, Value};

use warden_core::UserId;
use warden_infra::UserAccount;

use crate::app::dto::{RevokeResponse, UserSummary};
use crate::app::errors::ApiError;
use crate::app::services::UserServices;
use crate::middleware::RequirePrincipal;

pub async fn me(RequirePrincipal(principal): RequirePrincipal) -> Json<Value> {
    Json(json!({
        "subject": principal.subject(),
        "roles": principal.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>(),
    }))
}

/// S2S only; the trust gate has already admitted the caller.
pub async fn internal_get_user(
    Extension(services): Extension<Arc<UserServices>>,
    Path(id): Path<String>,
) -> Result<Json<UserSummary>, ApiError> {
    let account = load_user(&services, &id).await?;
    let sessions = services
        .ledger
        .active_for_user(account.id, services.codec.now())
        .await?;

    let mut summary = UserSummary::from(&account);
    summary.active_sessions = Some(sessions.len());
    Ok(Json(summary))
}

pub async fn internal_revoke_sessions(
    Extension(services): Extension<Arc<UserServices>>,
    Path(id): Path<String>,
) -> Result<Json<RevokeResponse>, ApiError> {
    let account = load_user(&services, &id).await?;
    let revoked = services.protocol.revoke_all_for_user(account.id).await?;
    Ok(Json(RevokeResponse { revoked }))
}

async fn load_user(services: &UserServices, id: &str) -> Result<UserAccount, ApiError> {
    let not_found = || ApiError::NotFound(format!("user {id} not found"));
    let user_id: UserId = id.parse().map_err(|_| not_found())?;
    services.users.find_by_id(user_id).await?.ok_or_else(not_found)
}
