//! User-service session endpoints: signup, login, refresh and logout.

use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use warden_auth::Role;
use warden_core::UserId;
use warden_infra::UserAccount;

use crate::app::dto::{LoginRequest, RefreshRequest, SignupRequest, TokenResponse};
use crate::app::errors::ApiError;
use crate::app::services::UserServices;
use crate::middleware::RequirePrincipal;

const MIN_PASSWORD_LEN: usize = 8;

pub async fn signup(
    Extension(services): Extension<Arc<UserServices>>,
    Json(body): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_signup(&body)?;

    let passwords = services.passwords.clone();
    let password = body.password;
    let hash = tokio::task::spawn_blocking(move || passwords.hash_password(password)).await??;

    let account = UserAccount::new(
        body.username.trim(),
        body.email.trim(),
        hash,
        vec![Role::USER],
        services.codec.now(),
    );
    services.users.insert(account.clone()).await?;
    tracing::info!(user_id = %account.id, "user signed up");

    let tokens = issue_session(&services, &account).await?;
    Ok((StatusCode::CREATED, Json(tokens)))
}

pub async fn login(
    Extension(services): Extension<Arc<UserServices>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let account = services
        .users
        .find_by_username(body.username.trim())
        .await?
        .filter(|account| account.enabled)
        .ok_or(ApiError::InvalidCredentials)?;

    let passwords = services.passwords.clone();
    let stored = account.password_hash.clone();
    tokio::task::spawn_blocking(move || passwords.verify_password(body.password, &stored))
        .await?
        .map_err(|_| ApiError::InvalidCredentials)?;

    tracing::info!(user_id = %account.id, "user logged in");
    Ok(Json(issue_session(&services, &account).await?))
}

pub async fn refresh(
    Extension(services): Extension<Arc<UserServices>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let rotated = services.protocol.rotate(&body.refresh_token).await?;
    let (access, _) = services.codec.mint_access(
        &rotated.user.id.to_string(),
        rotated.user.roles.clone(),
        Vec::new(),
    )?;

    Ok(Json(TokenResponse::bearer(
        access,
        Some(rotated.token),
        services.codec.ttl().access.num_seconds(),
    )))
}

/// Revokes every refresh token of the caller. Access tokens stay valid until
/// they expire.
pub async fn logout(
    Extension(services): Extension<Arc<UserServices>>,
    RequirePrincipal(principal): RequirePrincipal,
) -> Result<StatusCode, ApiError> {
    let user_id: UserId = principal
        .subject()
        .parse()
        .map_err(|_| ApiError::Unauthorized("token subject is not a user"))?;
    services.protocol.revoke_all_for_user(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn issue_session(services: &UserServices, account: &UserAccount) -> Result<TokenResponse, ApiError> {
    let (access, _) = services
        .codec
        .mint_access(&account.id.to_string(), account.roles.clone(), Vec::new())?;
    let refresh = services.protocol.issue_for_user(account).await?;

    Ok(TokenResponse::bearer(
        access,
        Some(refresh.token),
        services.codec.ttl().access.num_seconds(),
    ))
}

fn validate_signup(body: &SignupRequest) -> Result<(), ApiError> {
    if body.username.trim().is_empty() {
        return Err(ApiError::Validation("username is required".into()));
    }
    let email = body.email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
        _ => return Err(ApiError::Validation("email is invalid".into())),
    }
    if body.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
