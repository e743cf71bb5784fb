use axum::{
    routing::{get, post},
    Router,
};

pub mod admin;
pub mod auth;
pub mod system;
pub mod users;

/// User-service endpoints. Gates and shared state are attached by the caller.
pub fn user_router() -> Router {
    Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/users/me", get(users::me))
        .route("/internal/users/:id", get(users::internal_get_user))
        .route("/internal/users/:id/revoke-sessions", post(users::internal_revoke_sessions))
}

/// Admin-service endpoints.
pub fn admin_router() -> Router {
    Router::new()
        .route("/auth/login", post(admin::login))
        .route("/admin/users/:id", get(admin::get_user))
        .route("/admin/users/:id/revoke-sessions", post(admin::revoke_sessions))
}
