//! Admin-service client for the user-service internal routes.
//!
//! Every call mints a fresh S2S token addressed to the peer; human sessions
//! are never forwarded across the trust boundary.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use warden_auth::{TokenCodec, TokenError};
use warden_core::UserId;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot mint s2s token: {0}")]
    Token(#[from] TokenError),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("resource not found upstream")]
    NotFound,

    #[error("upstream answered {status}: {body}")]
    Upstream { status: StatusCode, body: String },
}

#[derive(Clone)]
pub struct UserServiceClient {
    http: reqwest::Client,
    base_url: Arc<str>,
    audience: Arc<str>,
    codec: Arc<TokenCodec>,
}

impl UserServiceClient {
    pub fn new(codec: Arc<TokenCodec>, base_url: &str, audience: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            audience: Arc::from(audience),
            codec,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<Value, ClientError> {
        let url = format!("{}/internal/users/{}", self.base_url, user_id);
        let request = self.http.get(url);
        self.send(request).await
    }

    pub async fn revoke_sessions(&self, user_id: UserId) -> Result<Value, ClientError> {
        let url = format!("{}/internal/users/{}/revoke-sessions", self.base_url, user_id);
        let request = self.http.post(url);
        self.send(request).await
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ClientError> {
        let (token, _) = self.codec.mint_s2s(vec![self.audience.to_string()])?;
        let response = request.bearer_auth(token).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, audience = %self.audience, "peer call rejected");
            return Err(ClientError::Upstream { status, body });
        }

        tracing::debug!(%status, audience = %self.audience, "peer call succeeded");
        Ok(response.json::<Value>().await?)
    }
}
