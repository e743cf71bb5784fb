//! Refresh token rotation protocol.
//!
//! Each refresh token is single-use. Presenting it revokes its ledger record
//! and issues a child; presenting it again is a replay.
//!
//! Per-lineage states:
//!
//! ```text
//! Active --rotate--> Rotated (revoked, replaced_by = child)   + new Active child
//! Active --time----> Expired
//! Active/Rotated --revoke_all_for_user--> Revoked (replaced_by untouched)
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use warden_auth::{TokenCodec, TokenError, TokenKind};
use warden_core::{TokenId, UserId};

use crate::ledger::{LedgerError, RefreshTokenLedger, RefreshTokenRecord};
use crate::users::{DirectoryError, UserAccount, UserDirectory};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RotationError {
    /// The presented token failed verification.
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("token is not a refresh token")]
    WrongTokenType,

    #[error("refresh token has no jti")]
    MissingTokenId,

    #[error("token subject does not resolve to an active user")]
    UnknownPrincipal,

    #[error("refresh token is not in the ledger")]
    UnknownToken,

    #[error("refresh token was already used or revoked")]
    TokenReplayed,

    #[error("refresh token has expired")]
    TokenExpired,

    #[error("refresh token was rotated concurrently")]
    ConcurrentRotation,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl RotationError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            RotationError::Token(err) => err.code(),
            RotationError::WrongTokenType => "wrong_token_type",
            RotationError::MissingTokenId => "missing_token_id",
            RotationError::UnknownPrincipal => "unknown_principal",
            RotationError::UnknownToken => "unknown_token",
            RotationError::TokenReplayed => "token_replayed",
            RotationError::TokenExpired => "token_expired",
            RotationError::ConcurrentRotation => "concurrent_rotation",
            RotationError::Ledger(_) => "ledger_error",
            RotationError::Directory(_) => "directory_error",
        }
    }

    /// Whether the failure is about the presented token rather than the
    /// service's own storage.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            RotationError::Ledger(_)
                | RotationError::Directory(_)
                | RotationError::Token(TokenError::Encoding(_))
        )
    }
}

/// A freshly issued refresh token and its ledger record.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub record: RefreshTokenRecord,
}

/// Result of a successful rotation.
#[derive(Debug, Clone)]
pub struct RotatedToken {
    /// The child refresh token.
    pub token: String,
    pub record: RefreshTokenRecord,
    /// Owner of the lineage, for minting the accompanying access token.
    pub user: UserAccount,
}

pub struct RotationProtocol {
    codec: Arc<TokenCodec>,
    ledger: Arc<dyn RefreshTokenLedger>,
    users: Arc<dyn UserDirectory>,
}

impl RotationProtocol {
    pub fn new(
        codec: Arc<TokenCodec>,
        ledger: Arc<dyn RefreshTokenLedger>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            codec,
            ledger,
            users,
        }
    }

    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    /// Mint a refresh token for `user` and record it as active.
    #[instrument(skip(self, user), fields(user_id = %user.id), err(Display))]
    pub async fn issue_for_user(&self, user: &UserAccount) -> Result<IssuedRefreshToken, RotationError> {
        let jti = TokenId::generate();
        let (token, claims) = self.codec.mint_refresh(&user.id.to_string(), &jti)?;

        let record = RefreshTokenRecord::active(user.id, jti, claims.issued_at, claims.expires_at);
        self.ledger.insert(record.clone()).await?;

        tracing::info!(jti = %record.jti, expires_at = %record.expires_at, "refresh token issued");
        Ok(IssuedRefreshToken { token, record })
    }

    /// Exchange a refresh token for its successor.
    #[instrument(skip(self, token), err(Display))]
    pub async fn rotate(&self, token: &str) -> Result<RotatedToken, RotationError> {
        let claims = self.codec.decode(token).map_err(|err| match err {
            TokenError::Expired => RotationError::TokenExpired,
            other => RotationError::Token(other),
        })?;

        if claims.kind != TokenKind::Refresh {
            return Err(RotationError::WrongTokenType);
        }
        let jti = claims.token_id.clone().ok_or(RotationError::MissingTokenId)?;
        let user = self.resolve_user(&claims.subject).await?;

        let record = self
            .ledger
            .find_by_jti(&jti)
            .await?
            .ok_or(RotationError::UnknownToken)?;
        if record.user_id != user.id {
            return Err(RotationError::UnknownToken);
        }
        if record.revoked {
            tracing::warn!(
                security_event = "refresh_token_replay",
                jti = %jti,
                user_id = %user.id,
                replaced_by = ?record.replaced_by,
                "revoked refresh token presented"
            );
            return Err(RotationError::TokenReplayed);
        }
        if record.expires_at <= self.codec.now() {
            return Err(RotationError::TokenExpired);
        }

        let child_jti = TokenId::generate();
        let (child_token, child_claims) = self.codec.mint_refresh(&user.id.to_string(), &child_jti)?;
        let child = RefreshTokenRecord::active(
            user.id,
            child_jti,
            child_claims.issued_at,
            child_claims.expires_at,
        );

        match self.ledger.rotate(&jti, child.clone()).await {
            Ok(()) => {}
            Err(LedgerError::AlreadyRevoked(_)) => {
                tracing::warn!(jti = %jti, user_id = %user.id, "lost rotation race");
                return Err(RotationError::ConcurrentRotation);
            }
            Err(LedgerError::NotFound(_)) => return Err(RotationError::UnknownToken),
            Err(err) => return Err(err.into()),
        }

        tracing::info!(old_jti = %jti, new_jti = %child.jti, user_id = %user.id, "refresh token rotated");
        Ok(RotatedToken {
            token: child_token,
            record: child,
            user,
        })
    }

    /// Revoke every unrevoked refresh token of the user.
    #[instrument(skip(self), err(Display))]
    pub async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64, RotationError> {
        let revoked = self.ledger.revoke_all_for_user(user_id).await?;
        tracing::info!(revoked, "refresh tokens revoked");
        Ok(revoked)
    }

    /// The whole rotation chain containing `jti`, oldest first.
    ///
    /// Audit only: loads every record of the owning user.
    pub async fn lineage(&self, jti: &TokenId) -> Result<Vec<RefreshTokenRecord>, RotationError> {
        let start = self
            .ledger
            .find_by_jti(jti)
            .await?
            .ok_or(RotationError::UnknownToken)?;
        let history = self.ledger.history_for_user(start.user_id).await?;

        let mut parent_of: HashMap<TokenId, TokenId> = HashMap::new();
        for record in &history {
            if let Some(child) = &record.replaced_by {
                parent_of.insert(child.clone(), record.jti.clone());
            }
        }
        let arena: HashMap<TokenId, RefreshTokenRecord> =
            history.into_iter().map(|r| (r.jti.clone(), r)).collect();

        let mut root = start.jti.clone();
        let mut seen = HashSet::from([root.clone()]);
        while let Some(parent) = parent_of.get(&root) {
            if !seen.insert(parent.clone()) {
                break;
            }
            root = parent.clone();
        }

        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(root);
        while let Some(current) = cursor {
            if !seen.insert(current.clone()) {
                break;
            }
            let Some(record) = arena.get(&current) else {
                break;
            };
            cursor = record.replaced_by.clone();
            chain.push(record.clone());
        }
        Ok(chain)
    }

    async fn resolve_user(&self, subject: &str) -> Result<UserAccount, RotationError> {
        let user_id: UserId = subject.parse().map_err(|_| RotationError::UnknownPrincipal)?;
        match self.users.find_by_id(user_id).await? {
            Some(user) if user.enabled => Ok(user),
            _ => Err(RotationError::UnknownPrincipal),
        }
    }
}
