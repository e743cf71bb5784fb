//! Configuration loading and representation.
//!
//! Everything is read from environment variables through a lookup function,
//! so tests can supply a map instead of touching the process environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;
use thiserror::Error;

use warden_auth::{CodecSettings, KeyError, KeyMaterial, RolesClaim, TokenCodec, TokenTtl};
use warden_auth::codec::MIN_SECRET_LEN;
use warden_core::Clock;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("cannot read key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-binary defaults.
#[derive(Debug, Clone, Copy)]
pub struct ServiceDefaults {
    pub service_id: &'static str,
    pub bind_addr: &'static str,
}

impl ServiceDefaults {
    pub const USER_SERVICE: ServiceDefaults = ServiceDefaults {
        service_id: "user-service",
        bind_addr: "0.0.0.0:8080",
    };

    pub const ADMIN_SERVICE: ServiceDefaults = ServiceDefaults {
        service_id: "admin-service",
        bind_addr: "0.0.0.0:8081",
    };
}

/// Settings shared by both services.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// This service's audience identifier.
    pub service_id: String,
    pub issuer: String,
    pub keys: KeyMaterial,
    pub roles_claim: RolesClaim,
    /// Path prefixes guarded by the S2S trust gate.
    pub internal_prefixes: Vec<String>,
    pub ttl: TokenTtl,
    pub bind_addr: SocketAddr,
    /// Set when `USE_PERSISTENT_STORES=true`.
    pub database_url: Option<String>,
}

impl ServiceConfig {
    pub fn from_env(defaults: ServiceDefaults) -> Result<Self, ConfigError> {
        Self::from_lookup(defaults, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(defaults: ServiceDefaults, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let service_id = get("WARDEN_SERVICE_ID").unwrap_or_else(|| defaults.service_id.to_string());
        let issuer = get("WARDEN_ISSUER").unwrap_or_else(|| service_id.clone());

        let hmac_secret = get("WARDEN_HMAC_SECRET").ok_or(ConfigError::Missing("WARDEN_HMAC_SECRET"))?;
        if hmac_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                var: "WARDEN_HMAC_SECRET",
                reason: format!("must be at least {MIN_SECRET_LEN} bytes"),
            });
        }
        let keys = KeyMaterial {
            hmac_secret: hmac_secret.into_bytes(),
            rsa_private_pem: get("WARDEN_PRIVATE_KEY_PATH").map(read_key_file).transpose()?,
            rsa_public_pem: get("WARDEN_PUBLIC_KEY_PATH").map(read_key_file).transpose()?,
            peer_public_pem: get("WARDEN_PEER_PUBLIC_KEY_PATH").map(read_key_file).transpose()?,
        };

        let roles_claim = match get("WARDEN_ROLES_CLAIM") {
            Some(name) => RolesClaim::new(name).map_err(|e| ConfigError::Invalid {
                var: "WARDEN_ROLES_CLAIM",
                reason: e.to_string(),
            })?,
            None => RolesClaim::default(),
        };

        let internal_prefixes = match get("WARDEN_INTERNAL_PREFIXES") {
            Some(raw) => parse_prefixes(&raw)?,
            None => vec!["/internal/".to_string()],
        };

        let defaults_ttl = TokenTtl::default();
        let ttl = TokenTtl {
            access: ttl_secs(&get, "WARDEN_ACCESS_TTL_SECS", defaults_ttl.access)?,
            refresh: ttl_secs(&get, "WARDEN_REFRESH_TTL_SECS", defaults_ttl.refresh)?,
            s2s: ttl_secs(&get, "WARDEN_S2S_TTL_SECS", defaults_ttl.s2s)?,
        };

        let bind_raw = get("WARDEN_BIND_ADDR").unwrap_or_else(|| defaults.bind_addr.to_string());
        let bind_addr = bind_raw.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
            var: "WARDEN_BIND_ADDR",
            reason: format!("{e}"),
        })?;

        let use_persistent = get("USE_PERSISTENT_STORES")
            .map(|v| parse_bool("USE_PERSISTENT_STORES", &v))
            .transpose()?
            .unwrap_or(false);
        let database_url = if use_persistent {
            Some(get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?)
        } else {
            None
        };

        Ok(Self {
            service_id,
            issuer,
            keys,
            roles_claim,
            internal_prefixes,
            ttl,
            bind_addr,
            database_url,
        })
    }

    pub fn codec_settings(&self) -> CodecSettings {
        CodecSettings {
            issuer: self.issuer.clone(),
            roles_claim: self.roles_claim.clone(),
            ttl: self.ttl,
        }
    }

    pub fn build_codec(&self, clock: Arc<dyn Clock>) -> Result<TokenCodec, KeyError> {
        TokenCodec::new(&self.keys, self.codec_settings(), clock)
    }
}

/// Settings only the admin service needs.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub username: String,
    /// Argon2id PHC string of the admin password.
    pub password_hash: String,
    /// Base URL of the user service.
    pub peer_url: String,
    /// Audience placed in minted S2S tokens.
    pub peer_audience: String,
}

impl AdminConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let password_hash = get("WARDEN_ADMIN_PASSWORD_HASH")
            .ok_or(ConfigError::Missing("WARDEN_ADMIN_PASSWORD_HASH"))?;
        if !password_hash.starts_with("$argon2") {
            return Err(ConfigError::Invalid {
                var: "WARDEN_ADMIN_PASSWORD_HASH",
                reason: "expected an argon2 PHC string".to_string(),
            });
        }

        Ok(Self {
            username: get("WARDEN_ADMIN_USERNAME").unwrap_or_else(|| "admin".to_string()),
            password_hash,
            peer_url: get("WARDEN_PEER_URL")
                .unwrap_or_else(|| "http://localhost:8080".to_string())
                .trim_end_matches('/')
                .to_string(),
            peer_audience: get("WARDEN_PEER_AUDIENCE").unwrap_or_else(|| "user-service".to_string()),
        })
    }
}

fn read_key_file(path: String) -> Result<Vec<u8>, ConfigError> {
    let path = PathBuf::from(path);
    std::fs::read(&path).map_err(|source| ConfigError::KeyFile { path, source })
}

fn parse_prefixes(raw: &str) -> Result<Vec<String>, ConfigError> {
    let prefixes: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    if prefixes.is_empty() {
        return Err(ConfigError::Invalid {
            var: "WARDEN_INTERNAL_PREFIXES",
            reason: "no prefixes given".to_string(),
        });
    }
    if let Some(bad) = prefixes.iter().find(|p| !p.starts_with('/')) {
        return Err(ConfigError::Invalid {
            var: "WARDEN_INTERNAL_PREFIXES",
            reason: format!("prefix '{bad}' must start with '/'"),
        });
    }
    Ok(prefixes)
}

fn ttl_secs<G>(get: &G, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<i64>() {
            Ok(secs) if secs > 0 => Ok(Duration::seconds(secs)),
            _ => Err(ConfigError::Invalid {
                var,
                reason: format!("expected a positive number of seconds, got '{raw}'"),
            }),
        },
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::Invalid {
            var,
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}
