//! Credential providers for the `Authorization` header.
//!
//! The transport never acquires or refreshes credentials itself; it asks a
//! [`CredentialProvider`] before every call and fails the call when none is
//! available.

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use pinup_core::config::AuthConfig;

/// Supplies a full `Authorization` header value (e.g. `Bearer ...`).
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn authorization(&self) -> Option<SecretString>;
}

/// A fixed header value loaded once from config or environment
pub struct StaticCredential {
    header: SecretString,
}

impl StaticCredential {
    /// Wrap a token. Values that already carry a scheme (`Bearer`/`Basic`)
    /// are used verbatim; bare tokens get a `Bearer` prefix.
    pub fn from_token(token: &str) -> Self {
        let token = token.trim();
        let header = if token.starts_with("Bearer ") || token.starts_with("Basic ") {
            token.to_string()
        } else {
            format!("Bearer {token}")
        };
        Self {
            header: SecretString::from(header),
        }
    }

    /// Web3 auth header: `Bearer base64("sub-{address}:{signature}")`,
    /// where `signature` is the address signed with its own key.
    pub fn from_signature(address: &str, signature: &str) -> Self {
        let raw = format!("sub-{address}:{signature}");
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
        Self {
            header: SecretString::from(format!("Bearer {encoded}")),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn authorization(&self) -> Option<SecretString> {
        Some(SecretString::from(self.header.expose_secret().to_string()))
    }
}

/// Provider that never has a credential; every authenticated call fails.
pub struct NoCredential;

#[async_trait]
impl CredentialProvider for NoCredential {
    async fn authorization(&self) -> Option<SecretString> {
        None
    }
}

/// Pick a provider from config. An explicit `env_token` (e.g. `PINUP_TOKEN`)
/// wins over the config file; a token wins over address + signature.
pub fn credentials_from_config(
    auth: &AuthConfig,
    env_token: Option<&str>,
) -> Arc<dyn CredentialProvider> {
    if let Some(token) = env_token.filter(|t| !t.trim().is_empty()) {
        return Arc::new(StaticCredential::from_token(token));
    }
    if let Some(token) = auth.token.as_deref().filter(|t| !t.trim().is_empty()) {
        return Arc::new(StaticCredential::from_token(token));
    }
    match (auth.address.as_deref(), auth.signature.as_deref()) {
        (Some(address), Some(signature)) => {
            Arc::new(StaticCredential::from_signature(address, signature))
        }
        _ => {
            tracing::warn!("no credential configured: set auth.token or PINUP_TOKEN");
            Arc::new(NoCredential)
        }
    }
}
