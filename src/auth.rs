//! Pluggable token validation.
//!
//! Used at two points: the transport-upgrade admission check (spec.md
//! §6.4) and the CallManager's `auth` message (spec.md §4.7, kind tag 16).
//! Both cross this same trait boundary rather than duplicating credential
//! logic — a deployment that wires in a real identity provider gets both
//! checks for free.
//!
//! The shared-secret default is explicitly called out by spec.md §9 Open
//! Questions as a placeholder: "implementers must supply a real validator
//! before production." It is kept here only so the crate is runnable out
//! of the box.

use async_trait::async_trait;

/// Resolves an opaque bearer token to a user id, or fails.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validates `token` and returns the user id it authenticates as.
    ///
    /// # Errors
    ///
    /// Returns an error for any invalid, expired, or unrecognized token.
    /// Subsystem failures (e.g. an identity provider being unreachable)
    /// should also surface as an error here — the caller logs and treats
    /// it identically to an invalid token, per spec.md §7.
    async fn validate(&self, token: &str) -> anyhow::Result<String>;
}

/// Default `TokenValidator`: accepts exactly one configured shared secret.
///
/// Every accepted token resolves to the same synthetic user id, since a
/// shared secret carries no per-user identity of its own.
pub struct SharedSecretValidator {
    secret: Option<String>,
}

impl SharedSecretValidator {
    /// `secret = None` rejects every token — a deployment with no shared
    /// secret configured must supply its own `TokenValidator`.
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }
}

#[async_trait]
impl TokenValidator for SharedSecretValidator {
    async fn validate(&self, token: &str) -> anyhow::Result<String> {
        match &self.secret {
            Some(configured) if configured == token => Ok("shared-secret-user".to_string()),
            Some(_) => Err(anyhow::anyhow!("token does not match configured secret")),
            None => Err(anyhow::anyhow!(
                "no shared secret configured; supply a TokenValidator"
            )),
        }
    }
}
