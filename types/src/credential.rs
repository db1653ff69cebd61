//! Bearer credential handling.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("credential must not be empty")]
pub struct EmptyCredentialError;

/// A persisted bearer token.
///
/// The token is opaque to the core except for one thing: when it is a JWT,
/// the `exp` claim is read so expired tokens can be rejected without a
/// round trip to the authority.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Result<Self, EmptyCredentialError> {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(EmptyCredentialError);
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }

    /// Expiry from the JWT `exp` claim, if the token is a JWT that carries one.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let mut segments = self.0.split('.');
        let (_header, payload, _signature) =
            (segments.next()?, segments.next()?, segments.next()?);
        if segments.next().is_some() {
            return None;
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
        let exp = claims.get("exp")?;
        let secs = exp
            .as_i64()
            .or_else(|| exp.as_f64().map(|f| f as i64))?;
        DateTime::from_timestamp(secs, 0)
    }

    /// Opaque tokens never expire locally; only the authority can reject them.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|exp| exp <= now)
    }
}

// Manual Debug impl to prevent leaking tokens in logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl TryFrom<String> for Credential {
    type Error = EmptyCredentialError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Credential {
    type Error = EmptyCredentialError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
