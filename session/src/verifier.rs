//! Credential verification.
//!
//! One external call per check. The outcome always lands in the
//! [`SessionStore`] except for network failures, which leave the store
//! untouched so the caller can retry or show a degraded state.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tally_types::{ApiError, Credential, Identity};
use thiserror::Error;

use crate::store::SessionStore;

/// The remote party that turns a credential into an identity.
pub trait IdentityAuthority: Send + Sync {
    fn identify(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<Identity, ApiError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// Absent, expired or rejected. The store has been resolved to `None`.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The check could not complete. The store was left as it was.
    #[error("network error: {0}")]
    Network(String),
}

impl VerifyError {
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

pub struct TokenVerifier<A> {
    authority: A,
    store: Arc<SessionStore>,
}

impl<A: IdentityAuthority> TokenVerifier<A> {
    pub fn new(authority: A, store: Arc<SessionStore>) -> Self {
        Self { authority, store }
    }

    #[must_use]
    pub fn authority(&self) -> &A {
        &self.authority
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Check `credential` and settle the session store accordingly.
    ///
    /// Not retried: a network failure is returned once and the store stays
    /// where it was.
    pub async fn verify(&self, credential: Option<&Credential>) -> Result<Identity, VerifyError> {
        let Some(credential) = credential else {
            tracing::info!("No stored credential; session resolves signed out");
            self.settle(None);
            return Err(VerifyError::Unauthorized("no credential".to_string()));
        };

        if credential.is_expired(Utc::now()) {
            tracing::info!("Stored credential has expired");
            self.settle(None);
            return Err(VerifyError::Unauthorized("credential expired".to_string()));
        }

        match self.authority.identify(credential).await {
            Ok(identity) => {
                tracing::info!(user = %identity.id(), role = %identity.role(), "Credential verified");
                self.settle(Some(identity.clone()));
                Ok(identity)
            }
            Err(err) if err.is_unauthorized() || err.is_client_error() => {
                tracing::info!(error = %err, "Credential rejected by authority");
                self.settle(None);
                Err(VerifyError::Unauthorized(err.to_string()))
            }
            Err(err) => {
                tracing::warn!(error = %err, "Credential check could not complete");
                Err(VerifyError::Network(err.to_string()))
            }
        }
    }

    fn settle(&self, identity: Option<Identity>) {
        if let Err(err) = self.store.resolve(identity) {
            tracing::warn!(error = %err, "Failed to record verification result");
        }
    }
}
