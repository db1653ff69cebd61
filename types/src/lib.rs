//! Core domain types for Tally.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod credential;
mod error;
mod ids;
mod query_key;

pub use credential::{Credential, EmptyCredentialError};
pub use error::ApiError;
pub use ids::UserId;
pub use query_key::QueryKey;

use serde::{Deserialize, Serialize};

// ============================================================================
// Identity
// ============================================================================

/// Account role as reported by the identity authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    #[default]
    Member,
    Viewer,
    /// Any role string this build does not know about.
    #[serde(other)]
    Unknown,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
            Role::Viewer => "viewer",
            Role::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verified user record derived from a credential.
///
/// Identities are immutable snapshots. Re-verification produces a new value
/// that replaces the old one wholesale; there are no setters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    id: UserId,
    #[serde(default)]
    email: String,
    #[serde(default)]
    role: Role,
    #[serde(default)]
    verified: bool,
}

impl Identity {
    #[must_use]
    pub fn new(id: UserId, email: impl Into<String>, role: Role, verified: bool) -> Self {
        Self {
            id,
            email: email.into(),
            role,
            verified,
        }
    }

    #[must_use]
    pub fn id(&self) -> &UserId {
        &self.id
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub const fn verified(&self) -> bool {
        self.verified
    }
}

// ============================================================================
// Session state
// ============================================================================

/// Whether the current user is known yet, and if so who it is.
///
/// `Resolved(None)` means "checked, nobody is signed in", which is distinct
/// from `Unresolved` ("not checked yet").
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unresolved,
    Resolved(Option<Identity>),
}

impl SessionState {
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, SessionState::Resolved(_))
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Resolved(Some(_)))
    }

    #[must_use]
    pub const fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::Resolved(Some(identity)) => Some(identity),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Unresolved => f.write_str("unresolved"),
            SessionState::Resolved(None) => f.write_str("signed out"),
            SessionState::Resolved(Some(identity)) if identity.email().is_empty() => {
                write!(f, "signed in as {} ({})", identity.id(), identity.role())
            }
            SessionState::Resolved(Some(identity)) => {
                write!(f, "signed in as {} ({})", identity.email(), identity.role())
            }
        }
    }
}
