//! Client-side session core.
//!
//! # Architecture
//!
//! - [`SessionStore`] - single source of truth for "who is signed in, and do we know yet"
//! - [`TokenVerifier`] - turns a persisted [`Credential`] into a store transition
//! - [`RouteGuard`] - render-or-redirect gate driven by store transitions
//! - [`CredentialStore`] - file-backed persistence for the credential
//!
//! ```text
//! CredentialStore::load() -> TokenVerifier::verify() -> SessionStore::resolve()
//!                                                             |
//!                                          (synchronous notification)
//!                                                             v
//!                                         RouteGuard -> Navigator::navigate()
//! ```
//!
//! [`Credential`]: tally_types::Credential

mod credentials;
mod guard;
mod store;
mod verifier;

pub use credentials::{CredentialError, CredentialStore};
pub use guard::{GuardKind, GuardRoutes, GuardState, GuardView, Navigator, RouteGuard};
pub use store::{SessionError, SessionStore, Subscription};
pub use verifier::{IdentityAuthority, TokenVerifier, VerifyError};

pub use tally_types::{Credential, Identity, SessionState};
