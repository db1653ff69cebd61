//! Tally's client core, assembled.
//!
//! [`Dashboard`] wires the session store, token verifier, route guards,
//! query cache and REST client into the operations a front end drives:
//! start-up verification, login/logout, guarded views and resource
//! reads/writes.

mod dashboard;
mod resource;

pub use dashboard::Dashboard;
pub use resource::{Resource, UnknownResource};

pub use tally_config::{ResolvedConfig, TallyConfig};
pub use tally_query::{CacheStatus, QueryCache};
pub use tally_session::{GuardKind, GuardState, GuardView, Navigator, RouteGuard, SessionStore};
pub use tally_types::{ApiError, Identity, SessionState};
