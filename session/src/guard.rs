//! Route guards.
//!
//! A guard wraps one view tree and maps the session state onto
//! `Loading`/`Blocked`/`Allowed`. Rendering is a pure read of the current
//! guard state; redirects happen only from the session listener (and once at
//! mount, which is itself a reaction to the state the guard was mounted into).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tally_types::SessionState;

use crate::store::{SessionStore, Subscription};

/// Routing collaborator. Receives logical route strings.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: &str);
}

impl<F> Navigator for F
where
    F: Fn(&str) + Send + Sync,
{
    fn navigate(&self, route: &str) {
        self(route);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    /// Only for signed-in users (e.g. `/dashboard`).
    Protected,
    /// Only for signed-out users (e.g. `/sign-in`).
    AuthOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Loading,
    Blocked,
    Allowed,
}

impl GuardState {
    #[must_use]
    pub const fn evaluate(kind: GuardKind, session: &SessionState) -> Self {
        match (kind, session) {
            (_, SessionState::Unresolved) => GuardState::Loading,
            (GuardKind::Protected, SessionState::Resolved(Some(_)))
            | (GuardKind::AuthOnly, SessionState::Resolved(None)) => GuardState::Allowed,
            (GuardKind::Protected, SessionState::Resolved(None))
            | (GuardKind::AuthOnly, SessionState::Resolved(Some(_))) => GuardState::Blocked,
        }
    }
}

/// What the guarded tree should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardView {
    /// Session not known yet.
    Placeholder,
    /// Render the guarded children unmodified.
    Children,
    /// A redirect has been issued; render nothing.
    Nothing,
}

/// Redirect targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardRoutes {
    pub sign_in: String,
    pub landing: String,
}

impl GuardRoutes {
    pub fn new(sign_in: impl Into<String>, landing: impl Into<String>) -> Self {
        Self {
            sign_in: sign_in.into(),
            landing: landing.into(),
        }
    }

    fn target(&self, kind: GuardKind) -> &str {
        match kind {
            GuardKind::Protected => &self.sign_in,
            GuardKind::AuthOnly => &self.landing,
        }
    }
}

impl Default for GuardRoutes {
    fn default() -> Self {
        Self::new("/sign-in", "/dashboard")
    }
}

struct GuardShared {
    kind: GuardKind,
    redirect_to: String,
    navigator: Arc<dyn Navigator>,
    state: Mutex<GuardState>,
    redirects: AtomicUsize,
}

impl GuardShared {
    fn react(&self, session: &SessionState) {
        let next = GuardState::evaluate(self.kind, session);
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, next)
        };

        if next == GuardState::Blocked && previous != GuardState::Blocked {
            self.redirects.fetch_add(1, Ordering::SeqCst);
            tracing::info!(
                kind = ?self.kind,
                to = %self.redirect_to,
                "Route guard blocked; redirecting"
            );
            self.navigator.navigate(&self.redirect_to);
        }
    }
}

/// A mounted guard. Dropping it unmounts (unsubscribes) the guard.
pub struct RouteGuard {
    shared: Arc<GuardShared>,
    _subscription: Subscription,
}

impl std::fmt::Debug for RouteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteGuard")
            .field("kind", &self.shared.kind)
            .field("state", &self.state())
            .field("redirects", &self.redirects())
            .finish_non_exhaustive()
    }
}

impl RouteGuard {
    pub fn mount(
        store: &Arc<SessionStore>,
        kind: GuardKind,
        routes: &GuardRoutes,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let shared = Arc::new(GuardShared {
            kind,
            redirect_to: routes.target(kind).to_string(),
            navigator,
            state: Mutex::new(GuardState::Loading),
            redirects: AtomicUsize::new(0),
        });

        let weak = Arc::downgrade(&shared);
        let subscription = store.subscribe(move |session| {
            if let Some(shared) = weak.upgrade() {
                shared.react(session);
            }
        });
        shared.react(&store.read());

        Self {
            shared,
            _subscription: subscription,
        }
    }

    #[must_use]
    pub fn kind(&self) -> GuardKind {
        self.shared.kind
    }

    #[must_use]
    pub fn state(&self) -> GuardState {
        *self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Pure: never navigates.
    #[must_use]
    pub fn render(&self) -> GuardView {
        match self.state() {
            GuardState::Loading => GuardView::Placeholder,
            GuardState::Allowed => GuardView::Children,
            GuardState::Blocked => GuardView::Nothing,
        }
    }

    /// Redirects issued since mount.
    #[must_use]
    pub fn redirects(&self) -> usize {
        self.shared.redirects.load(Ordering::SeqCst)
    }
}
