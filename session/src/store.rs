//! Session store with synchronous, non-reentrant notification.
//!
//! The application holds exactly one store for its whole lifetime
//! ([`SessionStore::global`]). Tests construct their own with
//! [`SessionStore::new`] or call [`SessionStore::reset`] on the global one.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use tally_types::{Identity, SessionState};
use thiserror::Error;

type Listener = Arc<dyn Fn(&SessionState) + Send + Sync>;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Stores currently delivering a notification on this thread.
    static NOTIFYING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session transition requested from inside a session listener")]
    Reentrant,
}

struct Inner {
    state: SessionState,
    listeners: Vec<(u64, Listener)>,
    next_listener: u64,
}

pub struct SessionStore {
    id: u64,
    inner: Mutex<Inner>,
    /// Serializes transition + notification so listeners observe
    /// transitions in the order they were applied.
    transition: Mutex<()>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("SessionStore")
            .field("state", &inner.state)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(Inner {
                state: SessionState::Unresolved,
                listeners: Vec::new(),
                next_listener: 0,
            }),
            transition: Mutex::new(()),
        })
    }

    /// The process-wide store. Created on first use, never dropped.
    pub fn global() -> &'static Arc<SessionStore> {
        static STORE: OnceLock<Arc<SessionStore>> = OnceLock::new();
        STORE.get_or_init(SessionStore::new)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn read(&self) -> SessionState {
        self.lock().state.clone()
    }

    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.lock().state.identity().cloned()
    }

    /// Settle the current credential check. `None` means nobody is signed in.
    ///
    /// Concurrent calls are last-write-wins.
    pub fn resolve(&self, identity: Option<Identity>) -> Result<(), SessionError> {
        self.transition(SessionState::Resolved(identity))
    }

    /// Go back to `Unresolved` ahead of a fresh credential check
    /// (logout, login with a new credential).
    pub fn begin_recheck(&self) -> Result<(), SessionError> {
        self.transition(SessionState::Unresolved)
    }

    /// Drop all listeners and return to `Unresolved` without notifying.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = SessionState::Unresolved;
        inner.listeners.clear();
    }

    /// Register a listener for every state transition.
    ///
    /// The listener runs synchronously on the thread that performed the
    /// transition and must not call [`resolve`](Self::resolve) or
    /// [`begin_recheck`](Self::begin_recheck); such calls fail with
    /// [`SessionError::Reentrant`].
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = inner.next_listener;
        inner.next_listener += 1;
        inner.listeners.push((id, Arc::new(listener)));
        Subscription {
            store: Arc::downgrade(self),
            id,
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn unsubscribe(&self, id: u64) {
        self.lock().listeners.retain(|(listener_id, _)| *listener_id != id);
    }

    fn is_notifying(&self) -> bool {
        NOTIFYING.with(|stack| stack.borrow().contains(&self.id))
    }

    fn transition(&self, next: SessionState) -> Result<(), SessionError> {
        if self.is_notifying() {
            tracing::warn!("Rejected session transition from inside a session listener");
            return Err(SessionError::Reentrant);
        }

        let _serialized = self
            .transition
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let (state, listeners) = {
            let mut inner = self.lock();
            if inner.state == next {
                return Ok(());
            }
            inner.state = next;
            let listeners: Vec<Listener> =
                inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
            (inner.state.clone(), listeners)
        };

        tracing::debug!(state = %state, listeners = listeners.len(), "Session transition");

        let _notifying = NotifyScope::enter(self.id);
        for listener in listeners {
            listener(&state);
        }
        Ok(())
    }
}

/// Marks a store as notifying on this thread until dropped.
struct NotifyScope(u64);

impl NotifyScope {
    fn enter(id: u64) -> Self {
        NOTIFYING.with(|stack| stack.borrow_mut().push(id));
        Self(id)
    }
}

impl Drop for NotifyScope {
    fn drop(&mut self) {
        NOTIFYING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|id| *id == self.0) {
                stack.remove(pos);
            }
        });
    }
}

/// Listener registration. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
#[derive(Debug)]
pub struct Subscription {
    store: Weak<SessionStore>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(self.id);
        }
    }
}
