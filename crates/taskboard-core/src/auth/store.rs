use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, warn};

use super::{Credential, MemoryTokenPersistence, TokenPersistence};

/// Sole owner of the current credential.
///
/// Reads are served from memory and never touch the persistence backend.
/// Every `set`/`clear` writes through to persistence before the new value
/// becomes visible, and observers registered with [`subscribe`] see each
/// change. Persistence failures are logged; the in-memory value still changes.
///
/// [`subscribe`]: CredentialStore::subscribe
pub struct CredentialStore {
    state: watch::Sender<Credential>,
    persistence: Arc<dyn TokenPersistence>,
    // Serializes writers so persisted and in-memory order agree.
    write_lock: Mutex<()>,
}

impl CredentialStore {
    /// Open a store backed by `persistence`, loading whatever it holds.
    pub fn open(persistence: Arc<dyn TokenPersistence>) -> Self {
        let initial = persistence.load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load stored credentials, starting signed out");
            Credential::default()
        });
        let (state, _) = watch::channel(initial);
        Self {
            state,
            persistence,
            write_lock: Mutex::new(()),
        }
    }

    /// A store that keeps nothing beyond the process lifetime.
    pub fn in_memory() -> Self {
        Self::open(Arc::new(MemoryTokenPersistence::default()))
    }

    pub fn get(&self) -> Credential {
        self.state.borrow().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.borrow().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.state.borrow().refresh_token.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    /// Replace both tokens.
    pub fn set(&self, access_token: impl Into<String>, refresh_token: impl Into<String>) {
        let credential = Credential::new(access_token, refresh_token);
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = self.persistence.save(&credential) {
            warn!(error = %e, "Failed to persist credentials");
        }
        self.state.send_replace(credential);
        debug!("Credentials updated");
    }

    /// Replace both tokens only if the store still holds `expected` as its
    /// refresh token. Returns whether the write happened.
    ///
    /// Used by the token refresh, which must not bring back a session that
    /// was cleared (or replaced by a new login) while it was in flight.
    pub fn set_if_refresh_token(
        &self,
        expected: &str,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> bool {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.state.borrow().refresh_token.as_deref() != Some(expected) {
            debug!("Credentials changed during refresh, not storing refreshed tokens");
            return false;
        }
        let credential = Credential::new(access_token, refresh_token);
        if let Err(e) = self.persistence.save(&credential) {
            warn!(error = %e, "Failed to persist credentials");
        }
        self.state.send_replace(credential);
        debug!("Credentials updated");
        true
    }

    /// Drop both tokens and the persisted entry. Safe to call repeatedly.
    pub fn clear(&self) {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.clear_locked();
    }

    /// Clear only if the store still holds `expected` as its refresh token.
    /// Returns whether anything was cleared.
    pub fn clear_if_refresh_token(&self, expected: &str) -> bool {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.state.borrow().refresh_token.as_deref() != Some(expected) {
            debug!("Credentials changed during refresh, leaving them in place");
            return false;
        }
        self.clear_locked();
        true
    }

    fn clear_locked(&self) {
        if let Err(e) = self.persistence.clear() {
            warn!(error = %e, "Failed to remove persisted credentials");
        }
        self.state.send_replace(Credential::default());
        debug!("Credentials cleared");
    }

    /// Observe credential changes (login, refresh, logout).
    pub fn subscribe(&self) -> watch::Receiver<Credential> {
        self.state.subscribe()
    }
}
