//! Multi-account session management.
//!
//! [`SessionManager`] is the single owner of the logged-in state. It combines
//! the [`CredentialStore`], the [`AccountRegistry`] and, for interactive
//! logins, a [`DeviceFlow`].

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{watch, Mutex as AsyncMutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::{
    Account, AccountRegistry, AuthError, CredentialStore, DeviceCode, DeviceFlow, LoginHandle,
};

/// What the presentation layer should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Loading,
    LoggedOut,
    LoggedIn(Account),
}

impl SessionState {
    pub fn account(&self) -> Option<&Account> {
        match self {
            Self::LoggedIn(account) => Some(account),
            _ => None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.account().map(|account| account.username.as_str())
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(self, Self::LoggedIn(_))
    }
}

/// Login / logout / switch / restore over persisted accounts.
///
/// Every mutation is serialized; observers see `Loading` while a change is in
/// flight and either the committed state or the restored prior state after.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use devicelink::auth::{AccountRegistry, CredentialStore, MemorySecretStore};
/// use devicelink::session::{SessionManager, SessionState};
///
/// # async fn example() {
/// let session = SessionManager::new(
///     CredentialStore::new(Arc::new(MemorySecretStore::new())),
///     AccountRegistry::in_memory(),
/// );
/// assert_eq!(session.restore().await, SessionState::LoggedOut);
/// # }
/// ```
pub struct SessionManager {
    store: CredentialStore,
    registry: AccountRegistry,
    state: watch::Sender<SessionState>,
    last_error: Mutex<Option<String>>,
    op_lock: AsyncMutex<()>,
    pending_login: Mutex<Option<(Uuid, CancellationToken)>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &*self.state.borrow())
            .field("store", &self.store)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(store: CredentialStore, registry: AccountRegistry) -> Self {
        let (state, _) = watch::channel(SessionState::Loading);
        Self {
            store,
            registry,
            state,
            last_error: Mutex::new(None),
            op_lock: AsyncMutex::new(()),
            pending_login: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Message of the most recent failed change, kept until cleared.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_error(&self) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn list_known_accounts(&self) -> Vec<String> {
        self.registry.known()
    }

    /// Resolves the persisted active account, falling back to `LoggedOut`.
    ///
    /// A pointer whose credential is missing or unreadable is cleared along
    /// with its registry entry.
    pub async fn restore(&self) -> SessionState {
        let _guard = self.op_lock.lock().await;
        self.publish(SessionState::Loading);

        let next = match self.registry.active() {
            None => SessionState::LoggedOut,
            Some(username) => match self.store.read(&username) {
                Ok(Some(credential)) => {
                    tracing::info!(%username, "restored session");
                    SessionState::LoggedIn(Account::new(username, credential))
                }
                Ok(None) => {
                    tracing::info!(%username, "active account has no stored credential");
                    self.forget(&username);
                    SessionState::LoggedOut
                }
                Err(err) => {
                    tracing::warn!(%username, error = %err, "failed to read active credential");
                    self.forget(&username);
                    SessionState::LoggedOut
                }
            },
        };
        self.publish(next.clone());
        next
    }

    /// Persists `account` and makes it the active one.
    pub async fn login(&self, account: Account) -> Result<(), AuthError> {
        let guard = self.op_lock.lock().await;
        self.commit_login(&guard, account)
    }

    /// Leaves the current account. With `remove_credential`, its credential
    /// and registry entry are erased too.
    ///
    /// Outside `LoggedIn` this does nothing.
    pub async fn logout(&self, remove_credential: bool) -> Result<(), AuthError> {
        let guard = self.op_lock.lock().await;
        let account = match self.state() {
            SessionState::LoggedIn(account) => account,
            other => {
                tracing::debug!(state = ?other, "logout ignored outside a logged-in session");
                return Ok(());
            }
        };
        self.attempt(&guard, "logout", || {
            if remove_credential {
                self.store.delete(&account.username)?;
                self.registry.remove_known(&account.username);
                self.registry.set_active(None);
            }
            tracing::info!(username = %account.username, remove_credential, "logged out");
            Ok(Some(SessionState::LoggedOut))
        })
    }

    /// Activates a stored account.
    ///
    /// A username without a stored credential leaves the state untouched and
    /// is dropped from the registry; it is not reported as an error.
    pub async fn switch_account(&self, username: &str) -> Result<(), AuthError> {
        let guard = self.op_lock.lock().await;
        self.attempt(&guard, "switch_account", || {
            match self.store.read(username)? {
                Some(credential) => {
                    self.registry.set_active(Some(username));
                    tracing::info!(%username, "switched account");
                    Ok(Some(SessionState::LoggedIn(Account::new(username, credential))))
                }
                None => {
                    tracing::debug!(%username, "no stored credential to switch to");
                    self.registry.remove_known(username);
                    Ok(None)
                }
            }
        })
    }

    /// Starts a device-code login in the background.
    ///
    /// Any attempt still in flight is cancelled first. A successful attempt is
    /// committed through [`login`](Self::login) unless it was cancelled while
    /// finishing.
    pub fn start_login<F>(self: &Arc<Self>, flow: Arc<DeviceFlow>, prompt: F) -> LoginHandle
    where
        F: FnOnce(&DeviceCode) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let attempt_id = Uuid::new_v4();
        let previous = self
            .pending_login
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((attempt_id, cancel.clone()));
        if let Some((_, previous)) = previous {
            tracing::debug!("cancelling previous login attempt");
            previous.cancel();
        }

        let session = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let result = match flow.authorize(prompt, &token).await {
                Ok(account) => session.login_unless_cancelled(account, &token).await,
                Err(err) => {
                    if !err.is_cancelled() {
                        session.record_error(&err);
                    }
                    Err(err)
                }
            };
            session.finish_login(attempt_id);
            result
        });
        LoginHandle::new(cancel, task)
    }

    async fn login_unless_cancelled(
        &self,
        account: Account,
        cancel: &CancellationToken,
    ) -> Result<Account, AuthError> {
        let guard = self.op_lock.lock().await;
        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }
        self.commit_login(&guard, account.clone())?;
        Ok(account)
    }

    fn finish_login(&self, attempt_id: Uuid) {
        let mut pending = self
            .pending_login
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // A newer attempt may already own the slot.
        if pending.as_ref().is_some_and(|(id, _)| *id == attempt_id) {
            *pending = None;
        }
    }

    fn commit_login(&self, guard: &MutexGuard<'_, ()>, account: Account) -> Result<(), AuthError> {
        self.attempt(guard, "login", || {
            self.store.save(&account.username, &account.credential)?;
            self.registry.add_known(&account.username);
            self.registry.set_active(Some(&account.username));
            tracing::info!(username = %account.username, "logged in");
            Ok(Some(SessionState::LoggedIn(account)))
        })
    }

    /// Snapshot → `Loading` → commit, or restore the snapshot on error.
    ///
    /// `change` returns `None` to keep the prior state. The guard proves the
    /// caller holds the operation lock.
    fn attempt<F>(
        &self,
        _guard: &MutexGuard<'_, ()>,
        operation: &str,
        change: F,
    ) -> Result<(), AuthError>
    where
        F: FnOnce() -> Result<Option<SessionState>, AuthError>,
    {
        let snapshot = self.state();
        self.publish(SessionState::Loading);
        match change() {
            Ok(Some(next)) => {
                self.publish(next);
                Ok(())
            }
            Ok(None) => {
                self.publish(snapshot);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    operation,
                    error = %err,
                    "session change failed; restoring previous state"
                );
                self.record_error(&err);
                self.publish(snapshot);
                Err(err)
            }
        }
    }

    fn forget(&self, username: &str) {
        self.registry.set_active(None);
        self.registry.remove_known(username);
    }

    fn record_error(&self, err: &AuthError) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
    }

    fn publish(&self, state: SessionState) {
        self.state.send_replace(state);
    }
}
