#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use devicelink::auth::{
    AccountRegistry, AuthError, Credential, CredentialStore, DeviceCode, MemorySecretStore,
    PollOutcome, ProviderClient, ProviderErrorCode, SecretStore, StoreError,
};
use devicelink::session::SessionManager;
use tokio::time::Instant;

pub fn credential(access_token: &str) -> Credential {
    Credential {
        access_token: access_token.to_string(),
        expires_in: 28800,
        refresh_token: format!("{access_token}-refresh"),
        refresh_token_expires_in: 15_897_600,
    }
}

pub fn device_code(interval: u64) -> DeviceCode {
    DeviceCode::new("device-123", "ABCD-EFGH", "https://github.com/login/device", 900, interval)
}

/// Provider double: polls are answered from a queue, pending once it drains.
pub struct ScriptedProvider {
    device_code: Mutex<Option<Result<DeviceCode, AuthError>>>,
    polls: Mutex<VecDeque<Result<PollOutcome, AuthError>>>,
    identity: Mutex<Option<Result<String, AuthError>>>,
    poll_count: AtomicU32,
    poll_times: Mutex<Vec<Instant>>,
}

impl ScriptedProvider {
    pub fn new(interval: u64) -> Self {
        Self {
            device_code: Mutex::new(Some(Ok(device_code(interval)))),
            polls: Mutex::new(VecDeque::new()),
            identity: Mutex::new(Some(Ok("octocat".to_string()))),
            poll_count: AtomicU32::new(0),
            poll_times: Mutex::new(Vec::new()),
        }
    }

    pub fn with_device_code_error(self, err: AuthError) -> Self {
        *self.device_code.lock().unwrap() = Some(Err(err));
        self
    }

    pub fn with_identity(self, result: Result<String, AuthError>) -> Self {
        *self.identity.lock().unwrap() = Some(result);
        self
    }

    pub fn then_pending(self, times: usize) -> Self {
        self.then_code(ProviderErrorCode::AuthorizationPending, times)
    }

    pub fn then_code(self, code: ProviderErrorCode, times: usize) -> Self {
        {
            let mut polls = self.polls.lock().unwrap();
            for _ in 0..times {
                polls.push_back(Ok(PollOutcome::Error(code)));
            }
        }
        self
    }

    pub fn then_authorized(self, access_token: &str) -> Self {
        self.polls
            .lock()
            .unwrap()
            .push_back(Ok(PollOutcome::Authorized(credential(access_token))));
        self
    }

    pub fn then_error(self, err: AuthError) -> Self {
        self.polls.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn poll_count(&self) -> u32 {
        self.poll_count.load(Ordering::SeqCst)
    }

    /// Seconds between consecutive polls, in paused-clock time.
    pub fn poll_gaps(&self) -> Vec<u64> {
        let times = self.poll_times.lock().unwrap();
        times
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_secs())
            .collect()
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn request_device_code(&self) -> Result<DeviceCode, AuthError> {
        self.device_code
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Ok(device_code(0)))
    }

    async fn poll_token(&self, _device_code: &str) -> Result<PollOutcome, AuthError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        self.poll_times.lock().unwrap().push(Instant::now());
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(PollOutcome::Error(ProviderErrorCode::AuthorizationPending)))
    }

    async fn fetch_identity(&self, _access_token: &str) -> Result<String, AuthError> {
        self.identity
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Ok("octocat".to_string()))
    }
}

/// Secret store whose writes can be switched to fail.
#[derive(Default)]
pub struct FlakySecretStore {
    inner: MemorySecretStore,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl FlakySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

impl SecretStore for FlakySecretStore {
    fn add(&self, service: &str, account: &str, data: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("keychain locked".to_string()));
        }
        self.inner.add(service, account, data)
    }

    fn read(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("keychain locked".to_string()));
        }
        self.inner.read(service, account)
    }

    fn delete(&self, service: &str, account: &str) -> Result<bool, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("keychain locked".to_string()));
        }
        self.inner.delete(service, account)
    }
}

/// A session manager over shared in-memory backends, so a second manager can
/// observe what the first persisted.
pub struct Backends {
    pub secrets: Arc<FlakySecretStore>,
    pub registry: AccountRegistry,
}

impl Backends {
    pub fn new() -> Self {
        Self {
            secrets: Arc::new(FlakySecretStore::new()),
            registry: AccountRegistry::in_memory(),
        }
    }

    pub fn store(&self) -> CredentialStore {
        CredentialStore::new(self.secrets.clone())
    }

    pub fn session(&self) -> SessionManager {
        SessionManager::new(self.store(), self.registry.clone())
    }
}
