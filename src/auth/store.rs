use std::collections::HashMap;
use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::credential::Credential;
use super::error::{AuthError, StoreError};

/// Default namespace under which credentials are filed.
pub const DEFAULT_SERVICE: &str = "dev.devicelink.credentials";

const RECORD_VERSION: u32 = 1;

/// Byte-oriented secret storage keyed by `(service, account)`.
///
/// Mirrors a platform keychain: `add` refuses to overwrite, `read` reports a
/// missing entry as `Ok(None)`, and `delete` reports whether anything was
/// removed.
pub trait SecretStore: Send + Sync {
    fn add(&self, service: &str, account: &str, secret: &[u8]) -> Result<(), StoreError>;
    fn read(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn delete(&self, service: &str, account: &str) -> Result<bool, StoreError>;
}

/// Typed credential storage over a [`SecretStore`].
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use devicelink::auth::{Credential, CredentialStore, MemorySecretStore};
///
/// let store = CredentialStore::new(Arc::new(MemorySecretStore::new()));
/// let credential = Credential {
///     access_token: "ghu_access".to_string(),
///     expires_in: 28800,
///     refresh_token: "ghr_refresh".to_string(),
///     refresh_token_expires_in: 15_897_600,
/// };
/// store.save("octocat", &credential)?;
/// assert_eq!(store.read("octocat")?, Some(credential));
/// # Ok::<(), devicelink::auth::AuthError>(())
/// ```
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn SecretStore>,
    service: String,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn SecretStore>) -> Self {
        Self {
            backend,
            service: DEFAULT_SERVICE.to_string(),
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Replaces any existing entry for `account`.
    ///
    /// Delete-then-add; a crash in between leaves the entry absent.
    pub fn save_bytes(&self, account: &str, data: &[u8]) -> Result<(), AuthError> {
        self.backend.delete(&self.service, account)?;
        self.backend.add(&self.service, account, data)?;
        Ok(())
    }

    pub fn read_bytes(&self, account: &str) -> Result<Option<Vec<u8>>, AuthError> {
        Ok(self.backend.read(&self.service, account)?)
    }

    /// Removes the entry for `account`; a missing entry is not an error.
    pub fn delete(&self, account: &str) -> Result<(), AuthError> {
        let removed = self.backend.delete(&self.service, account)?;
        if !removed {
            tracing::debug!(account, "no stored credential to delete");
        }
        Ok(())
    }

    pub fn save_record<T: Serialize>(&self, account: &str, value: &T) -> Result<(), AuthError> {
        let data = serde_json::to_vec(value)
            .map_err(|err| StoreError::Backend(format!("Failed to encode record: {err}")))?;
        self.save_bytes(account, &data)
    }

    /// Reads a structured record. Undecodable data reads as absent.
    pub fn read_record<T: DeserializeOwned>(&self, account: &str) -> Result<Option<T>, AuthError> {
        let Some(data) = self.read_bytes(account)? else {
            return Ok(None);
        };
        match serde_json::from_slice(&data) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!(account, error = %err, "stored record could not be decoded");
                Ok(None)
            }
        }
    }

    pub fn save(&self, username: &str, credential: &Credential) -> Result<(), AuthError> {
        let record = CredentialRecord {
            version: RECORD_VERSION,
            username: username.to_string(),
            credential: credential.clone(),
            saved_at: Utc::now(),
        };
        self.save_record(username, &record)
    }

    pub fn read(&self, username: &str) -> Result<Option<Credential>, AuthError> {
        let Some(record) = self.read_record::<CredentialRecord>(username)? else {
            return Ok(None);
        };
        if record.version != RECORD_VERSION {
            tracing::warn!(
                username,
                version = record.version,
                "unsupported credential record version"
            );
            return Ok(None);
        }
        Ok(Some(record.credential))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialRecord {
    version: u32,
    username: String,
    credential: Credential,
    saved_at: DateTime<Utc>,
}

/// In-process secret store. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), Vec<u8>>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Backend("memory secret store lock poisoned".to_string()))
    }
}

impl SecretStore for MemorySecretStore {
    fn add(&self, service: &str, account: &str, secret: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries()?;
        let key = (service.to_string(), account.to_string());
        if entries.contains_key(&key) {
            return Err(StoreError::Duplicate {
                service: service.to_string(),
                account: account.to_string(),
            });
        }
        entries.insert(key, secret.to_vec());
        Ok(())
    }

    fn read(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .entries()?
            .get(&(service.to_string(), account.to_string()))
            .cloned())
    }

    fn delete(&self, service: &str, account: &str) -> Result<bool, StoreError> {
        Ok(self
            .entries()?
            .remove(&(service.to_string(), account.to_string()))
            .is_some())
    }
}

/// File-backed secret store: one `0600` file per entry,
/// `<base>/<service>/<account>.secret`.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    base_dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn entry_path(&self, service: &str, account: &str) -> PathBuf {
        self.base_dir
            .join(encode_label(service))
            .join(format!("{}.secret", encode_label(account)))
    }
}

impl SecretStore for FileSecretStore {
    fn add(&self, service: &str, account: &str, secret: &[u8]) -> Result<(), StoreError> {
        let path = self.entry_path(service, account);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = match options.open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::Duplicate {
                    service: service.to_string(),
                    account: account.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        let written = file.write_all(secret).and_then(|()| file.sync_all());
        if let Err(err) = written {
            let _ = fs::remove_file(&path);
            return Err(err.into());
        }
        Ok(())
    }

    fn read(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.entry_path(service, account)) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, service: &str, account: &str) -> Result<bool, StoreError> {
        match fs::remove_file(self.entry_path(service, account)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// OS keychain store (macOS Keychain, Windows Credential Manager, Secret Service).
#[cfg(feature = "keychain")]
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringSecretStore;

#[cfg(feature = "keychain")]
impl KeyringSecretStore {
    pub fn new() -> Self {
        Self
    }

    fn entry(service: &str, account: &str) -> Result<keyring::Entry, StoreError> {
        keyring::Entry::new(service, account).map_err(|err| StoreError::Backend(err.to_string()))
    }
}

#[cfg(feature = "keychain")]
impl SecretStore for KeyringSecretStore {
    fn add(&self, service: &str, account: &str, secret: &[u8]) -> Result<(), StoreError> {
        let entry = Self::entry(service, account)?;
        match entry.get_secret() {
            Ok(_) => Err(StoreError::Duplicate {
                service: service.to_string(),
                account: account.to_string(),
            }),
            Err(keyring::Error::NoEntry) => entry
                .set_secret(secret)
                .map_err(|err| StoreError::Backend(err.to_string())),
            Err(err) => Err(StoreError::Backend(err.to_string())),
        }
    }

    fn read(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match Self::entry(service, account)?.get_secret() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(StoreError::Backend(err.to_string())),
        }
    }

    fn delete(&self, service: &str, account: &str) -> Result<bool, StoreError> {
        match Self::entry(service, account)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(err) => Err(StoreError::Backend(err.to_string())),
        }
    }
}

/// Makes a label safe as a single path component while keeping distinct
/// labels distinct.
fn encode_label(value: &str) -> String {
    if value.is_empty() {
        return "%".to_string();
    }
    let mut out = String::with_capacity(value.len());
    for (index, byte) in value.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric()
            || byte == b'-'
            || byte == b'_'
            || (byte == b'.' && index > 0);
        if keep {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
