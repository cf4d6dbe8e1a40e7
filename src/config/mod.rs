//! Configuration system (layered: defaults < config file < environment).

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::auth::client::{
    DEFAULT_ACCESS_TOKEN_URL, DEFAULT_CLIENT_ID, DEFAULT_DEVICE_CODE_URL, DEFAULT_IDENTITY_URL,
};
use crate::auth::flow::{DEFAULT_MAX_ATTEMPTS, DEFAULT_SLOW_DOWN_STEP};
use crate::auth::store::DEFAULT_SERVICE;
use crate::auth::{
    AccountRegistry, CredentialStore, DeviceFlow, FileSecretStore, FileSettings,
    HttpProviderClient, PollPolicy, SecretStore,
};
use crate::error::{DeviceLinkError, Result};
use crate::session::SessionManager;

const CONFIG_FILE_NAME: &str = "config.toml";
const SETTINGS_FILE_NAME: &str = "settings.toml";
const CREDENTIALS_DIR_NAME: &str = "credentials";

/// Where account secrets are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SecretBackend {
    /// Owner-only files under the data directory.
    #[default]
    File,
    /// The operating system keychain (requires the `keychain` feature).
    Keychain,
}

/// Settings for the provider endpoints, polling, and on-disk locations.
///
/// # Example
/// ```no_run
/// use devicelink::config::DeviceLinkConfig;
///
/// let config = DeviceLinkConfig::from_env()?;
/// let session = config.session_manager()?;
/// # Ok::<(), devicelink::error::DeviceLinkError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceLinkConfig {
    pub client_id: String,
    pub device_code_url: String,
    pub token_url: String,
    pub identity_url: String,
    pub service: String,
    pub data_dir: PathBuf,
    pub secret_backend: SecretBackend,
    pub max_poll_attempts: u32,
    pub slow_down_step_secs: u64,
}

impl Default for DeviceLinkConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            device_code_url: DEFAULT_DEVICE_CODE_URL.to_string(),
            token_url: DEFAULT_ACCESS_TOKEN_URL.to_string(),
            identity_url: DEFAULT_IDENTITY_URL.to_string(),
            service: DEFAULT_SERVICE.to_string(),
            data_dir: Self::default_dir(),
            secret_backend: SecretBackend::default(),
            max_poll_attempts: DEFAULT_MAX_ATTEMPTS,
            slow_down_step_secs: DEFAULT_SLOW_DOWN_STEP.as_secs(),
        }
    }
}

impl DeviceLinkConfig {
    /// `~/.devicelink`, or `.devicelink` when no home directory is known.
    pub fn default_dir() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".devicelink"))
            .unwrap_or_else(|| PathBuf::from(".devicelink"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_dir().join(CONFIG_FILE_NAME)
    }

    /// Load a TOML config file. A missing file yields the defaults.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(DeviceLinkError::Io(err)),
        };
        let config: Self = toml::from_str(&raw).map_err(|err| {
            DeviceLinkError::configuration(format!("Invalid config file {}: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_poll_attempts == 0 {
            return Err(DeviceLinkError::configuration(
                "max_poll_attempts must be a positive integer, got `0`",
            ));
        }
        Ok(())
    }

    /// Defaults, then the config file (`DEVICELINK_CONFIG` or the default
    /// path), then `DEVICELINK_*` environment variables. `.env` is honoured.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let path = std::env::var_os("DEVICELINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_config_path);
        let mut config = Self::load_from_path(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values from an environment lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let strings = [
            ("DEVICELINK_CLIENT_ID", &mut self.client_id),
            ("DEVICELINK_DEVICE_CODE_URL", &mut self.device_code_url),
            ("DEVICELINK_TOKEN_URL", &mut self.token_url),
            ("DEVICELINK_IDENTITY_URL", &mut self.identity_url),
            ("DEVICELINK_SERVICE", &mut self.service),
        ];
        for (var, slot) in strings {
            if let Some(value) = lookup(var).filter(|value| !value.trim().is_empty()) {
                *slot = value;
            }
        }

        if let Some(dir) = lookup("DEVICELINK_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(backend) = lookup("DEVICELINK_SECRET_BACKEND") {
            self.secret_backend = backend.trim().parse().map_err(|_| {
                DeviceLinkError::configuration(format!(
                    "DEVICELINK_SECRET_BACKEND must be `file` or `keychain`, got `{backend}`"
                ))
            })?;
        }
        if let Some(attempts) = lookup("DEVICELINK_MAX_POLL_ATTEMPTS") {
            let parsed = attempts.trim().parse::<NonZeroU32>().map_err(|_| {
                DeviceLinkError::configuration(format!(
                    "DEVICELINK_MAX_POLL_ATTEMPTS must be a positive integer, got `{attempts}`"
                ))
            })?;
            self.max_poll_attempts = parsed.get();
        }
        Ok(())
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE_NAME)
    }

    pub fn credentials_dir(&self) -> PathBuf {
        self.data_dir.join(CREDENTIALS_DIR_NAME)
    }

    pub fn provider_client(&self) -> HttpProviderClient {
        HttpProviderClient::new()
            .with_client_id(&self.client_id)
            .with_device_code_url(&self.device_code_url)
            .with_access_token_url(&self.token_url)
            .with_identity_url(&self.identity_url)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::builder()
            .max_attempts(self.max_poll_attempts)
            .slow_down_step(Duration::from_secs(self.slow_down_step_secs))
            .build()
    }

    pub fn device_flow(&self) -> DeviceFlow {
        DeviceFlow::new(Arc::new(self.provider_client())).with_policy(self.poll_policy())
    }

    pub fn secret_store(&self) -> Result<Arc<dyn SecretStore>> {
        match self.secret_backend {
            SecretBackend::File => Ok(Arc::new(FileSecretStore::new(self.credentials_dir()))),
            #[cfg(feature = "keychain")]
            SecretBackend::Keychain => Ok(Arc::new(crate::auth::KeyringSecretStore::new())),
            #[cfg(not(feature = "keychain"))]
            SecretBackend::Keychain => Err(DeviceLinkError::configuration(
                "the keychain secret backend requires the `keychain` feature",
            )),
        }
    }

    pub fn credential_store(&self) -> Result<CredentialStore> {
        Ok(CredentialStore::new(self.secret_store()?).with_service(&self.service))
    }

    pub fn account_registry(&self) -> AccountRegistry {
        AccountRegistry::new(Arc::new(FileSettings::new(self.settings_path())))
    }

    pub fn session_manager(&self) -> Result<SessionManager> {
        Ok(SessionManager::new(
            self.credential_store()?,
            self.account_registry(),
        ))
    }
}
