//! Device-code login, credential storage, and the account registry.

pub mod client;
pub mod credential;
pub mod device_code;
pub mod error;
pub mod flow;
pub mod registry;
pub mod store;

pub use client::{HttpProviderClient, ProviderClient};
pub use credential::{Account, Credential};
pub use device_code::{DeviceCode, PollOutcome, ProviderErrorCode};
pub use error::{AuthError, StoreError};
pub use flow::{DeviceFlow, FlowState, LoginHandle, PollPolicy, PollReport};
pub use registry::{AccountRegistry, FileSettings, MemorySettings, SettingsStore};
#[cfg(feature = "keychain")]
pub use store::KeyringSecretStore;
pub use store::{CredentialStore, FileSecretStore, MemorySecretStore, SecretStore};
