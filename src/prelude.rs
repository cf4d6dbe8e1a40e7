//! Convenience re-exports for common use.

pub use crate::auth::{
    Account, AccountRegistry, AuthError, Credential, CredentialStore, DeviceCode, DeviceFlow,
    FlowState, HttpProviderClient, LoginHandle, PollPolicy, ProviderClient, SecretStore,
    SettingsStore,
};
pub use crate::config::{DeviceLinkConfig, SecretBackend};
pub use crate::error::{DeviceLinkError, Result};
pub use crate::session::{SessionManager, SessionState};
