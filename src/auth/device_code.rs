use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::Credential;

/// Device-code grant details returned by the provider.
///
/// `issued_at` is stamped locally when the response is decoded and is not
/// part of the wire format.
///
/// # Example
/// ```
/// use devicelink::auth::DeviceCode;
///
/// let code = DeviceCode::new("abc", "ABCD-EFGH", "https://github.com/login/device", 900, 5);
/// assert!(code.seconds_remaining() > 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    pub interval: u64,
    #[serde(skip, default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
}

impl DeviceCode {
    pub fn new(
        device_code: impl Into<String>,
        user_code: impl Into<String>,
        verification_uri: impl Into<String>,
        expires_in: u64,
        interval: u64,
    ) -> Self {
        Self {
            device_code: device_code.into(),
            user_code: user_code.into(),
            verification_uri: verification_uri.into(),
            expires_in,
            interval,
            issued_at: Utc::now(),
        }
    }

    /// Saturates at the latest representable instant.
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.expires_in)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|lifetime| self.issued_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whole seconds until the user code stops being accepted, clamped at zero.
    pub fn seconds_remaining(&self) -> u64 {
        self.seconds_remaining_at(Utc::now())
    }

    pub fn seconds_remaining_at(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.expires_at() - now).num_seconds()).unwrap_or(0)
    }
}

/// Error codes the token endpoint reports while a device code is outstanding.
///
/// `InvalidFormat` is never sent by a provider; it stands in for any error
/// string or body shape that is not recognised.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderErrorCode {
    AuthorizationPending,
    SlowDown,
    AccessDenied,
    InvalidGrant,
    ExpiredToken,
    InvalidFormat,
}

impl ProviderErrorCode {
    /// Maps a wire error string, folding unknown values into `InvalidFormat`.
    pub fn from_wire(value: &str) -> Self {
        value.parse().unwrap_or(Self::InvalidFormat)
    }

    /// Whether polling may continue after this code.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::AuthorizationPending | Self::SlowDown)
    }
}

/// Decoded answer of a single token poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Authorized(Credential),
    Error(ProviderErrorCode),
}
