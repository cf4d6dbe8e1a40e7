use std::fmt;

use serde::{Deserialize, Serialize};

/// Access/refresh token pair returned by a successful device-code exchange.
///
/// # Example
/// ```
/// use devicelink::auth::Credential;
///
/// let credential = Credential {
///     access_token: "ghu_access".to_string(),
///     expires_in: 28800,
///     refresh_token: "ghr_refresh".to_string(),
///     refresh_token_expires_in: 15_897_600,
/// };
/// assert!(!format!("{credential:?}").contains("ghu_access"));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub expires_in: u64,
    pub refresh_token: String,
    pub refresh_token_expires_in: u64,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &"<redacted>")
            .field("refresh_token_expires_in", &self.refresh_token_expires_in)
            .finish()
    }
}

/// A logged-in identity and its credential.
///
/// Accounts are identified by username alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub credential: Credential,
}

impl Account {
    pub fn new(username: impl Into<String>, credential: Credential) -> Self {
        Self {
            username: username.into(),
            credential,
        }
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username
    }
}

impl Eq for Account {}
