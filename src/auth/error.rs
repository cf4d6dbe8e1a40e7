use reqwest::StatusCode;
use thiserror::Error;

use super::device_code::ProviderErrorCode;

/// Failures of the secure secret-store primitive.
///
/// "Not found" is never an error here; store reads return `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("An entry already exists for {service}/{account}")]
    Duplicate { service: String, account: String },
    #[error("{0}")]
    Backend(String),
}

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        Self::Backend(error.to_string())
    }
}

/// Errors raised while logging in or managing stored accounts.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Network error: {0}")]
    Transport(String),
    #[error("HTTP error: {}", describe_status(*status))]
    HttpStatus { status: u16 },
    #[error("Invalid response: {0}")]
    Decode(String),
    #[error("Authorization rejected: {0}")]
    Provider(ProviderErrorCode),
    #[error("Authorization timed out after {attempts} attempts")]
    PollTimeout { attempts: u32 },
    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),
    #[error("Login error: {0}")]
    IdentityResolution(String),
    #[error("Login cancelled")]
    Cancelled,
}

impl AuthError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status } => Some(*status),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

fn describe_status(status: u16) -> String {
    match StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
    {
        Some(reason) => format!("{status} {reason}"),
        None => format!("unknown status {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_message_uses_canonical_reason() {
        let err = AuthError::HttpStatus { status: 401 };
        assert_eq!(err.to_string(), "HTTP error: 401 Unauthorized");
        assert_eq!(err.status(), Some(401));
    }

    #[test]
    fn http_status_message_handles_unassigned_codes() {
        let err = AuthError::HttpStatus { status: 599 };
        assert_eq!(err.to_string(), "HTTP error: unknown status 599");
    }

    #[test]
    fn provider_error_displays_wire_code() {
        let err = AuthError::Provider(ProviderErrorCode::AccessDenied);
        assert_eq!(err.to_string(), "Authorization rejected: access_denied");
    }

    #[test]
    fn store_error_converts_into_auth_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: AuthError = StoreError::from(io).into();
        assert!(matches!(
            err,
            AuthError::Store(StoreError::Backend(message)) if message.contains("denied")
        ));
    }
}
