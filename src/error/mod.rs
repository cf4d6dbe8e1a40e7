//! Error types for devicelink.

use thiserror::Error;

use crate::auth::AuthError;

/// Top-level error for configuration, bootstrap and the CLI.
#[derive(Error, Debug)]
pub enum DeviceLinkError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl DeviceLinkError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

impl From<toml::de::Error> for DeviceLinkError {
    fn from(error: toml::de::Error) -> Self {
        Self::Configuration(error.to_string())
    }
}

/// Result alias using [`DeviceLinkError`].
pub type Result<T> = std::result::Result<T, DeviceLinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_display_transparently() {
        let err: DeviceLinkError = AuthError::PollTimeout { attempts: 101 }.into();
        assert_eq!(err.to_string(), "Authorization timed out after 101 attempts");
    }

    #[test]
    fn toml_errors_become_configuration_errors() {
        let parse = toml::from_str::<toml::Table>("= broken").unwrap_err();
        let err: DeviceLinkError = parse.into();
        assert!(matches!(err, DeviceLinkError::Configuration(_)));
    }
}
