use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde_json::Value;

use crate::auth::credential::Credential;
use crate::auth::device_code::{DeviceCode, PollOutcome, ProviderErrorCode};
use crate::auth::error::AuthError;

pub const DEFAULT_CLIENT_ID: &str = "Iv23liNQh5gHzWzzLksa";
pub const DEFAULT_DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
pub const DEFAULT_ACCESS_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
pub const DEFAULT_IDENTITY_URL: &str = "https://api.github.com/user";
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

const USER_AGENT_VALUE: &str = concat!("devicelink/", env!("CARGO_PKG_VERSION"));

/// The three provider calls behind a device-code login.
///
/// Implementations never retry; pacing and retry policy belong to
/// [`DeviceFlow`](crate::auth::DeviceFlow).
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn request_device_code(&self) -> Result<DeviceCode, AuthError>;
    async fn poll_token(&self, device_code: &str) -> Result<PollOutcome, AuthError>;
    async fn fetch_identity(&self, access_token: &str) -> Result<String, AuthError>;
}

/// reqwest-backed provider client, pointed at GitHub by default.
///
/// # Example
/// ```no_run
/// use devicelink::auth::{HttpProviderClient, ProviderClient};
///
/// # async fn example() -> Result<(), devicelink::auth::AuthError> {
/// let client = HttpProviderClient::new().with_client_id("Iv23liExample");
/// let code = client.request_device_code().await?;
/// println!("Visit {} and enter {}", code.verification_uri, code.user_code);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpProviderClient {
    client: reqwest::Client,
    client_id: String,
    device_code_url: String,
    access_token_url: String,
    identity_url: String,
}

impl Default for HttpProviderClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpProviderClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            device_code_url: DEFAULT_DEVICE_CODE_URL.to_string(),
            access_token_url: DEFAULT_ACCESS_TOKEN_URL.to_string(),
            identity_url: DEFAULT_IDENTITY_URL.to_string(),
        }
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_device_code_url(mut self, url: impl Into<String>) -> Self {
        self.device_code_url = url.into();
        self
    }

    pub fn with_access_token_url(mut self, url: impl Into<String>) -> Self {
        self.access_token_url = url.into();
        self
    }

    pub fn with_identity_url(mut self, url: impl Into<String>) -> Self {
        self.identity_url = url.into();
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn request_device_code(&self) -> Result<DeviceCode, AuthError> {
        let resp = self
            .client
            .post(&self.device_code_url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, USER_AGENT_VALUE)
            .form(&[("client_id", self.client_id.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AuthError::HttpStatus {
                status: status.as_u16(),
            });
        }
        let body = resp.bytes().await?;
        let code: DeviceCode = serde_json::from_slice(&body)?;
        tracing::debug!(
            expires_in = code.expires_in,
            interval_secs = code.interval,
            "device code issued"
        );
        Ok(code)
    }

    async fn poll_token(&self, device_code: &str) -> Result<PollOutcome, AuthError> {
        let resp = self
            .client
            .post(&self.access_token_url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, USER_AGENT_VALUE)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("device_code", device_code),
                ("grant_type", DEVICE_CODE_GRANT_TYPE),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AuthError::HttpStatus {
                status: status.as_u16(),
            });
        }
        let body = resp.bytes().await?;
        let payload: Value = serde_json::from_slice(&body)?;
        Ok(classify_token_response(payload))
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<String, AuthError> {
        let resp = self
            .client
            .get(&self.identity_url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AuthError::HttpStatus {
                status: status.as_u16(),
            });
        }
        let body = resp.bytes().await?;
        let payload: Value = serde_json::from_slice(&body)?;
        payload
            .get("login")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                AuthError::Decode("Identity response missing string `login` field".to_string())
            })
    }
}

/// Splits a token-endpoint body into an error code or a credential.
///
/// A present `error` field always wins, even when token fields are also set.
fn classify_token_response(payload: Value) -> PollOutcome {
    if let Some(error) = payload.get("error") {
        let code = error
            .as_str()
            .map(ProviderErrorCode::from_wire)
            .unwrap_or(ProviderErrorCode::InvalidFormat);
        return PollOutcome::Error(code);
    }
    match serde_json::from_value::<Credential>(payload) {
        Ok(credential) => PollOutcome::Authorized(credential),
        Err(err) => {
            tracing::debug!(error = %err, "token response matched neither error nor credential");
            PollOutcome::Error(ProviderErrorCode::InvalidFormat)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_field_takes_precedence() {
        let outcome = classify_token_response(json!({
            "error": "slow_down",
            "error_description": "Too many requests",
            "interval": 10
        }));
        assert_eq!(outcome, PollOutcome::Error(ProviderErrorCode::SlowDown));
    }

    #[test]
    fn non_string_error_is_invalid_format() {
        let outcome = classify_token_response(json!({ "error": 42 }));
        assert_eq!(outcome, PollOutcome::Error(ProviderErrorCode::InvalidFormat));
    }

    #[test]
    fn partial_credential_is_invalid_format() {
        let outcome = classify_token_response(json!({ "access_token": "ghu_1" }));
        assert_eq!(outcome, PollOutcome::Error(ProviderErrorCode::InvalidFormat));
    }

    #[test]
    fn full_credential_is_authorized() {
        let outcome = classify_token_response(json!({
            "access_token": "ghu_1",
            "expires_in": 28800,
            "refresh_token": "ghr_1",
            "refresh_token_expires_in": 15897600,
            "token_type": "bearer"
        }));
        match outcome {
            PollOutcome::Authorized(credential) => assert_eq!(credential.access_token, "ghu_1"),
            other => panic!("expected credential, got {other:?}"),
        }
    }

    #[test]
    fn defaults_point_at_github() {
        let client = HttpProviderClient::new();
        assert_eq!(client.client_id(), DEFAULT_CLIENT_ID);
        assert_eq!(client.device_code_url, DEFAULT_DEVICE_CODE_URL);
        assert_eq!(client.identity_url, DEFAULT_IDENTITY_URL);
    }
}
