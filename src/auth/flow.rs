use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::client::ProviderClient;
use crate::auth::credential::{Account, Credential};
use crate::auth::device_code::{DeviceCode, PollOutcome, ProviderErrorCode};
use crate::auth::error::AuthError;

/// Poll attempts made before giving up on a device code.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 101;
/// Interval increase applied on every `slow_down` response.
pub const DEFAULT_SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Pacing limits for the token polling loop.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use devicelink::auth::PollPolicy;
///
/// let policy = PollPolicy::builder().max_attempts(20).build();
/// assert_eq!(policy.slow_down_step, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct PollPolicy {
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
    #[builder(default = DEFAULT_SLOW_DOWN_STEP)]
    pub slow_down_step: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Progress of the most recent login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Requesting,
    Polling { attempt: u32, interval_secs: u64 },
    Succeeded,
    Failed(String),
    TimedOut,
    Cancelled,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed(_) | Self::TimedOut | Self::Cancelled
        )
    }
}

/// Result of a successful polling loop, with the counters it accumulated.
#[derive(Debug, Clone)]
pub struct PollReport {
    pub credential: Credential,
    pub attempts: u32,
    pub pending_count: u32,
    pub slow_down_count: u32,
    pub final_interval: Duration,
}

/// Device Authorization Grant state machine.
///
/// One attempt runs `Requesting → Polling → {Succeeded | Failed | TimedOut |
/// Cancelled}`. Calls are issued one at a time and never faster than the
/// provider's interval; `slow_down` raises the interval for the rest of the
/// attempt.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use devicelink::auth::{DeviceFlow, HttpProviderClient};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), devicelink::auth::AuthError> {
/// let flow = DeviceFlow::new(Arc::new(HttpProviderClient::new()));
/// let cancel = CancellationToken::new();
/// let account = flow
///     .authorize(
///         |code| println!("Enter {} at {}", code.user_code, code.verification_uri),
///         &cancel,
///     )
///     .await?;
/// println!("Logged in as {}", account.username);
/// # Ok(())
/// # }
/// ```
pub struct DeviceFlow {
    client: Arc<dyn ProviderClient>,
    policy: PollPolicy,
    state: watch::Sender<FlowState>,
}

impl DeviceFlow {
    pub fn new(client: Arc<dyn ProviderClient>) -> Self {
        let (state, _) = watch::channel(FlowState::Idle);
        Self {
            client,
            policy: PollPolicy::default(),
            state,
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub fn state(&self) -> FlowState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.state.subscribe()
    }

    /// Runs a full login attempt and resolves the account behind the new token.
    ///
    /// `prompt` receives the device code exactly once, before the first poll.
    pub async fn authorize<F>(
        &self,
        prompt: F,
        cancel: &CancellationToken,
    ) -> Result<Account, AuthError>
    where
        F: FnOnce(&DeviceCode) + Send,
    {
        let attempt_id = Uuid::new_v4();
        tracing::debug!(%attempt_id, "starting device-code login");

        if cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        self.publish(FlowState::Requesting);
        let device_code = match self.client.request_device_code().await {
            Ok(code) => code,
            Err(err) => return Err(self.fail(err)),
        };
        if cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        prompt(&device_code);

        let report = self.poll_for_credential(&device_code, cancel).await?;
        tracing::debug!(
            %attempt_id,
            attempts = report.attempts,
            pending = report.pending_count,
            slow_downs = report.slow_down_count,
            "device code authorized"
        );

        if cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        let username = match self
            .client
            .fetch_identity(&report.credential.access_token)
            .await
        {
            Ok(username) => username,
            Err(err) => {
                return Err(self.fail(AuthError::IdentityResolution(err.to_string())));
            }
        };
        tracing::info!(%attempt_id, %username, "device-code login resolved identity");
        Ok(Account::new(username, report.credential))
    }

    /// Polls the token endpoint until a credential arrives, a terminal error is
    /// reported, the attempt ceiling is reached, or `cancel` fires.
    pub async fn poll_for_credential(
        &self,
        device_code: &DeviceCode,
        cancel: &CancellationToken,
    ) -> Result<PollReport, AuthError> {
        let max_attempts = self.policy.max_attempts;
        let mut interval = Duration::from_secs(device_code.interval);
        let mut pending_count = 0;
        let mut slow_down_count = 0;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(self.cancelled());
            }
            self.publish(FlowState::Polling {
                attempt,
                interval_secs: interval.as_secs(),
            });

            let outcome = self.client.poll_token(&device_code.device_code).await;
            // A result that lands after cancellation belongs to a stale attempt.
            if cancel.is_cancelled() {
                return Err(self.cancelled());
            }

            match outcome {
                Ok(PollOutcome::Authorized(credential)) => {
                    self.publish(FlowState::Succeeded);
                    return Ok(PollReport {
                        credential,
                        attempts: attempt,
                        pending_count,
                        slow_down_count,
                        final_interval: interval,
                    });
                }
                Ok(PollOutcome::Error(ProviderErrorCode::AuthorizationPending)) => {
                    pending_count += 1;
                    tracing::debug!(attempt, pending = pending_count, "authorization pending");
                }
                Ok(PollOutcome::Error(ProviderErrorCode::SlowDown)) => {
                    interval = interval.saturating_add(self.policy.slow_down_step);
                    slow_down_count += 1;
                    tracing::debug!(
                        attempt,
                        interval_secs = interval.as_secs(),
                        "provider asked to slow down"
                    );
                }
                Ok(PollOutcome::Error(code)) => {
                    return Err(self.fail(AuthError::Provider(code)));
                }
                Err(err) => return Err(self.fail(err)),
            }

            if attempt == max_attempts {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled()),
                _ = tokio::time::sleep(interval) => {}
            }
        }

        tracing::warn!(attempts = max_attempts, "device-code polling timed out");
        self.publish(FlowState::TimedOut);
        Err(AuthError::PollTimeout {
            attempts: max_attempts,
        })
    }

    /// Runs [`authorize`](Self::authorize) on a background task.
    pub fn spawn<F>(self: &Arc<Self>, prompt: F) -> LoginHandle
    where
        F: FnOnce(&DeviceCode) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let flow = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move { flow.authorize(prompt, &token).await });
        LoginHandle::new(cancel, task)
    }

    fn publish(&self, state: FlowState) {
        self.state.send_replace(state);
    }

    fn fail(&self, err: AuthError) -> AuthError {
        tracing::warn!(error = %err, "device-code login failed");
        self.publish(FlowState::Failed(err.to_string()));
        err
    }

    fn cancelled(&self) -> AuthError {
        tracing::debug!("device-code login cancelled");
        self.publish(FlowState::Cancelled);
        AuthError::Cancelled
    }
}

/// Handle for a login attempt running in the background.
#[derive(Debug)]
pub struct LoginHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<Account, AuthError>>,
}

impl LoginHandle {
    pub(crate) fn new(
        cancel: CancellationToken,
        task: JoinHandle<Result<Account, AuthError>>,
    ) -> Self {
        Self { cancel, task }
    }

    /// Requests cancellation; the attempt stops at its next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the attempt to finish. A panic inside the task is re-raised
    /// here; only an aborted task reads as [`AuthError::Cancelled`].
    pub async fn wait(self) -> Result<Account, AuthError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(AuthError::Cancelled),
        }
    }
}
