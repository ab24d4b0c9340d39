//! Retry policy for transient downstream failures
//!
//! Pipeline stages that call external services classify their failures
//! into an [`ErrorKind`]. Transient kinds are retried with capped
//! exponential backoff and full jitter; everything else fails fast. An
//! optional callback observes each retry for logging and metrics.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Classification of a stage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The service rejected the call due to rate limiting.
    Throttled,
    /// The service is temporarily unable to handle the call.
    Unavailable,
    /// The call did not complete in time.
    Timeout,
    /// The request itself is malformed; retrying cannot help.
    InvalidInput,
    /// The caller is not allowed to make this call.
    PermissionDenied,
    /// Anything that could not be classified.
    Unknown,
}

impl ErrorKind {
    /// Whether a failure of this kind may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Throttled | ErrorKind::Unavailable | ErrorKind::Timeout
        )
    }

    /// Map a vendor error code string to a kind.
    pub fn from_error_code(code: &str) -> Self {
        match code {
            "ThrottlingException" | "TooManyRequestsException" | "SlowDown" => ErrorKind::Throttled,
            "ServiceUnavailableException" | "InternalServerException" | "ServiceUnavailable" => {
                ErrorKind::Unavailable
            },
            "ModelTimeoutException" | "RequestTimeout" | "TimeoutError" => ErrorKind::Timeout,
            "ValidationException" | "InvalidRequestException" => ErrorKind::InvalidInput,
            "AccessDeniedException" | "UnauthorizedException" => ErrorKind::PermissionDenied,
            _ => ErrorKind::Unknown,
        }
    }

    /// Map an HTTP status code to a kind.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            429 => ErrorKind::Throttled,
            500 | 502 | 503 => ErrorKind::Unavailable,
            504 | 408 => ErrorKind::Timeout,
            400 | 422 => ErrorKind::InvalidInput,
            401 | 403 => ErrorKind::PermissionDenied,
            _ => ErrorKind::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Throttled => "throttled",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A classified failure from a pipeline stage
#[derive(Error, Debug, Clone)]
#[error("{kind} error: {message}")]
pub struct StageError {
    pub kind: ErrorKind,
    /// Vendor error code, when one was available.
    pub code: Option<String>,
    pub message: String,
}

impl StageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Called before each retry sleep with the attempt number (1-based),
/// the failure, and the chosen delay.
pub type OnRetry = Box<dyn Fn(u32, &StageError, Duration) + Send + Sync>;

/// Capped exponential backoff with full jitter
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    on_retry: Option<OnRetry>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            on_retry: None,
        }
    }

    pub fn from_config(config: &crate::config::RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Register a callback invoked before each retry sleep.
    pub fn with_on_retry(mut self, on_retry: OnRetry) -> Self {
        self.on_retry = Some(on_retry);
        self
    }

    /// Backoff delay for a retry after the given 0-based attempt, before
    /// jitter: `min(base * 2^attempt, max)`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(31)));
        exp.min(self.max_delay)
    }

    /// Full delay for a retry, with jitter drawn uniformly from
    /// `[0.5, 1.5)` of the backoff delay.
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        delay.mul_f64(factor)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// exhausts the attempt budget. The last error is returned as-is.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, StageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() {
                        tracing::warn!(
                            op = op_name,
                            kind = %err.kind,
                            "Non-retryable error, failing immediately: {}",
                            err.message
                        );
                        return Err(err);
                    }

                    if attempt + 1 >= self.max_attempts {
                        tracing::warn!(
                            op = op_name,
                            kind = %err.kind,
                            attempts = self.max_attempts,
                            "Retry budget exhausted: {}",
                            err.message
                        );
                        return Err(err);
                    }

                    let delay = self.jittered_delay(attempt);
                    attempt += 1;

                    tracing::info!(
                        op = op_name,
                        kind = %err.kind,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after transient error: {}",
                        err.message
                    );

                    if let Some(ref on_retry) = self.on_retry {
                        on_retry(attempt, &err, delay);
                    }

                    tokio::time::sleep(delay).await;
                },
            }
        }
    }
}
