use thiserror::Error;

/// Failure of one remote coordinator operation, after the gateway's own
/// resilience policy (transport retries, token refresh, re-fetch of
/// malformed payloads) has been exhausted.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request never produced a usable HTTP response.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The coordinator answered with a non-success status.
    #[error("coordinator returned HTTP {status}: {body}")]
    Status {
        /// Numeric HTTP status.
        status: u16,
        /// Raw response body, possibly empty.
        body: String,
    },

    /// Authorization kept failing after the bounded number of token refreshes.
    #[error("authorization failed after {attempts} refresh attempt(s)")]
    Unauthorized {
        /// Refresh attempts that were made.
        attempts: u32,
    },

    /// The payload stayed unparseable across every re-fetch.
    #[error("malformed payload from {path}: {reason}")]
    Decode {
        /// Relative path of the operation.
        path: String,
        /// Parser message of the last attempt.
        reason: String,
    },

    /// The payload parsed but violates the data contract. Never retried.
    #[error("upstream data validation failed: {0}")]
    Validation(String),

    /// The caller supplied arguments the coordinator would reject. Nothing was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl GatewayError {
    /// Whether repeating the same operation later could plausibly succeed.
    ///
    /// Validation and argument failures are permanent: the same data gives
    /// the same answer.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport(_) | GatewayError::Decode { .. } | GatewayError::Unauthorized { .. } => true,
            GatewayError::Status { status, .. } => *status == 429 || *status >= 500,
            GatewayError::Validation(_) | GatewayError::InvalidArgument(_) => false,
        }
    }
}
