//! Error handling for the inference relay

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Circuit breaker rejected the call without touching the network
    #[error("Circuit breaker '{0}' is open")]
    CircuitOpen(String),

    /// Detector unreachable after exhausting retries; carries the last cause
    #[error("Detector unavailable after {attempts} attempts")]
    Unavailable {
        attempts: u32,
        #[source]
        cause: Box<Error>,
    },

    /// Detector answered with a non-2xx status
    #[error("Detector returned {status}: {detail}")]
    DetectorStatus { status: u16, detail: String },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a retry can plausibly succeed.
    ///
    /// Connection errors, timeouts and 5xx statuses are transient;
    /// 4xx statuses and local errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::DetectorStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_status_is_transient() {
        let err = Error::DetectorStatus {
            status: 503,
            detail: "overloaded".to_string(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_client_status_is_not_transient() {
        let err = Error::DetectorStatus {
            status: 422,
            detail: "bad image".to_string(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_local_errors_are_not_transient() {
        assert!(!Error::Validation("too small".to_string()).is_transient());
        assert!(!Error::CircuitOpen("detector".to_string()).is_transient());
    }

    #[tokio::test]
    async fn test_connect_failure_is_transient() {
        // Unroutable port refuses immediately
        let client = reqwest::Client::new();
        let err = client
            .get("http://127.0.0.1:9/healthz")
            .send()
            .await
            .unwrap_err();
        assert!(err.is_connect());
        assert!(Error::Http(err).is_transient());
    }

    #[tokio::test]
    async fn test_request_build_failure_is_not_transient() {
        // A request that can never be sent must not be retried
        let client = reqwest::Client::new();
        let err = client.get("not a url").send().await.unwrap_err();
        assert!(err.is_builder());
        assert!(!Error::Http(err).is_transient());
    }
}
