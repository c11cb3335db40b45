//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failed upstream attempt may be repeated
//! - Bound the number of attempts per request
//!
//! # Design Decisions
//! - Only transport failures retry; an upstream response is always final
//! - Connect failures retry for every method (nothing reached the upstream)
//! - Other transport failures retry only for idempotent methods
//! - Timeouts never retry; the request deadline is already spent

use axum::http::Method;

use crate::config::RetryConfig;

/// Whether a failed attempt may be retried.
pub fn is_retryable(method: &Method, error: &reqwest::Error) -> bool {
    if error.is_timeout() {
        return false;
    }
    error.is_connect() || (error.is_request() && method.is_idempotent())
}

/// Total attempts allowed for one request, the first one included.
pub fn max_attempts(config: &RetryConfig) -> u32 {
    if config.enabled {
        config.max_attempts.max(1)
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_attempts() {
        let mut config = RetryConfig::default();
        assert_eq!(max_attempts(&config), 2);

        config.enabled = false;
        assert_eq!(max_attempts(&config), 1);

        config.enabled = true;
        config.max_attempts = 0;
        assert_eq!(max_attempts(&config), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_is_retryable() {
        // Grab a free port, then close it so the connect is refused.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let error = reqwest::Client::new()
            .post(format!("http://{addr}/"))
            .send()
            .await
            .unwrap_err();
        assert!(is_retryable(&Method::POST, &error));
        assert!(is_retryable(&Method::GET, &error));
    }
}
