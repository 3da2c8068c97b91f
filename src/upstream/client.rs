//! Retrying HTTP client for upstream provider calls.
//!
//! Every outbound call is bounded by the configured timeout. Transport
//! errors, 5xx responses, and 429 responses retry with exponential backoff
//! (base 500 ms, doubled per attempt, jittered); anything else returns on
//! the first attempt. Retry exhaustion classifies as upstream-unavailable.

use rand::Rng;
use reqwest::{Method, StatusCode};
use std::time::Duration;

use crate::config::UpstreamConfig;

/// Failure after the retry budget is spent.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamCallError {
    #[error("transport error after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },
    #[error("upstream returned {status} after {attempts} attempts")]
    RetriesExhausted { status: u16, attempts: u32 },
}

pub struct UpstreamClient {
    http: reqwest::Client,
    max_attempts: u32,
    backoff_base: Duration,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        })
    }

    /// Issues the request, retrying retryable failures. Returns the final
    /// status and parsed JSON body (or `Null` for non-JSON bodies).
    pub async fn call_json(
        &self,
        method: Method,
        url: &str,
        bearer: &str,
        query: &[(String, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<(StatusCode, serde_json::Value), UpstreamCallError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut request = self
                .http
                .request(method.clone(), url)
                .bearer_auth(bearer)
                .query(query);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if is_retryable_status(status) && attempt < self.max_attempts {
                        tracing::debug!(url, %status, attempt, "retrying upstream call");
                        tokio::time::sleep(self.backoff(attempt)).await;
                        continue;
                    }
                    if is_retryable_status(status) {
                        return Err(UpstreamCallError::RetriesExhausted {
                            status: status.as_u16(),
                            attempts: attempt,
                        });
                    }
                    let value = response.json().await.unwrap_or(serde_json::Value::Null);
                    return Ok((status, value));
                }
                Err(e) if attempt < self.max_attempts => {
                    tracing::debug!(url, error = %e, attempt, "retrying after transport error");
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                Err(e) => {
                    return Err(UpstreamCallError::Transport {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// `base × 2^(attempt-1)` plus up to half the base of jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.backoff_base * 2u32.saturating_pow(attempt.saturating_sub(1));
        let jitter_ceiling = (self.backoff_base.as_millis() as u64 / 2).max(1);
        let jitter = rand::thread_rng().gen_range(0..jitter_ceiling);
        exp + Duration::from_millis(jitter)
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(max_attempts: u32, base_ms: u64) -> UpstreamClient {
        UpstreamClient::new(&UpstreamConfig {
            max_attempts,
            backoff_base_ms: base_ms,
            ..UpstreamConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::OK));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let client = client(3, 500);
        let first = client.backoff(1);
        let second = client.backoff(2);
        let third = client.backoff(3);
        // Jitter adds at most 250ms on top of the exponential floor.
        assert!(first >= Duration::from_millis(500) && first < Duration::from_millis(750));
        assert!(second >= Duration::from_millis(1000) && second < Duration::from_millis(1250));
        assert!(third >= Duration::from_millis(2000) && third < Duration::from_millis(2250));
    }

    #[test]
    fn test_at_least_one_attempt() {
        let client = client(0, 100);
        assert_eq!(client.max_attempts, 1);
    }
}
