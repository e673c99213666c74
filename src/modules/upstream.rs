//! Compute-job client with bounded, fixed-delay retry.

use log::{error, info, warn};
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Upstream unavailable after {attempts} attempts: {last_error}")]
    UpstreamUnavailable { attempts: u32, last_error: String },
}

/// Retry policy: `max_attempts` tries, `backoff` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds or attempts run out.
    ///
    /// Every error is treated as transient.
    pub async fn run<F, Fut, T, E>(&self, target: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            info!("Attempt {} to fetch from {}", attempt, target);
            match op().await {
                Ok(value) => {
                    info!("Successful response on attempt {}", attempt);
                    return Ok(value);
                }
                Err(e) if attempt < max_attempts => {
                    warn!("Attempt {} failed: {}", attempt, e);
                    info!("Retrying in {}ms...", self.backoff.as_millis());
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => {
                    error!("Attempt {} failed: {}; max retries reached", attempt, e);
                    return Err(FetchError::UpstreamUnavailable {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JobOptions {
    pub stream: bool,
}

/// Body posted to the job endpoint.
#[derive(Clone, Serialize, PartialEq, Eq)]
pub struct JobRequest {
    pub pk: String,
    pub module: String,
    pub inputs: String,
    pub opts: JobOptions,
}

impl JobRequest {
    pub fn new(pk: &str, module: &str, prompt: &str) -> Self {
        Self {
            pk: pk.to_string(),
            module: module.to_string(),
            inputs: format!("-i Message='{}'", prompt.replace('\'', r"'\''")),
            opts: JobOptions { stream: true },
        }
    }
}

impl std::fmt::Debug for JobRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRequest")
            .field("pk", &"<redacted>")
            .field("module", &self.module)
            .field("inputs", &self.inputs)
            .field("opts", &self.opts)
            .finish()
    }
}

/// Posts job requests and returns the response body.
#[derive(Debug, Clone)]
pub struct RetryingFetcher {
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            http: reqwest::Client::new(),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// POST `request` to `url`. Non-2xx statuses count as failures.
    ///
    /// The body is returned as JSON, or as a JSON string when it is not JSON.
    pub async fn fetch(
        &self,
        url: &str,
        request: &JobRequest,
    ) -> Result<serde_json::Value, FetchError> {
        let http = &self.http;
        self.policy
            .run(url, || async move {
                let response = http
                    .post(url)
                    .header(reqwest::header::ACCEPT, "application/json")
                    .json(request)
                    .send()
                    .await?
                    .error_for_status()?;
                let text = response.text().await?;
                Ok::<_, reqwest::Error>(
                    serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)),
                )
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast(5)
            .run("test", || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 5 {
                    Err(format!("refused {}", n))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_exhausts_after_exactly_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = fast(5)
            .run("test", || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<(), _>(format!("refused {}", n))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        let FetchError::UpstreamUnavailable {
            attempts,
            last_error,
        } = err;
        assert_eq!(attempts, 5);
        assert_eq!(last_error, "refused 5");
    }

    #[tokio::test]
    async fn test_single_attempt_policy() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let _ = RetryPolicy::new(0, Duration::from_millis(1))
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("nope")
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_backoff_between_attempts() {
        let start = tokio::time::Instant::now();
        let _ = RetryPolicy::new(3, Duration::from_millis(1000))
            .run("test", || async move { Err::<(), _>("refused") })
            .await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2000));
        assert!(elapsed < Duration::from_millis(3000));
    }

    #[test]
    fn test_job_request_shape() {
        let request = JobRequest::new("0xkey", "cowsay:v0.0.3", "hello");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "pk": "0xkey",
                "module": "cowsay:v0.0.3",
                "inputs": "-i Message='hello'",
                "opts": { "stream": true }
            })
        );
        assert!(!format!("{:?}", request).contains("0xkey"));
    }

    #[test]
    fn test_prompt_quotes_are_escaped() {
        let request = JobRequest::new("k", "m", "it's");
        assert_eq!(request.inputs, r"-i Message='it'\''s'");
    }
}
