use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// Longest slice of an error body carried into an error message.
const BODY_EXCERPT_CHARS: usize = 300;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("dialogue-shorts/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {e}")))
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Sends `request`, retrying transport failures, 429 and 5xx responses.
/// Any other non-success status fails immediately.
pub async fn send_with_retry(
    request: RequestBuilder,
    policy: &RetryPolicy,
    service: &'static str,
) -> Result<Response> {
    let mut attempt = 0;
    loop {
        let this_try = request
            .try_clone()
            .ok_or_else(|| PipelineError::upstream(service, None, "request body cannot be replayed"))?;

        let failure = match this_try.send().await {
            Ok(resp) if resp.status().is_success() => return Ok(resp),
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                let err = PipelineError::upstream(service, Some(status.as_u16()), excerpt(&body));
                if !is_retryable_status(status) {
                    return Err(err);
                }
                err
            }
            Err(e) => {
                let retryable = e.is_timeout() || e.is_connect() || e.is_request();
                let err = PipelineError::upstream(service, e.status().map(|s| s.as_u16()), e.to_string());
                if !retryable {
                    return Err(err);
                }
                err
            }
        };

        if attempt >= policy.max_retries {
            return Err(failure);
        }
        let delay = policy.delay_for(attempt);
        attempt += 1;
        warn!(
            "{} call failed ({}); retry {}/{} in {:?}",
            service, failure, attempt, policy.max_retries, delay
        );
        sleep(delay).await;
        debug!("Retrying {} call", service);
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(BODY_EXCERPT_CHARS).collect();
    cut.push('…');
    cut
}
