//! Timeout and retry around a single HTTP exchange.
//!
//! Every source call goes through [`resilient_send`], which wraps the request in
//! [`seatbelt`] retry and timeout middleware so that transient network failures,
//! server errors and rate limiting are retried a bounded number of times before the
//! source is given up on for the run.

use core::time::Duration;
use layered::{Execute, Service, Stack};
use ohno::{IntoAppError, app_err};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Request, RequestBuilder, Response, StatusCode};
use seatbelt::retry::{Backoff, Retry};
use seatbelt::timeout::Timeout;
use seatbelt::{RecoveryInfo, ResilienceContext};
use std::sync::Arc;
use tick::Clock;

const LOG_TARGET: &str = " resilient";

/// Delay used for a 429 response that carries no `Retry-After` header.
const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(5);

/// Bounds applied to every source call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Limit for one attempt, connect to last body byte.
    pub timeout: Duration,

    /// Attempts made after the first one fails.
    pub max_retries: u32,

    /// Delay before the first retry; doubled for each one after.
    pub base_delay: Duration,

    /// Longest `Retry-After` the client waits out; a server asking for more ends the retries.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers.get(RETRY_AFTER)?.to_str().ok()?.parse::<u64>().ok()
}

fn wait_for(requested: Duration, max_delay: Duration) -> RecoveryInfo {
    if requested > max_delay {
        log::debug!(target: LOG_TARGET, "Server asked to wait {}s, more than the {}s allowed", requested.as_secs(), max_delay.as_secs());
        RecoveryInfo::never()
    } else {
        RecoveryInfo::retry().delay(requested)
    }
}

/// Classify an HTTP outcome for retry purposes.
fn should_retry_response(result: &crate::Result<Response>, max_delay: Duration) -> RecoveryInfo {
    match result {
        Err(_) => RecoveryInfo::retry(),
        Ok(resp) if resp.status().is_server_error() => RecoveryInfo::retry(),
        Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
            let requested = parse_retry_after(resp.headers()).map_or(DEFAULT_RATE_LIMIT_DELAY, Duration::from_secs);
            wait_for(requested, max_delay)
        }

        // secondary rate limit
        Ok(resp) if resp.status() == StatusCode::FORBIDDEN => parse_retry_after(resp.headers())
            .map_or_else(RecoveryInfo::never, |secs| wait_for(Duration::from_secs(secs), max_delay)),
        _ => RecoveryInfo::never(),
    }
}

/// Send a request with automatic retry and timeout.
///
/// The request is replayed from scratch on every attempt, so its body must be buffered.
/// The final response is returned whatever its status is; only the exhaustion of retries
/// on network errors or timeouts yields an `Err`.
pub async fn resilient_send(client: &Client, policy: &RetryPolicy, name: &'static str, request: RequestBuilder) -> crate::Result<Response> {
    let request = Arc::new(request.build().into_app_err_with(|| format!("building {name} request"))?);
    let url = request.url().to_string();

    let clock = Clock::new_tokio();
    let context = ResilienceContext::new(&clock).name(name);

    let max_delay = policy.max_delay;
    let timeout_secs = policy.timeout.as_secs_f64();
    let client = client.clone();

    let service = (
        Retry::layer("retry", &context)
            .clone_input()
            .recovery_with(move |result: &crate::Result<Response>, _| should_retry_response(result, max_delay))
            .max_retry_attempts(policy.max_retries)
            .base_delay(policy.base_delay)
            .backoff(Backoff::Exponential)
            .on_retry(move |output, args| match output {
                Ok(resp) => log::debug!(
                    target: LOG_TARGET,
                    "Retrying {url} after HTTP {} (attempt {}, delay {}ms)",
                    resp.status(),
                    args.attempt().index() + 1,
                    args.retry_delay().as_millis(),
                ),
                Err(e) => log::debug!(
                    target: LOG_TARGET,
                    "Retrying {url} after error: {e} (attempt {}, delay {}ms)",
                    args.attempt().index() + 1,
                    args.retry_delay().as_millis(),
                ),
            }),
        Timeout::layer("timeout", &context)
            .timeout_error(move |_| app_err!("{name} request timed out after {timeout_secs}s"))
            .timeout(policy.timeout),
        Execute::new(move |request: Arc<Request>| {
            let client = client.clone();
            async move {
                let attempt = request.try_clone().ok_or_else(|| app_err!("{name} request body cannot be replayed"))?;
                client.execute(attempt).await.map_err(ohno::AppError::from)
            }
        }),
    )
        .into_service();

    service.execute(request).await
}
