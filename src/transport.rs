//! HTTP Transport — retry-with-backoff wrapper over the pooled
//! `reqwest::Client` the API Client shares with the Session Manager.
//!
//! Retries only transport errors (connection failure, timeout); HTTP 4xx/5xx
//! pass straight through to the caller as an ordinary `Response` so the API
//! Client can interpret protocol vs. application errors separately (§4.2).
//!
//! Backoff is `backoff::future::retry` with an `ExponentialBackoff`, the
//! teacher's own retry-policy crate (`tools/scrape.rs`'s native-scraper
//! retry loop). Interval bounds restored from `original_source`'s `tenacity
//! wait_exponential(multiplier=1, min=2, max=10)`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backoff::{future::retry, Error as BackoffError, ExponentialBackoff, ExponentialBackoffBuilder};
use reqwest::{Method, RequestBuilder, Response};
use tracing::{debug, warn};

const BACKOFF_INITIAL_SECS: f64 = 2.0;
const BACKOFF_MAX_SECS: f64 = 10.0;
const BACKOFF_MULTIPLIER: f64 = 2.0;

fn retry_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_secs_f64(BACKOFF_INITIAL_SECS))
        .with_multiplier(BACKOFF_MULTIPLIER)
        .with_max_interval(Duration::from_secs_f64(BACKOFF_MAX_SECS))
        .with_randomization_factor(0.0)
        .with_max_elapsed_time(None)
        .build()
}

/// Send a request, retrying up to `max_retries` additional attempts on
/// transport-level failure. `build` is called fresh on every attempt since
/// a sent `RequestBuilder` cannot be replayed.
pub async fn send_with_retry<F>(max_retries: u32, mut build: F) -> Result<Response, reqwest::Error>
where
    F: FnMut() -> RequestBuilder,
{
    let attempt = AtomicU32::new(0);
    retry(retry_policy(), || async {
        let this_attempt = attempt.fetch_add(1, Ordering::SeqCst);
        match build().send().await {
            Ok(resp) => Ok(resp),
            Err(e) if is_transport_error(&e) && this_attempt < max_retries => {
                warn!(attempt = this_attempt, error = %e, "transport error, retrying");
                Err(BackoffError::transient(e))
            }
            Err(e) => {
                debug!(attempt = this_attempt, error = %e, "transport error, no more retries");
                Err(BackoffError::permanent(e))
            }
        }
    })
    .await
}

fn is_transport_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request()
}

/// Convenience used by the API Client: `(Method, url)` is the only thing
/// that needs to be rebuilt per attempt; headers/query/body are applied by
/// the caller-supplied closure.
pub fn method_from(name: &str) -> Method {
    match name.to_ascii_uppercase().as_str() {
        "POST" => Method::POST,
        "HEAD" => Method::HEAD,
        _ => Method::GET,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_uses_configured_interval_bounds() {
        let policy = retry_policy();
        assert_eq!(policy.current_interval.as_secs_f64(), BACKOFF_INITIAL_SECS);
        assert_eq!(policy.max_interval.as_secs_f64(), BACKOFF_MAX_SECS);
        assert_eq!(policy.multiplier, BACKOFF_MULTIPLIER);
    }

    #[test]
    fn method_from_recognizes_verbs() {
        assert_eq!(method_from("post"), Method::POST);
        assert_eq!(method_from("HEAD"), Method::HEAD);
        assert_eq!(method_from("get"), Method::GET);
        assert_eq!(method_from("whatever"), Method::GET);
    }

    #[tokio::test]
    async fn send_with_retry_returns_first_success_without_retrying() {
        let client = reqwest::Client::new();
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let url = server.uri();
        let resp = send_with_retry(3, || client.get(&url)).await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn send_with_retry_passes_through_4xx_without_retry_classification() {
        let client = reqwest::Client::new();
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = server.uri();
        let resp = send_with_retry(3, || client.get(&url)).await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn send_with_retry_gives_up_immediately_with_zero_retry_budget() {
        // Port 1 is reserved and refuses connections immediately, so this
        // exercises the transport-error path without waiting out a real
        // backoff interval.
        let client = reqwest::Client::new();
        let result = send_with_retry(0, || client.get("http://127.0.0.1:1")).await;
        assert!(result.is_err());
    }
}
