//! Sends built requests with bounded, fixed-delay retries.
//!
//! # Design
//! The executor owns a transport, a base URL and a default `RetryPolicy`.
//! Attempts run strictly one after another on the caller's thread. A
//! transport error or a response whose status is retry-eligible counts as a
//! failed attempt; the delay sits between attempts and never follows the
//! last one. Once a usable response arrives, its status is checked against
//! the request's expected statuses without further retries.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::http::{HttpResponse, Transport};
use crate::request::RequestSpec;
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper};

pub struct RequestExecutor<T> {
    transport: T,
    base_url: String,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl<T: Transport> RequestExecutor<T> {
    pub fn new(transport: T, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            policy: RetryPolicy::http_default(),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Execute `spec` under the executor's own policy.
    pub fn execute(&self, spec: &RequestSpec) -> Result<HttpResponse> {
        self.execute_with(spec, &self.policy)
    }

    /// Execute `spec` under `policy`.
    pub fn execute_with(&self, spec: &RequestSpec, policy: &RetryPolicy) -> Result<HttpResponse> {
        let request = spec.to_http_request(&self.base_url);
        let max_attempts = policy.max_attempts.max(1);

        debug!(
            method = %request.method,
            url = %request.url,
            body = %spec.redacted_body(),
            "invoking request"
        );

        let mut response = None;
        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            match self.transport.send(&request) {
                Ok(r) if policy.is_retry_eligible(r.status) => {
                    last_error = format!("HTTP {}: {}", r.status, r.body);
                }
                Ok(r) => {
                    response = Some(r);
                    break;
                }
                Err(e) => last_error = e.to_string(),
            }

            warn!(
                method = %request.method,
                url = %request.url,
                attempt,
                max_attempts,
                error = %last_error,
                "request attempt failed"
            );
            if attempt < max_attempts {
                self.sleeper.sleep(policy.delay);
            }
        }

        let Some(response) = response else {
            error!(
                method = %request.method,
                url = %request.url,
                max_attempts,
                "request failed, aborting"
            );
            return Err(Error::RequestFailed {
                method: request.method,
                url: request.url,
                attempts: max_attempts,
                last_error,
            });
        };

        if !spec.expects(response.status) {
            return Err(Error::UnexpectedStatus {
                method: request.method,
                url: request.url,
                actual: response.status,
                expected: spec.expected_status.clone(),
                body: response.body,
            });
        }

        debug!(status = response.status, "request completed");
        Ok(response)
    }
}
