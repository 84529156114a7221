//! Caller-supplied options and endpoint settings.
//!
//! ## Sources
//! Options are a plain record. They can be built in code, parsed from TOML,
//! or layered from environment variables on top of defaults:
//!
//! - `<PREFIX>_MAX_ATTEMPTS`: attempts per call (at least 1)
//! - `<PREFIX>_DELAY_SECONDS`: delay between attempts
//! - `<PREFIX>_RETRY_ON_5XX`: retry on HTTP 500 (true/false)
//! - `<PREFIX>_ALLOW_STEAL`: force-recover contended locks (true/false)

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};
use crate::lock::LockPolicy;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientOptions {
    pub max_attempts: u32,
    pub delay_seconds: u64,
    pub retry_on_5xx: bool,
    pub allow_steal: bool,
}

impl ClientOptions {
    /// 5 attempts, 10 seconds apart, retrying on 500.
    pub fn http_defaults() -> Self {
        Self {
            max_attempts: 5,
            delay_seconds: 10,
            retry_on_5xx: true,
            allow_steal: true,
        }
    }

    /// 5 attempts, 60 seconds apart, stealing after exhaustion.
    pub fn lock_defaults() -> Self {
        Self {
            max_attempts: 5,
            delay_seconds: 60,
            retry_on_5xx: true,
            allow_steal: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Parse options from TOML; missing fields keep the HTTP defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let options: Self =
            toml::from_str(raw).map_err(|e| Error::Config(format!("invalid options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Overlay `<prefix>_*` environment variables onto `defaults`.
    pub fn from_env(prefix: &str, defaults: Self) -> Result<Self> {
        Self::from_lookup(prefix, defaults, |key| std::env::var(key).ok())
    }

    fn from_lookup(
        prefix: &str,
        defaults: Self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let var = |name: &str| lookup(&format!("{prefix}_{name}"));
        let mut options = defaults;

        if let Some(raw) = var("MAX_ATTEMPTS") {
            options.max_attempts = parse_env(prefix, "MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = var("DELAY_SECONDS") {
            options.delay_seconds = parse_env(prefix, "DELAY_SECONDS", &raw)?;
        }
        if let Some(raw) = var("RETRY_ON_5XX") {
            options.retry_on_5xx = parse_bool(prefix, "RETRY_ON_5XX", &raw)?;
        }
        if let Some(raw) = var("ALLOW_STEAL") {
            options.allow_steal = parse_bool(prefix, "ALLOW_STEAL", &raw)?;
        }

        options.validate()?;
        Ok(options)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        self.validate()?;
        let codes = if self.retry_on_5xx { vec![500] } else { Vec::new() };
        Ok(RetryPolicy::new(self.max_attempts, self.delay())?.with_retry_codes(codes))
    }

    pub fn lock_policy(&self) -> Result<LockPolicy> {
        self.validate()?;
        LockPolicy::new(self.max_attempts, self.delay(), self.allow_steal)
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::http_defaults()
    }
}

fn parse_env<T: std::str::FromStr>(prefix: &str, name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("invalid {prefix}_{name} '{raw}': {e}")))
}

fn parse_bool(prefix: &str, name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("invalid {prefix}_{name} '{raw}': expected a boolean"))),
    }
}

/// Where a backend lives and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base_url: String,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    /// Verify the server's TLS certificate.
    pub verify_host: bool,
}

impl Endpoint {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(120);
    pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(240);

    /// `base_url` must be an absolute `http` or `https` URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let parsed = Url::parse(base_url).map_err(|e| {
            Error::InvalidArgument(format!("base url '{base_url}' is not a valid URL: {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(Error::InvalidArgument(format!(
                "base url '{base_url}' must be an http or https URL"
            )));
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            connect_timeout: Self::CONNECT_TIMEOUT,
            operation_timeout: Self::OPERATION_TIMEOUT,
            verify_host: true,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn with_timeouts(mut self, connect: Duration, operation: Duration) -> Self {
        self.connect_timeout = connect;
        self.operation_timeout = operation;
        self
    }

    pub fn verify_host(mut self, verify: bool) -> Self {
        self.verify_host = verify;
        self
    }
}
