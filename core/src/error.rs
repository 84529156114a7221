//! Error types for the REST client and the lock coordinator.
//!
//! # Design
//! One enum covers both halves of the crate so domain services can use a
//! single `?` chain around "lock, call, unlock". Every variant names the
//! operation that failed (method and URL, or lock id and owner) so a log
//! line is enough to diagnose a failure without re-running the call.
//!
//! `NotFound` is kept apart from `UnexpectedStatus` because probe callers
//! opt out of it and get an empty result instead.

use crate::http::HttpMethod;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input, rejected before any network or lock activity.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Options or endpoint settings could not be loaded or are out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Every attempt ended in a transport failure or a retry-eligible status.
    #[error("{method} {url} failed after {attempts} attempts: {last_error}")]
    RequestFailed {
        method: HttpMethod,
        url: String,
        attempts: u32,
        last_error: String,
    },

    /// A response arrived but its status is outside the expected set.
    #[error("{method} {url} returned {actual}, expected one of {expected:?}: {body}")]
    UnexpectedStatus {
        method: HttpMethod,
        url: String,
        actual: u16,
        expected: Vec<u16>,
        body: String,
    },

    /// A lookup produced no result and the caller asked for an error.
    #[error("{method} {url}: no results found")]
    NotFound { method: HttpMethod, url: String },

    /// The response body is not the JSON the caller expected.
    #[error("{method} {url}: could not decode response: {message}")]
    Deserialization {
        method: HttpMethod,
        url: String,
        message: String,
    },

    #[error("lock '{lock_id}' for owner '{owner}': {kind}")]
    Lock {
        owner: String,
        lock_id: String,
        kind: LockErrorKind,
    },
}

/// Why a lock operation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockErrorKind {
    #[error("exhausted {attempts} attempts without recovery")]
    Exhausted { attempts: u32 },

    #[error("failed to re-acquire after forced unlock")]
    StealFailed,

    #[error("lock store failure: {0}")]
    Store(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn lock(owner: &str, lock_id: &str, kind: LockErrorKind) -> Self {
        Error::Lock {
            owner: owner.to_string(),
            lock_id: lock_id.to_string(),
            kind,
        }
    }

    /// Status code carried by the error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::UnexpectedStatus { actual, .. } => Some(*actual),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_status_message_carries_body() {
        let err = Error::UnexpectedStatus {
            method: HttpMethod::Post,
            url: "https://api.test/groups".to_string(),
            actual: 409,
            expected: vec![201],
            body: "already exists".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("POST https://api.test/groups"));
        assert!(message.contains("409"));
        assert!(message.contains("[201]"));
        assert!(message.contains("already exists"));
        assert_eq!(err.status(), Some(409));
    }

    #[test]
    fn lock_message_names_owner_and_id() {
        let err = Error::lock("naming", "prefix-web", LockErrorKind::StealFailed);
        assert_eq!(
            err.to_string(),
            "lock 'prefix-web' for owner 'naming': failed to re-acquire after forced unlock"
        );
        assert_eq!(err.status(), None);
    }

    #[test]
    fn request_failed_mentions_attempts() {
        let err = Error::RequestFailed {
            method: HttpMethod::Get,
            url: "https://api.test/jobs".to_string(),
            attempts: 5,
            last_error: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "GET https://api.test/jobs failed after 5 attempts: connection refused"
        );
    }
}
