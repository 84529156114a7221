//! Resilient REST calls and advisory locks for infrastructure automation.
//!
//! # Overview
//! Domain services (IPAM, naming, config management, source control) talk to
//! backend REST APIs through a `RestClient`. Every call is validated,
//! retried on transient failure, and logged with secrets masked. Collection
//! endpoints are paged transparently across the three pagination dialects
//! these backends use. Critical sections that must not run concurrently
//! across processes are wrapped in a `LockCoordinator`.
//!
//! # Design
//! - Network IO sits behind the `Transport` trait. `UreqTransport` is the
//!   blocking HTTP implementation; tests script responses instead.
//! - Requests and responses are plain data (`HttpRequest`, `HttpResponse`),
//!   so retry, paging and status handling are deterministic and testable.
//! - Waiting goes through the `Sleeper` trait, so tests never sleep.
//! - Lock state lives in a `LockStore` shared by every coordinating process:
//!   in memory, in a directory, or on an HTTP lock service.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod lock;
pub mod lock_http;
pub mod pager;
pub mod redact;
pub mod request;
pub mod retry;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testing;

pub use auth::Credentials;
pub use client::RestClient;
pub use config::{ClientOptions, Endpoint};
pub use error::{Error, LockErrorKind, Result};
pub use executor::RequestExecutor;
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportError};
pub use lock::{LockCoordinator, LockGuard, LockPolicy, LockStore, LockStoreError};
pub use lock_http::HttpLockStore;
pub use pager::{CollectionPager, Dialect, Fetched, PageCursor, PagerOptions};
pub use request::{RequestBuilder, RequestSpec};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
pub use store::{FileLockStore, InMemoryLockStore};
pub use transport::UreqTransport;
