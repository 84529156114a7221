//! REST client used by domain services.
//!
//! # Design
//! `RestClient` pairs a `RequestExecutor` with session headers (credentials,
//! API tokens) and pager options. Verb helpers cover the common calls; for
//! anything else, start from [`RestClient::request`] and finish with
//! [`RestClient::send`]. Collection endpoints go through
//! [`RestClient::get_all`] or [`RestClient::find`], which hand the first
//! response to the `CollectionPager` and fetch further pages through the
//! same executor, so every page gets the same retries.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::Credentials;
use crate::config::{ClientOptions, Endpoint};
use crate::error::{Error, Result};
use crate::executor::RequestExecutor;
use crate::http::{HttpMethod, HttpResponse, Transport};
use crate::pager::{CollectionPager, Dialect, Fetched, PagerOptions};
use crate::request::{append_query, RequestBuilder};
use crate::retry::{RetryPolicy, Sleeper};
use crate::transport::UreqTransport;

pub struct RestClient<T> {
    executor: RequestExecutor<T>,
    session_headers: Vec<(String, String)>,
    pager: PagerOptions,
}

impl RestClient<UreqTransport> {
    /// A client for `endpoint` over HTTP, retrying per `options`.
    pub fn connect(endpoint: &Endpoint, options: &ClientOptions) -> Result<Self> {
        Ok(Self::new(UreqTransport::new(endpoint), endpoint.base_url())
            .with_policy(options.retry_policy()?))
    }
}

impl<T: Transport> RestClient<T> {
    pub fn new(transport: T, base_url: impl Into<String>) -> Self {
        Self {
            executor: RequestExecutor::new(transport, base_url),
            session_headers: Vec::new(),
            pager: PagerOptions::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.executor = self.executor.with_policy(policy);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.executor = self.executor.with_sleeper(sleeper);
        self
    }

    /// Send `credentials` with every request.
    pub fn with_credentials(self, credentials: &Credentials) -> Self {
        let (name, value) = credentials.header();
        self.with_header(name, value)
    }

    /// Send a header with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.session_headers.push((name.into(), value.into()));
        self
    }

    pub fn with_pager(mut self, options: PagerOptions) -> Self {
        self.pager = options;
        self
    }

    pub fn executor(&self) -> &RequestExecutor<T> {
        &self.executor
    }

    pub fn base_url(&self) -> &str {
        self.executor.base_url()
    }

    /// A builder preloaded with the session headers.
    pub fn request(&self, method: HttpMethod, uri: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, uri).headers(self.session_headers.iter().cloned())
    }

    pub fn send(&self, builder: RequestBuilder) -> Result<HttpResponse> {
        let spec = builder.build()?;
        self.executor.execute(&spec)
    }

    pub fn get(&self, uri: &str) -> Result<HttpResponse> {
        self.send(self.request(HttpMethod::Get, uri))
    }

    pub fn head(&self, uri: &str) -> Result<HttpResponse> {
        self.send(self.request(HttpMethod::Head, uri))
    }

    pub fn delete(&self, uri: &str) -> Result<HttpResponse> {
        self.send(self.request(HttpMethod::Delete, uri))
    }

    pub fn post<B: Serialize + ?Sized>(&self, uri: &str, body: &B) -> Result<HttpResponse> {
        self.send(self.request(HttpMethod::Post, uri).json(body)?)
    }

    /// POST with an empty JSON object as the body.
    pub fn post_empty(&self, uri: &str) -> Result<HttpResponse> {
        self.send(
            self.request(HttpMethod::Post, uri)
                .body(serde_json::Value::Object(serde_json::Map::new())),
        )
    }

    pub fn put<B: Serialize + ?Sized>(&self, uri: &str, body: &B) -> Result<HttpResponse> {
        self.send(self.request(HttpMethod::Put, uri).json(body)?)
    }

    pub fn patch<B: Serialize + ?Sized>(&self, uri: &str, body: &B) -> Result<HttpResponse> {
        self.send(self.request(HttpMethod::Patch, uri).json(body)?)
    }

    /// GET `uri` and decode the body as `R`.
    pub fn get_json<R: DeserializeOwned>(&self, uri: &str) -> Result<R> {
        let spec = self.request(HttpMethod::Get, uri).build()?;
        let response = self.executor.execute(&spec)?;
        response.json().map_err(|e| Error::Deserialization {
            method: HttpMethod::Get,
            url: spec.resolve_url(self.base_url()),
            message: e.to_string(),
        })
    }

    /// Every item behind `uri`, using the client's pager options.
    pub fn get_all(&self, uri: &str) -> Result<Fetched> {
        self.fetch_with(uri, &self.pager)
    }

    /// Like [`RestClient::get_all`], choosing whether "nothing found" is an
    /// error or an empty result.
    pub fn find(&self, uri: &str, throw_on_not_found: bool) -> Result<Fetched> {
        let options = self.pager.clone().throw_on_not_found(throw_on_not_found);
        self.fetch_with(uri, &options)
    }

    pub fn fetch_with(&self, uri: &str, options: &PagerOptions) -> Result<Fetched> {
        let first_uri = if options.dialect == Some(Dialect::HeaderTotal) {
            append_query(uri, &format!("per_page={}", options.initial_page_size))
        } else {
            uri.to_string()
        };
        let spec = self
            .request(HttpMethod::Get, first_uri)
            .also_expect(404)
            .build()?;
        let url = spec.resolve_url(self.base_url());
        let initial = self.executor.execute(&spec)?;

        CollectionPager::new(options.clone()).fetch_all(&url, initial, |cursor| {
            self.get(&append_query(uri, &cursor.to_query()))
        })
    }
}
