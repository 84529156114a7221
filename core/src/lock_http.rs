//! Lock store served over HTTP.
//!
//! The server keeps the lock table; every process that talks to it shares
//! the same locks. Protocol:
//!
//! - `PUT /locks/{id}` with `{"owner": "..."}`: `201` when taken, `409` when held.
//! - `DELETE /locks/{id}?owner=...`: `204`, also when the lock was not held.

use serde_json::json;

use crate::client::RestClient;
use crate::http::{HttpMethod, Transport};
use crate::lock::{LockStore, LockStoreError};

pub struct HttpLockStore<T> {
    client: RestClient<T>,
    prefix: String,
}

impl<T: Transport> HttpLockStore<T> {
    /// Locks live under `/locks` on the client's base URL.
    pub fn new(client: RestClient<T>) -> Self {
        Self {
            client,
            prefix: "/locks".to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    fn lock_uri(&self, id: &str) -> String {
        format!("{}/{}", self.prefix, urlencoding::encode(id))
    }
}

impl<T: Transport> LockStore for HttpLockStore<T> {
    fn lock(&self, id: &str, owner: &str) -> Result<bool, LockStoreError> {
        let response = self
            .client
            .send(
                self.client
                    .request(HttpMethod::Put, self.lock_uri(id))
                    .body(json!({ "owner": owner }))
                    .expect_status([201, 409]),
            )
            .map_err(|e| LockStoreError(e.to_string()))?;
        Ok(response.status == 201)
    }

    fn unlock(&self, id: &str, owner: &str) -> Result<(), LockStoreError> {
        let uri = format!("{}?owner={}", self.lock_uri(id), urlencoding::encode(owner));
        self.client
            .send(self.client.request(HttpMethod::Delete, uri))
            .map_err(|e| LockStoreError(e.to_string()))?;
        Ok(())
    }
}
