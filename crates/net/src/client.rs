//! HTTP client implementing `StorageClient`.
//!
//! `HttpStorageClient` talks to storage nodes over one shared, pooled
//! `reqwest::Client`. Only probes carry their own timeout; every other
//! call relies on the client's default deadline.

use bytes::Bytes;
use hrw_proxy::storage_client::{
    fetch_accepts, probe_accepts, purge_accepts, store_accepts, ListingEntry, StorageClient,
    StorageError,
};
use reqwest::header::CONTENT_LENGTH;
use std::time::Duration;

/// An HTTP storage transport.
#[derive(Debug, Clone)]
pub struct HttpStorageClient {
    client: reqwest::Client,
}

fn request_error(url: &str, e: reqwest::Error) -> StorageError {
    StorageError::Request {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

fn status_error(url: &str, status: reqwest::StatusCode) -> StorageError {
    StorageError::Status {
        url: url.to_string(),
        status: status.as_u16(),
    }
}

impl HttpStorageClient {
    /// Build a client. Redirects are never followed: a storage node
    /// answering 301 is a failure, not a hop.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl StorageClient for HttpStorageClient {
    async fn probe(&self, url: &str, timeout: Duration) -> bool {
        let _timer = hrw_metrics::start_storage_timer("probe");
        let live = match self.client.head(url).timeout(timeout).send().await {
            Ok(resp) => probe_accepts(resp.status().as_u16()),
            Err(e) => {
                tracing::debug!("probe {} failed: {}", url, e);
                false
            }
        };
        hrw_metrics::record_storage_op("probe", live);
        live
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, StorageError> {
        let _timer = hrw_metrics::start_storage_timer("fetch");
        let result = async {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| request_error(url, e))?;
            if !fetch_accepts(resp.status().as_u16()) {
                return Err(status_error(url, resp.status()));
            }
            resp.bytes().await.map_err(|e| request_error(url, e))
        }
        .await;
        hrw_metrics::record_storage_op("fetch", result.is_ok());
        result
    }

    async fn store(&self, url: &str, body: Bytes) -> Result<(), StorageError> {
        let _timer = hrw_metrics::start_storage_timer("store");
        let result = async {
            let resp = self
                .client
                .put(url)
                .header(CONTENT_LENGTH, body.len())
                .body(body)
                .send()
                .await
                .map_err(|e| request_error(url, e))?;
            if !store_accepts(resp.status().as_u16()) {
                return Err(status_error(url, resp.status()));
            }
            Ok(())
        }
        .await;
        hrw_metrics::record_storage_op("store", result.is_ok());
        result
    }

    async fn purge(&self, url: &str) -> Result<(), StorageError> {
        let _timer = hrw_metrics::start_storage_timer("purge");
        let result = async {
            let resp = self
                .client
                .delete(url)
                .send()
                .await
                .map_err(|e| request_error(url, e))?;
            if !purge_accepts(resp.status().as_u16()) {
                return Err(status_error(url, resp.status()));
            }
            Ok(())
        }
        .await;
        hrw_metrics::record_storage_op("purge", result.is_ok());
        result
    }

    async fn list(&self, url: &str) -> Result<Vec<ListingEntry>, StorageError> {
        let _timer = hrw_metrics::start_storage_timer("list");
        let result = async {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| request_error(url, e))?;
            if resp.status() != reqwest::StatusCode::OK {
                return Err(status_error(url, resp.status()));
            }
            resp.json::<Vec<ListingEntry>>()
                .await
                .map_err(|e| StorageError::Listing {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
        }
        .await;
        hrw_metrics::record_storage_op("list", result.is_ok());
        result
    }
}
