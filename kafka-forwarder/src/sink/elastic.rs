use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

use crate::sink::{BulkStore, RejectedItem, StoreError};
use crate::transform::Document;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bulk-write client for an Elasticsearch-style document store.
///
/// Requests rotate across the configured endpoints. Each worker owns its own
/// store instance and therefore its own connection pool.
pub struct ElasticStore {
    client: reqwest::Client,
    endpoints: Vec<String>,
    next_endpoint: AtomicUsize,
}

impl ElasticStore {
    pub fn new(endpoints: Vec<String>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !endpoints.is_empty(),
            "at least one store endpoint is required"
        );

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoints,
            next_endpoint: AtomicUsize::new(0),
        })
    }

    fn pick_endpoint(&self) -> &str {
        let next = self.next_endpoint.fetch_add(1, Ordering::Relaxed);
        &self.endpoints[next % self.endpoints.len()]
    }

    // NDJSON bulk body: an index action line followed by the document source
    // line, for every document, with a trailing newline.
    fn bulk_body(index: &str, documents: &[Document]) -> String {
        let action = serde_json::json!({"index": {"_index": index}}).to_string();

        let mut body = String::new();
        for document in documents {
            body.push_str(&action);
            body.push('\n');
            body.push_str(&document.to_string());
            body.push('\n');
        }
        body
    }
}

fn classify_send_error(e: reqwest::Error) -> StoreError {
    if e.is_connect() {
        StoreError::Unreachable(e.to_string())
    } else {
        StoreError::Request(e.to_string())
    }
}

#[derive(Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<BulkResponseItem>,
}

#[derive(Deserialize)]
struct BulkResponseItem {
    index: Option<BulkItemStatus>,
}

#[derive(Deserialize)]
struct BulkItemStatus {
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[async_trait]
impl BulkStore for ElasticStore {
    async fn bulk_write(&self, index: &str, documents: &[Document]) -> Result<(), StoreError> {
        let url = format!("{}/_bulk", self.pick_endpoint());

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(Self::bulk_body(index, documents))
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let parsed: BulkResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        if parsed.errors {
            let rejected: Vec<RejectedItem> = parsed
                .items
                .into_iter()
                .filter_map(|item| {
                    let status = item.index?;
                    status.error.map(|error| RejectedItem {
                        status: status.status,
                        error,
                    })
                })
                .collect();
            return Err(StoreError::ItemsRejected { rejected });
        }

        Ok(())
    }
}
