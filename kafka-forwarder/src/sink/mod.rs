use async_trait::async_trait;

use crate::transform::Document;

pub mod buffer;
pub mod elastic;

pub use buffer::{BulkBuffer, ExhaustedBatchPolicy, FlushError};
pub use elastic::ElasticStore;

/// A document rejected by the store in a bulk response, with the store's own
/// error body attached.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RejectedItem {
    pub status: u16,
    pub error: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The endpoint actively refused the connection. Treated as fatal by the
    /// retry policy: no amount of backoff fixes a dead endpoint.
    #[error("store endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("bulk request failed: {0}")]
    Request(String),
    #[error("bulk request returned HTTP {status}")]
    HttpStatus { status: u16 },
    #[error("store rejected {} documents", rejected.len())]
    ItemsRejected { rejected: Vec<RejectedItem> },
}

/// One bulk write of many documents into a dated index.
#[async_trait]
pub trait BulkStore: Send + Sync {
    async fn bulk_write(&self, index: &str, documents: &[Document]) -> Result<(), StoreError>;
}
