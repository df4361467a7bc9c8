use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::metrics_consts::{
    BULK_FLUSH_DURATION_HISTOGRAM, BULK_FLUSH_FAILURES_COUNTER, BULK_FLUSH_RETRIES_COUNTER,
    DOCUMENTS_FLUSHED_COUNTER, DOCUMENTS_LOST_COUNTER,
};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::sink::{BulkStore, StoreError};
use crate::transform::Document;

/// What to do with the pending documents when a flush gives up (retries
/// exhausted or the store unreachable). `Drop` matches the historical
/// behavior of clearing the buffer; `Retain` keeps the documents for the
/// next flush at the cost of unbounded growth while the store is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustedBatchPolicy {
    Drop,
    Retain,
}

impl std::str::FromStr for ExhaustedBatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "drop" => Ok(ExhaustedBatchPolicy::Drop),
            "retain" => Ok(ExhaustedBatchPolicy::Retain),
            _ => Err(format!("Unknown exhausted batch policy: {s}")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("bulk write to {index} gave up after {attempts} attempts ({lost} documents lost)")]
    RetriesExhausted {
        index: String,
        attempts: u32,
        lost: usize,
        #[source]
        source: StoreError,
    },
    #[error("store unreachable, aborted flush to {index} ({lost} documents lost)")]
    Unreachable {
        index: String,
        lost: usize,
        #[source]
        source: StoreError,
    },
}

/// Per-partition accumulator of transformed documents, flushed in bulk once
/// it reaches its limit and once more when the partition stream ends.
///
/// Single-writer: exactly one worker owns a buffer and all methods take
/// `&mut self`. `add` is a plain push; every piece of I/O lives in `flush`.
pub struct BulkBuffer<S> {
    store: S,
    pending: Vec<Document>,
    limit: usize,
    index_prefix: String,
    retry: RetryPolicy,
    exhausted: ExhaustedBatchPolicy,
    closed: bool,
}

impl<S: BulkStore> BulkBuffer<S> {
    pub fn new(
        store: S,
        limit: usize,
        index_prefix: String,
        retry: RetryPolicy,
        exhausted: ExhaustedBatchPolicy,
    ) -> Self {
        Self {
            store,
            pending: Vec::with_capacity(limit),
            limit,
            index_prefix,
            retry,
            exhausted,
            closed: false,
        }
    }

    pub fn add(&mut self, document: Document) {
        self.pending.push(document);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The target index is dated at flush time, so documents buffered across
    /// a UTC midnight land in the index matching when they were written, not
    /// when they were enqueued.
    pub fn index_name(&self, at: DateTime<Utc>) -> String {
        format!("{}-{}", self.index_prefix, at.format("%Y.%m.%d"))
    }

    /// Issue one bulk write carrying everything pending, re-issuing the
    /// identical request per the retry policy until it succeeds or the
    /// policy says to give up.
    pub async fn flush(&mut self) -> Result<(), FlushError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let index = self.index_name(Utc::now());
        let mut attempt: u32 = 0;

        loop {
            let start = Instant::now();
            match self.store.bulk_write(&index, &self.pending).await {
                Ok(()) => {
                    let elapsed = start.elapsed();
                    metrics::histogram!(BULK_FLUSH_DURATION_HISTOGRAM)
                        .record(elapsed.as_secs_f64());
                    metrics::counter!(DOCUMENTS_FLUSHED_COUNTER)
                        .increment(self.pending.len() as u64);
                    debug!(
                        index = %index,
                        documents = self.pending.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Bulk flush complete"
                    );
                    self.pending.clear();
                    return Ok(());
                }
                Err(error) => match self.retry.decide(attempt, &error) {
                    RetryDecision::Retry(wait) => {
                        metrics::counter!(BULK_FLUSH_RETRIES_COUNTER).increment(1);
                        warn!(
                            index = %index,
                            attempt,
                            wait_ms = wait.as_millis() as u64,
                            error = %error,
                            "Bulk write failed, backing off"
                        );
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                    }
                    RetryDecision::Stop => {
                        metrics::counter!(BULK_FLUSH_FAILURES_COUNTER, "reason" => "exhausted")
                            .increment(1);
                        let lost = self.settle_failed_batch();
                        return Err(FlushError::RetriesExhausted {
                            index,
                            attempts: attempt,
                            lost,
                            source: error,
                        });
                    }
                    RetryDecision::Fatal => {
                        metrics::counter!(BULK_FLUSH_FAILURES_COUNTER, "reason" => "unreachable")
                            .increment(1);
                        let lost = self.settle_failed_batch();
                        return Err(FlushError::Unreachable {
                            index,
                            lost,
                            source: error,
                        });
                    }
                },
            }
        }
    }

    /// Final flush of whatever is pending. Idempotent: the second and later
    /// calls are no-ops.
    pub async fn close(&mut self) -> Result<(), FlushError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if !self.pending.is_empty() {
            warn!(
                pending = self.pending.len(),
                "Closing buffer with unflushed documents, issuing final flush"
            );
            return self.flush().await;
        }
        Ok(())
    }

    fn settle_failed_batch(&mut self) -> usize {
        match self.exhausted {
            ExhaustedBatchPolicy::Drop => {
                let lost = self.pending.len();
                metrics::counter!(DOCUMENTS_LOST_COUNTER).increment(lost as u64);
                self.pending.clear();
                lost
            }
            ExhaustedBatchPolicy::Retain => 0,
        }
    }
}
