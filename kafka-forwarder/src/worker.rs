use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::kafka::types::{OffsetCommitError, PartitionClaim};
use crate::metrics_consts::{
    ACTIVE_WORKERS_GAUGE, OFFSET_COMMIT_FAILURES_COUNTER, RECORDS_DROPPED_COUNTER,
};
use crate::sink::{BulkBuffer, BulkStore};
use crate::transform::Transform;

/// Consume one partition's record stream to the end.
///
/// Per record, in arrival order: apply the transform (an error drops the
/// record), buffer the document, flush when the buffer is full, and commit
/// the offset unconditionally. A failed flush is logged and consumption
/// continues; whether its documents survive is the buffer's retry policy's
/// business. On stream end the buffer is closed, flushing any residue.
pub async fn run_worker<S, T>(mut claim: PartitionClaim, mut buffer: BulkBuffer<S>, transform: Arc<T>)
where
    S: BulkStore,
    T: Transform + ?Sized,
{
    let partition = claim.partition.clone();
    metrics::gauge!(ACTIVE_WORKERS_GAUGE).increment(1.0);
    info!(
        topic = partition.topic(),
        partition = partition.partition(),
        "Partition worker started"
    );

    while let Some(record) = claim.records.recv().await {
        match transform.apply(partition.topic(), &record.payload) {
            Ok(document) => {
                buffer.add(document);
                if buffer.len() >= buffer.limit() {
                    if let Err(e) = buffer.flush().await {
                        error!(
                            topic = partition.topic(),
                            partition = partition.partition(),
                            error = ?e,
                            "Bulk flush failed"
                        );
                    }
                }
            }
            Err(e) => {
                metrics::counter!(RECORDS_DROPPED_COUNTER).increment(1);
                warn!(
                    topic = partition.topic(),
                    partition = partition.partition(),
                    offset = record.offset,
                    error = ?e,
                    "Transform failed, dropping record"
                );
            }
        }

        // At-least-once: the offset is marked consumed whatever happened
        // above. A record whose flush later fails may be re-delivered only
        // after a restart from an older committed offset.
        match claim.offsets.commit(&partition, record.offset) {
            Ok(()) => {}
            Err(OffsetCommitError::Gone) => {
                // Expected while draining after the consumer closed.
                debug!(
                    topic = partition.topic(),
                    partition = partition.partition(),
                    "Consumer gone, offset not stored"
                );
            }
            Err(e) => {
                metrics::counter!(OFFSET_COMMIT_FAILURES_COUNTER).increment(1);
                warn!(
                    topic = partition.topic(),
                    partition = partition.partition(),
                    offset = record.offset,
                    error = %e,
                    "Failed to store offset"
                );
            }
        }
    }

    if let Err(e) = buffer.close().await {
        error!(
            topic = partition.topic(),
            partition = partition.partition(),
            error = ?e,
            "Final flush failed while closing partition worker"
        );
    }

    metrics::gauge!(ACTIVE_WORKERS_GAUGE).decrement(1.0);
    info!(
        topic = partition.topic(),
        partition = partition.partition(),
        "Partition worker stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::types::{CommitOffsets, Partition, Record};
    use crate::retry::{BackoffPolicy, RetryPolicy};
    use crate::sink::{ExhaustedBatchPolicy, StoreError};
    use crate::transform::Document;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingStore {
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl BulkStore for Arc<RecordingStore> {
        async fn bulk_write(&self, _index: &str, documents: &[Document]) -> Result<(), StoreError> {
            self.batches.lock().unwrap().push(documents.len());
            Ok(())
        }
    }

    #[derive(Default)]
    struct BrokenStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BulkStore for Arc<BrokenStore> {
        async fn bulk_write(&self, _index: &str, _documents: &[Document]) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::HttpStatus { status: 500 })
        }
    }

    #[derive(Default)]
    struct CountingCommits {
        commits: AtomicUsize,
    }

    impl CommitOffsets for CountingCommits {
        fn commit(&self, _partition: &Partition, _offset: i64) -> Result<(), OffsetCommitError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn buffer<S: BulkStore>(store: S, limit: usize) -> BulkBuffer<S> {
        BulkBuffer::new(
            store,
            limit,
            "logs".to_string(),
            RetryPolicy::new(
                1,
                BackoffPolicy::new(Duration::from_millis(1), 2.0, Duration::from_millis(2)),
            ),
            ExhaustedBatchPolicy::Drop,
        )
    }

    fn claim(
        offsets: Arc<dyn CommitOffsets>,
    ) -> (mpsc::Sender<Record>, PartitionClaim, Partition) {
        let partition = Partition::new("events".to_string(), 0);
        let (tx, rx) = mpsc::channel(16);
        (tx, PartitionClaim::new(partition.clone(), rx, offsets), partition)
    }

    fn record(partition: &Partition, offset: i64, payload: &'static [u8]) -> Record {
        Record {
            partition: partition.clone(),
            offset,
            payload: Bytes::from_static(payload),
        }
    }

    fn passthrough() -> Arc<dyn Transform> {
        Arc::new(|_topic: &str, payload: &[u8]| -> anyhow::Result<Document> {
            Ok(serde_json::from_slice(payload)?)
        })
    }

    #[tokio::test]
    async fn five_records_with_limit_three_flush_as_three_then_two() {
        let store = Arc::new(RecordingStore::default());
        let commits = Arc::new(CountingCommits::default());
        let (tx, claim, partition) = claim(commits.clone());

        let worker = tokio::spawn(run_worker(
            claim,
            buffer(store.clone(), 3),
            passthrough(),
        ));

        for offset in 0..5 {
            tx.send(record(&partition, offset, b"{\"ok\":true}"))
                .await
                .unwrap();
        }
        drop(tx);
        worker.await.unwrap();

        assert_eq!(*store.batches.lock().unwrap(), vec![3, 2]);
        assert_eq!(commits.commits.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn transform_failure_drops_the_record_but_still_commits() {
        let store = Arc::new(RecordingStore::default());
        let commits = Arc::new(CountingCommits::default());
        let (tx, claim, partition) = claim(commits.clone());

        let worker = tokio::spawn(run_worker(
            claim,
            buffer(store.clone(), 10),
            passthrough(),
        ));

        tx.send(record(&partition, 0, b"not json")).await.unwrap();
        tx.send(record(&partition, 1, b"{\"ok\":true}")).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        // Only the good record reached the store, on the closing flush.
        assert_eq!(*store.batches.lock().unwrap(), vec![1]);
        assert_eq!(commits.commits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn flush_failures_do_not_stop_consumption() {
        let store = Arc::new(BrokenStore::default());
        let commits = Arc::new(CountingCommits::default());
        let (tx, claim, partition) = claim(commits.clone());

        let worker = tokio::spawn(run_worker(
            claim,
            buffer(store.clone(), 2),
            passthrough(),
        ));

        for offset in 0..4 {
            tx.send(record(&partition, offset, b"{}")).await.unwrap();
        }
        drop(tx);
        worker.await.unwrap();

        // Two full-buffer flushes attempted and failed, every offset still
        // committed, and the worker still exited cleanly.
        assert!(store.calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(commits.commits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn stream_end_flushes_residue_via_close() {
        let store = Arc::new(RecordingStore::default());
        let commits = Arc::new(CountingCommits::default());
        let (tx, claim, partition) = claim(commits.clone());

        let worker = tokio::spawn(run_worker(
            claim,
            buffer(store.clone(), 100),
            passthrough(),
        ));

        tx.send(record(&partition, 0, b"{}")).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        assert_eq!(*store.batches.lock().unwrap(), vec![1]);
    }
}
