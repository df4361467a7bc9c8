use std::sync::Arc;

use anyhow::Context;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::kafka::types::{Partition, PartitionClaim};
use crate::kafka::PartitionSource;
use crate::sink::{BulkBuffer, BulkStore, ElasticStore};
use crate::transform::Transform;
use crate::worker::run_worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Process-wide coordinator: owns the partition source and one worker task
/// per claimed partition, each with its own store connection and buffer.
///
/// `start` is non-blocking; `stop` blocks until the source has left the
/// group and every worker has drained its stream and flushed its buffer.
pub struct Forwarder {
    config: Config,
    transform: Arc<dyn Transform>,
    state: ForwarderState,
    shutdown: CancellationToken,
    source_handle: Option<JoinHandle<()>>,
    claims_handle: Option<JoinHandle<()>>,
}

impl Forwarder {
    pub fn new(config: Config, transform: Arc<dyn Transform>) -> Self {
        Self {
            config,
            transform,
            state: ForwarderState::Created,
            shutdown: CancellationToken::new(),
            source_handle: None,
            claims_handle: None,
        }
    }

    pub fn state(&self) -> ForwarderState {
        self.state
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.state == ForwarderState::Created,
            "forwarder already started"
        );

        let (source, claims_rx) = PartitionSource::new(
            &self.config.kafka_client_config(),
            &self.config.kafka_consumer_topic,
            self.config.kafka_log_consumer_errors,
            self.config.claim_channel_capacity,
            self.config.record_channel_capacity,
            self.shutdown.clone(),
        )
        .context("failed to start partition source")?;

        let endpoints = self.config.store_endpoint_list();
        let bulk_limit = self.config.bulk_limit;
        let index_prefix = self.config.index_prefix.clone();
        let retry = self.config.retry_policy();
        let exhausted = self.config.exhausted_batch_policy;

        self.source_handle = Some(tokio::spawn(source.run()));
        self.claims_handle = Some(tokio::spawn(dispatch_claims(
            claims_rx,
            self.transform.clone(),
            move |_partition: &Partition| -> anyhow::Result<BulkBuffer<ElasticStore>> {
                // A fresh store per worker: isolated connection pool, no
                // cross-worker locking.
                let store = ElasticStore::new(endpoints.clone())?;
                Ok(BulkBuffer::new(
                    store,
                    bulk_limit,
                    index_prefix.clone(),
                    retry,
                    exhausted,
                ))
            },
        )));

        self.state = ForwarderState::Running;
        info!(
            topic = %self.config.kafka_consumer_topic,
            group = %self.config.kafka_consumer_group,
            "Forwarder started"
        );
        Ok(())
    }

    /// Stop claiming partitions, drain every worker, and return once the
    /// pipeline is fully quiet. Safe to call once; later calls are no-ops.
    pub async fn stop(&mut self) {
        if self.state != ForwarderState::Running {
            warn!(state = ?self.state, "Ignoring stop on a forwarder that is not running");
            return;
        }
        self.state = ForwarderState::Stopping;
        info!("Forwarder stopping, no further partition claims will be accepted");

        self.shutdown.cancel();

        if let Some(handle) = self.source_handle.take() {
            if let Err(e) = handle.await {
                error!(error = ?e, "Partition source task panicked");
            }
        }
        if let Some(handle) = self.claims_handle.take() {
            if let Err(e) = handle.await {
                error!(error = ?e, "Claim dispatch task panicked");
            }
        }

        self.state = ForwarderState::Stopped;
        info!("Forwarder stopped");
    }
}

/// Accept claims until the source closes the sink, spawning one worker per
/// claim, then wait for every worker to finish draining. Awaiting the full
/// worker set here is what makes `Forwarder::stop` a complete drain.
async fn dispatch_claims<S, F>(
    mut claims: mpsc::Receiver<PartitionClaim>,
    transform: Arc<dyn Transform>,
    make_buffer: F,
) where
    S: BulkStore + 'static,
    F: Fn(&Partition) -> anyhow::Result<BulkBuffer<S>>,
{
    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    while let Some(claim) = claims.recv().await {
        let buffer = match make_buffer(&claim.partition) {
            Ok(buffer) => buffer,
            Err(e) => {
                error!(
                    topic = claim.partition.topic(),
                    partition = claim.partition.partition(),
                    error = ?e,
                    "Failed to build store client, skipping partition claim"
                );
                continue;
            }
        };

        workers.push(tokio::spawn(run_worker(claim, buffer, transform.clone())));
    }

    info!(
        workers = workers.len(),
        "Claim stream closed, draining partition workers"
    );
    for result in join_all(workers).await {
        if let Err(e) = result {
            error!(error = ?e, "Partition worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::types::{CommitOffsets, OffsetCommitError, Record};
    use crate::retry::{BackoffPolicy, RetryPolicy};
    use crate::sink::{ExhaustedBatchPolicy, StoreError};
    use crate::transform::Document;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct SharedStore {
        documents: AtomicUsize,
    }

    #[async_trait]
    impl BulkStore for Arc<SharedStore> {
        async fn bulk_write(&self, _index: &str, documents: &[Document]) -> Result<(), StoreError> {
            self.documents.fetch_add(documents.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    struct NoopCommits;

    impl CommitOffsets for NoopCommits {
        fn commit(&self, _partition: &Partition, _offset: i64) -> Result<(), OffsetCommitError> {
            Ok(())
        }
    }

    fn passthrough() -> Arc<dyn Transform> {
        Arc::new(|_topic: &str, _payload: &[u8]| -> anyhow::Result<Document> {
            Ok(serde_json::json!({"ok": true}))
        })
    }

    fn make_claim(partition: i32) -> (mpsc::Sender<Record>, PartitionClaim) {
        let partition = Partition::new("events".to_string(), partition);
        let (tx, rx) = mpsc::channel(16);
        (tx, PartitionClaim::new(partition, rx, Arc::new(NoopCommits)))
    }

    #[tokio::test]
    async fn dispatch_drains_every_worker_before_returning() {
        let store = Arc::new(SharedStore::default());
        let (claims_tx, claims_rx) = mpsc::channel(8);

        let store_for_factory = store.clone();
        let dispatch = tokio::spawn(dispatch_claims(
            claims_rx,
            passthrough(),
            move |_partition: &Partition| {
                Ok(BulkBuffer::new(
                    store_for_factory.clone(),
                    100,
                    "logs".to_string(),
                    RetryPolicy::new(
                        1,
                        BackoffPolicy::new(
                            Duration::from_millis(1),
                            2.0,
                            Duration::from_millis(2),
                        ),
                    ),
                    ExhaustedBatchPolicy::Drop,
                ))
            },
        ));

        let mut record_senders = Vec::new();
        for p in 0..3 {
            let (tx, claim) = make_claim(p);
            claims_tx.send(claim).await.unwrap();
            for offset in 0..4 {
                tx.send(Record {
                    partition: Partition::new("events".to_string(), p),
                    offset,
                    payload: Bytes::from_static(b"{}"),
                })
                .await
                .unwrap();
            }
            record_senders.push(tx);
        }

        // Shutdown order mirrors the source: record streams end, then the
        // claim sink closes.
        drop(record_senders);
        drop(claims_tx);
        dispatch.await.unwrap();

        // Every buffered document was flushed by a closing worker; nothing
        // is left in flight once dispatch returns.
        assert_eq!(store.documents.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn failed_store_construction_skips_the_claim() {
        let (claims_tx, claims_rx) = mpsc::channel(8);

        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_in_factory = attempts.clone();
        let dispatch = tokio::spawn(dispatch_claims(
            claims_rx,
            passthrough(),
            move |_partition: &Partition| -> anyhow::Result<BulkBuffer<Arc<SharedStore>>> {
                attempts_in_factory.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("no endpoints configured")
            },
        ));

        let (_record_tx, claim) = make_claim(0);
        claims_tx.send(claim).await.unwrap();
        drop(claims_tx);

        // The dispatch loop survives the bad claim and still drains cleanly.
        dispatch.await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
