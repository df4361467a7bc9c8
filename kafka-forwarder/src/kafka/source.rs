use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::kafka::context::{ForwarderContext, RebalanceEvent};
use crate::kafka::types::{CommitOffsets, OffsetCommitError, Partition, PartitionClaim, Record};
use crate::metrics_consts::{
    PARTITIONS_ASSIGNED_COUNTER, PARTITIONS_REVOKED_COUNTER, RECORDS_RECEIVED_COUNTER,
};

const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Marks offsets as consumed by storing them on the group consumer; the
/// stored offsets ride out on librdkafka's interval auto-commit. Holds the
/// consumer weakly: commits that race consumer teardown during shutdown
/// resolve to `Gone` rather than keeping the connection alive.
struct ConsumerOffsets {
    consumer: Weak<StreamConsumer<ForwarderContext>>,
}

impl CommitOffsets for ConsumerOffsets {
    fn commit(&self, partition: &Partition, offset: i64) -> Result<(), OffsetCommitError> {
        let consumer = self.consumer.upgrade().ok_or(OffsetCommitError::Gone)?;
        consumer.store_offset(partition.topic(), partition.partition(), offset)?;
        Ok(())
    }
}

/// Group-coordinated consumption of one topic, fanned out as one record
/// stream per assigned partition.
///
/// The drive loop owns the consumer: it reacts to rebalance notifications by
/// opening a bounded record channel per assigned partition (emitting a
/// [`PartitionClaim`] through the claim sink) and by dropping the sending
/// half on revocation, which the owning worker observes as end-of-stream.
/// Records are routed to their partition's channel in arrival order.
pub struct PartitionSource {
    consumer: Arc<StreamConsumer<ForwarderContext>>,
    rebalance_rx: mpsc::UnboundedReceiver<RebalanceEvent>,
    claims_tx: mpsc::Sender<PartitionClaim>,
    routes: HashMap<Partition, mpsc::Sender<Record>>,
    record_channel_capacity: usize,
    log_consumer_errors: bool,
    shutdown: CancellationToken,
}

impl PartitionSource {
    /// Create the consumer and subscribe. A failure here means the pipeline
    /// cannot come up at all and is surfaced to the caller of
    /// `Forwarder::start`.
    pub fn new(
        client_config: &ClientConfig,
        topic: &str,
        log_consumer_errors: bool,
        claim_channel_capacity: usize,
        record_channel_capacity: usize,
        shutdown: CancellationToken,
    ) -> anyhow::Result<(Self, mpsc::Receiver<PartitionClaim>)> {
        let (context, rebalance_rx) = ForwarderContext::new(log_consumer_errors);

        let consumer: StreamConsumer<ForwarderContext> = client_config
            .create_with_context(context)
            .context("failed to create Kafka consumer")?;
        consumer
            .subscribe(&[topic])
            .with_context(|| format!("failed to subscribe to topic '{topic}'"))?;

        let (claims_tx, claims_rx) = mpsc::channel(claim_channel_capacity);

        Ok((
            Self {
                consumer: Arc::new(consumer),
                rebalance_rx,
                claims_tx,
                routes: HashMap::new(),
                record_channel_capacity,
                log_consumer_errors,
                shutdown,
            },
            claims_rx,
        ))
    }

    /// Drive loop; runs until the shutdown token fires. On exit the source
    /// leaves the group and drops every record sender and the claim sink, so
    /// downstream workers and the claim loop all observe end-of-stream.
    pub async fn run(mut self) {
        info!("Partition source started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Partition source shutting down");
                    break;
                }

                Some(event) = self.rebalance_rx.recv() => {
                    self.handle_rebalance(event).await;
                }

                poll = timeout(POLL_TIMEOUT, self.consumer.recv()) => {
                    match poll {
                        Ok(Ok(message)) => {
                            let record = Record {
                                partition: Partition::new(
                                    message.topic().to_string(),
                                    message.partition(),
                                ),
                                offset: message.offset(),
                                payload: Bytes::copy_from_slice(message.payload().unwrap_or(&[])),
                            };
                            drop(message);
                            self.route(record).await;
                        }
                        Ok(Err(e)) => {
                            if self.log_consumer_errors {
                                warn!(error = %e, "Error receiving message");
                            }
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                        Err(_) => {
                            // Poll timeout, loop around
                        }
                    }
                }
            }
        }

        self.consumer.unsubscribe();
        self.routes.clear();
        info!("Partition source stopped");
    }

    async fn handle_rebalance(&mut self, event: RebalanceEvent) {
        match event {
            RebalanceEvent::Assign(partitions) => {
                for partition in partitions {
                    metrics::counter!(PARTITIONS_ASSIGNED_COUNTER).increment(1);
                    self.open_route(partition).await;
                }
            }
            RebalanceEvent::Revoke(partitions) => {
                for partition in &partitions {
                    if self.routes.remove(partition).is_some() {
                        metrics::counter!(PARTITIONS_REVOKED_COUNTER).increment(1);
                        info!(
                            topic = partition.topic(),
                            partition = partition.partition(),
                            "Partition revoked, record stream closed"
                        );
                    }
                }
            }
        }
    }

    /// Open a record channel for a partition and dispatch its claim. Reuses
    /// an existing route on rapid revoke-then-reassign. A claim sink that
    /// closed mid-rebalance is the normal shutdown race and a no-op.
    async fn open_route(&mut self, partition: Partition) {
        if self.routes.contains_key(&partition) {
            debug!(
                topic = partition.topic(),
                partition = partition.partition(),
                "Route already exists, reusing (rapid re-assignment)"
            );
            return;
        }

        let (records_tx, records_rx) = mpsc::channel(self.record_channel_capacity);
        let claim = PartitionClaim::new(
            partition.clone(),
            records_rx,
            Arc::new(ConsumerOffsets {
                consumer: Arc::downgrade(&self.consumer),
            }),
        );

        if self.claims_tx.send(claim).await.is_err() {
            debug!(
                topic = partition.topic(),
                partition = partition.partition(),
                "Claim sink closed, discarding partition claim"
            );
            return;
        }

        info!(
            topic = partition.topic(),
            partition = partition.partition(),
            "Partition claimed"
        );
        self.routes.insert(partition, records_tx);
    }

    async fn route(&mut self, record: Record) {
        metrics::counter!(RECORDS_RECEIVED_COUNTER).increment(1);

        // Assignment notifications normally land before the first record,
        // but the two race through separate channels; open the route on
        // first sight if the record wins.
        if !self.routes.contains_key(&record.partition) {
            self.open_route(record.partition.clone()).await;
        }

        let Some(records_tx) = self.routes.get(&record.partition) else {
            debug!(
                topic = record.partition.topic(),
                partition = record.partition.partition(),
                "No live route for record, dropping (shutting down)"
            );
            return;
        };

        // Bounded channel: a worker that falls behind applies backpressure
        // here rather than growing an unbounded queue.
        if records_tx.send(record).await.is_err() {
            warn!("Partition worker gone, dropping record");
        }
    }
}
