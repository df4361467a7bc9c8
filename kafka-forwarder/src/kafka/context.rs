use rdkafka::consumer::{BaseConsumer, ConsumerContext, Rebalance};
use rdkafka::error::KafkaError;
use rdkafka::ClientContext;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::kafka::types::Partition;
use crate::metrics_consts::CONSUMER_ERRORS_COUNTER;

/// Rebalance notifications forwarded from the librdkafka callback thread to
/// the async source loop. Callbacks must stay fast and non-blocking, so they
/// only translate the partition list and push it on an unbounded channel.
#[derive(Debug, Clone)]
pub enum RebalanceEvent {
    Assign(Vec<Partition>),
    Revoke(Vec<Partition>),
}

pub struct ForwarderContext {
    rebalance_tx: mpsc::UnboundedSender<RebalanceEvent>,
    log_consumer_errors: bool,
}

impl ForwarderContext {
    pub fn new(log_consumer_errors: bool) -> (Self, mpsc::UnboundedReceiver<RebalanceEvent>) {
        let (rebalance_tx, rebalance_rx) = mpsc::unbounded_channel();
        (
            Self {
                rebalance_tx,
                log_consumer_errors,
            },
            rebalance_rx,
        )
    }

    fn send_event(&self, event: RebalanceEvent) {
        // The receiving loop only goes away at shutdown, at which point the
        // notification is moot anyway.
        if let Err(e) = self.rebalance_tx.send(event) {
            debug!("Dropping rebalance event, source loop has exited: {e}");
        }
    }
}

impl ClientContext for ForwarderContext {
    // librdkafka drains transport errors on its own background thread and
    // hands them here. These are observed, never escalated: a broker blip
    // must not take the pipeline down.
    fn error(&self, error: KafkaError, reason: &str) {
        metrics::counter!(CONSUMER_ERRORS_COUNTER).increment(1);
        if self.log_consumer_errors {
            warn!(error = %error, reason, "Kafka transport error");
        }
    }
}

impl ConsumerContext for ForwarderContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        if let Rebalance::Revoke(partitions) = rebalance {
            if partitions.count() == 0 {
                debug!("Skipping empty revoke rebalance");
                return;
            }

            let revoked: Vec<Partition> = partitions
                .elements()
                .into_iter()
                .map(Partition::from)
                .collect();

            info!("Revoking {} partitions", revoked.len());
            self.send_event(RebalanceEvent::Revoke(revoked));
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                if partitions.count() == 0 {
                    debug!("Skipping empty assign rebalance");
                    return;
                }

                let assigned: Vec<Partition> = partitions
                    .elements()
                    .into_iter()
                    .map(Partition::from)
                    .collect();

                info!("Assigned {} partitions", assigned.len());
                self.send_event(RebalanceEvent::Assign(assigned));
            }
            Rebalance::Revoke(_) => {}
            Rebalance::Error(e) => {
                error!("Rebalance error: {e}");
            }
        }
    }
}
