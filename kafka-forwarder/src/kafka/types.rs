use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use rdkafka::topic_partition_list::TopicPartitionListElem;
use tokio::sync::mpsc;

/// A single topic-partition, used as the routing key for workers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    topic: String,
    partition: i32,
}

impl Partition {
    pub fn new(topic: String, partition: i32) -> Self {
        Self { topic, partition }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition)
    }
}

impl From<TopicPartitionListElem<'_>> for Partition {
    fn from(elem: TopicPartitionListElem<'_>) -> Self {
        Self::new(elem.topic().to_string(), elem.partition())
    }
}

/// One raw record pulled off a partition stream. Consumed exactly once by the
/// transform hook.
#[derive(Debug, Clone)]
pub struct Record {
    pub partition: Partition,
    pub offset: i64,
    pub payload: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetCommitError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("consumer gone")]
    Gone,
}

/// Seam for marking a record's offset as consumed. The production
/// implementation stores offsets on the group consumer for interval
/// auto-commit; tests substitute counting doubles.
pub trait CommitOffsets: Send + Sync {
    fn commit(&self, partition: &Partition, offset: i64) -> Result<(), OffsetCommitError>;
}

/// Assignment of one partition's record stream to this process. Owned
/// exclusively by the worker it is dispatched to; the stream ends when the
/// source drops the sending half (revocation or shutdown).
pub struct PartitionClaim {
    pub partition: Partition,
    pub records: mpsc::Receiver<Record>,
    pub offsets: Arc<dyn CommitOffsets>,
}

impl PartitionClaim {
    pub fn new(
        partition: Partition,
        records: mpsc::Receiver<Record>,
        offsets: Arc<dyn CommitOffsets>,
    ) -> Self {
        Self {
            partition,
            records,
            offsets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_display_includes_topic_and_number() {
        let partition = Partition::new("events".to_string(), 7);
        assert_eq!(partition.to_string(), "events:7");
    }
}
