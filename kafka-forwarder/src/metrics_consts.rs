/// Counter for records pulled off partition streams
pub const RECORDS_RECEIVED_COUNTER: &str = "forwarder_records_received_total";

/// Counter for records dropped by the transform hook
pub const RECORDS_DROPPED_COUNTER: &str = "forwarder_records_dropped_total";

/// Counter for Kafka transport errors observed by the background drain
pub const CONSUMER_ERRORS_COUNTER: &str = "forwarder_consumer_errors_total";

/// Counter for offset commits that could not be stored
pub const OFFSET_COMMIT_FAILURES_COUNTER: &str = "forwarder_offset_commit_failures_total";

pub const PARTITIONS_ASSIGNED_COUNTER: &str = "forwarder_partitions_assigned_total";
pub const PARTITIONS_REVOKED_COUNTER: &str = "forwarder_partitions_revoked_total";

/// Gauge for currently live partition workers
pub const ACTIVE_WORKERS_GAUGE: &str = "forwarder_active_partition_workers";

/// Counter for documents acknowledged by the store
pub const DOCUMENTS_FLUSHED_COUNTER: &str = "bulk_documents_flushed_total";

/// Counter for documents discarded after a failed flush (drop policy only)
pub const DOCUMENTS_LOST_COUNTER: &str = "bulk_documents_lost_total";

/// Histogram for bulk flush duration; only measured on success
pub const BULK_FLUSH_DURATION_HISTOGRAM: &str = "bulk_flush_duration_seconds";

/// Counter for individual bulk-write attempts that were retried
pub const BULK_FLUSH_RETRIES_COUNTER: &str = "bulk_flush_retries_total";

/// Counter for flushes abandoned, labeled by reason (exhausted/unreachable)
pub const BULK_FLUSH_FAILURES_COUNTER: &str = "bulk_flush_failures_total";
