//! Kafka to document-store bulk forwarder.
//!
//! Consumes a partitioned topic under a consumer group and forwards every
//! record to an Elasticsearch-style store, one worker and one bulk buffer per
//! assigned partition. Buffers flush when full and once more on stream end;
//! offsets are committed per consumed record for at-least-once delivery.

pub mod config;
pub mod forwarder;
pub mod kafka;
pub mod metrics_consts;
pub mod retry;
pub mod server;
pub mod sink;
pub mod transform;
pub mod worker;

pub use config::Config;
pub use forwarder::{Forwarder, ForwarderState};
pub use transform::{Document, Transform};
