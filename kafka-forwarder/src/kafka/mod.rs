pub mod context;
pub mod source;
pub mod types;

pub use source::PartitionSource;
pub use types::{CommitOffsets, OffsetCommitError, Partition, PartitionClaim, Record};
