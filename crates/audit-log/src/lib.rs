//! Decision audit sink: bounded queue, batched writes, at-least-once.
//!
//! The coordinator hands each [`warden_core::DecisionRecord`] to the sink and
//! moves on; durable writing happens on a background task. Chunks close at a
//! record-count or age threshold, whichever comes first, and are handed to a
//! pluggable [`AuditWriter`]. Failed writes retry with exponential backoff,
//! then spill to a bounded dead-letter ring with an optional durable on-disk
//! tail. Records beyond the queue's admission deadline dead-letter too,
//! visibly via counters rather than silently. Authorization never fails
//! because auditing is slow.

#![deny(unsafe_code)]

mod sink;
mod writer;

pub use sink::{AuditSink, SinkConfig, SinkMetricsSnapshot};
pub use writer::{AuditWriter, JsonlPartitionWriter, VecWriter};

use thiserror::Error;

/// Errors emitted by the audit sink and its writers.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Filesystem failure in a writer or the dead-letter tail.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// Record serialization failure.
    #[error("serialize: {0}")]
    Serde(#[from] serde_json::Error),
    /// The sink was closed before the call completed.
    #[error("audit sink closed")]
    Closed,
    /// Downstream store rejected a batch.
    #[error("writer: {0}")]
    Writer(String),
}
