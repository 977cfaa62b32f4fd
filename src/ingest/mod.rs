//! Mail ingestion from watched directories.
//!
//! The durable queue turns dropped mail files into claimed work items:
//!
//! ```text
//! drop dir → discover → claim (rename .processing) → stage
//!                                   ↓
//!                  acknowledge | fail | stale recovery
//! ```

pub mod queue;

// Re-export key types
pub use queue::{
    AckOutcome, AckPolicy, Claim, Discovery, FailOutcome, MailQueue, QueueConfig, QueueError,
    Recovered, RequeueOutcome, Source, StaleOutcome, StalePolicy, WorkFeed,
};
