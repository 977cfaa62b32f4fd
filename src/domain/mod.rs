//! Domain types for mailsieve.
//!
//! This module contains the core data structures:
//! - WorkItem: a mail file tracked through the durable queue
//! - MailInput: the payload handed to processors
//! - ResultRecord: enrichment output forwarded downstream

pub mod item;
pub mod record;

// Re-export commonly used types
pub use item::{
    identity_of_marker, in_flight_path, is_in_flight, MailInput, MailType, Origin, WorkItem,
    IN_FLIGHT_SUFFIX,
};
pub use record::{ResultRecord, Results};
