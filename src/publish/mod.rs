//! Publishing result records to the indexing backend.

pub mod client;
pub mod endpoint;

pub use client::{PublishClient, PublishConfig, PublishError};
pub use endpoint::{Backoff, EndpointPool};
