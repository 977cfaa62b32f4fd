//! mailsieve - Crash-safe mail enrichment pipeline
//!
//! Mails dropped into watched directories are claimed, enriched by a set
//! of processors and published to a Redis-backed indexing queue.
//!
//! # Architecture
//!
//! ```text
//! drop dir → MailQueue (claim by rename) → Pipeline → PublishClient → Redis
//!                 ↑                                          │
//!                 └──────── acknowledge / fail ◀─────────────┘
//! ```
//!
//! - Every claimed mail is resolved exactly once: archived/removed on
//!   success, quarantined on failure
//! - A crash leaves `.processing` markers behind; they are recovered
//!   after the next exhausted discovery pass
//! - Processor failures degrade the record, never the run
//!
//! # Modules
//!
//! - `ingest`: Durable file queue
//! - `core`: Processor registry, pipeline and processing stage
//! - `publish`: Resilient publish client
//! - `adapters`: Redis transport and external command processors
//! - `domain`: Data structures (WorkItem, ResultRecord)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Process one pass and exit
//! mailsieve --config mailsieve.yaml run --once
//!
//! # List pending mails
//! mailsieve scan
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;
pub mod publish;

// Re-export main types at crate root for convenience
pub use crate::core::{Pipeline, ProcessingStage, Processor, ProcessorRegistry};
pub use domain::{MailInput, MailType, ResultRecord, Results, WorkItem};
pub use ingest::{MailQueue, WorkFeed};
pub use publish::{PublishClient, PublishConfig, PublishError};
