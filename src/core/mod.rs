//! Core processing logic.
//!
//! This module contains:
//! - Processor: the enrichment trait and the explicit registry
//! - Pipeline: priority-ordered, fault-isolated execution
//! - Stage: the worker tying queue, pipeline and publisher together

pub mod pipeline;
pub mod processor;
pub mod stage;

// Re-export commonly used types
pub use pipeline::{Diagnostic, DiagnosticKind, Pipeline, PipelineRun, Plan, ProcessorsConfig};
pub use processor::{Processor, ProcessorRegistry, Registration, RegistryError};
pub use stage::{hash_file, ItemOutcome, ItemReport, PassSummary, ProcessingStage, SeenFilter};
