//! Priority-ordered, fault-isolated processor pipeline.
//!
//! The run order and each processor's configuration section are resolved
//! once, when the pipeline is built. A run never fails: a processor that
//! errors, times out or has no configuration section is recorded as a
//! diagnostic and the next processor runs.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::domain::{MailInput, ResultRecord, Results};

use super::processor::{Processor, ProcessorRegistry};

/// Processor name → configuration section
pub type ProcessorsConfig = HashMap<String, serde_json::Value>;

/// How a processor's configuration resolved at build time
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Section present and enabled
    Ready(serde_json::Value),

    /// Section present with `enabled: false`
    Disabled,

    /// No section with the processor's name
    MissingConfig,

    /// Section present but unusable (reason)
    Invalid(String),
}

struct Step {
    processor: Arc<dyn Processor>,
    plan: Plan,
    timeout: Option<Duration>,
}

/// Why a processor produced no report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    MissingConfig,
    InvalidConfig(String),
    Failed(String),
    TimedOut(Duration),
}

/// One processor that did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub processor: String,
    pub kind: DiagnosticKind,
}

/// Output of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub record: ResultRecord,
    pub diagnostics: Vec<Diagnostic>,
}

impl PipelineRun {
    /// Names of processors that failed or timed out
    pub fn failed(&self) -> Vec<&str> {
        self.diagnostics
            .iter()
            .filter(|d| !matches!(d.kind, DiagnosticKind::MissingConfig))
            .map(|d| d.processor.as_str())
            .collect()
    }
}

/// A resolved processor pipeline
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    /// Resolve run order and configuration sections
    pub fn new(registry: &ProcessorRegistry, config: &ProcessorsConfig) -> Self {
        let steps = registry
            .ordered()
            .into_iter()
            .map(|registration| {
                let name = registration.name();
                let (plan, timeout) = match config.get(name) {
                    None => {
                        warn!("Processor {:?} has no configuration section", name);
                        (Plan::MissingConfig, None)
                    }
                    Some(section) if !is_enabled(section) => (Plan::Disabled, None),
                    Some(section) => match step_timeout(section) {
                        Ok(timeout) => (Plan::Ready(section.clone()), timeout),
                        Err(reason) => {
                            warn!("Processor {:?} has an invalid section: {}", name, reason);
                            (Plan::Invalid(reason), None)
                        }
                    },
                };

                Step {
                    processor: Arc::clone(&registration.processor),
                    plan,
                    timeout,
                }
            })
            .collect();

        Self { steps }
    }

    /// Processor names in run order
    pub fn order(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.processor.name()).collect()
    }

    /// Resolved plan for a processor
    pub fn plan(&self, name: &str) -> Option<&Plan> {
        self.steps
            .iter()
            .find(|s| s.processor.name() == name)
            .map(|s| &s.plan)
    }

    /// Run every processor over `input`.
    ///
    /// Filtered mails skip enrichment entirely but still produce a record.
    pub async fn run(&self, input: &MailInput, filtered: bool) -> PipelineRun {
        let mut results = Results::new();
        let mut diagnostics = Vec::new();

        if filtered {
            debug!("Mail {} filtered, skipping processors", input.identity);
        } else {
            for step in &self.steps {
                if let Some(diagnostic) = self.run_step(step, input, &mut results).await {
                    diagnostics.push(diagnostic);
                }
            }
        }

        PipelineRun {
            record: ResultRecord::new(input.identity.clone(), results, filtered),
            diagnostics,
        }
    }

    async fn run_step(
        &self,
        step: &Step,
        input: &MailInput,
        results: &mut Results,
    ) -> Option<Diagnostic> {
        let name = step.processor.name();
        let conf = match &step.plan {
            Plan::Ready(conf) => conf,
            Plan::Disabled => return None,
            Plan::MissingConfig => {
                error!("{:?} doesn't exist in conf, skipping for {}", name, input.identity);
                return Some(Diagnostic {
                    processor: name.to_string(),
                    kind: DiagnosticKind::MissingConfig,
                });
            }
            Plan::Invalid(reason) => {
                return Some(Diagnostic {
                    processor: name.to_string(),
                    kind: DiagnosticKind::InvalidConfig(reason.clone()),
                });
            }
        };

        // A panicking processor is reported like a failing one
        let call = AssertUnwindSafe(step.processor.process(conf, input, results)).catch_unwind();
        let finished = match step.timeout {
            Some(limit) => match timeout(limit, call).await {
                Ok(finished) => finished,
                Err(_) => {
                    error!(processor = name, mail = %input.identity, "Processor timed out");
                    return Some(Diagnostic {
                        processor: name.to_string(),
                        kind: DiagnosticKind::TimedOut(limit),
                    });
                }
            },
            None => call.await,
        };

        let outcome = match finished {
            Ok(result) => result.map_err(|e| DiagnosticKind::Failed(format!("{:#}", e))),
            Err(panic) => Err(DiagnosticKind::Failed(format!(
                "panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        match outcome {
            Ok(()) => None,
            Err(kind) => {
                error!(processor = name, mail = %input.identity, "Processor failed: {:?}", kind);
                Some(Diagnostic {
                    processor: name.to_string(),
                    kind,
                })
            }
        }
    }
}

/// Optional `timeout_seconds`; zero or negative means no limit
fn step_timeout(section: &serde_json::Value) -> Result<Option<Duration>, String> {
    let Some(value) = section.get("timeout_seconds") else {
        return Ok(None);
    };
    let seconds = value
        .as_f64()
        .ok_or_else(|| format!("timeout_seconds must be a number, got {}", value))?;
    if seconds <= 0.0 {
        return Ok(None);
    }

    Duration::try_from_secs_f64(seconds)
        .map(Some)
        .map_err(|_| format!("timeout_seconds out of range: {}", seconds))
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

fn is_enabled(section: &serde_json::Value) -> bool {
    section
        .get("enabled")
        .and_then(|e| e.as_bool())
        .unwrap_or(true)
}
