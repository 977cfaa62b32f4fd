//! Result records forwarded to the indexing backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processor name → report, in the order processors produced them
pub type Results = serde_json::Map<String, serde_json::Value>;

/// Accumulated enrichment output for one mail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Identity of the work item the record belongs to
    pub identity: String,

    /// SHA256 of the mail content (hex), when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    /// Unique id of the pipeline run that produced this record
    pub run_id: Uuid,

    /// When the pipeline run finished
    pub analysis_date: DateTime<Utc>,

    /// Reports keyed by processor name (absent processors are omitted)
    pub results: Results,

    /// Upstream policy already excluded this mail from enrichment
    pub filtered: bool,
}

impl ResultRecord {
    /// Create a record for an identity
    pub fn new(identity: impl Into<String>, results: Results, filtered: bool) -> Self {
        Self {
            identity: identity.into(),
            sha256: None,
            run_id: Uuid::new_v4(),
            analysis_date: Utc::now(),
            results,
            filtered,
        }
    }

    /// Attach the content hash
    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    /// Processor names present in the record, in production order
    pub fn processors(&self) -> Vec<&str> {
        self.results.keys().map(|k| k.as_str()).collect()
    }
}
