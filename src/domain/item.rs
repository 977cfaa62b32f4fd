//! Work items discovered in watched mail directories.
//!
//! A WorkItem is identified by the path the mail had when it was found.
//! That identity never changes, even while the file on disk carries the
//! in-flight marker suffix.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Suffix appended to a mail file while it is claimed
pub const IN_FLIGHT_SUFFIX: &str = ".processing";

/// How the payload handed to processors should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailType {
    /// Payload is the path of an RFC 822 mail file
    MailPath,

    /// Payload is the path of an Outlook .msg file
    MailPathOutlook,

    /// Payload is the raw mail text
    MailString,
}

impl Default for MailType {
    fn default() -> Self {
        Self::MailPath
    }
}

/// Where a mail came from (per-mailbox configuration copied onto every item)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    /// Declared mail server for this mailbox
    pub mail_server: String,

    /// Logical mailbox name (key of the mailbox section)
    pub mailbox: String,

    /// Trust label assigned to the mailbox
    pub trust: String,

    /// Header allow-list for downstream parsing
    #[serde(default)]
    pub headers: Vec<String>,
}

/// One mail file tracked through claim/acknowledge/fail
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Original file path (stable identity)
    pub identity: PathBuf,

    /// Origin metadata of the mailbox the file was found in
    pub origin: Origin,

    /// Payload discriminator
    pub mail_type: MailType,

    /// Optional priority (lower is more urgent)
    pub priority: Option<i32>,

    /// Monotonic discovery timestamp
    pub discovered: Instant,

    /// Wall-clock detection time, carried into result records
    pub detected_at: DateTime<Utc>,
}

impl WorkItem {
    /// Create an item discovered right now
    pub fn new(identity: PathBuf, origin: Origin, mail_type: MailType) -> Self {
        Self {
            identity,
            origin,
            mail_type,
            priority: None,
            discovered: Instant::now(),
            detected_at: Utc::now(),
        }
    }

    /// Set the item priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// File name of the mail (used in logs and archive paths)
    pub fn file_name(&self) -> String {
        file_name_of(&self.identity)
    }

    /// Path of the file while the item is in flight
    pub fn in_flight_path(&self) -> PathBuf {
        in_flight_path(&self.identity)
    }

    /// Whether this item should be handled before `other`.
    ///
    /// Items with an explicit priority come before items without one;
    /// ties fall back to discovery order.
    pub fn outranks(&self, other: &WorkItem) -> bool {
        let by_priority = match (self.priority, other.priority) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };

        by_priority.then(self.discovered.cmp(&other.discovered)) == Ordering::Less
    }
}

/// Payload handed to processors for one run
#[derive(Debug, Clone)]
pub struct MailInput {
    /// Identity of the work item (or a caller-chosen label)
    pub identity: String,

    /// Path or raw mail text, depending on `mail_type`
    pub payload: String,

    /// Payload discriminator
    pub mail_type: MailType,
}

impl MailInput {
    /// Input backed by a file on disk
    pub fn from_path(identity: impl Into<String>, path: &Path, mail_type: MailType) -> Self {
        Self {
            identity: identity.into(),
            payload: path.to_string_lossy().to_string(),
            mail_type,
        }
    }

    /// Input backed by raw mail text
    pub fn from_string(identity: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            payload: raw.into(),
            mail_type: MailType::MailString,
        }
    }
}

/// Marker path for an identity (`<identity>.processing`)
pub fn in_flight_path(identity: &Path) -> PathBuf {
    let mut marker = identity.as_os_str().to_os_string();
    marker.push(IN_FLIGHT_SUFFIX);
    PathBuf::from(marker)
}

/// Identity for a marker path, if it carries the in-flight suffix
pub fn identity_of_marker(marker: &Path) -> Option<PathBuf> {
    let raw = marker.to_str()?;
    raw.strip_suffix(IN_FLIGHT_SUFFIX).map(PathBuf::from)
}

/// Whether a path carries the in-flight suffix
pub fn is_in_flight(path: &Path) -> bool {
    path.to_string_lossy().ends_with(IN_FLIGHT_SUFFIX)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}
