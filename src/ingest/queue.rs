//! Durable file queue backed by atomic renames.
//!
//! Every watched mailbox directory is a queue. A mail file moves through
//! these on-disk states:
//!
//! ```text
//! pending ──claim──▶ in-flight ──acknowledge──▶ archived | removed
//!                        │
//!                        ├──fail──────────────▶ quarantined
//!                        └──stale (recovery)──▶ quarantined | pending
//! ```
//!
//! Claiming renames `mail.eml` to `mail.eml.processing`. The rename is the
//! only coordination between workers: whoever renames first owns the item.
//! Markers left behind by a crashed worker are picked up by
//! [`MailQueue::recover_stale`] once a discovery pass is exhausted.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use filetime::FileTime;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::{
    identity_of_marker, in_flight_path, is_in_flight, MailType, Origin, WorkItem, IN_FLIGHT_SUFFIX,
};

/// Errors that can occur building a queue
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid files pattern for mailbox '{mailbox}': {source}")]
    Pattern {
        mailbox: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What to do with a mail once it is acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckPolicy {
    /// Delete the in-flight file
    Remove,

    /// Move it into a dated archive directory
    Move,
}

impl Default for AckPolicy {
    fn default() -> Self {
        Self::Remove
    }
}

/// What to do with a marker found stale during recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StalePolicy {
    /// Quarantine it (it could not be confirmed complete)
    Fail,

    /// Drop the marker so the next pass offers it again
    Requeue,
}

impl Default for StalePolicy {
    fn default() -> Self {
        Self::Fail
    }
}

/// One watched directory
#[derive(Debug, Clone)]
pub struct Source {
    /// Directory holding dropped mails
    pub path: PathBuf,

    /// Glob pattern matched against file names in `path`
    pub pattern: String,

    /// Metadata copied onto every item from this source
    pub origin: Origin,

    /// Payload discriminator for items from this source
    pub mail_type: MailType,
}

impl Source {
    /// Full glob expression for this source, with an optional suffix
    fn glob_expr(&self, suffix: &str) -> String {
        let dir = Pattern::escape(&self.path.to_string_lossy());
        format!("{}/{}{}", dir.trim_end_matches('/'), self.pattern, suffix)
    }
}

/// Queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Watched directories, scanned in order
    pub sources: Vec<Source>,

    /// Acknowledge behavior
    pub ack_policy: AckPolicy,

    /// Root of the dated archive (used with `AckPolicy::Move`)
    pub archive_root: PathBuf,

    /// Where failed mails end up
    pub quarantine_root: PathBuf,

    /// Age after which an in-flight marker is considered abandoned
    pub stale_after: Duration,

    /// What recovery does with abandoned markers
    pub stale_policy: StalePolicy,
}

/// Result of a claim attempt
#[derive(Debug)]
pub enum Claim {
    /// This caller owns the item now
    Claimed(WorkItem),

    /// Someone else got there first (or the file vanished)
    AlreadyClaimed(PathBuf),
}

impl Claim {
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed(_))
    }
}

/// Result of acknowledging an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// In-flight file deleted
    Removed,

    /// In-flight file moved to the archive
    Archived(PathBuf),

    /// Archive move failed; the in-flight file was deleted instead and the
    /// archived copy is lost
    ArchiveFailed { error: String, removed: bool },

    /// Delete failed (remove policy)
    RemoveFailed(String),

    /// Nothing to acknowledge
    AlreadyGone,
}

/// Result of failing an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Moved into quarantine
    Quarantined(PathBuf),

    /// Nothing to quarantine
    AlreadyGone,

    /// Quarantine move failed (logged)
    MoveFailed(String),
}

/// Result of requeueing an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// Marker dropped, item is pending again
    Requeued,

    /// A new file already occupies the original path; item quarantined
    Displaced(FailOutcome),

    /// Nothing to requeue
    AlreadyGone,
}

/// What recovery did with one stale marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleOutcome {
    Failed(FailOutcome),
    Requeued(RequeueOutcome),
}

/// A stale marker handled by recovery
#[derive(Debug, Clone)]
pub struct Recovered {
    pub identity: PathBuf,
    pub age: Duration,
    pub outcome: StaleOutcome,
}

/// Directory-backed work queue
#[derive(Debug, Clone)]
pub struct MailQueue {
    config: QueueConfig,
}

impl MailQueue {
    /// Create a queue, validating every source pattern up front
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        for source in &config.sources {
            Pattern::new(&source.glob_expr("")).map_err(|e| QueueError::Pattern {
                mailbox: source.origin.mailbox.clone(),
                source: e,
            })?;
        }

        Ok(Self { config })
    }

    /// Get the queue configuration
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Create the archive and quarantine directories
    pub fn prepare(&self) -> Result<(), QueueError> {
        for dir in [&self.config.archive_root, &self.config.quarantine_root] {
            fs::create_dir_all(dir).map_err(|e| QueueError::Io {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Start a discovery pass over every source.
    ///
    /// The returned iterator is lazy and finite; call again to pick up
    /// files that arrived after it was created.
    pub fn discover(&self) -> Discovery {
        Discovery {
            sources: self.config.sources.clone().into_iter(),
            current: None,
        }
    }

    /// Claim an item by renaming it to its in-flight marker
    pub fn claim(&self, item: WorkItem) -> Claim {
        let marker = item.in_flight_path();
        let name = item.file_name();

        if marker.exists() {
            debug!("ALREADY EMITTED - {:?}", name);
            return Claim::AlreadyClaimed(item.identity);
        }

        // Rename keeps the mtime, and staleness counts from the claim: the
        // marker must never appear carrying the drop-time mtime
        match filetime::set_file_mtime(&item.identity, FileTime::now()) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("ALREADY EMITTED - {:?}", name);
                return Claim::AlreadyClaimed(item.identity);
            }
            Err(e) => warn!("Failed to refresh mtime of {}: {}", item.identity.display(), e),
        }

        match fs::rename(&item.identity, &marker) {
            Ok(()) => {
                info!("EMITTED - {:?}", name);
                Claim::Claimed(item)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("ALREADY EMITTED - {:?}", name);
                Claim::AlreadyClaimed(item.identity)
            }
            Err(e) => {
                warn!("Failed to claim {:?}, skipping: {}", name, e);
                Claim::AlreadyClaimed(item.identity)
            }
        }
    }

    /// Resolve a successfully processed item
    pub fn acknowledge(&self, identity: &Path) -> AckOutcome {
        let marker = in_flight_path(identity);
        let name = file_name(identity);
        info!("ACKED - {:?}", name);

        match self.config.ack_policy {
            AckPolicy::Remove => match fs::remove_file(&marker) {
                Ok(()) => AckOutcome::Removed,
                Err(e) if e.kind() == io::ErrorKind::NotFound => AckOutcome::AlreadyGone,
                Err(e) => {
                    warn!("Failed to remove {}: {}", marker.display(), e);
                    AckOutcome::RemoveFailed(e.to_string())
                }
            },
            AckPolicy::Move => self.archive(&marker, &name),
        }
    }

    fn archive(&self, marker: &Path, name: &str) -> AckOutcome {
        let day_dir = self
            .config
            .archive_root
            .join(Utc::now().format("%Y-%m-%d").to_string());
        let destination = day_dir.join(name);

        let moved = fs::create_dir_all(&day_dir)
            .and_then(|_| set_browsable(marker))
            .and_then(|_| move_file(marker, &destination));

        match moved {
            Ok(()) => AckOutcome::Archived(destination),
            Err(e) if e.kind() == io::ErrorKind::NotFound && !marker.exists() => {
                AckOutcome::AlreadyGone
            }
            Err(e) => {
                warn!(
                    "Archive move of {:?} failed ({}); removing in-flight file, archived copy is lost",
                    name, e
                );
                let removed = match fs::remove_file(marker) {
                    Ok(()) => true,
                    Err(rm) if rm.kind() == io::ErrorKind::NotFound => true,
                    Err(rm) => {
                        error!("Failed to remove {}: {}", marker.display(), rm);
                        false
                    }
                };
                AckOutcome::ArchiveFailed {
                    error: e.to_string(),
                    removed,
                }
            }
        }
    }

    /// Move an in-flight item into quarantine. Never propagates errors.
    pub fn fail(&self, identity: &Path) -> FailOutcome {
        let marker = in_flight_path(identity);
        let name = file_name(identity);
        let destination = self.config.quarantine_root.join(&name);

        let moved = fs::create_dir_all(&self.config.quarantine_root)
            .and_then(|_| set_browsable(&marker))
            .and_then(|_| move_file(&marker, &destination));

        let outcome = match moved {
            Ok(()) => FailOutcome::Quarantined(destination),
            Err(e) if e.kind() == io::ErrorKind::NotFound && !marker.exists() => {
                FailOutcome::AlreadyGone
            }
            Err(e) => {
                error!("Failed to quarantine {:?}: {}", name, e);
                FailOutcome::MoveFailed(e.to_string())
            }
        };

        info!("FAILED - {:?}", name);
        outcome
    }

    /// Drop the in-flight marker so the item is offered again
    pub fn requeue(&self, identity: &Path) -> RequeueOutcome {
        let marker = in_flight_path(identity);

        if identity.exists() {
            // A fresh drop reused the name; don't clobber it
            return RequeueOutcome::Displaced(self.fail(identity));
        }

        match fs::rename(&marker, identity) {
            Ok(()) => {
                info!("REQUEUED - {:?}", file_name(identity));
                RequeueOutcome::Requeued
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => RequeueOutcome::AlreadyGone,
            Err(e) => {
                warn!("Failed to requeue {}: {}", identity.display(), e);
                RequeueOutcome::Displaced(self.fail(identity))
            }
        }
    }

    /// Handle every in-flight marker older than `threshold`
    pub fn recover_stale(&self, threshold: Duration) -> Vec<Recovered> {
        let now = SystemTime::now();
        let mut recovered = Vec::new();

        for source in &self.config.sources {
            let markers = match glob::glob(&source.glob_expr(IN_FLIGHT_SUFFIX)) {
                Ok(paths) => paths,
                Err(e) => {
                    warn!("Bad pattern for mailbox {}: {}", source.origin.mailbox, e);
                    continue;
                }
            };

            for marker in markers.flatten() {
                let Some(identity) = identity_of_marker(&marker) else {
                    continue;
                };

                // Resolved concurrently by its owner
                let modified = match fs::metadata(&marker).and_then(|m| m.modified()) {
                    Ok(modified) => modified,
                    Err(_) => continue,
                };

                let age = now.duration_since(modified).unwrap_or_default();
                if age <= threshold {
                    continue;
                }

                info!(
                    "Mail {:?} older than {} seconds",
                    file_name(&identity),
                    threshold.as_secs()
                );

                let outcome = match self.config.stale_policy {
                    StalePolicy::Fail => StaleOutcome::Failed(self.fail(&identity)),
                    StalePolicy::Requeue => StaleOutcome::Requeued(self.requeue(&identity)),
                };

                recovered.push(Recovered {
                    identity,
                    age,
                    outcome,
                });
            }
        }

        recovered
    }
}

/// One lazy pass over all sources
pub struct Discovery {
    sources: std::vec::IntoIter<Source>,
    current: Option<(Source, glob::Paths)>,
}

impl Iterator for Discovery {
    type Item = WorkItem;

    fn next(&mut self) -> Option<WorkItem> {
        loop {
            if let Some((source, paths)) = &mut self.current {
                for entry in paths.by_ref() {
                    match entry {
                        Ok(path) => {
                            if is_in_flight(&path) || !path.is_file() {
                                continue;
                            }
                            return Some(WorkItem::new(
                                path,
                                source.origin.clone(),
                                source.mail_type,
                            ));
                        }
                        Err(e) => debug!("Skipping unreadable entry: {}", e),
                    }
                }
            }
            self.current = None;

            let source = self.sources.next()?;
            match glob::glob(&source.glob_expr("")) {
                Ok(paths) => self.current = Some((source, paths)),
                Err(e) => warn!("Bad pattern for mailbox {}: {}", source.origin.mailbox, e),
            }
        }
    }
}

/// Pulls claimed items pass after pass.
///
/// When a pass is exhausted the feed runs stale recovery and reports
/// `None`; the next call starts a fresh pass.
pub struct WorkFeed {
    queue: MailQueue,
    pass: Option<Discovery>,
}

impl WorkFeed {
    pub fn new(queue: MailQueue) -> Self {
        Self { queue, pass: None }
    }

    pub fn queue(&self) -> &MailQueue {
        &self.queue
    }

    /// Next item this worker owns, or `None` at the end of a pass
    pub fn next_claimed(&mut self) -> Option<WorkItem> {
        let queue = &self.queue;
        let pass = self.pass.get_or_insert_with(|| queue.discover());

        for item in pass.by_ref() {
            if let Claim::Claimed(item) = queue.claim(item) {
                return Some(item);
            }
        }

        self.pass = None;
        let recovered = self.queue.recover_stale(self.queue.config.stale_after);
        if !recovered.is_empty() {
            info!("Recovered {} stale in-flight mails", recovered.len());
        }
        None
    }
}

/// Make a file world-readable and listable (for archive browsing)
#[cfg(unix)]
fn set_browsable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o775))
}

#[cfg(not(unix))]
fn set_browsable(path: &Path) -> io::Result<()> {
    fs::metadata(path).map(|_| ())
}

/// Rename, falling back to copy + delete across filesystems
fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(_) => {
            fs::copy(src, dst)?;
            fs::remove_file(src)
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}
