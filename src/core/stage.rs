//! Processing stage: one worker driving queue → pipeline → publisher.
//!
//! Every claimed mail ends in exactly one of acknowledge or fail:
//! - published → acknowledge
//! - unreadable, or publish retries exhausted → fail (quarantine)

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::domain::{MailInput, WorkItem};
use crate::ingest::{AckOutcome, FailOutcome, WorkFeed};
use crate::publish::PublishClient;

use super::pipeline::{Diagnostic, Pipeline};

/// Bounded window of recently seen mail hashes.
///
/// A mail whose hash is still in the window is forwarded as filtered and
/// skips enrichment.
#[derive(Debug, Clone)]
pub struct SeenFilter {
    capacity: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl SeenFilter {
    /// A capacity of 0 disables filtering
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Record `hash`; returns true if it was already in the window
    pub fn check_and_insert(&mut self, hash: &str) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if self.members.contains(hash) {
            return true;
        }

        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        self.order.push_back(hash.to_string());
        self.members.insert(hash.to_string());
        false
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// How a claimed item was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Acknowledged(AckOutcome),
    Failed { reason: String, outcome: FailOutcome },
}

/// Result of processing one item
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub identity: PathBuf,
    pub outcome: ItemOutcome,
    pub diagnostics: Vec<Diagnostic>,
}

impl ItemReport {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Acknowledged(_))
    }
}

/// Counts for one discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub acknowledged: usize,
    pub failed: usize,
}

impl PassSummary {
    pub fn total(&self) -> usize {
        self.acknowledged + self.failed
    }

    fn record(&mut self, report: &ItemReport) {
        if report.is_acknowledged() {
            self.acknowledged += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// A single logical worker
pub struct ProcessingStage {
    feed: WorkFeed,
    pipeline: Pipeline,
    publisher: PublishClient,
    destination: String,
    seen: SeenFilter,
}

impl ProcessingStage {
    pub fn new(
        feed: WorkFeed,
        pipeline: Pipeline,
        publisher: PublishClient,
        destination: impl Into<String>,
        seen: SeenFilter,
    ) -> Self {
        Self {
            feed,
            pipeline,
            publisher,
            destination: destination.into(),
            seen,
        }
    }

    pub fn feed(&self) -> &WorkFeed {
        &self.feed
    }

    /// Enrich, publish and resolve one claimed item
    #[instrument(skip(self, item), fields(mail = %item.file_name()))]
    pub async fn process_item(&mut self, item: WorkItem) -> ItemReport {
        let queue = self.feed.queue();
        let in_flight = item.in_flight_path();

        let sha256 = match hash_file(&in_flight).await {
            Ok(hash) => hash,
            Err(e) => {
                let reason = format!("Failed to read mail: {}", e);
                error!("{}", reason);
                return ItemReport {
                    outcome: ItemOutcome::Failed {
                        reason,
                        outcome: queue.fail(&item.identity),
                    },
                    identity: item.identity,
                    diagnostics: Vec::new(),
                };
            }
        };

        info!("Processing started: {}", sha256);
        let filtered = self.seen.check_and_insert(&sha256);
        let input = MailInput::from_path(
            item.identity.to_string_lossy(),
            &in_flight,
            item.mail_type,
        );

        let run = self.pipeline.run(&input, filtered).await;
        let record = run.record.with_sha256(sha256);

        let outcome = match self
            .publisher
            .publish(&self.destination, std::slice::from_ref(&record))
            .await
        {
            Ok(_) => ItemOutcome::Acknowledged(self.feed.queue().acknowledge(&item.identity)),
            Err(e) => {
                let reason = format!("Publish failed: {}", e);
                error!("{}", reason);
                ItemOutcome::Failed {
                    reason,
                    outcome: self.feed.queue().fail(&item.identity),
                }
            }
        };

        ItemReport {
            identity: item.identity,
            outcome,
            diagnostics: run.diagnostics,
        }
    }

    /// Process every item of one discovery pass (stale recovery runs at the end)
    pub async fn run_pass(&mut self) -> PassSummary {
        let mut summary = PassSummary::default();

        while let Some(item) = self.feed.next_claimed() {
            let report = self.process_item(item).await;
            summary.record(&report);
        }

        summary
    }

    /// Run passes until a stop signal arrives, pausing `poll_interval`
    /// after each exhausted pass
    pub async fn run(&mut self, poll_interval: Duration, stop_rx: &mut mpsc::Receiver<()>) {
        info!("Processing stage started");

        loop {
            if stop_rx.try_recv().is_ok() {
                break;
            }

            let summary = self.run_pass().await;
            if summary.total() > 0 {
                info!(
                    "Pass complete: {} acknowledged, {} failed",
                    summary.acknowledged, summary.failed
                );
            }

            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        warn!("Processing stage stopping");
    }
}

/// SHA256 of a file's content (hex)
pub async fn hash_file(path: &Path) -> Result<String, std::io::Error> {
    let content = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(hex::encode(hasher.finalize()))
}
