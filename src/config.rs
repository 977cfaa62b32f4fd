//! Configuration for mailsieve.
//!
//! Config file discovery (first match wins):
//! 1. `--config` flag or `MAILSIEVE_CONFIG` environment variable
//! 2. `./mailsieve.yaml`
//! 3. `<config dir>/mailsieve/config.yaml`
//!
//! Relative paths in the file are resolved against the file's directory.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::ProcessorsConfig;
use crate::domain::{MailType, Origin};
use crate::ingest::{AckPolicy, QueueConfig, Source, StalePolicy};
use crate::publish::{PublishConfig, PublishError};

/// Errors that can occur loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No config file found (use --config or MAILSIEVE_CONFIG)")]
    NotFound,

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Config file schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Age in seconds after which an in-flight mail is considered abandoned
    #[serde(default = "default_fail_after_seconds")]
    pub fail_after_seconds: u64,

    /// Pause after an exhausted discovery pass, in seconds
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: f64,

    /// Number of recent mail hashes remembered for duplicate filtering (0 = off)
    #[serde(default = "default_seen_window")]
    pub seen_window: usize,

    #[serde(default)]
    pub post_processing: PostProcessing,

    /// Watched mailboxes, keyed by mailbox name
    pub mailboxes: BTreeMap<String, MailboxConfig>,

    #[serde(default)]
    pub publish: PublishSettings,

    /// External command processors to register
    #[serde(default)]
    pub commands: Vec<CommandSpec>,

    /// Per-processor sections, looked up by processor name
    #[serde(default)]
    pub processors: ProcessorsConfig,
}

fn default_fail_after_seconds() -> u64 {
    60
}
fn default_poll_interval_seconds() -> f64 {
    1.0
}
fn default_seen_window() -> usize {
    1000
}

/// What happens to mails after processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostProcessing {
    /// `remove` or `move`
    #[serde(default)]
    pub what: AckPolicy,

    /// Archive root for `move`
    #[serde(rename = "where", default = "default_where")]
    pub archive: PathBuf,

    /// Quarantine directory
    #[serde(rename = "where_failed", default = "default_where_failed")]
    pub quarantine: PathBuf,

    /// `fail` or `requeue` for abandoned in-flight mails
    #[serde(default)]
    pub stale: StalePolicy,
}

fn default_where() -> PathBuf {
    PathBuf::from("/tmp/moved")
}
fn default_where_failed() -> PathBuf {
    PathBuf::from("/tmp/failed")
}

impl Default for PostProcessing {
    fn default() -> Self {
        Self {
            what: AckPolicy::default(),
            archive: default_where(),
            quarantine: default_where_failed(),
            stale: StalePolicy::default(),
        }
    }
}

/// One watched mailbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    pub mail_server: String,
    pub trust_string: String,
    pub path_mails: PathBuf,

    #[serde(default = "default_files_pattern")]
    pub files_pattern: String,

    /// Files are Outlook .msg
    #[serde(default)]
    pub outlook: bool,

    #[serde(default)]
    pub headers: Vec<String>,
}

fn default_files_pattern() -> String {
    "*".to_string()
}

/// Publish client options plus the destination list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSettings {
    #[serde(flatten)]
    pub client: PublishConfig,

    #[serde(default = "default_destination")]
    pub destination: String,
}

fn default_destination() -> String {
    "mailsieve".to_string()
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            client: PublishConfig::default(),
            destination: default_destination(),
        }
    }
}

/// Registration of an external command processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Processor name (and configuration section key)
    pub name: String,
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Lower runs first
    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Config {
    /// Parse a config from YAML content
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load a config file, resolving relative paths against its directory
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut config = Self::from_yaml(&content)?;
        let base = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(base);
        Ok(config)
    }

    /// Discover and load the config file
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = find_config_file(explicit).ok_or(ConfigError::NotFound)?;
        Self::from_file(&path)
    }

    fn resolve_paths(&mut self, base: &Path) {
        self.post_processing.archive = resolve_path(base, &self.post_processing.archive);
        self.post_processing.quarantine = resolve_path(base, &self.post_processing.quarantine);
        for mailbox in self.mailboxes.values_mut() {
            mailbox.path_mails = resolve_path(base, &mailbox.path_mails);
        }
    }

    /// Fail fast on anything that would only break at first use
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailboxes.is_empty() {
            return Err(ConfigError::Invalid("no mailboxes configured".to_string()));
        }

        for (name, mailbox) in &self.mailboxes {
            if !mailbox.path_mails.is_dir() {
                return Err(ConfigError::Invalid(format!(
                    "mailbox '{}': path_mails {} is not a directory",
                    name,
                    mailbox.path_mails.display()
                )));
            }
            if mailbox.files_pattern.contains('/') {
                return Err(ConfigError::Invalid(format!(
                    "mailbox '{}': files_pattern must match file names only",
                    name
                )));
            }
        }

        self.poll_interval()?;

        self.publish.client.validate()?;
        if self.publish.destination.trim().is_empty() {
            return Err(ConfigError::Invalid("publish.destination is empty".to_string()));
        }

        let mut names = HashSet::new();
        for command in &self.commands {
            if command.program.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "command '{}' has no program",
                    command.name
                )));
            }
            if !names.insert(command.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "command '{}' declared twice",
                    command.name
                )));
            }
        }

        Ok(())
    }

    /// Queue configuration derived from mailboxes and post-processing
    pub fn queue_config(&self) -> QueueConfig {
        let sources = self
            .mailboxes
            .iter()
            .map(|(name, mailbox)| Source {
                path: mailbox.path_mails.clone(),
                pattern: mailbox.files_pattern.clone(),
                origin: Origin {
                    mail_server: mailbox.mail_server.clone(),
                    mailbox: name.clone(),
                    trust: mailbox.trust_string.clone(),
                    headers: mailbox.headers.clone(),
                },
                mail_type: if mailbox.outlook {
                    MailType::MailPathOutlook
                } else {
                    MailType::MailPath
                },
            })
            .collect();

        QueueConfig {
            sources,
            ack_policy: self.post_processing.what,
            archive_root: self.post_processing.archive.clone(),
            quarantine_root: self.post_processing.quarantine.clone(),
            stale_after: Duration::from_secs(self.fail_after_seconds),
            stale_policy: self.post_processing.stale,
        }
    }

    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(self.poll_interval_seconds).map_err(|_| {
            ConfigError::Invalid(format!(
                "poll_interval_seconds must be a non-negative number of seconds, got {}",
                self.poll_interval_seconds
            ))
        })
    }
}

/// Find the config file to load
pub fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let local = PathBuf::from("mailsieve.yaml");
    if local.exists() {
        return Some(local);
    }

    let user = dirs::config_dir()?.join("mailsieve").join("config.yaml");
    user.exists().then_some(user)
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
