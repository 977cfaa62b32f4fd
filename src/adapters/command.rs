//! External command processor.
//!
//! Runs an analysis tool as a subprocess. File-backed mails are passed as
//! the last argument; raw mails are piped to stdin. Stdout becomes the
//! report (parsed as JSON when possible). Time limits come from the
//! pipeline; the child is killed when the call is dropped.

use std::io;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::core::Processor;
use crate::domain::{MailInput, MailType, Results};

/// Processor backed by an external program
#[derive(Debug, Clone)]
pub struct CommandProcessor {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandProcessor {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
        }
    }

    fn command(&self, conf: &serde_json::Value, input: &MailInput) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);

        // Per-deployment extra arguments from the processor section
        if let Some(extra) = conf.get("args").and_then(|a| a.as_array()) {
            command.args(extra.iter().filter_map(|a| a.as_str()));
        }

        match input.mail_type {
            MailType::MailPath | MailType::MailPathOutlook => {
                command.arg(&input.payload).stdin(Stdio::null());
            }
            MailType::MailString => {
                command.stdin(Stdio::piped());
            }
        }

        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Processor for CommandProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        conf: &serde_json::Value,
        input: &MailInput,
        results: &mut Results,
    ) -> Result<()> {
        let mut child = self
            .command(conf, input)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}' for processor {}", self.program, self.name))?;

        // Feed stdin while stdout drains, or a child echoing its input
        // blocks on a full pipe
        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(input.payload.as_bytes()).await {
                // The child may exit without reading everything
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
            // stdin dropped here: EOF
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.with_context(|| format!("Failed to wait for '{}'", self.program))?;
        fed.context("Failed to write mail to stdin")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "'{}' exited with code {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let stdout = String::from_utf8(output.stdout).context("Command output is not valid UTF-8")?;
        let report = serde_json::from_str(&stdout)
            .unwrap_or_else(|_| serde_json::Value::String(stdout.trim_end().to_string()));

        results.insert(self.name.clone(), report);
        Ok(())
    }
}
