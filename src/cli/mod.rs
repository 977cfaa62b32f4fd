//! Command-line interface for mailsieve.
//!
//! Provides commands for running the processing stage, inspecting pending
//! mails, forcing stale recovery and showing the resolved configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;

use crate::adapters::CommandProcessor;
use crate::config::Config;
use crate::core::{Pipeline, ProcessingStage, ProcessorRegistry, SeenFilter};
use crate::ingest::{MailQueue, StaleOutcome, WorkFeed};
use crate::publish::PublishClient;

/// mailsieve - Crash-safe mail enrichment pipeline
#[derive(Parser, Debug)]
#[command(name = "mailsieve")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to ./mailsieve.yaml, then the user config dir)
    #[arg(short, long, global = true, env = "MAILSIEVE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process mails from the watched directories
    Run {
        /// Process a single discovery pass, then exit
        #[arg(long)]
        once: bool,
    },

    /// List pending mails without claiming them
    Scan,

    /// Resolve stale in-flight mails now
    Recover,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = Config::load(self.config.as_deref()).context("Failed to load configuration")?;

        match self.command {
            Commands::Run { once } => run(config, once).await,
            Commands::Scan => scan(&config),
            Commands::Recover => recover(&config),
            Commands::Config => show_config(config),
        }
    }
}

/// Register every configured command processor
pub fn build_registry(config: &Config) -> Result<ProcessorRegistry> {
    let mut registry = ProcessorRegistry::new();

    for spec in &config.commands {
        let processor = Arc::new(CommandProcessor::new(
            spec.name.clone(),
            spec.program.clone(),
            spec.args.clone(),
        ));
        if spec.enabled {
            registry.register(processor, spec.priority)?;
        } else {
            registry.register_disabled(processor, spec.priority)?;
        }
    }

    Ok(registry)
}

/// Validate and build the queue without touching the filesystem
fn load_queue(config: &Config) -> Result<MailQueue> {
    config.validate()?;
    Ok(MailQueue::new(config.queue_config())?)
}

/// Queue for commands that resolve items: archive and quarantine must exist
fn open_queue(config: &Config) -> Result<MailQueue> {
    let queue = load_queue(config)?;
    queue.prepare()?;
    Ok(queue)
}

async fn run(config: Config, once: bool) -> Result<()> {
    let queue = open_queue(&config)?;
    let registry = build_registry(&config)?;
    let pipeline = Pipeline::new(&registry, &config.processors);
    info!("Processor order: {:?}", pipeline.order());

    let publisher = PublishClient::new(config.publish.client.clone())
        .context("Failed to create publish client")?;

    let mut stage = ProcessingStage::new(
        WorkFeed::new(queue),
        pipeline,
        publisher,
        config.publish.destination.clone(),
        SeenFilter::new(config.seen_window),
    );

    if once {
        let summary = stage.run_pass().await;
        println!(
            "Processed {} mails: {} acknowledged, {} failed",
            summary.total(),
            summary.acknowledged,
            summary.failed
        );
        return Ok(());
    }

    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = stop_tx.send(()).await;
        }
    });

    stage.run(config.poll_interval()?, &mut stop_rx).await;
    Ok(())
}

fn scan(config: &Config) -> Result<()> {
    let queue = load_queue(config)?;

    let mut count = 0;
    for item in queue.discover() {
        println!(
            "{:<16} {:<12} {}",
            item.origin.mailbox,
            item.origin.trust,
            item.identity.display()
        );
        count += 1;
    }
    println!("{} pending mails", count);

    Ok(())
}

fn recover(config: &Config) -> Result<()> {
    let queue = open_queue(config)?;
    let recovered = queue.recover_stale(queue.config().stale_after);

    for entry in &recovered {
        let action = match &entry.outcome {
            StaleOutcome::Failed(outcome) => format!("failed: {:?}", outcome),
            StaleOutcome::Requeued(outcome) => format!("requeued: {:?}", outcome),
        };
        println!(
            "{} (age {}s) {}",
            entry.identity.display(),
            entry.age.as_secs(),
            action
        );
    }
    println!("{} stale mails recovered", recovered.len());

    Ok(())
}

fn show_config(mut config: Config) -> Result<()> {
    if config.publish.client.password.is_some() {
        config.publish.client.password = Some("********".to_string());
    }
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
