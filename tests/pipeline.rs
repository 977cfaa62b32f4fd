//! Pipeline Integration Tests
//!
//! Run order, per-processor configuration and fault isolation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use mailsieve::core::{DiagnosticKind, Pipeline, Processor, ProcessorRegistry, ProcessorsConfig};
use mailsieve::domain::{MailInput, Results};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

/// Records its name and its configuration section
struct Tagger(String);

#[async_trait]
impl Processor for Tagger {
    fn name(&self) -> &str {
        &self.0
    }

    async fn process(
        &self,
        conf: &serde_json::Value,
        _input: &MailInput,
        results: &mut Results,
    ) -> Result<()> {
        results.insert(self.0.clone(), conf.clone());
        Ok(())
    }
}

struct Broken(&'static str);

#[async_trait]
impl Processor for Broken {
    fn name(&self) -> &str {
        self.0
    }

    async fn process(
        &self,
        _conf: &serde_json::Value,
        _input: &MailInput,
        results: &mut Results,
    ) -> Result<()> {
        // Partial output before failing stays visible to later processors
        results.insert("partial".to_string(), json!(true));
        bail!("lookup service unavailable")
    }
}

/// Reports whether an earlier processor already wrote `key`
struct Observer {
    name: &'static str,
    key: &'static str,
}

#[async_trait]
impl Processor for Observer {
    fn name(&self) -> &str {
        self.name
    }

    async fn process(
        &self,
        _conf: &serde_json::Value,
        _input: &MailInput,
        results: &mut Results,
    ) -> Result<()> {
        let seen = results.contains_key(self.key);
        results.insert(self.name.to_string(), json!({ "saw": seen }));
        Ok(())
    }
}

/// Indexes past the end of an empty list
struct OutOfBounds;

#[async_trait]
impl Processor for OutOfBounds {
    fn name(&self) -> &str {
        "boom"
    }

    async fn process(
        &self,
        _conf: &serde_json::Value,
        input: &MailInput,
        results: &mut Results,
    ) -> Result<()> {
        let parts: Vec<&str> = Vec::new();
        let first = parts[input.payload.len()];
        results.insert("boom".to_string(), json!(first));
        Ok(())
    }
}

struct Sleepy;

#[async_trait]
impl Processor for Sleepy {
    fn name(&self) -> &str {
        "sleepy"
    }

    async fn process(
        &self,
        _conf: &serde_json::Value,
        _input: &MailInput,
        _results: &mut Results,
    ) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

fn tagger(name: &str) -> Arc<dyn Processor> {
    Arc::new(Tagger(name.to_string()))
}

fn config_for(names: &[&str]) -> ProcessorsConfig {
    names
        .iter()
        .map(|n| (n.to_string(), json!({ "enabled": true })))
        .collect()
}

fn input() -> MailInput {
    MailInput::from_string("mail-1", "Subject: hi\r\n\r\nbody")
}

#[tokio::test]
async fn test_run_order_is_stable_priority_sort() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..50 {
        let count = rng.gen_range(1..=12);
        let priorities: Vec<i32> = (0..count).map(|_| rng.gen_range(-2..=3)).collect();

        let mut registry = ProcessorRegistry::new();
        let mut config = ProcessorsConfig::new();
        for (i, priority) in priorities.iter().enumerate() {
            let name = format!("p{}", i);
            registry.register(tagger(&name), *priority).unwrap();
            config.insert(name, json!({}));
        }

        let mut expected: Vec<(i32, usize)> =
            priorities.iter().copied().zip(0..count).collect();
        expected.sort();
        let expected: Vec<String> = expected.iter().map(|(_, i)| format!("p{}", i)).collect();

        let pipeline = Pipeline::new(&registry, &config);
        let run = pipeline.run(&input(), false).await;

        assert_eq!(pipeline.order(), expected);
        assert_eq!(run.record.processors(), expected);
    }
}

#[tokio::test]
async fn test_priority_two_runs_after_priority_one() {
    let mut registry = ProcessorRegistry::new();
    registry.register(tagger("p2"), 2).unwrap();
    registry.register(tagger("p1"), 1).unwrap();

    let pipeline = Pipeline::new(&registry, &config_for(&["p1", "p2"]));
    let run = pipeline.run(&input(), false).await;

    assert_eq!(run.record.processors(), vec!["p1", "p2"]);
    assert!(run.diagnostics.is_empty());
}

#[tokio::test]
async fn test_processor_receives_its_own_section() {
    let mut registry = ProcessorRegistry::new();
    registry.register(tagger("dkim"), 0).unwrap();
    registry.register(tagger("urls"), 1).unwrap();

    let mut config = ProcessorsConfig::new();
    config.insert("dkim".to_string(), json!({ "strict": true }));
    config.insert("urls".to_string(), json!({ "max": 10 }));

    let run = Pipeline::new(&registry, &config).run(&input(), false).await;

    assert_eq!(run.record.results["dkim"], json!({ "strict": true }));
    assert_eq!(run.record.results["urls"], json!({ "max": 10 }));
}

#[tokio::test]
async fn test_missing_config_is_skipped_not_fatal() {
    let mut registry = ProcessorRegistry::new();
    registry.register(tagger("configured"), 0).unwrap();
    registry.register(tagger("forgotten"), 1).unwrap();

    let run = Pipeline::new(&registry, &config_for(&["configured"]))
        .run(&input(), false)
        .await;

    assert_eq!(run.record.processors(), vec!["configured"]);
    assert_eq!(run.diagnostics.len(), 1);
    assert_eq!(run.diagnostics[0].processor, "forgotten");
    assert_eq!(run.diagnostics[0].kind, DiagnosticKind::MissingConfig);
    assert!(run.failed().is_empty());
}

#[tokio::test]
async fn test_failing_processor_does_not_stop_others() {
    let mut registry = ProcessorRegistry::new();
    registry.register(Arc::new(Broken("broken")), 0).unwrap();
    registry
        .register(
            Arc::new(Observer {
                name: "after",
                key: "partial",
            }),
            1,
        )
        .unwrap();

    let run = Pipeline::new(&registry, &config_for(&["broken", "after"]))
        .run(&input(), false)
        .await;

    assert_eq!(run.failed(), vec!["broken"]);
    assert!(matches!(
        &run.diagnostics[0].kind,
        DiagnosticKind::Failed(msg) if msg.contains("unavailable")
    ));
    assert_eq!(run.record.results["after"], json!({ "saw": true }));
    assert!(!run.record.results.contains_key("broken"));
}

#[tokio::test]
async fn test_panicking_processor_does_not_stop_others() {
    let mut registry = ProcessorRegistry::new();
    registry.register(Arc::new(OutOfBounds), 0).unwrap();
    registry.register(tagger("after"), 1).unwrap();

    let run = Pipeline::new(&registry, &config_for(&["boom", "after"]))
        .run(&input(), false)
        .await;

    assert_eq!(run.failed(), vec!["boom"]);
    assert!(matches!(
        &run.diagnostics[0].kind,
        DiagnosticKind::Failed(msg) if msg.contains("index out of bounds")
    ));
    assert_eq!(run.record.processors(), vec!["after"]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_isolates_slow_processor() {
    let mut registry = ProcessorRegistry::new();
    registry.register(Arc::new(Sleepy), 0).unwrap();
    registry.register(tagger("fast"), 1).unwrap();

    let mut config = config_for(&["fast"]);
    config.insert("sleepy".to_string(), json!({ "timeout_seconds": 5 }));

    let run = Pipeline::new(&registry, &config).run(&input(), false).await;

    assert_eq!(
        run.diagnostics[0].kind,
        DiagnosticKind::TimedOut(Duration::from_secs(5))
    );
    assert_eq!(run.record.processors(), vec!["fast"]);
}

#[tokio::test]
async fn test_disabled_processors_are_silent() {
    let mut registry = ProcessorRegistry::new();
    registry.register(tagger("off_by_config"), 0).unwrap();
    registry.register_disabled(tagger("off_by_registry"), 1).unwrap();
    registry.register(tagger("on"), 2).unwrap();

    let mut config: ProcessorsConfig = HashMap::new();
    config.insert("off_by_config".to_string(), json!({ "enabled": false }));
    config.insert("on".to_string(), json!({}));

    let pipeline = Pipeline::new(&registry, &config);
    let run = pipeline.run(&input(), false).await;

    assert_eq!(pipeline.order(), vec!["off_by_config", "on"]);
    assert_eq!(run.record.processors(), vec!["on"]);
    assert!(run.diagnostics.is_empty());
}

#[tokio::test]
async fn test_filtered_mail_skips_processors() {
    let mut registry = ProcessorRegistry::new();
    registry.register(tagger("p1"), 0).unwrap();

    let run = Pipeline::new(&registry, &config_for(&["p1"]))
        .run(&input(), true)
        .await;

    assert!(run.record.filtered);
    assert!(run.record.results.is_empty());
}

#[tokio::test]
async fn test_order_fixed_at_build_time() {
    let mut registry = ProcessorRegistry::new();
    registry.register(tagger("early"), 5).unwrap();

    let pipeline = Pipeline::new(&registry, &config_for(&["early", "late"]));
    registry.register(tagger("late"), 0).unwrap();

    assert_eq!(pipeline.order(), vec!["early"]);
}

#[test]
fn test_duplicate_names_rejected() {
    let mut registry = ProcessorRegistry::new();
    registry.register(tagger("dup"), 0).unwrap();

    assert!(registry.register(tagger("dup"), 1).is_err());
    assert_eq!(registry.len(), 1);
}
