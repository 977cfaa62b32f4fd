//! Processor trait and the explicit processor registry.
//!
//! A processor is one independent enrichment operation. It receives its own
//! configuration section, the mail input and the shared results mapping,
//! and reports by inserting into that mapping.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{MailInput, Results};

/// Trait for enrichment processors
#[async_trait]
pub trait Processor: Send + Sync {
    /// Processor name; also the key of its configuration section
    fn name(&self) -> &str;

    /// Enrich `results` for one mail
    async fn process(
        &self,
        conf: &serde_json::Value,
        input: &MailInput,
        results: &mut Results,
    ) -> Result<()>;
}

/// Errors that can occur registering processors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Processor already registered: {0}")]
    Duplicate(String),
}

/// A processor with its scheduling data
#[derive(Clone)]
pub struct Registration {
    pub processor: Arc<dyn Processor>,

    /// Lower runs first
    pub priority: i32,

    pub enabled: bool,
}

impl Registration {
    pub fn name(&self) -> &str {
        self.processor.name()
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name())
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Set of processors, keyed by name, built once at start-up
#[derive(Debug, Default, Clone)]
pub struct ProcessorRegistry {
    registrations: Vec<Registration>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an enabled processor
    pub fn register(
        &mut self,
        processor: Arc<dyn Processor>,
        priority: i32,
    ) -> Result<(), RegistryError> {
        self.insert(processor, priority, true)
    }

    /// Register a processor that is known but switched off
    pub fn register_disabled(
        &mut self,
        processor: Arc<dyn Processor>,
        priority: i32,
    ) -> Result<(), RegistryError> {
        self.insert(processor, priority, false)
    }

    fn insert(
        &mut self,
        processor: Arc<dyn Processor>,
        priority: i32,
        enabled: bool,
    ) -> Result<(), RegistryError> {
        if self.contains(processor.name()) {
            return Err(RegistryError::Duplicate(processor.name().to_string()));
        }

        self.registrations.push(Registration {
            processor,
            priority,
            enabled,
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registrations.iter().any(|r| r.name() == name)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Enabled registrations in run order: ascending priority, ties in
    /// registration order
    pub fn ordered(&self) -> Vec<&Registration> {
        let mut ordered: Vec<&Registration> =
            self.registrations.iter().filter(|r| r.enabled).collect();
        // sort_by_key is stable
        ordered.sort_by_key(|r| r.priority);
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Processor for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn process(
            &self,
            _conf: &serde_json::Value,
            _input: &MailInput,
            _results: &mut Results,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn names(registry: &ProcessorRegistry) -> Vec<&str> {
        registry.ordered().iter().map(|r| r.name()).collect()
    }

    #[test]
    fn test_register_order() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(Named("number_two")), 2).unwrap();
        registry.register(Arc::new(Named("number_one")), 1).unwrap();
        registry.register(Arc::new(Named("number_four")), 4).unwrap();
        registry.register(Arc::new(Named("number_three")), 3).unwrap();

        assert_eq!(
            names(&registry),
            vec!["number_one", "number_two", "number_three", "number_four"]
        );
    }

    #[test]
    fn test_ties_keep_registration_order() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(Named("b")), 5).unwrap();
        registry.register(Arc::new(Named("a")), 5).unwrap();
        registry.register(Arc::new(Named("c")), 1).unwrap();

        assert_eq!(names(&registry), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(Named("dialect")), 1).unwrap();

        let err = registry.register(Arc::new(Named("dialect")), 2).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(name) if name == "dialect"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_disabled_excluded_from_order() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(Named("on")), 1).unwrap();
        registry.register_disabled(Arc::new(Named("off")), 0).unwrap();

        assert_eq!(names(&registry), vec!["on"]);
        assert!(registry.contains("off"));
    }
}
