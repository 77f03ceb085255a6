use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::config::EngineConfig;

use super::backend::EngineRuntime;
use super::backends::{ProcessRuntime, StubRuntime};

/// Starts an engine runtime from configuration.
pub type EngineFactory = Arc<dyn Fn(&EngineConfig) -> Result<Box<dyn EngineRuntime>> + Send + Sync>;

/// Registry of engines that can back the execution context.
#[derive(Clone)]
pub struct EngineRegistry {
    factories: HashMap<String, EngineFactory>,
    default_name: Option<String>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with the engines shipped in this crate: `process` (default) and `stub`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("process", |cfg: &EngineConfig| {
            Ok(Box::new(ProcessRuntime::start(&cfg.process)?) as Box<dyn EngineRuntime>)
        });
        registry.register("stub", |_cfg: &EngineConfig| {
            Ok(Box::new(StubRuntime::new()) as Box<dyn EngineRuntime>)
        });
        registry
    }

    /// Register an engine. The first registered engine becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&EngineConfig) -> Result<Box<dyn EngineRuntime>> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Set default engine by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("engine '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// List registered engines, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start the engine named by `cfg.engine`, or the default one when the name is empty.
    pub fn start(&self, cfg: &EngineConfig) -> Result<Box<dyn EngineRuntime>> {
        let name = match cfg.engine.trim() {
            "" => self
                .default_name
                .as_deref()
                .ok_or_else(|| anyhow!("no engines registered"))?,
            name => name,
        };
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "engine '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        log::debug!("starting engine '{}'", name);
        factory(cfg)
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
