use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_ENGINE: &str = "process";
const DEFAULT_ENGINE_COMMAND: &str = "python3";
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2000;

/// Bridge run by the default engine command. It serves the engine protocol
/// on top of `meshmind.sdk.mesher.AutoMesher`.
pub const PYTHON_BRIDGE: &str = include_str!("../python/meshmind_bridge.py");

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EngineConfigFile {
    engine: Option<String>,
    process: Option<ProcessConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ProcessConfigFile {
    command: Option<String>,
    args: Option<Vec<String>>,
    shutdown_grace_ms: Option<u64>,
}

/// Engine selection and engine-specific settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Registry name of the engine to start.
    pub engine: String,
    pub process: ProcessSettings,
}

/// Settings for the external engine process.
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub command: String,
    pub args: Vec<String>,
    /// How long a shutting-down engine may take before it is killed.
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: DEFAULT_ENGINE.to_string(),
            process: ProcessSettings::default(),
        }
    }
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            command: DEFAULT_ENGINE_COMMAND.to_string(),
            args: vec!["-u".to_string(), "-c".to_string(), PYTHON_BRIDGE.to_string()],
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `MESHMIND_CONFIG` (if set) and environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MESHMIND_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Same as [`EngineConfig::load`] but forcing the engine name.
    pub fn load_with_engine(engine: &str) -> Result<Self> {
        let mut cfg = Self::load()?;
        cfg.engine = engine.trim().to_string();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EngineConfigFile) -> Self {
        let defaults = ProcessSettings::default();
        let process = file.process.unwrap_or_default();
        Self {
            engine: file.engine.unwrap_or_else(|| DEFAULT_ENGINE.to_string()),
            process: ProcessSettings {
                // Bridge arguments only make sense for the default command.
                args: match (&process.command, process.args) {
                    (_, Some(args)) => args,
                    (Some(_), None) => Vec::new(),
                    (None, None) => defaults.args,
                },
                command: process.command.unwrap_or(defaults.command),
                shutdown_grace: process
                    .shutdown_grace_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.shutdown_grace),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(engine) = std::env::var("MESHMIND_ENGINE") {
            if !engine.trim().is_empty() {
                self.engine = engine.trim().to_string();
            }
        }
        if let Ok(cmd) = std::env::var("MESHMIND_ENGINE_CMD") {
            let mut parts = cmd.split_whitespace().map(|part| part.to_string());
            if let Some(command) = parts.next() {
                self.process.command = command;
                self.process.args = parts.collect();
            }
        }
        if let Ok(grace) = std::env::var("MESHMIND_SHUTDOWN_GRACE_MS") {
            let millis: u64 = grace.trim().parse().map_err(|_| {
                anyhow!("MESHMIND_SHUTDOWN_GRACE_MS must be an integer number of milliseconds")
            })?;
            self.process.shutdown_grace = Duration::from_millis(millis);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.engine.trim().is_empty() {
            return Err(anyhow!("engine name must not be empty"));
        }
        if self.process.command.trim().is_empty() {
            return Err(anyhow!("engine command must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<EngineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
