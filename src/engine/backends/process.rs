//! Engine running as an external process.
//!
//! The child process is the execution context: it is spawned once per
//! runtime, every handle opens its own session inside it, and it is asked to
//! exit (then killed after a grace period) when the runtime shuts down.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::io::BufReader;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use super::protocol::{Channel, Op};
use crate::config::ProcessSettings;
use crate::engine::backend::{
    EngineRuntime, EngineSession, RefinementRequest, SizingParams, TemplateSpec,
};
use crate::engine::result::EngineDetection;
use crate::error::SchemaMismatch;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

type SharedChannel = Arc<Mutex<Channel>>;

fn lock(channel: &SharedChannel) -> Result<MutexGuard<'_, Channel>> {
    channel
        .lock()
        .map_err(|_| anyhow!("engine channel lock poisoned"))
}

/// Runtime backed by a spawned engine process.
pub struct ProcessRuntime {
    channel: SharedChannel,
    child: Mutex<Option<Child>>,
    shutdown_grace: Duration,
}

impl ProcessRuntime {
    /// Spawn the engine command and perform the `hello` handshake.
    pub fn start(settings: &ProcessSettings) -> Result<Self> {
        let mut child = Command::new(&settings.command)
            .args(&settings.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to start engine command `{}`", settings.command))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("engine process has no stdio pipes"));
        };
        let runtime = Self {
            channel: Arc::new(Mutex::new(Channel::new(
                Box::new(BufReader::new(stdout)),
                Box::new(stdin),
            ))),
            child: Mutex::new(Some(child)),
            shutdown_grace: settings.shutdown_grace,
        };

        let hello = lock(&runtime.channel)?.call(&Op::Hello {
            client: "meshmind",
            version: crate::VERSION,
        });
        match hello {
            Ok(info) => {
                log::info!(
                    "engine `{}` ready (pid {}, reports {})",
                    settings.command,
                    runtime.pid().unwrap_or_default(),
                    info
                );
                Ok(runtime)
            }
            Err(err) => {
                runtime.kill();
                Err(err.context(format!("engine `{}` handshake failed", settings.command)))
            }
        }
    }

    fn pid(&self) -> Option<u32> {
        self.child
            .lock()
            .ok()
            .and_then(|child| child.as_ref().map(Child::id))
    }

    fn kill(&self) {
        if let Ok(mut slot) = self.child.lock() {
            if let Some(mut child) = slot.take() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

impl EngineRuntime for ProcessRuntime {
    fn name(&self) -> &'static str {
        "process"
    }

    fn open_session(&self) -> Result<Box<dyn EngineSession>> {
        let opened = lock(&self.channel)?
            .call(&Op::OpenSession)
            .context("engine refused to open a session")?;
        let id = opened
            .get("session")
            .and_then(Value::as_u64)
            .ok_or_else(|| SchemaMismatch::new("session", "is missing or not an integer"))?;
        log::debug!("engine session {} opened", id);
        Ok(Box::new(ProcessSession::new(id, self.channel.clone())))
    }

    fn shutdown(&self) -> Result<()> {
        let mut slot = self
            .child
            .lock()
            .map_err(|_| anyhow!("engine process lock poisoned"))?;
        let Some(mut child) = slot.take() else {
            return Ok(());
        };

        // Not waiting for the reply: a hung engine must not outlast the grace period.
        if let Err(err) = lock(&self.channel).and_then(|mut channel| channel.notify(&Op::Shutdown)) {
            log::warn!("failed to ask engine to shut down: {:#}", err);
        }

        let deadline = Instant::now() + self.shutdown_grace;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    log::debug!("engine exited with {}", status);
                    return Ok(());
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL_INTERVAL),
                Ok(None) => break,
                Err(err) => {
                    log::warn!("failed to poll engine process: {}", err);
                    break;
                }
            }
        }
        log::warn!(
            "engine still running after {:?}; killing pid {}",
            self.shutdown_grace,
            child.id()
        );
        child.kill().context("failed to kill engine process")?;
        child.wait().context("failed to reap engine process")?;
        Ok(())
    }
}

impl Drop for ProcessRuntime {
    fn drop(&mut self) {
        self.kill();
    }
}

/// One handle's session inside the engine process.
pub struct ProcessSession {
    id: u64,
    channel: SharedChannel,
}

impl ProcessSession {
    pub(crate) fn new(id: u64, channel: SharedChannel) -> Self {
        Self { id, channel }
    }

    fn call(&self, op: &Op<'_>) -> Result<Value> {
        lock(&self.channel)?.call(op)
    }
}

impl EngineSession for ProcessSession {
    fn load_target(&mut self, path: &Path) -> Result<()> {
        self.call(&Op::LoadTarget {
            session: self.id,
            path,
        })?;
        Ok(())
    }

    fn detect(&mut self, templates: &[TemplateSpec]) -> Result<Vec<EngineDetection>> {
        let result = self.call(&Op::Detect {
            session: self.id,
            templates,
        })?;
        decode_detections(&result).context("decoding detect response")
    }

    fn generate_refinement(&mut self, request: &RefinementRequest) -> Result<()> {
        self.call(&Op::GenerateRefinement {
            session: self.id,
            enable_rotating_zones: request.enable_rotating_zones,
        })?;
        Ok(())
    }

    fn export_refinement_dict(&mut self, path: &Path) -> Result<()> {
        self.call(&Op::ExportRefinementDict {
            session: self.id,
            path,
        })?;
        Ok(())
    }

    fn export_case(&mut self, case_dir: &Path, include_rotating_zones: bool) -> Result<()> {
        self.call(&Op::ExportCase {
            session: self.id,
            case_dir,
            include_rotating_zones,
        })?;
        Ok(())
    }

    fn export_sizing_field(&mut self, path: &Path, params: &SizingParams) -> Result<()> {
        self.call(&Op::ExportSizingField {
            session: self.id,
            path,
            base_size: params.base_size,
            refinement_factor: params.refinement_factor,
        })?;
        Ok(())
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        let closed = lock(&self.channel)
            .and_then(|mut channel| channel.notify(&Op::CloseSession { session: self.id }));
        if let Err(err) = closed {
            log::warn!("failed to close engine session {}: {:#}", self.id, err);
        }
    }
}

fn decode_detections(result: &Value) -> Result<Vec<EngineDetection>> {
    let items = result
        .get("detections")
        .and_then(Value::as_array)
        .ok_or_else(|| SchemaMismatch::new("detections", "is missing or not an array"))?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            EngineDetection::from_wire(item)
                .with_context(|| format!("detection {} is malformed", index))
        })
        .collect()
}
