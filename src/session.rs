//! Safe per-handle session: the state behind one detector handle.
//!
//! The session validates parameters, enforces call ordering, keeps the
//! registered templates and latest detections, and records the last error.
//! The C ABI in [`crate::ffi`] is a thin layer over this type.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::config::EngineConfig;
use crate::context::{self, ContextLease};
use crate::engine::{
    EngineDetection, EngineRegistry, EngineSession, RefinementRequest, SizingParams,
    TemplateSpec,
};
use crate::error::{FailWith, Failure, FailureKind};

/// Longest identifier that still fits a detection record with its NUL.
pub const MAX_TEMPLATE_ID_LEN: usize = 255;

fn template_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,254}$").expect("template id pattern is valid")
    })
}

/// Where a session is in its workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    TargetLoaded,
    Detected,
    Exported,
}

impl SessionState {
    fn has_detections(self) -> bool {
        matches!(self, SessionState::Detected | SessionState::Exported)
    }
}

/// One detection/export session.
///
/// Not `Sync`: a session must be driven by one caller at a time.
pub struct Session {
    // Field order matters: the engine session must close before the lease
    // can shut the runtime down.
    engine: Box<dyn EngineSession>,
    lease: ContextLease,
    state: SessionState,
    target: Option<PathBuf>,
    templates: Vec<TemplateSpec>,
    detections: Vec<EngineDetection>,
    last_error: String,
}

impl Session {
    /// Open a session on the shared context using configuration from the environment.
    pub fn open() -> Result<Self, Failure> {
        let cfg = EngineConfig::load().fail_with(FailureKind::Init)?;
        Self::open_with(&EngineRegistry::builtin(), &cfg)
    }

    /// Open a session on the shared context, starting `cfg.engine` from `registry` if needed.
    pub fn open_with(registry: &EngineRegistry, cfg: &EngineConfig) -> Result<Self, Failure> {
        let lease = context::acquire(registry, cfg).fail_with(FailureKind::Init)?;
        Self::with_lease(lease)
    }

    /// Open a session on an already acquired context.
    pub fn with_lease(lease: ContextLease) -> Result<Self, Failure> {
        let engine = lease
            .context()
            .runtime()
            .open_session()
            .fail_with(FailureKind::Init)?;
        Ok(Self {
            engine,
            lease,
            state: SessionState::Created,
            target: None,
            templates: Vec::new(),
            detections: Vec::new(),
            last_error: String::new(),
        })
    }

    pub fn engine_name(&self) -> &'static str {
        self.lease.context().engine_name()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target(&self) -> Option<&Path> {
        self.target.as_deref()
    }

    pub fn templates(&self) -> &[TemplateSpec] {
        &self.templates
    }

    /// Detections from the latest successful `detect`.
    pub fn detections(&self) -> &[EngineDetection] {
        &self.detections
    }

    /// Detail of the last failed call, or empty if the last call succeeded.
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    /// Record the detail of a failure raised outside the session itself.
    pub fn set_last_error(&mut self, message: impl Into<String>) {
        self.last_error = message.into();
    }

    fn record<T>(&mut self, outcome: Result<T, Failure>) -> Result<T, Failure> {
        match &outcome {
            Ok(_) => self.last_error.clear(),
            Err(failure) => {
                log::warn!("{:?} failure: {}", failure.kind(), failure);
                self.last_error = failure.to_string();
            }
        }
        outcome
    }

    /// Load target geometry, replacing the previous target and its detections.
    pub fn load_target(&mut self, path: &str) -> Result<(), Failure> {
        let outcome = self.try_load_target(path);
        self.record(outcome)
    }

    fn try_load_target(&mut self, path: &str) -> Result<(), Failure> {
        let path = non_empty_path(path, "target path")?;
        if !path.is_file() {
            return Err(Failure::new(
                FailureKind::Load,
                anyhow::anyhow!("target file not found: {}", path.display()),
            ));
        }
        self.engine
            .load_target(&path)
            .fail_with(FailureKind::Load)?;
        log::debug!("target loaded: {}", path.display());
        self.target = Some(path);
        self.detections.clear();
        self.state = SessionState::TargetLoaded;
        Ok(())
    }

    /// Register a template under a unique identifier.
    pub fn add_template(&mut self, path: &str, id: &str) -> Result<(), Failure> {
        let outcome = self.try_add_template(path, id);
        self.record(outcome)
    }

    fn try_add_template(&mut self, path: &str, id: &str) -> Result<(), Failure> {
        let path = non_empty_path(path, "template path")?;
        if !template_id_pattern().is_match(id) {
            return Err(Failure::invalid_parameter(format!(
                "template id `{}` must be 1-{} characters of [A-Za-z0-9_.-] starting with a letter or digit",
                id, MAX_TEMPLATE_ID_LEN
            )));
        }
        if self.templates.iter().any(|t| t.id == id) {
            return Err(Failure::invalid_parameter(format!(
                "template `{}` is already registered",
                id
            )));
        }
        if !path.is_file() {
            return Err(Failure::invalid_parameter(format!(
                "template file not found: {}",
                path.display()
            )));
        }
        log::debug!("template `{}` registered from {}", id, path.display());
        self.templates.push(TemplateSpec {
            id: id.to_string(),
            path,
        });
        Ok(())
    }

    /// Run detection of every registered template against the target.
    pub fn detect(&mut self) -> Result<&[EngineDetection], Failure> {
        let outcome = self.try_detect();
        self.record(outcome)?;
        Ok(&self.detections)
    }

    fn try_detect(&mut self) -> Result<(), Failure> {
        if self.state == SessionState::Created {
            return Err(Failure::new(
                FailureKind::Detect,
                anyhow::anyhow!("no target loaded; call load_target first"),
            ));
        }
        let detections = self
            .engine
            .detect(&self.templates)
            .fail_with(FailureKind::Detect)?;
        for detection in &detections {
            detection
                .validate()
                .map_err(|mismatch| Failure::new(FailureKind::Detect, mismatch))?;
        }
        log::info!(
            "{} detection(s) for {} template(s)",
            detections.len(),
            self.templates.len()
        );
        self.detections = detections;
        self.state = SessionState::Detected;
        Ok(())
    }

    /// Compute refinement regions and write a refinement dictionary.
    pub fn export_refinement_dict(&mut self, path: &str) -> Result<(), Failure> {
        let outcome = self.try_export_refinement_dict(path);
        self.record(outcome)
    }

    fn try_export_refinement_dict(&mut self, path: &str) -> Result<(), Failure> {
        let path = non_empty_path(path, "output path")?;
        self.require_detections()?;
        self.engine
            .generate_refinement(&RefinementRequest::default())
            .fail_with(FailureKind::Export)?;
        self.engine
            .export_refinement_dict(&path)
            .fail_with(FailureKind::Export)?;
        log::info!("refinement dictionary written to {}", path.display());
        self.state = SessionState::Exported;
        Ok(())
    }

    /// Compute refinement regions and write a full case directory.
    pub fn export_case(
        &mut self,
        case_dir: &str,
        enable_rotating_zones: bool,
    ) -> Result<(), Failure> {
        let outcome = self.try_export_case(case_dir, enable_rotating_zones);
        self.record(outcome)
    }

    fn try_export_case(&mut self, case_dir: &str, enable_rotating_zones: bool) -> Result<(), Failure> {
        let case_dir = non_empty_path(case_dir, "case directory")?;
        self.require_detections()?;
        self.engine
            .generate_refinement(&RefinementRequest {
                enable_rotating_zones,
            })
            .fail_with(FailureKind::Export)?;
        self.engine
            .export_case(&case_dir, enable_rotating_zones)
            .fail_with(FailureKind::Export)?;
        log::info!(
            "case written to {} (rotating zones: {})",
            case_dir.display(),
            enable_rotating_zones
        );
        self.state = SessionState::Exported;
        Ok(())
    }

    /// Write a tetrahedral sizing field for the current detections.
    pub fn export_sizing_field(&mut self, path: &str) -> Result<(), Failure> {
        let outcome = self.try_export_sizing_field(path);
        self.record(outcome)
    }

    fn try_export_sizing_field(&mut self, path: &str) -> Result<(), Failure> {
        let path = non_empty_path(path, "output path")?;
        self.require_detections()?;
        self.engine
            .export_sizing_field(&path, &SizingParams::default())
            .fail_with(FailureKind::Export)?;
        log::info!("sizing field written to {}", path.display());
        self.state = SessionState::Exported;
        Ok(())
    }

    fn require_detections(&self) -> Result<(), Failure> {
        if !self.state.has_detections() {
            return Err(Failure::new(
                FailureKind::Export,
                anyhow::anyhow!("no detections available; call detect first"),
            ));
        }
        Ok(())
    }
}

fn non_empty_path(raw: &str, what: &str) -> Result<PathBuf, Failure> {
    if raw.trim().is_empty() {
        return Err(Failure::invalid_parameter(format!("{} must not be empty", what)));
    }
    Ok(PathBuf::from(raw))
}
