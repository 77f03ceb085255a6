use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::engine::result::EngineDetection;

/// Base element size handed to sizing-field generation.
pub const DEFAULT_BASE_SIZE: f64 = 0.1;
/// Fraction of the base size used inside detected features.
pub const DEFAULT_REFINEMENT_FACTOR: f64 = 0.2;

/// A named template the engine searches for in the target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TemplateSpec {
    pub id: String,
    pub path: PathBuf,
}

/// Options for refinement-region generation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RefinementRequest {
    /// Also derive rotating reference frame zones for rotating features.
    pub enable_rotating_zones: bool,
}

/// Tunables for tetrahedral sizing-field export.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SizingParams {
    pub base_size: f64,
    pub refinement_factor: f64,
}

impl SizingParams {
    /// Target edge length inside a detected feature.
    pub fn edge_length(&self) -> f64 {
        self.base_size * self.refinement_factor
    }
}

impl Default for SizingParams {
    fn default() -> Self {
        Self {
            base_size: DEFAULT_BASE_SIZE,
            refinement_factor: DEFAULT_REFINEMENT_FACTOR,
        }
    }
}

/// A started engine: the process-scoped execution context.
///
/// One runtime serves every handle that shares it, so implementations must
/// serialize access to any state they keep.
pub trait EngineRuntime: Send + Sync {
    /// Engine identifier, as registered.
    fn name(&self) -> &'static str;

    /// Open a per-handle session.
    fn open_session(&self) -> Result<Box<dyn EngineSession>>;

    /// Stop the runtime. Called once, when the last handle lets go.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Per-handle engine state: target, detections, refinement results.
///
/// Every call blocks until the engine is done. Calls made out of order must
/// return an error rather than panic.
pub trait EngineSession: Send {
    /// Load target geometry, replacing any previous target.
    fn load_target(&mut self, path: &Path) -> Result<()>;

    /// Detect all templates in the current target.
    fn detect(&mut self, templates: &[TemplateSpec]) -> Result<Vec<EngineDetection>>;

    /// Compute refinement regions from the latest detections.
    fn generate_refinement(&mut self, request: &RefinementRequest) -> Result<()>;

    /// Write a mesh refinement dictionary.
    fn export_refinement_dict(&mut self, path: &Path) -> Result<()>;

    /// Write a full simulation case under `case_dir`.
    fn export_case(&mut self, case_dir: &Path, include_rotating_zones: bool) -> Result<()>;

    /// Write a tetrahedral sizing field derived from the latest detections.
    fn export_sizing_field(&mut self, path: &Path, params: &SizingParams) -> Result<()>;
}
