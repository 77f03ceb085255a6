//! Deterministic in-process engine for tests and smoke runs.
//!
//! Nothing here recognizes geometry. Detections are derived from a SHA-256 of
//! the target and template bytes, so the same inputs always give the same
//! records. Exports are minimal OpenFOAM dictionaries and a JSON sizing
//! array.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::engine::backend::{
    EngineRuntime, EngineSession, RefinementRequest, SizingParams, TemplateSpec,
};
use crate::engine::result::{translation, EngineDetection};

const SUPPORTED_EXTENSIONS: &[&str] = &["stl", "obj"];
const DEFAULT_RADIUS: f64 = 0.5;
const BOX_PADDING: f64 = 1.2;
const DEFAULT_LEVEL: u32 = 3;
const WHEEL_LEVEL: u32 = 4;

/// Feature types that get a rotating (MRF) zone when zones are enabled.
const ROTATING_FEATURES: &[&str] = &["wheel", "fan", "turbine"];

/// Stub runtime. Stateless; every session is independent.
#[derive(Debug, Default)]
pub struct StubRuntime;

impl StubRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl EngineRuntime for StubRuntime {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn open_session(&self) -> Result<Box<dyn EngineSession>> {
        Ok(Box::new(StubSession::new()))
    }
}

struct StubTarget {
    path: PathBuf,
    digest: [u8; 32],
}

struct RefinementBox {
    name: String,
    min: [f64; 3],
    max: [f64; 3],
    level: u32,
}

struct RotatingZone {
    name: String,
    origin: [f64; 3],
}

#[derive(Serialize)]
struct SizingSphere {
    center: [f64; 3],
    radius: f64,
    size: f64,
}

/// Stub session state.
#[derive(Default)]
pub struct StubSession {
    target: Option<StubTarget>,
    detections: Vec<EngineDetection>,
    regions: Vec<RefinementBox>,
    rotating_zones: Vec<RotatingZone>,
}

impl StubSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn require_regions(&self) -> Result<()> {
        if self.regions.is_empty() {
            return Err(anyhow!("no refinement regions generated to export"));
        }
        Ok(())
    }

    /// Refinement dictionary stamped with the digest of the target it came from.
    fn snappy_dict(&self) -> Result<String> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| anyhow!("no target loaded"))?;
        Ok(snappy_dict(&target.digest, &self.regions))
    }
}

impl EngineSession for StubSession {
    fn load_target(&mut self, path: &Path) -> Result<()> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(anyhow!("unsupported file extension: {}", path.display()));
        }
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read target {}", path.display()))?;
        let digest: [u8; 32] = Sha256::digest(&bytes).into();
        log::debug!("stub target {} ({} bytes)", path.display(), bytes.len());

        self.target = Some(StubTarget {
            path: path.to_path_buf(),
            digest,
        });
        self.detections.clear();
        self.regions.clear();
        self.rotating_zones.clear();
        Ok(())
    }

    fn detect(&mut self, templates: &[TemplateSpec]) -> Result<Vec<EngineDetection>> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| anyhow!("target mesh must be loaded before detection"))?;

        let mut detections = Vec::with_capacity(templates.len());
        for (index, template) in templates.iter().enumerate() {
            let bytes = fs::read(&template.path).with_context(|| {
                format!("failed to read template {}", template.path.display())
            })?;
            let mut hasher = Sha256::new();
            hasher.update(target.digest);
            hasher.update(&bytes);
            let digest: [u8; 32] = hasher.finalize().into();

            detections.push(EngineDetection {
                feature_id: format!("{}_{}", template.id, index),
                transform: translation([
                    unit_offset(digest[1]),
                    unit_offset(digest[2]),
                    unit_offset(digest[3]),
                ]),
                confidence: 0.5 + f64::from(digest[0]) / 255.0 * 0.5,
                radius: Some(0.25 + f64::from(digest[4]) / 255.0 * 0.25),
            });
        }
        log::debug!(
            "stub matched {} template(s) against {}",
            detections.len(),
            target.path.display()
        );

        self.detections = detections.clone();
        self.regions.clear();
        self.rotating_zones.clear();
        Ok(detections)
    }

    fn generate_refinement(&mut self, request: &RefinementRequest) -> Result<()> {
        self.regions = self
            .detections
            .iter()
            .map(|det| {
                let center = det.position();
                let half = det.radius.unwrap_or(DEFAULT_RADIUS) * BOX_PADDING;
                RefinementBox {
                    name: format!("{}_ref", det.feature_id),
                    min: center.map(|c| c - half),
                    max: center.map(|c| c + half),
                    level: if det.feature_type() == "wheel" {
                        WHEEL_LEVEL
                    } else {
                        DEFAULT_LEVEL
                    },
                }
            })
            .collect();

        self.rotating_zones.clear();
        if request.enable_rotating_zones {
            self.rotating_zones = self
                .detections
                .iter()
                .filter(|det| ROTATING_FEATURES.contains(&det.feature_type()))
                .map(|det| RotatingZone {
                    name: format!("{}_MRFZone", det.feature_id),
                    origin: det.position(),
                })
                .collect();
        }
        Ok(())
    }

    fn export_refinement_dict(&mut self, path: &Path) -> Result<()> {
        self.require_regions()?;
        write_text(path, &self.snappy_dict()?)
    }

    fn export_case(&mut self, case_dir: &Path, include_rotating_zones: bool) -> Result<()> {
        self.require_regions()?;
        let system_dir = case_dir.join("system");
        let constant_dir = case_dir.join("constant");
        for dir in [&system_dir, &constant_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        write_text(&system_dir.join("snappyHexMeshDict"), &self.snappy_dict()?)?;

        let mrf_path = constant_dir.join("MRFProperties");
        let toposet_path = system_dir.join("topoSetDict");
        if include_rotating_zones && !self.rotating_zones.is_empty() {
            write_text(&mrf_path, &mrf_properties(&self.rotating_zones))?;
            write_text(&toposet_path, &toposet_dict(&self.rotating_zones))?;
        } else {
            for stale in [&mrf_path, &toposet_path] {
                if stale.exists() {
                    fs::remove_file(stale)
                        .with_context(|| format!("failed to remove {}", stale.display()))?;
                }
            }
        }
        Ok(())
    }

    fn export_sizing_field(&mut self, path: &Path, params: &SizingParams) -> Result<()> {
        let spheres: Vec<SizingSphere> = self
            .detections
            .iter()
            .map(|det| SizingSphere {
                center: det.position(),
                radius: det.radius.unwrap_or(DEFAULT_RADIUS),
                size: params.edge_length(),
            })
            .collect();
        let file = fs::File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &spheres)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Map a byte onto `[-1, 1]`.
fn unit_offset(byte: u8) -> f64 {
    f64::from(byte) / 127.5 - 1.0
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

fn vector(v: [f64; 3]) -> String {
    format!("({:.6} {:.6} {:.6})", v[0], v[1], v[2])
}

fn foam_header(object: &str) -> String {
    format!("FoamFile\n{{\n    format ascii;\n    class  dictionary;\n    object {};\n}}\n", object)
}

fn snappy_dict(target_digest: &[u8; 32], regions: &[RefinementBox]) -> String {
    let mut out = foam_header("snappyHexMeshDict");
    let _ = writeln!(out, "// target sha256:{}\n\ngeometry\n{{", hex::encode(target_digest));
    for region in regions {
        let _ = writeln!(
            out,
            "    {} {{ type searchableBox; min {}; max {}; }}",
            region.name,
            vector(region.min),
            vector(region.max)
        );
    }
    out.push_str("}\n\ncastellatedMeshControls\n{\n    refinementRegions\n    {\n");
    for region in regions {
        let _ = writeln!(
            out,
            "        {} {{ mode inside; levels ((1E15 {})); }}",
            region.name, region.level
        );
    }
    out.push_str("    }\n}\n");
    out
}

fn mrf_properties(zones: &[RotatingZone]) -> String {
    let mut out = foam_header("MRFProperties");
    for zone in zones {
        let _ = writeln!(
            out,
            "{name} {{ cellZone {name}; active yes; origin {origin}; }}",
            name = zone.name,
            origin = vector(zone.origin),
        );
    }
    out
}

fn toposet_dict(zones: &[RotatingZone]) -> String {
    let mut out = foam_header("topoSetDict");
    out.push_str("actions\n(\n");
    for zone in zones {
        let _ = writeln!(
            out,
            "    {{ name {name}; type cellZoneSet; action new; source setToCellZone; set {name}; }}",
            name = zone.name
        );
    }
    out.push_str(");\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn detected_session(dir: &TempDir, template_id: &str) -> StubSession {
        let target = fixture(dir, "target.stl", "solid car\nendsolid car\n");
        let template = fixture(dir, "template.stl", "solid part\nendsolid part\n");
        let mut session = StubSession::new();
        session.load_target(&target).unwrap();
        session
            .detect(&[TemplateSpec {
                id: template_id.to_string(),
                path: template,
            }])
            .unwrap();
        session
    }

    #[test]
    fn rejects_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let target = fixture(&dir, "target.step", "ISO-10303-21;");
        let err = StubSession::new().load_target(&target).unwrap_err();
        assert!(err.to_string().contains("unsupported file extension"));
    }

    #[test]
    fn detect_requires_target() {
        let err = StubSession::new().detect(&[]).unwrap_err();
        assert!(err.to_string().contains("target mesh must be loaded"));
    }

    #[test]
    fn detections_are_deterministic_and_bounded() {
        let dir = TempDir::new().unwrap();
        let first = detected_session(&dir, "wheel").detections;
        let second = detected_session(&dir, "wheel").detections;

        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        let det = &first[0];
        assert_eq!(det.feature_id, "wheel_0");
        assert!((0.5..=1.0).contains(&det.confidence));
        assert!(det.position().iter().all(|c| (-1.0..=1.0).contains(c)));
        det.validate().unwrap();
    }

    #[test]
    fn no_templates_means_no_detections() {
        let dir = TempDir::new().unwrap();
        let target = fixture(&dir, "target.obj", "v 0 0 0\n");
        let mut session = StubSession::new();
        session.load_target(&target).unwrap();
        assert!(session.detect(&[]).unwrap().is_empty());
    }

    #[test]
    fn export_without_regions_fails() {
        let dir = TempDir::new().unwrap();
        let mut session = StubSession::new();
        let err = session
            .export_refinement_dict(&dir.path().join("snappyHexMeshDict"))
            .unwrap_err();
        assert!(err.to_string().contains("no refinement regions"));
    }

    #[test]
    fn case_export_writes_rotating_zone_files_for_wheels() {
        let dir = TempDir::new().unwrap();
        let mut session = detected_session(&dir, "wheel");
        session
            .generate_refinement(&RefinementRequest {
                enable_rotating_zones: true,
            })
            .unwrap();
        let case_dir = dir.path().join("case");
        session.export_case(&case_dir, true).unwrap();

        let snappy = fs::read_to_string(case_dir.join("system/snappyHexMeshDict")).unwrap();
        assert!(snappy.contains("wheel_0_ref"));
        assert!(snappy.contains("levels ((1E15 4));"));
        let mrf = fs::read_to_string(case_dir.join("constant/MRFProperties")).unwrap();
        assert!(mrf.contains("wheel_0_MRFZone { cellZone wheel_0_MRFZone;"));
        let origin = vector(session.detections[0].position());
        assert!(mrf.contains(&format!("origin {};", origin)));
        let toposet = fs::read_to_string(case_dir.join("system/topoSetDict")).unwrap();
        assert!(toposet.contains("name wheel_0_MRFZone; type cellZoneSet;"));
    }

    #[test]
    fn refinement_dict_names_its_target() {
        let dir = TempDir::new().unwrap();
        let mut session = detected_session(&dir, "mirror");
        session
            .generate_refinement(&RefinementRequest::default())
            .unwrap();
        let path = dir.path().join("snappyHexMeshDict");
        session.export_refinement_dict(&path).unwrap();

        let target = fs::read(dir.path().join("target.stl")).unwrap();
        let expected = format!("// target sha256:{}", hex::encode(Sha256::digest(&target)));
        let dict = fs::read_to_string(&path).unwrap();
        assert!(dict.contains(&expected), "{}", dict);
        assert!(dict.contains("mirror_0_ref { type searchableBox;"));
        assert!(dict.contains("levels ((1E15 3));"));
    }

    #[test]
    fn case_export_without_rotating_zones_removes_stale_files() {
        let dir = TempDir::new().unwrap();
        let mut session = detected_session(&dir, "wheel");
        let case_dir = dir.path().join("case");

        session
            .generate_refinement(&RefinementRequest {
                enable_rotating_zones: true,
            })
            .unwrap();
        session.export_case(&case_dir, true).unwrap();
        assert!(case_dir.join("constant/MRFProperties").exists());

        session
            .generate_refinement(&RefinementRequest::default())
            .unwrap();
        session.export_case(&case_dir, false).unwrap();
        assert!(case_dir.join("system/snappyHexMeshDict").exists());
        assert!(!case_dir.join("constant/MRFProperties").exists());
        assert!(!case_dir.join("system/topoSetDict").exists());
    }

    #[test]
    fn non_rotating_features_get_no_zone() {
        let dir = TempDir::new().unwrap();
        let mut session = detected_session(&dir, "mirror");
        session
            .generate_refinement(&RefinementRequest {
                enable_rotating_zones: true,
            })
            .unwrap();
        assert_eq!(session.regions.len(), 1);
        assert!(session.rotating_zones.is_empty());
    }

    #[test]
    fn sizing_field_is_a_json_array_of_spheres() {
        let dir = TempDir::new().unwrap();
        let mut session = detected_session(&dir, "fan");
        let path = dir.path().join("sizing.json");
        session
            .export_sizing_field(&path, &SizingParams::default())
            .unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let spheres = parsed.as_array().unwrap();
        assert_eq!(spheres.len(), 1);
        assert!((spheres[0]["size"].as_f64().unwrap() - 0.02).abs() < 1e-12);
        assert_eq!(spheres[0]["center"].as_array().unwrap().len(), 3);
    }
}
