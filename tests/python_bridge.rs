//! The bundled Python bridge, run against a stand-in `meshmind` SDK package.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use tempfile::TempDir;

use meshmind::config::PYTHON_BRIDGE;
use meshmind::context::ContextLease;
use meshmind::engine::ProcessRuntime;
use meshmind::{FailureKind, ProcessSettings, Session};

const MESHER_PY: &str = r#"import os


class DetectionResult:
    def __init__(self, feature_id, transform, confidence, region_metadata=None):
        self.feature_id = feature_id
        self.transform = transform
        self.confidence = confidence
        self.region_metadata = region_metadata or {}


class AutoMesher:
    def __init__(self):
        self.target_mesh = None
        self.detections = []
        self.regions = []
        self.mrf_zones = []

    def load_target(self, file_path):
        ext = os.path.splitext(file_path)[1].lower()
        if ext not in (".stl", ".obj"):
            raise ValueError(f"Unsupported file extension: {ext}")
        self.target_mesh = file_path

    def detect_features(self, template_paths):
        if not self.target_mesh:
            raise RuntimeError("Target mesh must be loaded before detection.")
        print("matching templates")
        self.detections = []
        for i, path in enumerate(template_paths):
            kind = os.path.splitext(os.path.basename(path))[0].split("_")[0]
            metadata = {"radius": 0.3} if kind == "wheel" else {}
            transform = [[1, 0, 0, 1.5 * i], [0, 1, 0, 0.5], [0, 0, 1, 0.25], [0, 0, 0, 1]]
            self.detections.append(DetectionResult(f"{kind}_{i}", transform, 0.9, metadata))
        return self.detections

    def generate_refinement(self, custom_rules=None, enable_mrf=True, mrf_params=None):
        self.regions = [det.feature_id + "_ref" for det in self.detections]
        self.mrf_zones = []
        if enable_mrf:
            self.mrf_zones = [d.feature_id + "_MRFZone" for d in self.detections if d.feature_id.startswith("wheel")]
        return self.regions

    def export_snappy_dict(self, output_path, include_mrf=True):
        if not self.regions:
            raise RuntimeError("No refinement regions generated to export.")
        if os.path.isdir(output_path):
            os.makedirs(os.path.join(output_path, "system"), exist_ok=True)
            with open(os.path.join(output_path, "system", "snappyHexMeshDict"), "w") as f:
                f.write("\n".join(self.regions))
            if include_mrf and self.mrf_zones:
                os.makedirs(os.path.join(output_path, "constant"), exist_ok=True)
                with open(os.path.join(output_path, "constant", "MRFProperties"), "w") as f:
                    f.write("\n".join(self.mrf_zones))
        else:
            with open(output_path, "w") as f:
                f.write("\n".join(self.regions))
"#;

const FTETWILD_PY: &str = r#"import json


class FTetWildGenerator:
    def generate_refinement_config(self, detections, global_params):
        size = global_params["base_size"] * global_params["refinement_factor"]
        sizing = [
            {
                "center": [row[3] for row in det.transform[:3]],
                "radius": det.region_metadata.get("radius", 0.5),
                "size": size,
            }
            for det in detections
        ]
        return {"generator": "ftetwild", "sizing": sizing}

    def export_config(self, config, output_path):
        with open(output_path, "w") as f:
            json.dump(config["sizing"], f)
"#;

fn python_available() -> bool {
    Command::new("python3")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Lay out `meshmind.sdk.mesher` and `meshmind.plugins.mesh_generators.ftetwild`.
fn write_sdk(root: &Path, mesher: &str) {
    let package = root.join("meshmind");
    for dir in ["sdk", "plugins/mesh_generators"] {
        fs::create_dir_all(package.join(dir)).unwrap();
    }
    for init in [
        "__init__.py",
        "sdk/__init__.py",
        "plugins/__init__.py",
        "plugins/mesh_generators/__init__.py",
    ] {
        fs::write(package.join(init), "").unwrap();
    }
    fs::write(package.join("sdk/mesher.py"), mesher).unwrap();
    fs::write(package.join("plugins/mesh_generators/ftetwild.py"), FTETWILD_PY).unwrap();
}

/// The default bridge invocation with the stand-in SDK on `PYTHONPATH`.
fn bridge_settings(sdk_root: &Path) -> ProcessSettings {
    let defaults = ProcessSettings::default();
    let mut args = vec![
        format!("PYTHONPATH={}", sdk_root.display()),
        defaults.command,
    ];
    args.extend(defaults.args);
    ProcessSettings {
        command: "env".to_string(),
        args,
        shutdown_grace: Duration::from_secs(5),
    }
}

fn bridge_session(sdk_root: &Path) -> Session {
    let runtime = ProcessRuntime::start(&bridge_settings(sdk_root)).expect("bridge starts");
    Session::with_lease(ContextLease::private(Box::new(runtime))).expect("session opens")
}

fn touch(dir: &TempDir, name: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, "solid part\nendsolid part\n").unwrap();
    path.to_str().unwrap().to_string()
}

#[test]
fn default_args_run_the_bundled_bridge() {
    let settings = ProcessSettings::default();
    assert_eq!(settings.command, "python3");
    assert_eq!(settings.args.last().map(String::as_str), Some(PYTHON_BRIDGE));
}

#[test]
fn bridge_drives_the_sdk_mesher() {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return;
    }
    let sdk = TempDir::new().unwrap();
    write_sdk(sdk.path(), MESHER_PY);
    let work = TempDir::new().unwrap();
    let mut session = bridge_session(sdk.path());

    session.load_target(&touch(&work, "car.stl")).unwrap();
    session
        .add_template(&touch(&work, "wheel_18inch.stl"), "wheel")
        .unwrap();
    session.add_template(&touch(&work, "mirror.stl"), "mirror").unwrap();

    let detections = session.detect().unwrap();
    let ids: Vec<&str> = detections.iter().map(|d| d.feature_id.as_str()).collect();
    assert_eq!(ids, ["wheel_0", "mirror_1"]);
    assert_eq!(detections[0].radius, Some(0.3));
    assert_eq!(detections[1].radius, None);
    assert_eq!(detections[1].position(), [1.5, 0.5, 0.25]);

    let dict = work.path().join("snappyHexMeshDict");
    let case = work.path().join("case");
    let sizing = work.path().join("car.sizing.json");
    session.export_refinement_dict(dict.to_str().unwrap()).unwrap();
    session.export_case(case.to_str().unwrap(), true).unwrap();
    session.export_sizing_field(sizing.to_str().unwrap()).unwrap();

    assert!(fs::read_to_string(&dict).unwrap().contains("wheel_0_ref"));
    assert!(case.join("system/snappyHexMeshDict").is_file());
    assert_eq!(
        fs::read_to_string(case.join("constant/MRFProperties")).unwrap(),
        "wheel_0_MRFZone"
    );
    let spheres: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&sizing).unwrap()).unwrap();
    let spheres = spheres.as_array().unwrap();
    assert_eq!(spheres.len(), 2);
    assert!((spheres[0]["size"].as_f64().unwrap() - 0.02).abs() < 1e-12);
}

#[test]
fn sdk_exceptions_become_call_failures() {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return;
    }
    let sdk = TempDir::new().unwrap();
    write_sdk(sdk.path(), MESHER_PY);
    let work = TempDir::new().unwrap();
    let mut session = bridge_session(sdk.path());

    let failure = session.load_target(&touch(&work, "car.igs")).unwrap_err();
    assert_eq!(failure.kind(), FailureKind::Load);
    assert!(
        session.last_error().contains("Unsupported file extension: .igs"),
        "{}",
        session.last_error()
    );

    // The engine keeps serving after a failed call.
    session.load_target(&touch(&work, "car.obj")).unwrap();
    assert_eq!(session.last_error(), "");
}

#[test]
fn missing_sdk_fails_the_handshake() {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return;
    }
    let sdk = TempDir::new().unwrap();
    write_sdk(sdk.path(), "raise ImportError(\"meshmind SDK is not installed\")\n");

    let err = ProcessRuntime::start(&bridge_settings(sdk.path()))
        .err()
        .expect("handshake fails");
    let message = format!("{:#}", err);
    assert!(message.contains("handshake failed"), "{}", message);
    assert!(message.contains("ImportError"), "{}", message);
}
