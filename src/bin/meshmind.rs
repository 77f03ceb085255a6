//! meshmind - run feature detection and refinement exports from the shell
//!
//! Drives the same session the C ABI uses, so it doubles as a smoke test for
//! an engine setup:
//!
//! ```text
//! meshmind --target car.stl --template wheel=wheel_18inch.stl \
//!     --case ./openfoam_case --rotating-zones --sizing car.sizing.json
//! ```

use anyhow::{Context, Result};
use clap::Parser;

use meshmind::{EngineConfig, EngineRegistry, Session};

#[derive(Parser, Debug)]
#[command(
    name = "meshmind",
    version,
    about = "Detect template features in a target mesh and export refinement setups"
)]
struct Args {
    /// Target geometry (STL/OBJ)
    #[arg(long, value_name = "PATH")]
    target: String,

    /// Template to search for, as ID=PATH (repeatable)
    #[arg(long = "template", value_name = "ID=PATH", value_parser = parse_template)]
    templates: Vec<(String, String)>,

    /// Maximum number of detections to print
    #[arg(long, default_value_t = 100)]
    max_results: usize,

    /// Write a snappyHexMeshDict refinement dictionary here
    #[arg(long, value_name = "PATH")]
    dict: Option<String>,

    /// Write an OpenFOAM case into this directory
    #[arg(long, value_name = "DIR")]
    case: Option<String>,

    /// Include MRF rotating zones in the case export
    #[arg(long, requires = "case")]
    rotating_zones: bool,

    /// Write an fTetWild sizing field here
    #[arg(long, value_name = "PATH")]
    sizing: Option<String>,

    /// Engine to use (overrides MESHMIND_ENGINE and the config file)
    #[arg(long, value_name = "NAME")]
    engine: Option<String>,
}

fn parse_template(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((id, path)) if !id.is_empty() && !path.is_empty() => {
            Ok((id.to_string(), path.to_string()))
        }
        _ => Err(format!("expected ID=PATH, got `{}`", raw)),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("MESHMIND_LOG", "info")).init();

    let args = Args::parse();
    let cfg = match args.engine.as_deref() {
        Some(engine) => EngineConfig::load_with_engine(engine),
        None => EngineConfig::load(),
    }
    .context("loading engine configuration")?;
    let mut session = Session::open_with(&EngineRegistry::builtin(), &cfg)?;
    log::info!("using engine `{}`", session.engine_name());

    session.load_target(&args.target)?;
    for (id, path) in &args.templates {
        session.add_template(path, id)?;
    }

    let detections = session.detect()?;
    println!("Detected {} feature(s)", detections.len());
    for detection in detections.iter().take(args.max_results) {
        let [x, y, z] = detection.position();
        print!(
            "  {}: position ({:.3}, {:.3}, {:.3}) confidence {:.2}",
            detection.feature_id, x, y, z, detection.confidence
        );
        match detection.radius {
            Some(radius) if radius > 0.0 => println!(" radius {:.3}", radius),
            _ => println!(),
        }
    }

    if let Some(path) = &args.dict {
        session.export_refinement_dict(path)?;
        println!("Wrote refinement dictionary to {}", path);
    }
    if let Some(dir) = &args.case {
        session.export_case(dir, args.rotating_zones)?;
        println!("Wrote OpenFOAM case to {}", dir);
    }
    if let Some(path) = &args.sizing {
        session.export_sizing_field(path)?;
        println!("Wrote sizing field to {}", path);
    }
    Ok(())
}
