use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::SchemaMismatch;

/// One feature match reported by an engine.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineDetection {
    pub feature_id: String,
    /// Homogeneous pose, row-major.
    pub transform: [[f64; 4]; 4],
    /// Detection confidence in `[0, 1]`.
    pub confidence: f64,
    /// Feature radius when the engine knows it.
    pub radius: Option<f64>,
}

impl EngineDetection {
    /// Translation column of the transform.
    pub fn position(&self) -> [f64; 3] {
        [
            self.transform[0][3],
            self.transform[1][3],
            self.transform[2][3],
        ]
    }

    /// Feature type, i.e. the identifier up to the first underscore
    /// (`"wheel_0"` is a `"wheel"`).
    pub fn feature_type(&self) -> &str {
        self.feature_id
            .split_once('_')
            .map(|(kind, _)| kind)
            .unwrap_or(&self.feature_id)
    }

    /// Check the invariants every record must satisfy, whatever engine produced it.
    pub fn validate(&self) -> Result<(), SchemaMismatch> {
        if self.feature_id.is_empty() {
            return Err(SchemaMismatch::new("feature_id", "is empty"));
        }
        if self.transform.iter().flatten().any(|v| !v.is_finite()) {
            return Err(SchemaMismatch::new("transform", "contains non-finite values"));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(SchemaMismatch::new(
                "confidence",
                format!("must be within [0, 1], got {}", self.confidence),
            ));
        }
        if let Some(radius) = self.radius {
            if !radius.is_finite() || radius < 0.0 {
                return Err(SchemaMismatch::new(
                    "region_metadata.radius",
                    format!("must be a non-negative number, got {}", radius),
                ));
            }
        }
        Ok(())
    }

    /// Decode one detection object from the engine wire format.
    ///
    /// Expected shape:
    /// `{"feature_id": str, "transform": [[f64; 4]; 4], "confidence": f64,
    ///   "region_metadata": {"radius": f64}?}`.
    pub fn from_wire(value: &Value) -> Result<Self, SchemaMismatch> {
        let object = value
            .as_object()
            .ok_or_else(|| SchemaMismatch::new("detection", "is not an object"))?;

        let feature_id = required(object, "feature_id")?
            .as_str()
            .ok_or_else(|| SchemaMismatch::new("feature_id", "is not a string"))?
            .to_string();
        let transform = decode_transform(required(object, "transform")?)?;
        let confidence = required(object, "confidence")?
            .as_f64()
            .ok_or_else(|| SchemaMismatch::new("confidence", "is not a number"))?;
        let radius = match object.get("region_metadata") {
            None | Some(Value::Null) => None,
            Some(Value::Object(metadata)) => match metadata.get("radius") {
                None | Some(Value::Null) => None,
                Some(radius) => Some(radius.as_f64().ok_or_else(|| {
                    SchemaMismatch::new("region_metadata.radius", "is not a number")
                })?),
            },
            Some(_) => {
                return Err(SchemaMismatch::new("region_metadata", "is not an object"));
            }
        };

        let detection = Self {
            feature_id,
            transform,
            confidence,
            radius,
        };
        detection.validate()?;
        Ok(detection)
    }
}

fn required<'a>(object: &'a Map<String, Value>, field: &str) -> Result<&'a Value, SchemaMismatch> {
    object
        .get(field)
        .ok_or_else(|| SchemaMismatch::new(field, "is missing"))
}

fn decode_transform(value: &Value) -> Result<[[f64; 4]; 4], SchemaMismatch> {
    let rows = value
        .as_array()
        .filter(|rows| rows.len() == 4)
        .ok_or_else(|| SchemaMismatch::new("transform", "must be an array of 4 rows"))?;
    let mut transform = [[0.0; 4]; 4];
    for (r, row) in rows.iter().enumerate() {
        let cols = row
            .as_array()
            .filter(|cols| cols.len() == 4)
            .ok_or_else(|| {
                SchemaMismatch::new(format!("transform[{}]", r), "must hold 4 numbers")
            })?;
        for (c, cell) in cols.iter().enumerate() {
            transform[r][c] = cell.as_f64().ok_or_else(|| {
                SchemaMismatch::new(format!("transform[{}][{}]", r, c), "is not a number")
            })?;
        }
    }
    Ok(transform)
}

/// Identity pose translated to `position`.
pub fn translation(position: [f64; 3]) -> [[f64; 4]; 4] {
    [
        [1.0, 0.0, 0.0, position[0]],
        [0.0, 1.0, 0.0, position[1]],
        [0.0, 0.0, 1.0, position[2]],
        [0.0, 0.0, 0.0, 1.0],
    ]
}
