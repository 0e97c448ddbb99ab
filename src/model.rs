//! Persisted model parameters.
//!
//! A model file is a flat JSON object with fourteen keys. Saving always writes
//! every key, sorted, with four-space indentation.

use std::{collections::BTreeMap, path::Path};

use serde_derive::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;

use crate::{
    datatypes::{Axis, BoundaryTag, ElementType, LoadSpec, Material},
    error::{Constraint, SlotPlateError, ValidationReport},
    geometry::GeometryParameters,
};

pub const MODEL_VERSION: i64 = 1;

const ELEMENT_TYPE_CODES: &[i64] = &[2, 3];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputData {
    pub version: i64,
    pub h: f64,
    pub w: f64,
    pub a: f64,
    pub b: f64,
    pub el_size_factor: f64,
    #[serde(rename = "E")]
    pub youngs_modulus: f64,
    #[serde(rename = "v")]
    pub poisson_ratio: f64,
    /// Total edge load. Positive values pull the plate away from the wall.
    pub q: f64,
    #[serde(rename = "t")]
    pub thickness: f64,
    pub bend: f64,
    pub qend: f64,
    #[serde(rename = "paramSteps")]
    pub param_steps: i64,
    pub el_type: i64,
}

impl Default for InputData {
    fn default() -> Self {
        InputData {
            version: MODEL_VERSION,
            h: 0.1,
            w: 0.3,
            a: 0.05,
            b: 0.025,
            el_size_factor: 0.5,
            youngs_modulus: 2.08e10,
            poisson_ratio: 0.2,
            q: 100e3,
            thickness: 0.15,
            bend: 0.0001,
            qend: -100e3,
            param_steps: 10,
            el_type: 2,
        }
    }
}

impl InputData {
    pub fn geometry_parameters(&self) -> GeometryParameters {
        GeometryParameters {
            h: self.h,
            w: self.w,
            a: self.a,
            b: self.b,
        }
    }

    pub fn material(&self) -> Material {
        Material {
            youngs_modulus: self.youngs_modulus,
            poisson_ratio: self.poisson_ratio,
            thickness: self.thickness,
        }
    }

    /// Edge load along x on the load edge
    pub fn load_spec(&self) -> LoadSpec {
        LoadSpec {
            total_force: self.q,
            target: BoundaryTag::Load,
            axis: Axis::X,
        }
    }

    pub fn element_type(&self) -> Result<ElementType, SlotPlateError> {
        ElementType::try_from(self.el_type)
    }

    /// Checks every parameter rule and collects all violations
    pub fn validate(&self) -> Result<(), SlotPlateError> {
        let report = self.validation_report();
        if report.is_empty() {
            Ok(())
        } else {
            Err(SlotPlateError::Validation(report))
        }
    }

    pub fn validation_report(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        let floats = [
            ("h", self.h),
            ("w", self.w),
            ("a", self.a),
            ("b", self.b),
            ("el_size_factor", self.el_size_factor),
            ("E", self.youngs_modulus),
            ("v", self.poisson_ratio),
            ("q", self.q),
            ("t", self.thickness),
            ("bend", self.bend),
            ("qend", self.qend),
        ];
        for (field, value) in floats {
            if !value.is_finite() {
                report.push(field, value, Constraint::Finite);
            }
        }

        let positives = [
            ("h", self.h),
            ("w", self.w),
            ("a", self.a),
            ("b", self.b),
            ("E", self.youngs_modulus),
            ("t", self.thickness),
            ("bend", self.bend),
        ];
        for (field, value) in positives {
            if value.is_finite() && value <= 0.0 {
                report.push(field, value, Constraint::Positive);
            }
        }

        if self.el_size_factor.is_finite()
            && !(self.el_size_factor > 0.0 && self.el_size_factor <= 1.0)
        {
            report.push(
                "el_size_factor",
                self.el_size_factor,
                Constraint::HalfOpenRange {
                    low: 0.0,
                    high: 1.0,
                },
            );
        }

        if self.poisson_ratio.is_finite()
            && !(self.poisson_ratio > -1.0 && self.poisson_ratio < 0.5)
        {
            report.push(
                "v",
                self.poisson_ratio,
                Constraint::OpenRange {
                    low: -1.0,
                    high: 0.5,
                },
            );
        }

        let half_height = self.h / 2.0;
        for (field, value) in [("b", self.b), ("bend", self.bend)] {
            if value.is_finite() && half_height.is_finite() && value >= half_height {
                report.push(
                    field,
                    value,
                    Constraint::LessThan {
                        bound: "h/2",
                        limit: half_height,
                    },
                );
            }
        }

        if self.a.is_finite() && self.w.is_finite() && self.a >= self.w {
            report.push(
                "a",
                self.a,
                Constraint::LessThan {
                    bound: "w",
                    limit: self.w,
                },
            );
        }

        if self.param_steps < 2 {
            report.push("paramSteps", self.param_steps as f64, Constraint::AtLeast(2));
        }

        if !ELEMENT_TYPE_CODES.contains(&self.el_type) {
            report.push(
                "el_type",
                self.el_type as f64,
                Constraint::OneOf(ELEMENT_TYPE_CODES),
            );
        }

        report
    }

    /// Serializes the model with sorted keys and four-space indentation
    pub fn to_json(&self) -> Result<String, SlotPlateError> {
        let value: BTreeMap<String, serde_json::Value> =
            match serde_json::to_value(self).and_then(serde_json::from_value) {
                Ok(v) => v,
                Err(err) => {
                    return Err(SlotPlateError::Model(format!(
                        "Unable to serialize model: {err}"
                    )))
                }
            };

        let mut buffer: Vec<u8> = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        if let Err(err) = serde::Serialize::serialize(&value, &mut serializer) {
            return Err(SlotPlateError::Model(format!(
                "Unable to serialize model: {err}"
            )));
        }

        match String::from_utf8(buffer) {
            Ok(s) => Ok(s),
            Err(err) => Err(SlotPlateError::Model(format!(
                "Serialized model is not UTF-8: {err}"
            ))),
        }
    }

    /// Parses a model. Every documented key must be present.
    pub fn from_json(contents: &str) -> Result<InputData, SlotPlateError> {
        match serde_json::from_str(contents) {
            Ok(input) => Ok(input),
            Err(err) => Err(SlotPlateError::Model(format!(
                "Error in model json: {err}"
            ))),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SlotPlateError> {
        let contents = self.to_json()?;
        if let Err(err) = std::fs::write(path, contents) {
            return Err(SlotPlateError::Model(format!(
                "Unable to write model file {}: {err}",
                path.display()
            )));
        }

        println!("info: saved model to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<InputData, SlotPlateError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(err) => {
                return Err(SlotPlateError::Model(format!(
                    "Unable to open model file {}: {err}",
                    path.display()
                )))
            }
        };

        InputData::from_json(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(InputData::default().validate().is_ok());
    }

    #[test]
    fn slot_depth_just_under_half_height_passes() {
        let input = InputData {
            h: 0.1,
            b: 0.0499999,
            ..InputData::default()
        };
        assert!(input.validate().is_ok());
    }

    #[test]
    fn slot_depth_at_half_height_fails() {
        let input = InputData {
            h: 0.1,
            b: 0.05,
            ..InputData::default()
        };

        match input.validate() {
            Err(SlotPlateError::Validation(report)) => {
                assert_eq!(report.issues.len(), 1);
                assert_eq!(report.issues[0].field, "b");
                assert_eq!(report.issues[0].value, 0.05);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn collects_every_violation() {
        let input = InputData {
            w: -0.3,
            poisson_ratio: 0.5,
            thickness: 0.0,
            bend: 0.2,
            el_type: 4,
            param_steps: 1,
            ..InputData::default()
        };

        let report = input.validation_report();
        for field in ["w", "v", "t", "bend", "el_type", "paramSteps"] {
            assert!(report.mentions(field), "missing issue for {field}");
        }
        assert!(!report.mentions("h"));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let input = InputData {
            q: f64::NAN,
            ..InputData::default()
        };
        let report = input.validation_report();
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].constraint, Constraint::Finite);
    }

    #[test]
    fn json_keys_are_sorted_and_indented() {
        let json = InputData::default().to_json().unwrap();
        let keys: Vec<&str> = json
            .lines()
            .filter_map(|l| l.trim().strip_prefix('"'))
            .filter_map(|l| l.split('"').next())
            .collect();

        assert_eq!(
            keys,
            vec![
                "E",
                "a",
                "b",
                "bend",
                "el_size_factor",
                "el_type",
                "h",
                "paramSteps",
                "q",
                "qend",
                "t",
                "v",
                "version",
                "w"
            ]
        );
        assert!(json.contains("\n    \"E\": "));
    }

    #[test]
    fn missing_key_is_fatal() {
        let json = InputData::default().to_json().unwrap();
        let without_h: String = json
            .lines()
            .filter(|l| !l.trim_start().starts_with("\"h\""))
            .collect::<Vec<&str>>()
            .join("\n");

        match InputData::from_json(&without_h) {
            Err(SlotPlateError::Model(msg)) => assert!(msg.contains("`h`"), "{msg}"),
            other => panic!("expected model error, got {other:?}"),
        }
    }

    #[test]
    fn integer_lengths_are_accepted() {
        let mut value = serde_json::to_value(InputData::default()).unwrap();
        value["w"] = serde_json::json!(1);
        let input = InputData::from_json(&value.to_string()).unwrap();
        assert_eq!(input.w, 1.0);
    }
}
