//! Conversion of raw parameter values to engineering units.
use std::collections::HashMap;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::parameter::{RawParameter, RawValue};
use crate::spacepacket::Apid;
use crate::{Error, Result};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Identity,
    Polynomial,
    PiecewiseLinear,
}

/// A validated calibration curve.
#[derive(Debug, Clone, PartialEq)]
pub enum Calibration {
    /// Coerced raw value, unchanged.
    Identity,
    /// Coefficients from lowest to highest order, i.e., `c0 + c1*x + c2*x^2 + ...`.
    Polynomial(Vec<f64>),
    /// `(raw, engineering)` points with strictly increasing raw values. Values outside
    /// the table are clamped to the first or last engineering value.
    PiecewiseLinear(Vec<(f64, f64)>),
}

impl Calibration {
    /// Evaluate the curve at `x`. NaN evaluates to NaN for every curve.
    #[must_use]
    pub fn eval(&self, x: f64) -> f64 {
        match self {
            Calibration::Identity => x,
            Calibration::Polynomial(coefs) => coefs.iter().rev().fold(0.0, |acc, c| acc * x + c),
            Calibration::PiecewiseLinear(points) => interpolate(points, x),
        }
    }

    #[must_use]
    pub fn method(&self) -> Method {
        match self {
            Calibration::Identity => Method::Identity,
            Calibration::Polynomial(_) => Method::Polynomial,
            Calibration::PiecewiseLinear(_) => Method::PiecewiseLinear,
        }
    }
}

// points must have at least 2 entries, strictly increasing in raw
fn interpolate(points: &[(f64, f64)], x: f64) -> f64 {
    if x.is_nan() {
        return x;
    }
    let (first, last) = (points[0], points[points.len() - 1]);
    if x <= first.0 {
        return first.1;
    }
    if x >= last.0 {
        return last.1;
    }
    // first index with raw > x; always in 1..len given the checks above
    let idx = points.partition_point(|(raw, _)| *raw <= x);
    let (x0, y0) = points[idx - 1];
    let (x1, y1) = points[idx];
    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}

/// Serialized form of a [CalibrationEntry]. Exactly one of `coefficients` or
/// `breakpoints` must be given, matching `method`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CalibrationSpec {
    pub parameter_name: String,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coefficients: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoints: Option<Vec<(f64, f64)>>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Calibration for a single named parameter. Only constructed through validation, see
/// [CalibrationEntry::try_from].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "CalibrationSpec", into = "CalibrationSpec")]
pub struct CalibrationEntry {
    parameter_name: String,
    calibration: Calibration,
    unit: Option<String>,
}

impl CalibrationEntry {
    /// # Errors
    /// See [CalibrationEntry::try_from].
    pub fn polynomial(name: &str, coefficients: Vec<f64>, unit: Option<&str>) -> Result<Self> {
        Self::try_from(CalibrationSpec {
            parameter_name: name.to_string(),
            method: Method::Polynomial,
            coefficients: Some(coefficients),
            breakpoints: None,
            unit: unit.map(str::to_string),
        })
    }

    /// # Errors
    /// See [CalibrationEntry::try_from].
    pub fn piecewise_linear(
        name: &str,
        breakpoints: Vec<(f64, f64)>,
        unit: Option<&str>,
    ) -> Result<Self> {
        Self::try_from(CalibrationSpec {
            parameter_name: name.to_string(),
            method: Method::PiecewiseLinear,
            coefficients: None,
            breakpoints: Some(breakpoints),
            unit: unit.map(str::to_string),
        })
    }

    #[must_use]
    pub fn parameter_name(&self) -> &str {
        &self.parameter_name
    }

    #[must_use]
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    #[must_use]
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }
}

impl TryFrom<CalibrationSpec> for CalibrationEntry {
    type Error = Error;

    /// # Errors
    /// [Error::Config] if the method and the populated coefficients/breakpoints do not
    /// agree, a polynomial has no coefficients, or the breakpoints are fewer than 2 or
    /// not strictly increasing.
    fn try_from(spec: CalibrationSpec) -> Result<Self> {
        let name = spec.parameter_name;
        let fail = |msg: &str| Error::Config(format!("calibration {name}: {msg}"));

        let calibration = match (spec.method, spec.coefficients, spec.breakpoints) {
            (Method::Identity, None, None) => Calibration::Identity,
            (Method::Polynomial, Some(coefs), None) => {
                if coefs.is_empty() {
                    return Err(fail("polynomial requires at least 1 coefficient"));
                }
                if coefs.iter().any(|c| !c.is_finite()) {
                    return Err(fail("coefficients must be finite"));
                }
                Calibration::Polynomial(coefs)
            }
            (Method::PiecewiseLinear, None, Some(points)) => {
                if points.len() < 2 {
                    return Err(fail("piecewise linear requires at least 2 breakpoints"));
                }
                if points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
                    return Err(fail("breakpoints must be finite"));
                }
                if points.windows(2).any(|w| w[0].0 >= w[1].0) {
                    return Err(fail("breakpoint raw values must be strictly increasing"));
                }
                Calibration::PiecewiseLinear(points)
            }
            (method, coefs, points) => {
                return Err(fail(&format!(
                    "{method:?} does not match coefficients={} breakpoints={}",
                    coefs.is_some(),
                    points.is_some()
                )));
            }
        };

        Ok(CalibrationEntry {
            parameter_name: name,
            calibration,
            unit: spec.unit,
        })
    }
}

impl From<CalibrationEntry> for CalibrationSpec {
    fn from(entry: CalibrationEntry) -> Self {
        let method = entry.calibration.method();
        let (coefficients, breakpoints) = match entry.calibration {
            Calibration::Identity => (None, None),
            Calibration::Polynomial(coefs) => (Some(coefs), None),
            Calibration::PiecewiseLinear(points) => (None, Some(points)),
        };
        CalibrationSpec {
            parameter_name: entry.parameter_name,
            method,
            coefficients,
            breakpoints,
            unit: entry.unit,
        }
    }
}

/// Convert `raw` to engineering units using `entry`.
///
/// # Errors
/// [Error::NotNumeric] if `raw` cannot be coerced to a float.
pub fn calibrate(raw: &RawValue, entry: &CalibrationEntry) -> Result<f64> {
    let x = raw
        .as_f64()
        .ok_or_else(|| Error::NotNumeric(entry.parameter_name.clone()))?;
    Ok(entry.calibration.eval(x))
}

/// An engineering value: calibrated values are always floats, uncalibrated values keep
/// their raw type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum EngValue {
    Float(f64),
    UInt(u64),
    Int(i64),
    Bool(bool),
    Text(String),
}

impl From<RawValue> for EngValue {
    fn from(raw: RawValue) -> Self {
        match raw {
            RawValue::UInt(x) => EngValue::UInt(x),
            RawValue::Int(x) => EngValue::Int(x),
            RawValue::Float(x) => EngValue::Float(x),
            RawValue::Bool(x) => EngValue::Bool(x),
            RawValue::String(s) => EngValue::Text(s),
            RawValue::Binary(b) => EngValue::Text(hex::encode(b)),
        }
    }
}

impl Display for EngValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngValue::Float(x) => write!(f, "{x}"),
            EngValue::UInt(x) => write!(f, "{x}"),
            EngValue::Int(x) => write!(f, "{x}"),
            EngValue::Bool(x) => write!(f, "{x}"),
            EngValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// A parameter value in engineering units.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EngineeringParameter {
    pub name: String,
    pub apid: Apid,
    pub sequence_id: u16,
    pub raw: RawValue,
    pub value: EngValue,
    pub unit: Option<String>,
    /// False when there was no calibration for the parameter and `value` is the raw value.
    pub calibrated: bool,
    /// Packet source time, carried over from the raw parameter.
    pub time: Option<DateTime<Utc>>,
}

/// Immutable, validated collection of [CalibrationEntry]s keyed by parameter name.
#[derive(Debug, Clone, Default)]
pub struct CalibrationTable {
    entries: HashMap<String, CalibrationEntry>,
}

impl CalibrationTable {
    /// # Errors
    /// [Error::Config] if more than one entry targets the same parameter.
    pub fn new(entries: Vec<CalibrationEntry>) -> Result<Self> {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if map.contains_key(&entry.parameter_name) {
                return Err(Error::Config(format!(
                    "duplicate calibration for {}",
                    entry.parameter_name
                )));
            }
            map.insert(entry.parameter_name.clone(), entry);
        }
        debug!(calibrations = map.len(), "built calibration table");
        Ok(CalibrationTable { entries: map })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CalibrationEntry> {
        self.entries.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Produce the engineering value for `raw`. Parameters without a calibration are
    /// passed through with their own unit.
    ///
    /// # Errors
    /// [Error::NotNumeric] if a calibration exists but the raw value is not numeric.
    pub fn apply(&self, raw: RawParameter) -> Result<EngineeringParameter> {
        let Some(entry) = self.get(&raw.name) else {
            return Ok(EngineeringParameter {
                value: raw.value.clone().into(),
                name: raw.name,
                apid: raw.apid,
                sequence_id: raw.sequence_id,
                raw: raw.value,
                unit: raw.unit,
                calibrated: false,
                time: raw.time,
            });
        };
        let value = calibrate(&raw.value, entry)?;
        Ok(EngineeringParameter {
            name: raw.name,
            apid: raw.apid,
            sequence_id: raw.sequence_id,
            raw: raw.value,
            value: EngValue::Float(value),
            unit: entry.unit.clone().or(raw.unit),
            calibrated: true,
            time: raw.time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decom::decode_value;
    use crate::parameter::{ByteOrder, Encoding, ParameterDefinition};

    fn assert_close(got: f64, want: f64) {
        assert!((got - want).abs() < 1e-9, "got {got}, want {want}");
    }

    fn raw(name: &str, value: RawValue) -> RawParameter {
        RawParameter {
            name: name.to_string(),
            apid: 1,
            sequence_id: 2,
            value,
            unit: Some("counts".to_string()),
            time: DateTime::<Utc>::from_timestamp(1_700_000_000, 0),
        }
    }

    #[test]
    fn polynomial() {
        let entry = CalibrationEntry::polynomial("t", vec![-55.0, 0.044], Some("degC")).unwrap();
        assert_close(calibrate(&RawValue::UInt(2500), &entry).unwrap(), 55.0);
    }

    #[test]
    fn polynomial_higher_order() {
        let entry = CalibrationEntry::polynomial("t", vec![1.0, 2.0, 3.0], None).unwrap();
        // 1 + 2*2 + 3*4
        assert_close(calibrate(&RawValue::Int(2), &entry).unwrap(), 17.0);
        assert_close(calibrate(&RawValue::Int(-1), &entry).unwrap(), 2.0);
    }

    #[test]
    fn piecewise_linear_midpoint() {
        let entry =
            CalibrationEntry::piecewise_linear("t", vec![(0.0, -40.0), (4095.0, 125.0)], None)
                .unwrap();
        let got = calibrate(&RawValue::UInt(2047), &entry).unwrap();
        assert!((got - 42.45).abs() < 0.05, "got {got}");
        assert_close(got, -40.0 + 2047.0 * 165.0 / 4095.0);
    }

    #[test]
    fn piecewise_linear_clamps() {
        let entry =
            CalibrationEntry::piecewise_linear("t", vec![(0.0, -40.0), (4095.0, 125.0)], None)
                .unwrap();
        assert_close(calibrate(&RawValue::UInt(5000), &entry).unwrap(), 125.0);
        assert_close(calibrate(&RawValue::Int(-5), &entry).unwrap(), -40.0);
        assert_close(calibrate(&RawValue::UInt(4095), &entry).unwrap(), 125.0);
    }

    #[test]
    fn piecewise_linear_segments() {
        let points = vec![(0.0, 0.0), (10.0, 100.0), (20.0, 50.0)];
        let entry = CalibrationEntry::piecewise_linear("t", points, None).unwrap();
        assert_close(calibrate(&RawValue::UInt(5), &entry).unwrap(), 50.0);
        assert_close(calibrate(&RawValue::UInt(10), &entry).unwrap(), 100.0);
        assert_close(calibrate(&RawValue::UInt(15), &entry).unwrap(), 75.0);
    }

    #[test]
    fn invalid_breakpoints() {
        let zult = CalibrationEntry::piecewise_linear("t", vec![(0.0, 1.0)], None);
        assert!(matches!(zult, Err(Error::Config(_))));

        let zult =
            CalibrationEntry::piecewise_linear("t", vec![(0.0, 1.0), (0.0, 2.0)], None);
        assert!(matches!(zult, Err(Error::Config(_))));

        let zult = CalibrationEntry::piecewise_linear(
            "t",
            vec![(0.0, 1.0), (5.0, 2.0), (3.0, 4.0)],
            None,
        );
        assert!(matches!(zult, Err(Error::Config(_))));
    }

    #[test]
    fn method_mismatch() {
        let zult = CalibrationEntry::try_from(CalibrationSpec {
            parameter_name: "t".to_string(),
            method: Method::Polynomial,
            coefficients: None,
            breakpoints: Some(vec![(0.0, 0.0), (1.0, 1.0)]),
            unit: None,
        });
        assert!(matches!(zult, Err(Error::Config(_))));

        let zult = CalibrationEntry::polynomial("t", vec![], None);
        assert!(matches!(zult, Err(Error::Config(_))));
    }

    #[test]
    fn not_numeric() {
        let entry = CalibrationEntry::polynomial("t", vec![0.0, 1.0], None).unwrap();
        let zult = calibrate(&RawValue::Binary(vec![1, 2]), &entry);
        assert!(matches!(zult, Err(Error::NotNumeric(name)) if name == "t"));
    }

    #[test]
    fn table_apply() {
        let table = CalibrationTable::new(vec![CalibrationEntry::polynomial(
            "temp",
            vec![-55.0, 0.044],
            Some("degC"),
        )
        .unwrap()])
        .unwrap();

        let eng = table.apply(raw("temp", RawValue::UInt(2500))).unwrap();
        assert!(eng.calibrated);
        assert_eq!(eng.unit.as_deref(), Some("degC"));
        assert_eq!(eng.raw, RawValue::UInt(2500));
        assert_eq!(eng.time, DateTime::<Utc>::from_timestamp(1_700_000_000, 0));
        match eng.value {
            EngValue::Float(x) => assert_close(x, 55.0),
            other => panic!("expected float, got {other:?}"),
        }

        let eng = table
            .apply(raw("blob", RawValue::Binary(vec![0xca, 0xfe])))
            .unwrap();
        assert!(!eng.calibrated);
        assert_eq!(eng.value, EngValue::Text("cafe".to_string()));
        assert_eq!(eng.unit.as_deref(), Some("counts"));
        assert_eq!(eng.time, DateTime::<Utc>::from_timestamp(1_700_000_000, 0));
    }

    #[test]
    fn nan_float_calibrates_to_nan() {
        let def = ParameterDefinition {
            name: "volts".to_string(),
            apid: 1,
            bit_offset: 0,
            bit_length: 32,
            encoding: Encoding::Float32,
            byte_order: ByteOrder::Big,
            unit: None,
            description: None,
        };
        let value = decode_value(&def, &[0x7f, 0xc0, 0x00, 0x00]).unwrap();
        assert!(matches!(value, RawValue::Float(x) if x.is_nan()));

        let table = CalibrationTable::new(vec![
            CalibrationEntry::piecewise_linear("volts", vec![(0.0, 0.0), (10.0, 1.0)], None)
                .unwrap(),
            CalibrationEntry::piecewise_linear("text", vec![(0.0, 0.0), (10.0, 1.0)], None)
                .unwrap(),
        ])
        .unwrap();

        let eng = table.apply(raw("volts", value)).unwrap();
        assert!(eng.calibrated);
        assert!(matches!(eng.value, EngValue::Float(x) if x.is_nan()));

        let eng = table
            .apply(raw("text", RawValue::String("NaN".to_string())))
            .unwrap();
        assert!(matches!(eng.value, EngValue::Float(x) if x.is_nan()));
    }

    #[test]
    fn table_rejects_duplicates() {
        let entry = CalibrationEntry::polynomial("t", vec![1.0], None).unwrap();
        let zult = CalibrationTable::new(vec![entry.clone(), entry]);
        assert!(matches!(zult, Err(Error::Config(_))));
    }

    #[test]
    fn deserialize_validates() {
        let entry: CalibrationEntry = serde_json::from_str(
            r#"{"parameter_name": "t", "method": "piecewise_linear", "breakpoints": [[0, 0], [10, 1]], "unit": "V"}"#,
        )
        .unwrap();
        assert_eq!(entry.unit(), Some("V"));
        assert_eq!(entry.calibration().method(), Method::PiecewiseLinear);

        let zult: std::result::Result<CalibrationEntry, _> = serde_json::from_str(
            r#"{"parameter_name": "t", "method": "piecewise_linear", "breakpoints": [[10, 0], [0, 1]]}"#,
        );
        assert!(zult.is_err());
    }
}
