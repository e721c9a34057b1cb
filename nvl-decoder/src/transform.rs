//! Per-variable scaling and rounding

use crate::definitions::VariableSpec;
use crate::types::{RawValue, Value};

/// Apply `spec.scale` and round to `spec.precision` decimal places.
///
/// Booleans pass through. Integers with a scale of exactly 1.0 stay integers;
/// every other numeric value becomes a rounded float. Scale and precision are
/// validated when the registry is loaded, so this never fails.
pub fn transform(raw: RawValue, spec: &VariableSpec) -> Value {
    match raw {
        RawValue::Bool(v) => Value::Boolean(v),
        RawValue::Int(v) if spec.scale == 1.0 => Value::Integer(v),
        RawValue::Int(v) => Value::Float(round_to(v as f64 * spec.scale, spec.precision)),
        RawValue::Float(v) => Value::Float(round_to(v * spec.scale, spec.precision)),
    }
}

/// Above this magnitude an f64 has no fractional bits left to round
const EXACT_INTEGER_LIMIT: f64 = 4_503_599_627_370_496.0; // 2^52

/// Round half away from zero at `precision` decimal places
fn round_to(value: f64, precision: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(precision as i32);
    let shifted = value * factor;
    if !shifted.is_finite() || shifted.abs() >= EXACT_INTEGER_LIMIT {
        return value;
    }
    let rounded = shifted.round() / factor;
    // Normalize -0.0 so that equal readings compare equal bitwise
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::PrimitiveType;

    fn spec(kind: PrimitiveType, scale: f64, precision: u32) -> VariableSpec {
        VariableSpec {
            name: "v".to_string(),
            kind,
            byte_order: None,
            scale,
            precision,
            unit: None,
            class: None,
            topic: None,
            retain: false,
        }
    }

    #[test]
    fn test_bool_passthrough() {
        let s = spec(PrimitiveType::Bool, 10.0, 3);
        assert_eq!(transform(RawValue::Bool(true), &s), Value::Boolean(true));
    }

    #[test]
    fn test_integer_unscaled_stays_integer() {
        let s = spec(PrimitiveType::I16, 1.0, 0);
        assert_eq!(transform(RawValue::Int(-12), &s), Value::Integer(-12));
    }

    #[test]
    fn test_integer_scaled() {
        let s = spec(PrimitiveType::I16, 0.1, 1);
        assert_eq!(transform(RawValue::Int(215), &s), Value::Float(21.5));
        let s = spec(PrimitiveType::U16, 0.01, 0);
        assert_eq!(transform(RawValue::Int(1250), &s), Value::Float(13.0));
    }

    #[test]
    fn test_float_rounding() {
        let s = spec(PrimitiveType::F32, 1.0, 2);
        assert_eq!(transform(RawValue::Float(3.14159), &s), Value::Float(3.14));
        assert_eq!(transform(RawValue::Float(2.675_000_1), &s), Value::Float(2.68));
        assert_eq!(transform(RawValue::Float(-0.001), &s), Value::Float(0.0));
        let s = spec(PrimitiveType::F64, 2.0, 0);
        assert_eq!(transform(RawValue::Float(1.25), &s), Value::Float(3.0));
    }

    #[test]
    fn test_large_values_stay_finite() {
        let s = spec(PrimitiveType::F64, 1.0, 2);
        assert_eq!(transform(RawValue::Float(1.0e307), &s), Value::Float(1.0e307));
        assert_eq!(transform(RawValue::Float(-1.0e307), &s), Value::Float(-1.0e307));

        let s = spec(PrimitiveType::F64, 1.0, 15);
        assert_eq!(transform(RawValue::Float(f64::MAX), &s), Value::Float(f64::MAX));
        assert_eq!(transform(RawValue::Float(1.0e6), &s), Value::Float(1.0e6));

        let s = spec(PrimitiveType::U32, 1.0e290, 2);
        assert_eq!(
            transform(RawValue::Int(4_000_000_000), &s),
            Value::Float(4_000_000_000.0 * 1.0e290)
        );
    }

    #[test]
    fn test_non_finite_passes() {
        let s = spec(PrimitiveType::F32, 1.0, 2);
        match transform(RawValue::Float(f64::INFINITY), &s) {
            Value::Float(v) => assert!(v.is_infinite()),
            other => panic!("unexpected {:?}", other),
        }
    }
}
