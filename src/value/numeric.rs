//! Numeric narrowing rules
//!
//! Conversions never wrap or saturate: a value that does not fit the target fails with
//! [`BridgeError::Conversion`].

use crate::core::error::{BridgeError, BridgeResult};

use super::Var;

/// Largest integer magnitude a double represents exactly.
pub(crate) const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

pub fn u64_to_i64(value: u64) -> BridgeResult<i64> {
    i64::try_from(value)
        .map_err(|_| BridgeError::Conversion(format!("{value} does not fit in a signed 64-bit integer")))
}

pub fn i64_to_u64(value: i64) -> BridgeResult<u64> {
    u64::try_from(value)
        .map_err(|_| BridgeError::Conversion(format!("{value} is negative and cannot be unsigned")))
}

/// Convert an integral float to `i64`. Fractional, non-finite and out-of-range values fail.
pub fn f64_to_i64(value: f64) -> BridgeResult<i64> {
    // 2^63 is exactly representable; anything >= it overflows.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if value.is_finite() && value.fract() == 0.0 && value >= -LIMIT && value < LIMIT {
        Ok(value as i64)
    } else {
        Err(BridgeError::Conversion(format!(
            "{value} is not an integer in the signed 64-bit range"
        )))
    }
}

/// Convert an integer to a double only when no precision is lost.
pub(crate) fn i64_to_f64_exact(value: i64) -> BridgeResult<f64> {
    if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&value) {
        Ok(value as f64)
    } else {
        Err(BridgeError::Conversion(format!(
            "{value} cannot be represented exactly as a double"
        )))
    }
}

pub(crate) fn u64_to_f64_exact(value: u64) -> BridgeResult<f64> {
    if value <= MAX_SAFE_INTEGER as u64 {
        Ok(value as f64)
    } else {
        Err(BridgeError::Conversion(format!(
            "{value} cannot be represented exactly as a double"
        )))
    }
}

/// Value comparison across `Int64`, `UInt64` and `Float64`.
pub(crate) fn numbers_equal(a: &Var, b: &Var) -> bool {
    match (a, b) {
        (Var::Int64(x), Var::Int64(y)) => x == y,
        (Var::UInt64(x), Var::UInt64(y)) => x == y,
        (Var::Float64(x), Var::Float64(y)) => x == y,
        (Var::Int64(i), Var::UInt64(u)) | (Var::UInt64(u), Var::Int64(i)) => {
            u64::try_from(*i).is_ok_and(|i| i == *u)
        }
        (Var::Int64(i), Var::Float64(f)) | (Var::Float64(f), Var::Int64(i)) => {
            f64_to_i64(*f).is_ok_and(|f| f == *i)
        }
        (Var::UInt64(u), Var::Float64(f)) | (Var::Float64(f), Var::UInt64(u)) => {
            f64_to_i64(*f)
                .and_then(i64_to_u64)
                .is_ok_and(|f| f == *u)
        }
        _ => false,
    }
}

impl Var {
    /// Read any numeric tag as `i64`, failing when the value does not fit.
    pub fn to_i64(&self) -> BridgeResult<i64> {
        match self {
            Var::Int64(v) => Ok(*v),
            Var::UInt64(v) => u64_to_i64(*v),
            Var::Float64(v) => f64_to_i64(*v),
            other => Err(BridgeError::TypeMismatch {
                expected: super::VarType::Int64,
                found: other.tag(),
            }),
        }
    }

    pub fn to_u64(&self) -> BridgeResult<u64> {
        match self {
            Var::UInt64(v) => Ok(*v),
            Var::Int64(v) => i64_to_u64(*v),
            Var::Float64(v) => f64_to_i64(*v).and_then(i64_to_u64),
            other => Err(BridgeError::TypeMismatch {
                expected: super::VarType::UInt64,
                found: other.tag(),
            }),
        }
    }

    /// Read any numeric tag as `f64`. Integers beyond 2^53 fail instead of rounding.
    pub fn to_f64(&self) -> BridgeResult<f64> {
        match self {
            Var::Float64(v) => Ok(*v),
            Var::Int64(v) => i64_to_f64_exact(*v),
            Var::UInt64(v) => u64_to_f64_exact(*v),
            other => Err(BridgeError::TypeMismatch {
                expected: super::VarType::Float64,
                found: other.tag(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_unsigned_overflow_fails() {
        assert!(matches!(
            u64_to_i64(u64::MAX),
            Err(BridgeError::Conversion(_))
        ));
        assert_eq!(u64_to_i64(i64::MAX as u64), Ok(i64::MAX));
        assert!(i64_to_u64(-1).is_err());
    }

    #[test]
    fn test_float_to_int_rules() {
        assert_eq!(f64_to_i64(42.0), Ok(42));
        assert_eq!(f64_to_i64(-9_223_372_036_854_775_808.0), Ok(i64::MIN));
        assert!(f64_to_i64(9_223_372_036_854_775_808.0).is_err());
        assert!(f64_to_i64(1.5).is_err());
        assert!(f64_to_i64(f64::NAN).is_err());
        assert!(f64_to_i64(f64::INFINITY).is_err());
    }

    #[test]
    fn test_var_numeric_coercions() {
        assert_eq!(Var::new_f64(8.0).to_u64(), Ok(8));
        assert_eq!(Var::new_i64(MAX_SAFE_INTEGER).to_f64(), Ok(MAX_SAFE_INTEGER as f64));
        assert!(Var::new_i64(MAX_SAFE_INTEGER + 1).to_f64().is_err());
        assert!(Var::new_string("1").to_i64().is_err());
    }

    proptest! {
        #[test]
        fn prop_u64_to_i64_never_wraps(value in any::<u64>()) {
            match u64_to_i64(value) {
                Ok(signed) => prop_assert_eq!(signed as u64, value),
                Err(_) => prop_assert!(value > i64::MAX as u64),
            }
        }

        #[test]
        fn prop_safe_integers_survive_doubles(value in -MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER) {
            let as_double = i64_to_f64_exact(value).unwrap();
            prop_assert_eq!(f64_to_i64(as_double), Ok(value));
        }
    }
}
