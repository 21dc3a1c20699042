//! Conversion between the ledger's `f64` domain and typed output cells.
use crate::cell::CellValue;

/// Numeric type a ledger can publish.
///
/// Integers round half away from zero and clamp to their range; NaN maps to
/// zero. `f32` clamps to its finite range.
pub trait LedgerNumeric: CellValue + Copy {
    fn from_ledger(value: f64) -> Self;

    fn to_ledger(self) -> f64;
}

macro_rules! impl_integer_numeric {
    ($($ty:ty),*) => {
        $(
            impl LedgerNumeric for $ty {
                fn from_ledger(value: f64) -> Self {
                    if value.is_nan() {
                        return 0;
                    }
                    // `as` saturates at the bounds.
                    value.round() as $ty
                }

                fn to_ledger(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_integer_numeric!(i32, i64);

impl LedgerNumeric for f32 {
    fn from_ledger(value: f64) -> Self {
        if value.is_nan() {
            return f32::NAN;
        }
        value.clamp(f64::from(f32::MIN), f64::from(f32::MAX)) as f32
    }

    fn to_ledger(self) -> f64 {
        f64::from(self)
    }
}

impl LedgerNumeric for f64 {
    fn from_ledger(value: f64) -> Self {
        value
    }

    fn to_ledger(self) -> f64 {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(i32::from_ledger(2.5), 3);
        assert_eq!(i32::from_ledger(-2.5), -3);
        assert_eq!(i32::from_ledger(2.4999), 2);
        assert_eq!(i64::from_ledger(-0.5), -1);
    }

    #[test]
    fn clamps_to_target_range() {
        assert_eq!(i32::from_ledger(1e12), i32::MAX);
        assert_eq!(i32::from_ledger(-1e12), i32::MIN);
        assert_eq!(i64::from_ledger(f64::INFINITY), i64::MAX);
        assert_eq!(f32::from_ledger(1e300), f32::MAX);
        assert_eq!(i32::from_ledger(f64::NAN), 0);
    }

    #[test]
    fn floats_pass_through() {
        assert_eq!(f64::from_ledger(1.23456), 1.23456);
        assert_eq!(7_i32.to_ledger(), 7.0);
    }
}
