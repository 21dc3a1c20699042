//! The fixed-order ledger formula.
use core::fmt;

use super::modifier::{Modifier, ModifierKind};

/// Every partial term of one ledger evaluation.
///
/// ```text
/// origin_sum = base + ΣOriginAdd
/// result     = origin_sum * (1 + ΣAddMultiplier) * ΠMultiplier + ΣFinalAdd
/// ```
///
/// The order is fixed. Within a kind the combinator (sum or product) is
/// commutative, so insertion order never changes the result.
///
/// # Example
/// ```
/// # use reactive_core::stats::{Calculation, Modifier, ModifierKind};
/// let modifier = |kind, value| Modifier { key: "k".into(), kind, value, order: 0, stack: None };
/// let calc = Calculation::from_modifiers(
///     100.0,
///     &[
///         modifier(ModifierKind::OriginAdd, 20.0),
///         modifier(ModifierKind::AddMultiplier, 0.5),
///         modifier(ModifierKind::Multiplier, 2.0),
///         modifier(ModifierKind::FinalAdd, -10.0),
///     ],
/// );
/// assert_eq!(calc.result, 350.0);
/// assert_eq!(calc.to_string(), "((100 + 20) * 1.5 * 2) + -10 = 350");
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Calculation {
    pub base: f64,
    /// ΣOriginAdd
    pub origin_add: f64,
    /// base + ΣOriginAdd
    pub origin_sum: f64,
    /// 1 + ΣAddMultiplier
    pub add_multiplier: f64,
    /// ΠMultiplier, 1 when empty
    pub multiplier: f64,
    /// ΣFinalAdd
    pub final_add: f64,
    pub result: f64,
}

impl Calculation {
    pub fn from_modifiers<'a>(
        base: f64,
        modifiers: impl IntoIterator<Item = &'a Modifier>,
    ) -> Self {
        let mut origin_add = ModifierKind::OriginAdd.identity();
        let mut add_sum = ModifierKind::AddMultiplier.identity();
        let mut multiplier = ModifierKind::Multiplier.identity();
        let mut final_add = ModifierKind::FinalAdd.identity();

        for modifier in modifiers {
            match modifier.kind {
                ModifierKind::OriginAdd => origin_add += modifier.value,
                ModifierKind::AddMultiplier => add_sum += modifier.value,
                ModifierKind::Multiplier => multiplier *= modifier.value,
                ModifierKind::FinalAdd => final_add += modifier.value,
            }
        }

        let origin_sum = base + origin_add;
        let add_multiplier = 1.0 + add_sum;
        let result = origin_sum * add_multiplier * multiplier + final_add;

        Self {
            base,
            origin_add,
            origin_sum,
            add_multiplier,
            multiplier,
            final_add,
            result,
        }
    }

    /// Calculation with no modifiers: the result is `base`.
    pub fn identity(base: f64) -> Self {
        Self::from_modifiers(base, std::iter::empty())
    }
}

impl fmt::Display for Calculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(({} + {}) * {} * {}) + {} = {}",
            self.base,
            self.origin_add,
            self.add_multiplier,
            self.multiplier,
            self.final_add,
            self.result
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modifier(kind: ModifierKind, value: f64) -> Modifier {
        Modifier {
            key: "test".into(),
            kind,
            value,
            order: 0,
            stack: None,
        }
    }

    #[test]
    fn empty_set_returns_base() {
        let calc = Calculation::identity(42.5);
        assert_eq!(calc.result, 42.5);
        assert_eq!(calc.multiplier, 1.0);
        assert_eq!(calc.add_multiplier, 1.0);
    }

    #[test]
    fn multipliers_compound_and_add_multipliers_sum() {
        let mods = [
            modifier(ModifierKind::Multiplier, 2.0),
            modifier(ModifierKind::Multiplier, 1.5),
            modifier(ModifierKind::AddMultiplier, 0.25),
            modifier(ModifierKind::AddMultiplier, 0.25),
        ];
        let calc = Calculation::from_modifiers(10.0, &mods);
        assert_eq!(calc.multiplier, 3.0);
        assert_eq!(calc.add_multiplier, 1.5);
        assert_eq!(calc.result, 45.0);
    }

    #[test]
    fn final_add_is_not_scaled() {
        let mods = [
            modifier(ModifierKind::FinalAdd, 5.0),
            modifier(ModifierKind::Multiplier, 10.0),
        ];
        assert_eq!(Calculation::from_modifiers(1.0, &mods).result, 15.0);
    }
}
