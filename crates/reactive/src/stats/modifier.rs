//! Modifier value objects.
use core::fmt;

use crate::types::LedgerId;

/// Which term of the ledger formula a modifier feeds.
///
/// Terms are applied in declaration order:
/// `((base + ΣOriginAdd) * (1 + ΣAddMultiplier) * ΠMultiplier) + ΣFinalAdd`.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::EnumCount,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ModifierKind {
    /// Added to the base before any scaling (+20 flat attack).
    OriginAdd,
    /// Summed, then applied as `1 + sum` (+0.5 = +50%).
    AddMultiplier,
    /// Multiplied together (2.0 doubles).
    Multiplier,
    /// Added after all scaling.
    FinalAdd,
}

impl ModifierKind {
    /// Value of the term when no modifier of this kind is present.
    pub const fn identity(self) -> f64 {
        match self {
            Self::Multiplier => 1.0,
            _ => 0.0,
        }
    }

    /// Multiplicative kinds combine by product, the rest by sum.
    pub const fn is_product(self) -> bool {
        matches!(self, Self::Multiplier)
    }
}

/// What re-setting an existing key does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[strum(serialize_all = "snake_case")]
pub enum StackPolicy {
    /// One instance per key; re-setting overwrites it in place.
    #[default]
    ReplaceLatest,
    /// Every set adds an independent instance with its own [`StackId`].
    Stack,
}

/// Stable identifier of a modifier, namespaced by its source.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModifierKey(String);

impl ModifierKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key of the form `source/name`, e.g. `equipment/iron_sword`.
    pub fn namespaced(source: &str, name: &str) -> Self {
        Self(format!("{source}/{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Part before the first `/`, if the key is namespaced.
    pub fn source(&self) -> Option<&str> {
        self.0.split_once('/').map(|(source, _)| source)
    }
}

impl From<&str> for ModifierKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ModifierKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl fmt::Display for ModifierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Synthetic id distinguishing instances of a stacked key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StackId(pub u32);

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stack#{}", self.0)
    }
}

/// One live adjustment inside a ledger.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Modifier {
    pub key: ModifierKey,
    pub kind: ModifierKind,
    pub value: f64,
    /// Insertion order, for display only.
    pub order: u64,
    /// Set for instances of a [`StackPolicy::Stack`] key.
    pub stack: Option<StackId>,
}

/// Returned by a successful `set_modifier`; addresses exactly the instance
/// that call created or overwrote.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModifierHandle {
    pub ledger: LedgerId,
    pub key: ModifierKey,
    pub stack: Option<StackId>,
}
