//! Layered numeric modifiers.
//!
//! A [`ModifierLedger`] holds the live modifiers of one subject field
//! (health, attack, speed) and publishes
//! `((base + ΣOriginAdd) * (1 + ΣAddMultiplier) * ΠMultiplier) + ΣFinalAdd`
//! into a typed output cell after every mutation.

pub mod calculation;
pub mod ledger;
pub mod modifier;
pub mod numeric;

pub use calculation::Calculation;
pub use ledger::ModifierLedger;
pub use modifier::{Modifier, ModifierHandle, ModifierKey, ModifierKind, StackId, StackPolicy};
pub use numeric::LedgerNumeric;
