//! Capability model and access validation.
//!
//! Every subscribe and write passes through [`AccessValidator`] before it
//! touches a registry or a stored value. Capabilities are granted once, when
//! an owner is registered, and checked as bit operations afterwards.

mod owners;
mod validator;

pub use owners::{OwnerRecord, OwnerSpec, OwnerTable};
pub use validator::AccessValidator;

use bitflags::bitflags;

bitflags! {
    /// Roles an owner may hold as a subscriber context or writer.
    ///
    /// Checked in O(1) at every subscribe and write.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u8 {
        /// Pure derivations and UI projections.
        const FUNCTIONAL         = 1 << 0;
        /// Business logic bound to its reactive root.
        const LOGICAL_INTERACTOR = 1 << 1;
        /// Business logic allowed to observe any scope (managers).
        const LOGICAL_GLOBAL     = 1 << 2;
        /// Explicit override for tooling and debug code.
        const UNSAFE             = 1 << 3;
    }
}

impl Capabilities {
    /// Any role that permits subscribing at all.
    pub const SUBSCRIBE: Self = Self::all();

    /// Roles that count as logic for writer policies.
    pub const LOGICAL: Self = Self::LOGICAL_INTERACTOR
        .union(Self::LOGICAL_GLOBAL)
        .union(Self::UNSAFE);

    /// Roles that lift the same-root restriction on Logical subscriptions.
    pub const UNRESTRICTED: Self = Self::LOGICAL_GLOBAL.union(Self::UNSAFE);

    pub const fn can_subscribe(self) -> bool {
        self.intersects(Self::SUBSCRIBE)
    }

    pub const fn is_logical(self) -> bool {
        self.intersects(Self::LOGICAL)
    }

    pub const fn is_scope_restricted(self) -> bool {
        !self.intersects(Self::UNRESTRICTED)
    }
}

/// Subscription intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum RelationKind {
    /// Pure derivation or UI projection.
    Functional,
    /// Business logic reacting to state.
    Logical,
}

bitflags! {
    /// Set of relation kinds a cell accepts.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Relations: u8 {
        const FUNCTIONAL = 1 << 0;
        const LOGICAL    = 1 << 1;
    }
}

impl From<RelationKind> for Relations {
    fn from(kind: RelationKind) -> Self {
        match kind {
            RelationKind::Functional => Relations::FUNCTIONAL,
            RelationKind::Logical => Relations::LOGICAL,
        }
    }
}

impl Relations {
    pub fn accepts(self, kind: RelationKind) -> bool {
        self.contains(kind.into())
    }
}

/// Who may write a plain cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum WriterPolicy {
    /// Only the owning domain object.
    #[default]
    OwnerOnly,
    /// The owner, or any logical-capable owner sharing its reactive root.
    SameScope,
    /// The owner, or any logical-capable owner.
    AnyLogical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interactor_is_scope_restricted_but_manager_is_not() {
        assert!(Capabilities::LOGICAL_INTERACTOR.is_scope_restricted());
        assert!(!Capabilities::LOGICAL_GLOBAL.is_scope_restricted());
        assert!(
            !(Capabilities::UNSAFE | Capabilities::FUNCTIONAL).is_scope_restricted()
        );
    }

    #[test]
    fn empty_capabilities_cannot_subscribe() {
        assert!(!Capabilities::empty().can_subscribe());
        assert!(Capabilities::FUNCTIONAL.can_subscribe());
        assert!(!Capabilities::FUNCTIONAL.is_logical());
    }

    #[test]
    fn relation_set_membership() {
        let logical_only = Relations::LOGICAL;
        assert!(logical_only.accepts(RelationKind::Logical));
        assert!(!logical_only.accepts(RelationKind::Functional));
        assert!(Relations::all().accepts(RelationKind::Functional));
    }

    #[test]
    fn policies_display_in_snake_case() {
        assert_eq!(WriterPolicy::OwnerOnly.to_string(), "owner_only");
        assert_eq!(WriterPolicy::SameScope.to_string(), "same_scope");
        assert_eq!(RelationKind::Logical.to_string(), "logical");
    }
}
