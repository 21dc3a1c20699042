//! Owner registration and reactive scope resolution.
use std::collections::HashMap;

use super::Capabilities;
use crate::types::OwnerId;

/// Registration request for a domain object.
///
/// # Example
/// ```
/// # use reactive_core::{OwnerSpec, ReactiveRuntime};
/// let runtime = ReactiveRuntime::default();
/// let hud = runtime.register_owner(OwnerSpec::presenter("hud").as_root()).unwrap();
/// let bar = runtime
///     .register_owner(OwnerSpec::presenter("hp-bar").with_parent(hud))
///     .unwrap();
/// assert_eq!(runtime.resolve_scope(bar), Some(hud));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerSpec {
    pub name: String,
    pub capabilities: Capabilities,
    pub parent: Option<OwnerId>,
    pub reactive_root: bool,
}

impl OwnerSpec {
    pub fn new(name: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            name: name.into(),
            capabilities,
            parent: None,
            reactive_root: false,
        }
    }

    /// Data holder that derives its own values.
    pub fn model(name: impl Into<String>) -> Self {
        Self::new(name, Capabilities::FUNCTIONAL)
    }

    /// UI projection.
    pub fn presenter(name: impl Into<String>) -> Self {
        Self::new(name, Capabilities::FUNCTIONAL)
    }

    /// Scope-bound business logic.
    pub fn interactor(name: impl Into<String>) -> Self {
        Self::new(
            name,
            Capabilities::LOGICAL_INTERACTOR | Capabilities::FUNCTIONAL,
        )
    }

    /// Global business logic.
    pub fn manager(name: impl Into<String>) -> Self {
        Self::new(
            name,
            Capabilities::LOGICAL_GLOBAL | Capabilities::FUNCTIONAL,
        )
    }

    /// Debug and tooling code that crosses every boundary.
    pub fn unsafe_tool(name: impl Into<String>) -> Self {
        Self::new(name, Capabilities::UNSAFE)
    }

    pub fn with_parent(mut self, parent: OwnerId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Marks this owner as the reactive root of its subtree.
    pub fn as_root(mut self) -> Self {
        self.reactive_root = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerRecord {
    pub name: String,
    pub capabilities: Capabilities,
    pub parent: Option<OwnerId>,
    pub reactive_root: bool,
}

/// Registered owners, keyed by id.
#[derive(Debug, Default)]
pub struct OwnerTable {
    records: HashMap<OwnerId, OwnerRecord>,
}

impl OwnerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: OwnerId, spec: OwnerSpec) {
        self.records.insert(
            id,
            OwnerRecord {
                name: spec.name,
                capabilities: spec.capabilities,
                parent: spec.parent,
                reactive_root: spec.reactive_root,
            },
        );
    }

    pub fn remove(&mut self, id: OwnerId) -> Option<OwnerRecord> {
        self.records.remove(&id)
    }

    pub fn get(&self, id: OwnerId) -> Option<&OwnerRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: OwnerId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Nearest owner flagged as reactive root, starting at `id` itself.
    ///
    /// Walks the parent chain; a torn-down parent ends the walk. The walk is
    /// bounded by the table size, so a corrupted parent chain cannot spin.
    pub fn resolve_root(&self, id: OwnerId) -> Option<OwnerId> {
        let mut cursor = Some(id);
        for _ in 0..=self.records.len() {
            let current = cursor?;
            let record = self.records.get(&current)?;
            if record.reactive_root {
                return Some(current);
            }
            cursor = record.parent;
        }
        None
    }
}
