//! Boolean derived cells.
use super::{DerivedCell, Source, Upstream};
use crate::access::RelationKind;
use crate::error::Result;
use crate::registry::Callback;
use crate::runtime::ReactiveRuntime;
use crate::types::{CellId, OwnerId, SubscriptionHandle};

/// A derived boolean combining other boolean cells.
///
/// # Example
/// ```
/// # use reactive_core::*;
/// let runtime = ReactiveRuntime::default();
/// let hero = runtime.register_owner(OwnerSpec::model("hero")).unwrap();
/// let alive = runtime.new_cell(true, hero, WriterPolicy::OwnerOnly).unwrap();
/// let stunned = runtime.new_cell(false, hero, WriterPolicy::OwnerOnly).unwrap();
/// let free = runtime.new_flag_not(hero, &stunned).unwrap();
/// let can_act = runtime.new_flag_all(hero, &[&alive, free.cell()]).unwrap();
///
/// assert!(can_act.is_set());
/// stunned.write(true, hero).unwrap();
/// assert!(!can_act.is_set());
/// ```
#[derive(Clone, Debug)]
pub struct ComputedFlag {
    cell: DerivedCell<bool>,
}

impl ComputedFlag {
    /// True when every source is true (and when there are none).
    pub fn all(
        runtime: &ReactiveRuntime,
        owner: OwnerId,
        sources: &[&dyn Source<bool>],
    ) -> Result<Self> {
        let readers: Vec<_> = sources.iter().map(|s| s.reader()).collect();
        Self::build(runtime, owner, sources, move || {
            readers.iter().all(|read| read())
        })
    }

    /// True when at least one source is true.
    pub fn any(
        runtime: &ReactiveRuntime,
        owner: OwnerId,
        sources: &[&dyn Source<bool>],
    ) -> Result<Self> {
        let readers: Vec<_> = sources.iter().map(|s| s.reader()).collect();
        Self::build(runtime, owner, sources, move || {
            readers.iter().any(|read| read())
        })
    }

    pub fn not(
        runtime: &ReactiveRuntime,
        owner: OwnerId,
        source: &dyn Source<bool>,
    ) -> Result<Self> {
        let read = source.reader();
        Self::build(runtime, owner, &[source], move || !read())
    }

    fn build(
        runtime: &ReactiveRuntime,
        owner: OwnerId,
        sources: &[&dyn Source<bool>],
        compute: impl Fn() -> bool + 'static,
    ) -> Result<Self> {
        let upstream: Vec<&dyn Upstream> = sources.iter().map(|s| s.as_upstream()).collect();
        let cell = runtime.new_derived(owner, &upstream, compute)?;
        Ok(Self { cell })
    }

    pub fn is_set(&self) -> bool {
        self.cell.read()
    }

    pub fn id(&self) -> CellId {
        self.cell.id()
    }

    /// Underlying derived cell, usable as a source for further flags.
    pub fn cell(&self) -> &DerivedCell<bool> {
        &self.cell
    }

    pub fn subscribe(
        &self,
        callback: Callback<bool>,
        context: OwnerId,
        relation: RelationKind,
    ) -> Result<SubscriptionHandle> {
        self.cell.subscribe(callback, context, relation)
    }

    pub fn unsubscribe_callback(
        &self,
        callback: &Callback<bool>,
        context: Option<OwnerId>,
    ) -> usize {
        self.cell.unsubscribe_callback(callback, context)
    }

    pub fn dispose(&self) {
        self.cell.dispose();
    }
}
