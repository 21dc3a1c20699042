//! Observable cells.
//!
//! - [`ValueCell`]: owner-written state, notifications queued per flush
//! - [`DerivedCell`]: pure function of upstream cells, recomputed synchronously
//! - [`ComputedFlag`]: boolean combinators over derived cells
//! - [`EventCell`]: parameterless events, Logical subscribers only
//! - [`ListCell`]: observable list delivering batched [`ListDelta`]s
//!
//! Cells are cheap-to-clone handles; clones share the same stored value and
//! subscribers. A cell is created through its owner's
//! [`ReactiveRuntime`](crate::ReactiveRuntime) and detached when that owner is
//! torn down.

mod derived;
mod event;
mod flag;
mod list;
mod value;

pub use derived::DerivedCell;
pub use event::{EventCell, EventScope};
pub use flag::ComputedFlag;
pub use list::{ListCell, ListDelta};
pub use value::{CellOptions, ValueCell};

use std::cell::Cell;
use std::rc::Rc;

use crate::access::Relations;
use crate::error::Result;
use crate::types::{CellId, CellKind, OwnerId, SubscriptionHandle, SubscriptionId};

/// Tolerance used by floating-point cells when deciding whether a write changed anything.
pub const FLOAT_EPSILON: f64 = 1e-4;

/// A value that can live in a cell.
///
/// `differs_from` decides whether a write is a change (and therefore
/// notifies). Exact equality for integers, booleans, strings; a
/// [`FLOAT_EPSILON`] tolerance for floats.
pub trait CellValue: Clone + std::fmt::Debug + 'static {
    fn differs_from(&self, other: &Self) -> bool;
}

/// Implements [`CellValue`] with exact `!=` comparison.
///
/// ```
/// #[derive(Clone, Debug, PartialEq)]
/// enum Stance { Idle, Guard }
/// reactive_core::impl_exact_cell_value!(Stance);
/// ```
#[macro_export]
macro_rules! impl_exact_cell_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::CellValue for $ty {
                fn differs_from(&self, other: &Self) -> bool {
                    self != other
                }
            }
        )*
    };
}

impl_exact_cell_value!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, (),
    String, &'static str,
);

/// NaN equals NaN and differs from every number. Infinities of the same
/// sign are equal.
fn floats_differ(a: f64, b: f64) -> bool {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => false,
        (true, false) | (false, true) => true,
        (false, false) if a.is_infinite() || b.is_infinite() => a != b,
        (false, false) => (a - b).abs() > FLOAT_EPSILON,
    }
}

impl CellValue for f32 {
    fn differs_from(&self, other: &Self) -> bool {
        floats_differ(f64::from(*self), f64::from(*other))
    }
}

impl CellValue for f64 {
    fn differs_from(&self, other: &Self) -> bool {
        floats_differ(*self, *other)
    }
}

impl<T: CellValue> CellValue for Option<T> {
    fn differs_from(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.differs_from(b),
            (None, None) => false,
            _ => true,
        }
    }
}

impl<T: CellValue> CellValue for Vec<T> {
    fn differs_from(&self, other: &Self) -> bool {
        self.len() != other.len() || self.iter().zip(other).any(|(a, b)| a.differs_from(b))
    }
}

/// Identity and access metadata shared by every cell kind.
#[derive(Debug)]
pub struct CellHeader {
    id: CellId,
    owner: OwnerId,
    kind: CellKind,
    accepts: Relations,
    scoped: bool,
    label: Option<String>,
    detached: Cell<bool>,
}

impl CellHeader {
    pub fn new(
        id: CellId,
        owner: OwnerId,
        kind: CellKind,
        accepts: Relations,
        scoped: bool,
    ) -> Self {
        Self {
            id,
            owner,
            kind,
            accepts,
            scoped,
            label: None,
            detached: Cell::new(false),
        }
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn accepts(&self) -> Relations {
        self.accepts
    }

    /// Whether Logical subscriptions are bound to the owner's reactive root.
    pub fn is_scoped(&self) -> bool {
        self.scoped
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.get()
    }

    pub(crate) fn detach(&self) {
        self.detached.set(true);
    }
}

/// Runtime-facing control surface of a cell, used for handle-based
/// unsubscribe and owner teardown.
pub(crate) trait CellControl {
    fn header(&self) -> &CellHeader;

    fn remove_subscription(&self, id: SubscriptionId) -> bool;

    /// Drops every entry registered by `context`.
    fn purge_context(&self, context: OwnerId) -> usize;

    /// Clears all subscribers and marks the cell detached.
    fn detach(&self) -> usize;
}

/// A cell a [`DerivedCell`] can depend on.
pub trait Upstream {
    fn cell_id(&self) -> CellId;

    /// Registers `on_change` as an immediate Functional subscriber in
    /// `context`. Called once per upstream when a derived cell is built.
    fn subscribe_dependent(
        &self,
        context: OwnerId,
        on_change: Rc<dyn Fn() -> Result<()>>,
    ) -> Result<SubscriptionHandle>;
}

/// An upstream cell whose value can be read by a derivation.
pub trait Source<T>: Upstream {
    fn read(&self) -> T;

    /// Detached reader for use inside a compute closure.
    fn reader(&self) -> Box<dyn Fn() -> T>;

    fn as_upstream(&self) -> &dyn Upstream;
}
