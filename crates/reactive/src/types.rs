//! Identifiers shared across the reactive core.
//!
//! All ids are allocated by a single [`ReactiveRuntime`](crate::ReactiveRuntime)
//! counter, so ids from different kinds never collide inside one runtime.
use core::fmt;

/// Identity of a domain object (model, presenter, interactor, manager).
///
/// Owners both own cells and act as subscriber contexts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(pub u64);

/// Stable identity of a cell for the lifetime of its owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LedgerId(pub u64);

/// Identity of one registry entry; returned inside a [`SubscriptionHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Handle returned by every successful subscribe call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub cell: CellId,
    pub id: SubscriptionId,
}

/// Coalescing key for the notification queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKey {
    Cell(CellId),
    /// Host-defined key for notifications that do not belong to a cell.
    Custom(u64),
}

impl From<CellId> for QueueKey {
    fn from(cell: CellId) -> Self {
        QueueKey::Cell(cell)
    }
}

/// What a cell models; decides accepted relations and dispatch timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CellKind {
    /// Plain owner-written state. Notifications are queued.
    State,
    /// Boolean state cell. Notifications are queued.
    Flag,
    /// Recomputed from upstream cells. Notifications are synchronous.
    Derived,
    /// Parameterless event. Logical subscribers only.
    Event,
    /// Observable list delivering batched deltas.
    List,
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

impl fmt::Display for LedgerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ledger#{}", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}
