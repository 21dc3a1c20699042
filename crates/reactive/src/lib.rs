//! Reactive value graph and modifier-calculation engine.
//!
//! `reactive-core` gives gameplay code observable typed cells, a
//! capability-gated subscription registry, a coalescing notification queue
//! flushed once per host tick, and a layered modifier ledger for derived stat
//! values. Everything hangs off one [`ReactiveRuntime`]: owners are
//! registered there, cells and ledgers are created through it, and
//! [`ReactiveRuntime::teardown`] releases everything an owner created.
//!
//! The runtime is single-threaded and never blocks. Derived cells recompute
//! synchronously; every other notification waits for
//! [`ReactiveRuntime::flush_queue`].
pub mod access;
pub mod cell;
pub mod config;
pub mod context;
pub mod error;
pub mod queue;
pub mod registry;
pub mod runtime;
pub mod stats;
pub mod types;

pub use access::{
    AccessValidator, Capabilities, OwnerRecord, OwnerSpec, RelationKind, Relations, WriterPolicy,
};
pub use cell::{
    CellHeader, CellOptions, CellValue, ComputedFlag, DerivedCell, EventCell, EventScope,
    FLOAT_EPSILON, ListCell, ListDelta, Source, Upstream, ValueCell,
};
pub use config::RuntimeConfig;
pub use context::{ContextGuard, ExecutionContextStack, Frame, FrameKind};
pub use error::{ErrorSeverity, ReactiveError, Result};
pub use queue::{FlushReport, NotificationQueue};
pub use registry::{Callback, Delivery, SubscriptionRegistry};
pub use runtime::{ReactiveRuntime, TeardownReport};
pub use stats::{
    Calculation, LedgerNumeric, Modifier, ModifierHandle, ModifierKey, ModifierKind, ModifierLedger,
    StackId, StackPolicy,
};
pub use types::{CellId, CellKind, LedgerId, OwnerId, QueueKey, SubscriptionHandle, SubscriptionId};
