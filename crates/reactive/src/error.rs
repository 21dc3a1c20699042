//! Error taxonomy for the reactive core.
//!
//! Every failure here is local and synchronous: an operation is either a
//! valid state transition or it is rejected immediately. Nothing retries.
//! The only place errors are swallowed is subscriber dispatch, where a
//! callback's own failure is logged so the remaining subscribers still
//! receive the notification.

use crate::access::RelationKind;
use crate::types::{CellId, CellKind, LedgerId, OwnerId};

pub type Result<T> = std::result::Result<T, ReactiveError>;

/// Severity level of an error, used to decide whether dispatch may swallow it.
///
/// - **Validation**: the caller asked for something it is not allowed to do
/// - **Fatal**: the reactive graph is misconfigured (cycles, runaway nesting)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorSeverity {
    /// Rejected input; the graph is unchanged.
    Validation,

    /// Configuration error in the dependency graph. Propagates out of
    /// synchronous dispatch instead of being logged.
    Fatal,
}

impl ErrorSeverity {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Fatal => "fatal",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ReactiveError {
    /// Write by a caller that does not satisfy the cell's writer policy.
    #[error("owner {caller} is not allowed to write cell {cell}")]
    Unauthorized { cell: CellId, caller: OwnerId },

    /// Context holds none of the subscribe-capable roles.
    #[error("context {context} has no subscribe capability")]
    NoSubscribePermission { context: OwnerId },

    /// Scope-restricted Logical subscription across reactive roots.
    #[error("context {context} (root {context_root}) cannot observe cell {cell} (root {owner_root})")]
    ScopeMismatch {
        cell: CellId,
        context: OwnerId,
        context_root: OwnerId,
        owner_root: OwnerId,
    },

    /// Relation kind not accepted by the target cell.
    #[error("{kind} cell {cell} does not accept {relation} subscriptions")]
    InvalidRelation {
        cell: CellId,
        kind: CellKind,
        relation: RelationKind,
    },

    /// Ledger was never registered or its owner has been torn down.
    #[error("ledger {ledger} is not registered")]
    UnknownLedgerInstance { ledger: LedgerId },

    /// Owner id was never registered or has been torn down.
    #[error("owner {owner} is not registered")]
    UnknownOwner { owner: OwnerId },

    /// Cell belongs to an owner that has been torn down.
    #[error("cell {cell} is detached from its owner")]
    Detached { cell: CellId },

    /// Ledger key already present under the other stack policy.
    #[error("modifier key {key:?} is already registered under a different stack policy")]
    PolicyConflict { ledger: LedgerId, key: String },

    /// List operation addressed a position past the end of the list.
    #[error("index {index} out of range for list cell {cell} of length {len}")]
    IndexOutOfRange {
        cell: CellId,
        index: usize,
        len: usize,
    },

    /// Derived cell re-entered while its own recomputation is running.
    #[error("dependency cycle: cell {cell} re-entered during recomputation")]
    CycleDetected { cell: CellId },

    /// Notification nesting exceeded the configured depth.
    #[error("notification depth {depth} exceeds limit {limit} (owner {owner})")]
    ReentrancyLimit {
        owner: OwnerId,
        depth: usize,
        limit: usize,
    },
}

impl ReactiveError {
    pub const fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CycleDetected { .. } | Self::ReentrancyLimit { .. } => ErrorSeverity::Fatal,
            _ => ErrorSeverity::Validation,
        }
    }

    pub const fn is_fatal(&self) -> bool {
        matches!(self.severity(), ErrorSeverity::Fatal)
    }

    /// Extracts a fatal reactive error carried inside a callback failure.
    ///
    /// Subscriber callbacks return `anyhow::Error`; when a nested write inside
    /// a callback hits a cycle, the original `ReactiveError` travels back up
    /// through `?` and is recovered here so dispatch can re-raise it.
    pub fn fatal_from(err: &anyhow::Error) -> Option<Self> {
        err.downcast_ref::<ReactiveError>()
            .filter(|e| e.is_fatal())
            .cloned()
    }
}
