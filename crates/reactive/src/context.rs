//! Execution context stack: who is currently notifying.
//!
//! A frame is pushed before a cell dispatches to its subscribers (or a derived
//! cell recomputes) and popped when the returned [`ContextGuard`] drops, which
//! also happens while unwinding. Nested writes triggered by callbacks push
//! further frames.
//!
//! Only dispatching frames count toward the nesting limit; recompute frames
//! are tracked for cycle detection alone.
use std::cell::RefCell;

use crate::error::{ReactiveError, Result};
use crate::types::{CellId, OwnerId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// Subscribers of `cell` are being invoked.
    Notify,
    /// Derived `cell` is recomputing from its upstream cells.
    Recompute,
    /// Host-supplied frame (e.g. a flush-level action without a cell).
    Host,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    pub owner: OwnerId,
    pub cell: Option<CellId>,
    pub kind: FrameKind,
}

impl Frame {
    /// Whether this frame counts toward the nesting limit.
    pub fn is_nesting(&self) -> bool {
        self.kind != FrameKind::Recompute
    }

    pub fn notify(owner: OwnerId, cell: CellId) -> Self {
        Self {
            owner,
            cell: Some(cell),
            kind: FrameKind::Notify,
        }
    }

    pub fn recompute(owner: OwnerId, cell: CellId) -> Self {
        Self {
            owner,
            cell: Some(cell),
            kind: FrameKind::Recompute,
        }
    }

    pub fn host(owner: OwnerId) -> Self {
        Self {
            owner,
            cell: None,
            kind: FrameKind::Host,
        }
    }
}

#[derive(Debug)]
pub struct ExecutionContextStack {
    frames: RefCell<Vec<Frame>>,
    limit: usize,
}

impl ExecutionContextStack {
    pub fn new(limit: usize) -> Self {
        Self {
            frames: RefCell::new(Vec::new()),
            limit: limit.max(1),
        }
    }

    /// Pushes `frame`; the frame is popped when the guard drops.
    ///
    /// Fails with `ReentrancyLimit` when a nesting frame would take the
    /// nesting depth past the limit. Recompute frames are never rejected here.
    pub fn enter(&self, frame: Frame) -> Result<ContextGuard<'_>> {
        let mut frames = self.frames.borrow_mut();
        if frame.is_nesting() {
            let nesting = frames.iter().filter(|f| f.is_nesting()).count();
            if nesting >= self.limit {
                return Err(ReactiveError::ReentrancyLimit {
                    owner: frame.owner,
                    depth: nesting + 1,
                    limit: self.limit,
                });
            }
        }
        frames.push(frame);
        Ok(ContextGuard { stack: self })
    }

    /// Owner of the innermost frame.
    pub fn current_owner(&self) -> Option<OwnerId> {
        self.frames.borrow().last().map(|f| f.owner)
    }

    pub fn current(&self) -> Option<Frame> {
        self.frames.borrow().last().copied()
    }

    /// Number of frames on the stack, recompute frames included.
    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Number of frames counted against the limit.
    pub fn nesting(&self) -> usize {
        self.frames
            .borrow()
            .iter()
            .filter(|f| f.is_nesting())
            .count()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// True while `cell` has a recompute frame anywhere on the stack.
    pub fn is_recomputing(&self, cell: CellId) -> bool {
        self.frames
            .borrow()
            .iter()
            .any(|f| f.kind == FrameKind::Recompute && f.cell == Some(cell))
    }

    /// Copy of the stack, outermost frame first.
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.borrow().clone()
    }
}

/// Pops its frame on drop.
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct ContextGuard<'a> {
    stack: &'a ExecutionContextStack,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.stack.frames.borrow_mut().pop();
    }
}
