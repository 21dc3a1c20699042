//! Subscribe and write gatekeeping.
use tracing::debug;

use super::{OwnerTable, RelationKind, WriterPolicy};
use crate::cell::CellHeader;
use crate::error::{ReactiveError, Result};
use crate::types::OwnerId;

/// Checks subscribe and write requests against the owner table.
///
/// The validator borrows the table for the duration of one check; it holds
/// no state of its own.
pub struct AccessValidator<'a> {
    owners: &'a OwnerTable,
}

impl<'a> AccessValidator<'a> {
    pub fn new(owners: &'a OwnerTable) -> Self {
        Self { owners }
    }

    /// Validates `context` subscribing to `target` with `relation`.
    ///
    /// Order of checks:
    /// 1. The target is still attached and accepts `relation`.
    /// 2. The context is registered and holds a subscribe-capable role.
    /// 3. A scope-restricted Logical subscriber shares the target owner's
    ///    reactive root (skipped for unscoped targets such as global events).
    pub fn check_subscribe(
        &self,
        target: &CellHeader,
        context: OwnerId,
        relation: RelationKind,
    ) -> Result<()> {
        let result = self.subscribe_rules(target, context, relation);
        if let Err(err) = &result {
            debug!(
                target: "reactive::access",
                cell = %target.id(),
                context = %context,
                relation = %relation,
                error = %err,
                "subscribe rejected"
            );
        }
        result
    }

    fn subscribe_rules(
        &self,
        target: &CellHeader,
        context: OwnerId,
        relation: RelationKind,
    ) -> Result<()> {
        if target.is_detached() {
            return Err(ReactiveError::Detached { cell: target.id() });
        }

        if !target.accepts().accepts(relation) {
            return Err(ReactiveError::InvalidRelation {
                cell: target.id(),
                kind: target.kind(),
                relation,
            });
        }

        let record = self
            .owners
            .get(context)
            .ok_or(ReactiveError::UnknownOwner { owner: context })?;

        if !record.capabilities.can_subscribe() {
            return Err(ReactiveError::NoSubscribePermission { context });
        }

        if relation == RelationKind::Logical
            && target.is_scoped()
            && record.capabilities.is_scope_restricted()
        {
            self.require_same_root(target, context)?;
        }

        Ok(())
    }

    /// Validates `caller` writing `target` under `policy`.
    pub fn check_write(
        &self,
        target: &CellHeader,
        policy: WriterPolicy,
        caller: OwnerId,
    ) -> Result<()> {
        if target.is_detached() {
            return Err(ReactiveError::Detached { cell: target.id() });
        }

        let record = self
            .owners
            .get(caller)
            .ok_or(ReactiveError::UnknownOwner { owner: caller })?;

        if caller == target.owner() {
            return Ok(());
        }

        let allowed = match policy {
            WriterPolicy::OwnerOnly => false,
            WriterPolicy::AnyLogical => record.capabilities.is_logical(),
            WriterPolicy::SameScope => {
                record.capabilities.is_logical() && self.require_same_root(target, caller).is_ok()
            }
        };

        if allowed {
            Ok(())
        } else {
            debug!(
                target: "reactive::access",
                cell = %target.id(),
                caller = %caller,
                policy = %policy,
                "write rejected"
            );
            Err(ReactiveError::Unauthorized {
                cell: target.id(),
                caller,
            })
        }
    }

    /// Fails only when both roots resolve and differ.
    fn require_same_root(&self, target: &CellHeader, context: OwnerId) -> Result<()> {
        let context_root = self.owners.resolve_root(context);
        let owner_root = self.owners.resolve_root(target.owner());

        match (context_root, owner_root) {
            (Some(context_root), Some(owner_root)) if context_root != owner_root => {
                Err(ReactiveError::ScopeMismatch {
                    cell: target.id(),
                    context,
                    context_root,
                    owner_root,
                })
            }
            _ => Ok(()),
        }
    }
}
