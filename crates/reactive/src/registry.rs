//! Per-cell subscription registry.
//!
//! Entries are grouped into one bucket per subscriber context. Buckets keep
//! registration order and entries keep insertion order, which is the order
//! [`deliver`] invokes them in. Callers must not rely on cross-bucket order.
use std::fmt;
use std::rc::Rc;

use tracing::error;

use crate::access::RelationKind;
use crate::context::{ExecutionContextStack, Frame};
use crate::error::{ReactiveError, Result};
use crate::types::{CellId, OwnerId, SubscriptionId};

type CallbackFn<P> = dyn Fn(&P) -> anyhow::Result<()>;

/// Identity-bearing subscriber callback.
///
/// Clones share identity: subscribing the same `Callback` twice with the
/// same relation from the same context is a no-op.
pub struct Callback<P> {
    func: Rc<CallbackFn<P>>,
}

impl<P> Callback<P> {
    pub fn new(func: impl Fn(&P) -> anyhow::Result<()> + 'static) -> Self {
        Self {
            func: Rc::new(func),
        }
    }

    /// Wraps a callback that cannot fail.
    pub fn infallible(func: impl Fn(&P) + 'static) -> Self {
        Self::new(move |payload| {
            func(payload);
            Ok(())
        })
    }

    pub fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }

    pub fn call(&self, payload: &P) -> anyhow::Result<()> {
        (self.func)(payload)
    }
}

impl<P> Clone for Callback<P> {
    fn clone(&self) -> Self {
        Self {
            func: Rc::clone(&self.func),
        }
    }
}

impl<P> fmt::Debug for Callback<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callback")
            .field(&Rc::as_ptr(&self.func).cast::<()>())
            .finish()
    }
}

/// When an entry is invoked relative to the write that changed the cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// During the write itself (derived-cell dependencies).
    Immediate,
    /// From the notification queue at the next flush.
    Deferred,
}

#[derive(Debug)]
pub struct SubscriberEntry<P> {
    pub id: SubscriptionId,
    pub callback: Callback<P>,
    pub relation: RelationKind,
    pub delivery: Delivery,
}

#[derive(Debug)]
struct ContextBucket<P> {
    context: OwnerId,
    entries: Vec<SubscriberEntry<P>>,
}

/// One resolved delivery target.
pub struct Target<P> {
    pub context: OwnerId,
    pub subscription: SubscriptionId,
    pub callback: Callback<P>,
}

#[derive(Debug)]
pub struct SubscriptionRegistry<P> {
    buckets: Vec<ContextBucket<P>>,
}

impl<P> Default for SubscriptionRegistry<P> {
    fn default() -> Self {
        Self {
            buckets: Vec::new(),
        }
    }
}

impl<P> SubscriptionRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry, or returns the id of the identical existing one.
    ///
    /// `allocate` is only called when a new entry is created.
    pub fn insert(
        &mut self,
        context: OwnerId,
        callback: Callback<P>,
        relation: RelationKind,
        delivery: Delivery,
        allocate: impl FnOnce() -> SubscriptionId,
    ) -> SubscriptionId {
        let index = match self.buckets.iter().position(|b| b.context == context) {
            Some(index) => index,
            None => {
                self.buckets.push(ContextBucket {
                    context,
                    entries: Vec::new(),
                });
                self.buckets.len() - 1
            }
        };
        let bucket = &mut self.buckets[index];

        if let Some(existing) = bucket
            .entries
            .iter()
            .find(|e| e.relation == relation && e.callback.same_as(&callback))
        {
            return existing.id;
        }

        let id = allocate();
        bucket.entries.push(SubscriberEntry {
            id,
            callback,
            relation,
            delivery,
        });
        id
    }

    /// Removes the entry with `id`. Frees the bucket when it empties.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.len();
        self.retain(|_, entry| entry.id != id);
        self.len() != before
    }

    /// Removes every entry for `callback`, optionally only within `context`.
    pub fn remove_callback(&mut self, callback: &Callback<P>, context: Option<OwnerId>) -> usize {
        let before = self.len();
        self.retain(|ctx, entry| {
            let in_scope = context.is_none_or(|c| c == ctx);
            !(in_scope && entry.callback.same_as(callback))
        });
        before - self.len()
    }

    /// Drops the whole bucket of `context`.
    pub fn purge_context(&mut self, context: OwnerId) -> usize {
        let before = self.len();
        self.buckets.retain(|b| b.context != context);
        before - self.len()
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.len();
        self.buckets.clear();
        removed
    }

    fn retain(&mut self, mut keep: impl FnMut(OwnerId, &SubscriberEntry<P>) -> bool) {
        for bucket in &mut self.buckets {
            let context = bucket.context;
            bucket.entries.retain(|entry| keep(context, entry));
        }
        self.buckets.retain(|b| !b.entries.is_empty());
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn has_deferred(&self) -> bool {
        self.buckets
            .iter()
            .flat_map(|b| &b.entries)
            .any(|e| e.delivery == Delivery::Deferred)
    }

    /// Contexts in registration order.
    pub fn contexts(&self) -> impl Iterator<Item = OwnerId> + '_ {
        self.buckets.iter().map(|b| b.context)
    }

    /// Entries to invoke, in delivery order. `None` selects every entry.
    ///
    /// Returned by value so the registry is not borrowed while callbacks run;
    /// callbacks are free to subscribe or unsubscribe.
    pub fn targets(&self, delivery: Option<Delivery>) -> Vec<Target<P>> {
        self.buckets
            .iter()
            .flat_map(|bucket| {
                bucket
                    .entries
                    .iter()
                    .filter(move |e| delivery.is_none_or(|d| d == e.delivery))
                    .map(move |e| Target {
                        context: bucket.context,
                        subscription: e.id,
                        callback: e.callback.clone(),
                    })
            })
            .collect()
    }
}

/// Invokes `targets` with `payload` inside a context frame.
///
/// A callback failure is logged and delivery continues, except for fatal
/// reactive errors (cycles, runaway nesting), which abort delivery and
/// propagate to the writer.
pub(crate) fn deliver<P>(
    stack: &ExecutionContextStack,
    frame: Frame,
    cell: CellId,
    targets: Vec<Target<P>>,
    payload: &P,
) -> Result<()> {
    if targets.is_empty() {
        return Ok(());
    }

    let _guard = stack.enter(frame)?;

    for target in targets {
        if let Err(err) = target.callback.call(payload) {
            if let Some(fatal) = ReactiveError::fatal_from(&err) {
                error!(
                    target: "reactive::dispatch",
                    cell = %cell,
                    context = %target.context,
                    error = %fatal,
                    "fatal error during notification"
                );
                return Err(fatal);
            }
            error!(
                target: "reactive::dispatch",
                cell = %cell,
                context = %target.context,
                subscription = %target.subscription,
                error = %err,
                "subscriber callback failed"
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    fn allocator() -> impl FnMut() -> SubscriptionId {
        let mut next = 0;
        move || {
            next += 1;
            SubscriptionId(next)
        }
    }

    #[test]
    fn duplicate_subscribe_is_idempotent() {
        let mut registry = SubscriptionRegistry::<i32>::new();
        let mut alloc = allocator();
        let callback = Callback::infallible(|_: &i32| {});

        let a = registry.insert(
            OwnerId(1),
            callback.clone(),
            RelationKind::Logical,
            Delivery::Deferred,
            &mut alloc,
        );
        let b = registry.insert(
            OwnerId(1),
            callback.clone(),
            RelationKind::Logical,
            Delivery::Deferred,
            &mut alloc,
        );
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);

        // Same callback, other relation: distinct entry.
        registry.insert(
            OwnerId(1),
            callback,
            RelationKind::Functional,
            Delivery::Deferred,
            &mut alloc,
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn removing_last_entry_frees_the_bucket() {
        let mut registry = SubscriptionRegistry::<i32>::new();
        let mut alloc = allocator();
        let id = registry.insert(
            OwnerId(4),
            Callback::infallible(|_: &i32| {}),
            RelationKind::Logical,
            Delivery::Deferred,
            &mut alloc,
        );
        assert!(registry.remove(id));
        assert!(registry.is_empty());
        assert_eq!(registry.contexts().count(), 0);
        assert!(!registry.remove(id));
    }

    #[test]
    fn remove_callback_respects_context_filter() {
        let mut registry = SubscriptionRegistry::<i32>::new();
        let mut alloc = allocator();
        let shared = Callback::infallible(|_: &i32| {});
        registry.insert(
            OwnerId(1),
            shared.clone(),
            RelationKind::Logical,
            Delivery::Deferred,
            &mut alloc,
        );
        registry.insert(
            OwnerId(2),
            shared.clone(),
            RelationKind::Logical,
            Delivery::Deferred,
            &mut alloc,
        );

        assert_eq!(registry.remove_callback(&shared, Some(OwnerId(2))), 1);
        assert_eq!(registry.contexts().collect::<Vec<_>>(), vec![OwnerId(1)]);
        assert_eq!(registry.remove_callback(&shared, None), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn delivery_follows_bucket_then_insertion_order() {
        let mut registry = SubscriptionRegistry::<i32>::new();
        let mut alloc = allocator();
        let log = Rc::new(RefCell::new(Vec::new()));

        for (context, tag) in [(1, "a1"), (2, "b1"), (1, "a2")] {
            let log = Rc::clone(&log);
            registry.insert(
                OwnerId(context),
                Callback::infallible(move |v: &i32| log.borrow_mut().push(format!("{tag}:{v}"))),
                RelationKind::Logical,
                Delivery::Deferred,
                &mut alloc,
            );
        }

        let stack = ExecutionContextStack::new(4);
        deliver(
            &stack,
            Frame::notify(OwnerId(9), CellId(1)),
            CellId(1),
            registry.targets(None),
            &5,
        )
        .unwrap();
        assert_eq!(*log.borrow(), vec!["a1:5", "a2:5", "b1:5"]);
    }

    #[test]
    fn failing_subscriber_is_isolated() {
        let mut registry = SubscriptionRegistry::<i32>::new();
        let mut alloc = allocator();
        let hits = Rc::new(Cell::new(0));
        let counted = Rc::clone(&hits);

        registry.insert(
            OwnerId(1),
            Callback::new(|_: &i32| Err(anyhow::anyhow!("boom"))),
            RelationKind::Logical,
            Delivery::Deferred,
            &mut alloc,
        );
        registry.insert(
            OwnerId(2),
            Callback::infallible(move |_: &i32| counted.set(counted.get() + 1)),
            RelationKind::Logical,
            Delivery::Deferred,
            &mut alloc,
        );

        let stack = ExecutionContextStack::new(4);
        let result = deliver(
            &stack,
            Frame::notify(OwnerId(9), CellId(1)),
            CellId(1),
            registry.targets(None),
            &1,
        );
        assert!(result.is_ok());
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn fatal_error_aborts_delivery() {
        let mut registry = SubscriptionRegistry::<i32>::new();
        let mut alloc = allocator();
        let hits = Rc::new(Cell::new(0));
        let counted = Rc::clone(&hits);

        registry.insert(
            OwnerId(1),
            Callback::new(|_: &i32| Err(ReactiveError::CycleDetected { cell: CellId(3) }.into())),
            RelationKind::Functional,
            Delivery::Immediate,
            &mut alloc,
        );
        registry.insert(
            OwnerId(2),
            Callback::infallible(move |_: &i32| counted.set(counted.get() + 1)),
            RelationKind::Logical,
            Delivery::Immediate,
            &mut alloc,
        );

        let stack = ExecutionContextStack::new(4);
        let result = deliver(
            &stack,
            Frame::notify(OwnerId(9), CellId(1)),
            CellId(1),
            registry.targets(None),
            &1,
        );
        assert_eq!(
            result,
            Err(ReactiveError::CycleDetected { cell: CellId(3) })
        );
        assert_eq!(hits.get(), 0);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn targets_filter_by_delivery() {
        let mut registry = SubscriptionRegistry::<i32>::new();
        let mut alloc = allocator();
        registry.insert(
            OwnerId(1),
            Callback::infallible(|_: &i32| {}),
            RelationKind::Functional,
            Delivery::Immediate,
            &mut alloc,
        );
        registry.insert(
            OwnerId(1),
            Callback::infallible(|_: &i32| {}),
            RelationKind::Logical,
            Delivery::Deferred,
            &mut alloc,
        );

        assert_eq!(registry.targets(Some(Delivery::Immediate)).len(), 1);
        assert_eq!(registry.targets(Some(Delivery::Deferred)).len(), 1);
        assert_eq!(registry.targets(None).len(), 2);
        assert!(registry.has_deferred());
    }
}
