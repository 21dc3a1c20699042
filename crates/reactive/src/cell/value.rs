//! Owner-written observable state.
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::{CellControl, CellHeader, CellValue, Source, Upstream};
use crate::access::{RelationKind, Relations, WriterPolicy};
use crate::context::Frame;
use crate::error::Result;
use crate::registry::{Callback, Delivery, SubscriptionRegistry, deliver};
use crate::runtime::ReactiveRuntime;
use crate::types::{CellId, CellKind, OwnerId, QueueKey, SubscriptionHandle, SubscriptionId};

/// Construction options for a [`ValueCell`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellOptions {
    pub kind: CellKind,
    pub writer: WriterPolicy,
    pub accepts: Relations,
    pub label: Option<String>,
}

impl CellOptions {
    pub fn state() -> Self {
        Self {
            kind: CellKind::State,
            writer: WriterPolicy::OwnerOnly,
            accepts: Relations::all(),
            label: None,
        }
    }

    pub fn flag() -> Self {
        Self {
            kind: CellKind::Flag,
            ..Self::state()
        }
    }

    pub fn with_writer(mut self, writer: WriterPolicy) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_relations(mut self, accepts: Relations) -> Self {
        self.accepts = accepts;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl Default for CellOptions {
    fn default() -> Self {
        Self::state()
    }
}

struct ValueInner<T> {
    header: CellHeader,
    writer: WriterPolicy,
    value: RefCell<T>,
    /// Value most recently delivered to deferred subscribers.
    published: RefCell<T>,
    registry: RefCell<SubscriptionRegistry<T>>,
    runtime: ReactiveRuntime,
}

/// Typed observable holding a current value.
///
/// Writes go through the cell's [`WriterPolicy`]. A write that changes the
/// value first recomputes dependent derived cells (synchronously, so they are
/// never stale) and then queues one coalesced notification for the remaining
/// subscribers. Writing a value equal to the current one does nothing.
///
/// # Example
/// ```
/// # use reactive_core::*;
/// let runtime = ReactiveRuntime::default();
/// let hero = runtime.register_owner(OwnerSpec::model("hero")).unwrap();
/// let hp = runtime.new_cell(100_i32, hero, WriterPolicy::OwnerOnly).unwrap();
///
/// assert_eq!(hp.write(80, hero), Ok(true));
/// assert_eq!(hp.write(80, hero), Ok(false));
/// assert_eq!(hp.read(), 80);
/// ```
pub struct ValueCell<T> {
    inner: Rc<ValueInner<T>>,
}

impl<T> Clone for ValueCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: CellValue> std::fmt::Debug for ValueCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueCell")
            .field("id", &self.inner.header.id())
            .field("owner", &self.inner.header.owner())
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

impl<T: CellValue> ValueCell<T> {
    pub(crate) fn create(
        runtime: ReactiveRuntime,
        initial: T,
        owner: OwnerId,
        options: CellOptions,
    ) -> Self {
        let id = runtime.next_cell_id();
        let header = CellHeader::new(id, owner, options.kind, options.accepts, true)
            .with_label(options.label);
        let inner = Rc::new(ValueInner {
            header,
            writer: options.writer,
            value: RefCell::new(initial.clone()),
            published: RefCell::new(initial),
            registry: RefCell::new(SubscriptionRegistry::new()),
            runtime: runtime.clone(),
        });
        let control: Weak<dyn CellControl> = Rc::downgrade(&inner) as Weak<dyn CellControl>;
        runtime.track_cell(id, owner, control);
        Self { inner }
    }

    pub fn id(&self) -> CellId {
        self.inner.header.id()
    }

    pub fn owner(&self) -> OwnerId {
        self.inner.header.owner()
    }

    pub fn kind(&self) -> CellKind {
        self.inner.header.kind()
    }

    pub fn label(&self) -> Option<&str> {
        self.inner.header.label()
    }

    pub fn writer_policy(&self) -> WriterPolicy {
        self.inner.writer
    }

    pub fn is_detached(&self) -> bool {
        self.inner.header.is_detached()
    }

    pub fn read(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Borrows the current value without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Writes `value` on behalf of `caller`.
    ///
    /// Returns `Ok(true)` when the stored value changed, `Ok(false)` for a
    /// silent no-op write.
    pub fn write(&self, value: T, caller: OwnerId) -> Result<bool> {
        self.inner
            .runtime
            .with_validator(|v| v.check_write(&self.inner.header, self.inner.writer, caller))?;

        {
            let mut current = self.inner.value.borrow_mut();
            if !current.differs_from(&value) {
                return Ok(false);
            }
            *current = value;
        }

        self.publish()?;
        Ok(true)
    }

    /// Updates the value with `f` applied to the current value.
    pub fn update(&self, caller: OwnerId, f: impl FnOnce(&T) -> T) -> Result<bool> {
        let next = self.with(f);
        self.write(next, caller)
    }

    pub fn subscribe(
        &self,
        callback: Callback<T>,
        context: OwnerId,
        relation: RelationKind,
    ) -> Result<SubscriptionHandle> {
        self.subscribe_with(callback, context, relation, Delivery::Deferred)
    }

    /// Convenience wrapper building the [`Callback`] from a closure.
    pub fn subscribe_fn(
        &self,
        context: OwnerId,
        relation: RelationKind,
        f: impl Fn(&T) -> anyhow::Result<()> + 'static,
    ) -> Result<SubscriptionHandle> {
        self.subscribe(Callback::new(f), context, relation)
    }

    fn subscribe_with(
        &self,
        callback: Callback<T>,
        context: OwnerId,
        relation: RelationKind,
        delivery: Delivery,
    ) -> Result<SubscriptionHandle> {
        let runtime = &self.inner.runtime;
        runtime.with_validator(|v| v.check_subscribe(&self.inner.header, context, relation))?;

        let id = self.inner.registry.borrow_mut().insert(
            context,
            callback,
            relation,
            delivery,
            || runtime.next_subscription_id(),
        );
        Ok(SubscriptionHandle {
            cell: self.id(),
            id,
        })
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        handle.cell == self.id() && self.inner.registry.borrow_mut().remove(handle.id)
    }

    pub fn unsubscribe_callback(&self, callback: &Callback<T>, context: Option<OwnerId>) -> usize {
        self.inner
            .registry
            .borrow_mut()
            .remove_callback(callback, context)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.borrow().len()
    }

    /// True while a notification for this cell waits for the next flush.
    pub fn is_pending(&self) -> bool {
        self.inner
            .runtime
            .queue()
            .is_pending(QueueKey::Cell(self.id()))
    }

    fn frame(&self) -> Frame {
        Frame::notify(self.owner(), self.id())
    }

    fn publish(&self) -> Result<()> {
        let runtime = &self.inner.runtime;
        let value = self.read();

        let immediate = self
            .inner
            .registry
            .borrow()
            .targets(Some(Delivery::Immediate));
        deliver(
            runtime.context_stack(),
            self.frame(),
            self.id(),
            immediate,
            &value,
        )?;

        self.schedule();
        Ok(())
    }

    /// Queues the deferred notification, or cancels it when the value is back
    /// to what subscribers last saw.
    fn schedule(&self) {
        let queue = self.inner.runtime.queue();
        let key = QueueKey::Cell(self.id());

        let changed = self
            .inner
            .published
            .borrow()
            .differs_from(&self.inner.value.borrow());
        if !changed {
            queue.cancel(key);
            return;
        }

        if !self.inner.registry.borrow().has_deferred() {
            *self.inner.published.borrow_mut() = self.read();
            return;
        }

        let weak = Rc::downgrade(&self.inner);
        queue.enqueue_keyed(key, move || match weak.upgrade() {
            Some(inner) => ValueCell { inner }.deliver_pending(),
            None => Ok(()),
        });
    }

    fn deliver_pending(&self) -> anyhow::Result<()> {
        if self.is_detached() {
            return Ok(());
        }
        let value = self.read();
        *self.inner.published.borrow_mut() = value.clone();

        let targets = self
            .inner
            .registry
            .borrow()
            .targets(Some(Delivery::Deferred));
        deliver(
            self.inner.runtime.context_stack(),
            self.frame(),
            self.id(),
            targets,
            &value,
        )?;
        Ok(())
    }
}

impl<T: CellValue> Upstream for ValueCell<T> {
    fn cell_id(&self) -> CellId {
        self.id()
    }

    fn subscribe_dependent(
        &self,
        context: OwnerId,
        on_change: Rc<dyn Fn() -> Result<()>>,
    ) -> Result<SubscriptionHandle> {
        let callback = Callback::new(move |_: &T| on_change().map_err(anyhow::Error::from));
        self.subscribe_with(
            callback,
            context,
            RelationKind::Functional,
            Delivery::Immediate,
        )
    }
}

impl<T: CellValue> Source<T> for ValueCell<T> {
    fn read(&self) -> T {
        ValueCell::read(self)
    }

    fn reader(&self) -> Box<dyn Fn() -> T> {
        let cell = self.clone();
        Box::new(move || cell.read())
    }

    fn as_upstream(&self) -> &dyn Upstream {
        self
    }
}

impl<T: CellValue> CellControl for ValueInner<T> {
    fn header(&self) -> &CellHeader {
        &self.header
    }

    fn remove_subscription(&self, id: SubscriptionId) -> bool {
        self.registry.borrow_mut().remove(id)
    }

    fn purge_context(&self, context: OwnerId) -> usize {
        self.registry.borrow_mut().purge_context(context)
    }

    fn detach(&self) -> usize {
        self.header.detach();
        self.registry.borrow_mut().clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::OwnerSpec;
    use crate::error::ReactiveError;
    use std::cell::Cell;

    struct Fixture {
        runtime: ReactiveRuntime,
        model: OwnerId,
        logic: OwnerId,
    }

    fn fixture() -> Fixture {
        let runtime = ReactiveRuntime::default();
        let model = runtime.register_owner(OwnerSpec::model("hero")).unwrap();
        let logic = runtime
            .register_owner(OwnerSpec::manager("combat"))
            .unwrap();
        Fixture {
            runtime,
            model,
            logic,
        }
    }

    fn counting(cell: &ValueCell<i32>, context: OwnerId) -> Rc<Cell<u32>> {
        let hits = Rc::new(Cell::new(0));
        let counted = Rc::clone(&hits);
        cell.subscribe(
            Callback::infallible(move |_: &i32| counted.set(counted.get() + 1)),
            context,
            RelationKind::Logical,
        )
        .unwrap();
        hits
    }

    #[test]
    fn multiple_writes_coalesce_into_one_notification() {
        let fx = fixture();
        let hp = fx
            .runtime
            .new_cell(100, fx.model, WriterPolicy::OwnerOnly)
            .unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        hp.subscribe_fn(fx.logic, RelationKind::Logical, move |v| {
            log.borrow_mut().push(*v);
            Ok(())
        })
        .unwrap();

        hp.write(90, fx.model).unwrap();
        hp.write(75, fx.model).unwrap();
        assert!(hp.is_pending());
        assert!(seen.borrow().is_empty());

        fx.runtime.flush_queue();
        assert_eq!(*seen.borrow(), vec![75]);
    }

    #[test]
    fn same_value_write_is_silent() {
        let fx = fixture();
        let hp = fx
            .runtime
            .new_cell(100, fx.model, WriterPolicy::OwnerOnly)
            .unwrap();
        let hits = counting(&hp, fx.logic);

        assert_eq!(hp.write(100, fx.model), Ok(false));
        assert!(!hp.is_pending());
        fx.runtime.flush_queue();
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn revert_before_flush_cancels_notification() {
        let fx = fixture();
        let hp = fx
            .runtime
            .new_cell(100, fx.model, WriterPolicy::OwnerOnly)
            .unwrap();
        let hits = counting(&hp, fx.logic);

        hp.write(50, fx.model).unwrap();
        hp.write(100, fx.model).unwrap();
        assert!(!hp.is_pending());

        let report = fx.runtime.flush_queue();
        assert_eq!(report.cancelled, 1);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn non_owner_write_is_unauthorized() {
        let fx = fixture();
        let hp = fx
            .runtime
            .new_cell(100, fx.model, WriterPolicy::OwnerOnly)
            .unwrap();
        assert_eq!(
            hp.write(1, fx.logic),
            Err(ReactiveError::Unauthorized {
                cell: hp.id(),
                caller: fx.logic,
            })
        );
        assert_eq!(hp.read(), 100);
    }

    #[test]
    fn any_logical_policy_admits_logic_writers() {
        let fx = fixture();
        let gold = fx
            .runtime
            .new_cell(0_u32, fx.model, WriterPolicy::AnyLogical)
            .unwrap();
        assert_eq!(gold.write(25, fx.logic), Ok(true));
        assert_eq!(gold.read(), 25);
    }

    #[test]
    fn float_cells_ignore_sub_epsilon_changes() {
        let fx = fixture();
        let speed = fx
            .runtime
            .new_cell(1.5_f64, fx.model, WriterPolicy::OwnerOnly)
            .unwrap();
        assert_eq!(speed.write(1.50001, fx.model), Ok(false));
        assert_eq!(speed.write(1.6, fx.model), Ok(true));
    }

    #[test]
    fn nan_write_is_a_change() {
        let fx = fixture();
        let speed = fx
            .runtime
            .new_cell(1.0_f64, fx.model, WriterPolicy::OwnerOnly)
            .unwrap();
        let hits = Rc::new(Cell::new(0));
        let counted = Rc::clone(&hits);
        speed
            .subscribe_fn(fx.logic, RelationKind::Logical, move |_| {
                counted.set(counted.get() + 1);
                Ok(())
            })
            .unwrap();

        assert_eq!(speed.write(f64::NAN, fx.model), Ok(true));
        assert!(speed.read().is_nan());
        assert_eq!(speed.write(f64::NAN, fx.model), Ok(false));
        fx.runtime.flush_queue();
        assert_eq!(hits.get(), 1);

        assert_eq!(speed.write(1.0, fx.model), Ok(true));
        assert_eq!(speed.read(), 1.0);
    }

    #[test]
    fn notification_sees_latest_value_and_context_owner() {
        let fx = fixture();
        let hp = fx
            .runtime
            .new_cell(10, fx.model, WriterPolicy::OwnerOnly)
            .unwrap();
        let runtime = fx.runtime.clone();
        let owner_seen = Rc::new(Cell::new(None));
        let slot = Rc::clone(&owner_seen);
        hp.subscribe_fn(fx.logic, RelationKind::Logical, move |_| {
            slot.set(runtime.current_owner());
            Ok(())
        })
        .unwrap();

        hp.write(11, fx.model).unwrap();
        fx.runtime.flush_queue();
        assert_eq!(owner_seen.get(), Some(fx.model));
        assert_eq!(fx.runtime.current_owner(), None);
    }

    #[test]
    fn write_inside_callback_requeues_for_same_flush() {
        let fx = fixture();
        let hp = fx
            .runtime
            .new_cell(10, fx.model, WriterPolicy::AnyLogical)
            .unwrap();
        let writer = hp.clone();
        let logic = fx.logic;
        hp.subscribe_fn(logic, RelationKind::Logical, move |v| {
            // clamp negative health back to zero
            if *v < 0 {
                writer.write(0, logic)?;
            }
            Ok(())
        })
        .unwrap();

        hp.write(-5, fx.model).unwrap();
        let report = fx.runtime.flush_queue();
        assert_eq!(hp.read(), 0);
        assert_eq!(report.executed, 2);
    }

    #[test]
    fn subscriber_added_after_silent_write_sees_next_change_only() {
        let fx = fixture();
        let hp = fx
            .runtime
            .new_cell(10, fx.model, WriterPolicy::OwnerOnly)
            .unwrap();
        hp.write(20, fx.model).unwrap();
        assert!(!hp.is_pending());

        let hits = counting(&hp, fx.logic);
        hp.write(20, fx.model).unwrap();
        fx.runtime.flush_queue();
        assert_eq!(hits.get(), 0);

        hp.write(30, fx.model).unwrap();
        fx.runtime.flush_queue();
        assert_eq!(hits.get(), 1);
    }
}
