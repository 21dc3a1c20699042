//! Cells recomputed from upstream cells.
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::error;

use super::{CellControl, CellHeader, CellValue, Source, Upstream};
use crate::access::{RelationKind, Relations};
use crate::context::Frame;
use crate::error::{ReactiveError, Result};
use crate::registry::{Callback, Delivery, SubscriptionRegistry, deliver};
use crate::runtime::ReactiveRuntime;
use crate::types::{CellId, CellKind, OwnerId, SubscriptionHandle, SubscriptionId};

struct DerivedInner<T> {
    header: CellHeader,
    compute: Box<dyn Fn() -> T>,
    value: RefCell<T>,
    registry: RefCell<SubscriptionRegistry<T>>,
    upstream: RefCell<Vec<SubscriptionHandle>>,
    runtime: ReactiveRuntime,
}

/// A cell whose value is a pure function of other cells.
///
/// The value is computed once at construction and again, synchronously,
/// every time an upstream cell changes. When the recomputed value differs,
/// subscribers are invoked synchronously too, so a reader never observes a
/// derived value older than its inputs, even before the queue is flushed.
///
/// Re-entering a derived cell while it is recomputing fails with
/// `CycleDetected`; the compute function must be free of side effects.
pub struct DerivedCell<T> {
    inner: Rc<DerivedInner<T>>,
}

impl<T> Clone for DerivedCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: CellValue> std::fmt::Debug for DerivedCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedCell")
            .field("id", &self.inner.header.id())
            .field("value", &*self.inner.value.borrow())
            .field("upstream", &self.inner.upstream.borrow().len())
            .finish()
    }
}

impl<T: CellValue> DerivedCell<T> {
    pub(crate) fn create(
        runtime: ReactiveRuntime,
        owner: OwnerId,
        sources: &[&dyn Upstream],
        compute: Box<dyn Fn() -> T>,
    ) -> Result<Self> {
        runtime.ensure_owner(owner)?;

        let id = runtime.next_cell_id();
        let initial = compute();
        let inner = Rc::new(DerivedInner {
            header: CellHeader::new(id, owner, CellKind::Derived, Relations::all(), true),
            compute,
            value: RefCell::new(initial),
            registry: RefCell::new(SubscriptionRegistry::new()),
            upstream: RefCell::new(Vec::with_capacity(sources.len())),
            runtime: runtime.clone(),
        });
        let control: Weak<dyn CellControl> = Rc::downgrade(&inner) as Weak<dyn CellControl>;
        runtime.track_cell(id, owner, control);

        let weak = Rc::downgrade(&inner);
        let on_change: Rc<dyn Fn() -> Result<()>> = Rc::new(move || match weak.upgrade() {
            Some(inner) => DerivedCell { inner }.recompute().map(|_| ()),
            None => Ok(()),
        });

        let cell = Self { inner };
        for source in sources {
            match source.subscribe_dependent(owner, Rc::clone(&on_change)) {
                Ok(handle) => cell.inner.upstream.borrow_mut().push(handle),
                Err(err) => {
                    error!(
                        target: "reactive::dispatch",
                        cell = %id,
                        upstream = %source.cell_id(),
                        error = %err,
                        "derived cell could not subscribe to upstream"
                    );
                    cell.dispose();
                    return Err(err);
                }
            }
        }

        Ok(cell)
    }

    /// Derived cell over an arbitrary set of upstream cells.
    ///
    /// `compute` reads whatever it needs (usually through [`Source::reader`]);
    /// `sources` only decides which changes trigger a recompute.
    pub fn from_sources(
        runtime: &ReactiveRuntime,
        owner: OwnerId,
        sources: &[&dyn Upstream],
        compute: impl Fn() -> T + 'static,
    ) -> Result<Self> {
        Self::create(runtime.clone(), owner, sources, Box::new(compute))
    }

    /// Derived cell mapping a single source.
    pub fn map<S: CellValue>(
        source: &(impl Source<S> + 'static),
        runtime: &ReactiveRuntime,
        owner: OwnerId,
        f: impl Fn(S) -> T + 'static,
    ) -> Result<Self> {
        let read = source.reader();
        Self::create(
            runtime.clone(),
            owner,
            &[source as &dyn Upstream],
            Box::new(move || f(read())),
        )
    }

    /// Derived cell combining two sources.
    pub fn map2<A: CellValue, B: CellValue>(
        a: &(impl Source<A> + 'static),
        b: &(impl Source<B> + 'static),
        runtime: &ReactiveRuntime,
        owner: OwnerId,
        f: impl Fn(A, B) -> T + 'static,
    ) -> Result<Self> {
        let read_a = a.reader();
        let read_b = b.reader();
        Self::create(
            runtime.clone(),
            owner,
            &[a as &dyn Upstream, b as &dyn Upstream],
            Box::new(move || f(read_a(), read_b())),
        )
    }

    pub fn id(&self) -> CellId {
        self.inner.header.id()
    }

    pub fn owner(&self) -> OwnerId {
        self.inner.header.owner()
    }

    pub fn is_detached(&self) -> bool {
        self.inner.header.is_detached()
    }

    pub fn read(&self) -> T {
        self.inner.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    pub fn upstream_count(&self) -> usize {
        self.inner.upstream.borrow().len()
    }

    pub fn subscribe(
        &self,
        callback: Callback<T>,
        context: OwnerId,
        relation: RelationKind,
    ) -> Result<SubscriptionHandle> {
        let runtime = &self.inner.runtime;
        runtime.with_validator(|v| v.check_subscribe(&self.inner.header, context, relation))?;

        let id = self.inner.registry.borrow_mut().insert(
            context,
            callback,
            relation,
            Delivery::Immediate,
            || runtime.next_subscription_id(),
        );
        Ok(SubscriptionHandle {
            cell: self.id(),
            id,
        })
    }

    pub fn subscribe_fn(
        &self,
        context: OwnerId,
        relation: RelationKind,
        f: impl Fn(&T) -> anyhow::Result<()> + 'static,
    ) -> Result<SubscriptionHandle> {
        self.subscribe(Callback::new(f), context, relation)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        handle.cell == self.id() && self.inner.registry.borrow_mut().remove(handle.id)
    }

    /// Removes `callback` from `context`, or from every context when `None`.
    pub fn unsubscribe_callback(
        &self,
        callback: &Callback<T>,
        context: Option<OwnerId>,
    ) -> usize {
        self.inner
            .registry
            .borrow_mut()
            .remove_callback(callback, context)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.borrow().len()
    }

    /// Recomputes from the current upstream values.
    ///
    /// Returns `Ok(true)` when the value changed and subscribers were notified.
    pub fn recompute(&self) -> Result<bool> {
        if self.is_detached() {
            return Ok(false);
        }

        let stack = self.inner.runtime.context_stack();
        if stack.is_recomputing(self.id()) {
            return Err(ReactiveError::CycleDetected { cell: self.id() });
        }
        let _frame = stack.enter(Frame::recompute(self.owner(), self.id()))?;

        let next = (self.inner.compute)();
        {
            let mut current = self.inner.value.borrow_mut();
            if !current.differs_from(&next) {
                return Ok(false);
            }
            *current = next;
        }

        let value = self.read();
        let targets = self.inner.registry.borrow().targets(None);
        deliver(
            stack,
            Frame::notify(self.owner(), self.id()),
            self.id(),
            targets,
            &value,
        )?;
        Ok(true)
    }

    /// Drops the upstream subscriptions. The cell keeps its last value.
    pub fn dispose(&self) {
        let handles: Vec<_> = self.inner.upstream.borrow_mut().drain(..).collect();
        for handle in handles {
            self.inner.runtime.unsubscribe(handle);
        }
    }
}

impl<T: CellValue> Upstream for DerivedCell<T> {
    fn cell_id(&self) -> CellId {
        self.id()
    }

    fn subscribe_dependent(
        &self,
        context: OwnerId,
        on_change: Rc<dyn Fn() -> Result<()>>,
    ) -> Result<SubscriptionHandle> {
        let callback = Callback::new(move |_: &T| on_change().map_err(anyhow::Error::from));
        self.subscribe(callback, context, RelationKind::Functional)
    }
}

impl<T: CellValue> Source<T> for DerivedCell<T> {
    fn read(&self) -> T {
        DerivedCell::read(self)
    }

    fn reader(&self) -> Box<dyn Fn() -> T> {
        let cell = self.clone();
        Box::new(move || cell.read())
    }

    fn as_upstream(&self) -> &dyn Upstream {
        self
    }
}

impl<T: CellValue> CellControl for DerivedInner<T> {
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
        self.upstream.borrow_mut().clear();
        self.registry.borrow_mut().clear()
    }
}
