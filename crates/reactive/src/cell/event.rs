//! Parameterless events.
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::{CellControl, CellHeader};
use crate::access::{RelationKind, Relations, WriterPolicy};
use crate::context::Frame;
use crate::error::Result;
use crate::registry::{Callback, Delivery, SubscriptionRegistry, deliver};
use crate::runtime::ReactiveRuntime;
use crate::types::{CellId, CellKind, OwnerId, QueueKey, SubscriptionHandle, SubscriptionId};

/// Who may raise an event, and whether its subscribers are scope-checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EventScope {
    /// Raised by the owner only.
    Trigger,
    /// Raised by logical owners under the same reactive root.
    Local,
    /// Raised by any logical owner; subscribers may sit anywhere.
    Global,
}

impl EventScope {
    pub const fn writer_policy(self) -> WriterPolicy {
        match self {
            Self::Trigger => WriterPolicy::OwnerOnly,
            Self::Local => WriterPolicy::SameScope,
            Self::Global => WriterPolicy::AnyLogical,
        }
    }
}

struct EventInner {
    header: CellHeader,
    scope: EventScope,
    registry: RefCell<SubscriptionRegistry<()>>,
    runtime: ReactiveRuntime,
}

/// Something happened. Carries no value.
///
/// Raising queues one keyed dispatch; raising again before the flush
/// coalesces into it. Only Logical subscriptions are accepted.
#[derive(Clone)]
pub struct EventCell {
    inner: Rc<EventInner>,
}

impl std::fmt::Debug for EventCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCell")
            .field("id", &self.inner.header.id())
            .field("scope", &self.inner.scope)
            .field("subscribers", &self.inner.registry.borrow().len())
            .finish()
    }
}

impl EventCell {
    pub(crate) fn create(runtime: ReactiveRuntime, owner: OwnerId, scope: EventScope) -> Self {
        let id = runtime.next_cell_id();
        let scoped = scope != EventScope::Global;
        let inner = Rc::new(EventInner {
            header: CellHeader::new(id, owner, CellKind::Event, Relations::LOGICAL, scoped),
            scope,
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

    pub fn scope(&self) -> EventScope {
        self.inner.scope
    }

    pub fn is_detached(&self) -> bool {
        self.inner.header.is_detached()
    }

    /// Raises the event on behalf of `caller`.
    pub fn raise(&self, caller: OwnerId) -> Result<()> {
        let policy = self.inner.scope.writer_policy();
        self.inner
            .runtime
            .with_validator(|v| v.check_write(&self.inner.header, policy, caller))?;

        if self.inner.registry.borrow().is_empty() {
            return Ok(());
        }

        let weak = Rc::downgrade(&self.inner);
        let queued = self
            .inner
            .runtime
            .queue()
            .enqueue_keyed(QueueKey::Cell(self.id()), move || match weak.upgrade() {
                Some(inner) => EventCell { inner }.dispatch(),
                None => Ok(()),
            });
        trace!(target: "reactive::queue", cell = %self.id(), caller = %caller, queued, "event raised");
        Ok(())
    }

    pub fn subscribe(
        &self,
        callback: Callback<()>,
        context: OwnerId,
        relation: RelationKind,
    ) -> Result<SubscriptionHandle> {
        let runtime = &self.inner.runtime;
        runtime.with_validator(|v| v.check_subscribe(&self.inner.header, context, relation))?;

        let id = self.inner.registry.borrow_mut().insert(
            context,
            callback,
            relation,
            Delivery::Deferred,
            || runtime.next_subscription_id(),
        );
        Ok(SubscriptionHandle {
            cell: self.id(),
            id,
        })
    }

    /// Subscribes a Logical handler built from a closure.
    pub fn on_raised(
        &self,
        context: OwnerId,
        f: impl Fn() -> anyhow::Result<()> + 'static,
    ) -> Result<SubscriptionHandle> {
        self.subscribe(
            Callback::new(move |_: &()| f()),
            context,
            RelationKind::Logical,
        )
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        handle.cell == self.id() && self.inner.registry.borrow_mut().remove(handle.id)
    }

    /// Removes `callback` from `context`, or from every context when `None`.
    pub fn unsubscribe_callback(
        &self,
        callback: &Callback<()>,
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

    pub fn is_pending(&self) -> bool {
        self.inner
            .runtime
            .queue()
            .is_pending(QueueKey::Cell(self.id()))
    }

    fn dispatch(&self) -> anyhow::Result<()> {
        if self.is_detached() {
            return Ok(());
        }
        let targets = self.inner.registry.borrow().targets(None);
        deliver(
            self.inner.runtime.context_stack(),
            Frame::notify(self.owner(), self.id()),
            self.id(),
            targets,
            &(),
        )?;
        Ok(())
    }
}

impl CellControl for EventInner {
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
