//! Observable lists with batched deltas.
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::{CellControl, CellHeader, CellValue};
use crate::access::{RelationKind, Relations, WriterPolicy};
use crate::context::Frame;
use crate::error::{ReactiveError, Result};
use crate::registry::{Callback, Delivery, SubscriptionRegistry, deliver};
use crate::runtime::ReactiveRuntime;
use crate::types::{CellId, CellKind, OwnerId, QueueKey, SubscriptionHandle, SubscriptionId};

/// One structural change to a [`ListCell`].
///
/// Indices refer to the list as it was right before the change, so a batch
/// replays correctly in order.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ListDelta<T> {
    /// Appended at the end.
    Add { item: T },
    /// Removed by value; `index` is where it was found.
    Remove { index: usize, item: T },
    Insert { index: usize, item: T },
    RemoveAt { index: usize, item: T },
    Replace { index: usize, old: T, new: T },
    Move { from: usize, to: usize, item: T },
    Clear { removed: Vec<T> },
}

impl<T: Clone> ListDelta<T> {
    /// Replays this change on a mirror of the list.
    ///
    /// Returns `false` (leaving `items` untouched) when an index does not
    /// fit, which means the mirror has diverged.
    pub fn apply_to(&self, items: &mut Vec<T>) -> bool {
        match self {
            Self::Add { item } => items.push(item.clone()),
            Self::Remove { index, .. } | Self::RemoveAt { index, .. } => {
                if *index >= items.len() {
                    return false;
                }
                items.remove(*index);
            }
            Self::Insert { index, item } => {
                if *index > items.len() {
                    return false;
                }
                items.insert(*index, item.clone());
            }
            Self::Replace { index, new, .. } => match items.get_mut(*index) {
                Some(slot) => *slot = new.clone(),
                None => return false,
            },
            Self::Move { from, to, .. } => {
                if *from >= items.len() || *to >= items.len() {
                    return false;
                }
                let moved = items.remove(*from);
                items.insert(*to, moved);
            }
            Self::Clear { .. } => items.clear(),
        }
        true
    }
}

struct ListInner<T> {
    header: CellHeader,
    writer: WriterPolicy,
    items: RefCell<Vec<T>>,
    pending: RefCell<Vec<ListDelta<T>>>,
    registry: RefCell<SubscriptionRegistry<Vec<ListDelta<T>>>>,
    runtime: ReactiveRuntime,
}

/// Observable list.
///
/// Every mutation is checked against the writer policy, applied at once and
/// recorded as a [`ListDelta`]. Subscribers receive all deltas accumulated
/// since the previous flush as one batch.
pub struct ListCell<T> {
    inner: Rc<ListInner<T>>,
}

impl<T> Clone for ListCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: CellValue> std::fmt::Debug for ListCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListCell")
            .field("id", &self.inner.header.id())
            .field("items", &*self.inner.items.borrow())
            .field("pending", &self.inner.pending.borrow().len())
            .finish()
    }
}

impl<T: CellValue> ListCell<T> {
    pub(crate) fn create(
        runtime: ReactiveRuntime,
        items: Vec<T>,
        owner: OwnerId,
        writer: WriterPolicy,
    ) -> Self {
        let id = runtime.next_cell_id();
        let inner = Rc::new(ListInner {
            header: CellHeader::new(id, owner, CellKind::List, Relations::all(), true),
            writer,
            items: RefCell::new(items),
            pending: RefCell::new(Vec::new()),
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

    pub fn is_detached(&self) -> bool {
        self.inner.header.is_detached()
    }

    pub fn read(&self) -> Vec<T> {
        self.inner.items.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.inner.items.borrow())
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.items.borrow().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    pub fn push(&self, item: T, caller: OwnerId) -> Result<()> {
        self.authorize(caller)?;
        self.inner.items.borrow_mut().push(item.clone());
        self.record(ListDelta::Add { item });
        Ok(())
    }

    pub fn insert(&self, index: usize, item: T, caller: OwnerId) -> Result<()> {
        self.authorize(caller)?;
        let len = self.len();
        if index > len {
            return Err(self.out_of_range(index, len));
        }
        self.inner.items.borrow_mut().insert(index, item.clone());
        self.record(ListDelta::Insert { index, item });
        Ok(())
    }

    /// Removes the first element equal to `item`. Returns `Ok(false)` when
    /// there is none.
    pub fn remove(&self, item: &T, caller: OwnerId) -> Result<bool> {
        self.authorize(caller)?;
        let position = self
            .inner
            .items
            .borrow()
            .iter()
            .position(|x| !x.differs_from(item));
        let Some(index) = position else {
            return Ok(false);
        };
        let item = self.inner.items.borrow_mut().remove(index);
        self.record(ListDelta::Remove { index, item });
        Ok(true)
    }

    pub fn remove_at(&self, index: usize, caller: OwnerId) -> Result<T> {
        self.authorize(caller)?;
        let len = self.len();
        if index >= len {
            return Err(self.out_of_range(index, len));
        }
        let item = self.inner.items.borrow_mut().remove(index);
        self.record(ListDelta::RemoveAt {
            index,
            item: item.clone(),
        });
        Ok(item)
    }

    /// Replaces the element at `index`, returning the previous one.
    /// Replacing with an equal value records nothing.
    pub fn replace(&self, index: usize, item: T, caller: OwnerId) -> Result<T> {
        self.authorize(caller)?;
        let old = {
            let mut items = self.inner.items.borrow_mut();
            let len = items.len();
            let Some(slot) = items.get_mut(index) else {
                return Err(self.out_of_range(index, len));
            };
            if !slot.differs_from(&item) {
                return Ok(slot.clone());
            }
            std::mem::replace(slot, item.clone())
        };
        self.record(ListDelta::Replace {
            index,
            old: old.clone(),
            new: item,
        });
        Ok(old)
    }

    pub fn move_item(&self, from: usize, to: usize, caller: OwnerId) -> Result<()> {
        self.authorize(caller)?;
        let len = self.len();
        if from >= len {
            return Err(self.out_of_range(from, len));
        }
        if to >= len {
            return Err(self.out_of_range(to, len));
        }
        if from == to {
            return Ok(());
        }
        let item = {
            let mut items = self.inner.items.borrow_mut();
            let item = items.remove(from);
            items.insert(to, item.clone());
            item
        };
        self.record(ListDelta::Move { from, to, item });
        Ok(())
    }

    /// Empties the list. Returns how many elements were removed.
    pub fn clear(&self, caller: OwnerId) -> Result<usize> {
        self.authorize(caller)?;
        let removed = std::mem::take(&mut *self.inner.items.borrow_mut());
        if removed.is_empty() {
            return Ok(0);
        }
        let count = removed.len();
        self.record(ListDelta::Clear { removed });
        Ok(count)
    }

    pub fn subscribe(
        &self,
        callback: Callback<Vec<ListDelta<T>>>,
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

    pub fn subscribe_fn(
        &self,
        context: OwnerId,
        relation: RelationKind,
        f: impl Fn(&Vec<ListDelta<T>>) -> anyhow::Result<()> + 'static,
    ) -> Result<SubscriptionHandle> {
        self.subscribe(Callback::new(f), context, relation)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        handle.cell == self.id() && self.inner.registry.borrow_mut().remove(handle.id)
    }

    /// Removes `callback` from `context`, or from every context when `None`.
    pub fn unsubscribe_callback(
        &self,
        callback: &Callback<Vec<ListDelta<T>>>,
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

    /// Deltas recorded since the last flush.
    pub fn pending_deltas(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    fn authorize(&self, caller: OwnerId) -> Result<()> {
        self.inner
            .runtime
            .with_validator(|v| v.check_write(&self.inner.header, self.inner.writer, caller))
    }

    fn out_of_range(&self, index: usize, len: usize) -> ReactiveError {
        ReactiveError::IndexOutOfRange {
            cell: self.id(),
            index,
            len,
        }
    }

    fn record(&self, delta: ListDelta<T>) {
        if self.inner.registry.borrow().is_empty() {
            return;
        }
        self.inner.pending.borrow_mut().push(delta);

        let weak = Rc::downgrade(&self.inner);
        self.inner
            .runtime
            .queue()
            .enqueue_keyed(QueueKey::Cell(self.id()), move || match weak.upgrade() {
                Some(inner) => ListCell { inner }.deliver_pending(),
                None => Ok(()),
            });
    }

    fn deliver_pending(&self) -> anyhow::Result<()> {
        let batch = std::mem::take(&mut *self.inner.pending.borrow_mut());
        if batch.is_empty() || self.is_detached() {
            return Ok(());
        }
        let targets = self.inner.registry.borrow().targets(None);
        deliver(
            self.inner.runtime.context_stack(),
            Frame::notify(self.owner(), self.id()),
            self.id(),
            targets,
            &batch,
        )?;
        Ok(())
    }
}

impl<T: CellValue> CellControl for ListInner<T> {
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
        self.pending.borrow_mut().clear();
        self.registry.borrow_mut().clear()
    }
}
