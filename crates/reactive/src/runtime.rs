//! The reactive runtime: process-scoped state shared by every cell.
//!
//! A runtime owns the owner table, the notification queue, the execution
//! context stack and weak references to every live cell and ledger. There are
//! no statics, so independent runtimes (one per test, say) never share queues.
//! The runtime is single-threaded (`Rc`-based) and never blocks; the host
//! calls [`ReactiveRuntime::flush_queue`] once per tick.
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::access::{AccessValidator, Capabilities, OwnerSpec, OwnerTable, WriterPolicy};
use crate::cell::{
    CellControl, CellOptions, CellValue, ComputedFlag, DerivedCell, EventCell, EventScope, ListCell,
    Source, Upstream, ValueCell,
};
use crate::config::RuntimeConfig;
use crate::context::ExecutionContextStack;
use crate::error::{ReactiveError, Result};
use crate::queue::{FlushReport, NotificationQueue};
use crate::stats::{LedgerNumeric, ModifierLedger};
use crate::types::{CellId, LedgerId, OwnerId, SubscriptionHandle, SubscriptionId};

struct CellSlot {
    owner: OwnerId,
    control: Weak<dyn CellControl>,
}

struct RuntimeInner {
    config: RuntimeConfig,
    owners: RefCell<OwnerTable>,
    cells: RefCell<HashMap<CellId, CellSlot>>,
    ledgers: RefCell<HashMap<LedgerId, OwnerId>>,
    queue: NotificationQueue,
    stack: ExecutionContextStack,
    next_id: Cell<u64>,
}

/// What [`ReactiveRuntime::teardown`] released.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Cells owned by the torn-down owner, now detached.
    pub cells_detached: usize,
    /// Registry entries removed, both on owned cells and entries the owner
    /// held as a subscriber on other cells.
    pub subscriptions_removed: usize,
    pub ledgers_detached: usize,
    /// Pending notifications of owned cells that were cancelled.
    pub notifications_cancelled: usize,
}

/// Handle to a reactive runtime. Clones share the same state.
#[derive(Clone)]
pub struct ReactiveRuntime {
    inner: Rc<RuntimeInner>,
}

impl ReactiveRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let stack = ExecutionContextStack::new(config.max_context_depth);
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                owners: RefCell::new(OwnerTable::new()),
                cells: RefCell::new(HashMap::new()),
                ledgers: RefCell::new(HashMap::new()),
                queue: NotificationQueue::new(),
                stack,
                next_id: Cell::new(1),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    // ===== owners =====

    /// Registers a domain object. Its parent, if any, must already be registered.
    pub fn register_owner(&self, spec: OwnerSpec) -> Result<OwnerId> {
        if let Some(parent) = spec.parent {
            self.ensure_owner(parent)?;
        }
        let id = OwnerId(self.next_id());
        debug!(
            target: "reactive::runtime",
            owner = %id,
            name = %spec.name,
            capabilities = ?spec.capabilities,
            root = spec.reactive_root,
            "owner registered"
        );
        self.inner.owners.borrow_mut().insert(id, spec);
        Ok(id)
    }

    pub fn is_registered(&self, owner: OwnerId) -> bool {
        self.inner.owners.borrow().contains(owner)
    }

    pub fn owner_name(&self, owner: OwnerId) -> Option<String> {
        self.inner
            .owners
            .borrow()
            .get(owner)
            .map(|r| r.name.clone())
    }

    pub fn capabilities(&self, owner: OwnerId) -> Option<Capabilities> {
        self.inner
            .owners
            .borrow()
            .get(owner)
            .map(|r| r.capabilities)
    }

    /// Nearest reactive root of `owner`, or `None` when unscoped.
    pub fn resolve_scope(&self, owner: OwnerId) -> Option<OwnerId> {
        self.inner.owners.borrow().resolve_root(owner)
    }

    // ===== construction =====

    /// New state cell with the default options and `writer` policy.
    pub fn new_cell<T: CellValue>(
        &self,
        initial: T,
        owner: OwnerId,
        writer: WriterPolicy,
    ) -> Result<ValueCell<T>> {
        self.new_cell_with(initial, owner, CellOptions::state().with_writer(writer))
    }

    pub fn new_cell_with<T: CellValue>(
        &self,
        initial: T,
        owner: OwnerId,
        options: CellOptions,
    ) -> Result<ValueCell<T>> {
        self.ensure_owner(owner)?;
        Ok(ValueCell::create(self.clone(), initial, owner, options))
    }

    /// New derived cell computed eagerly from `compute`, recomputed whenever
    /// any of `sources` changes.
    pub fn new_derived<T: CellValue>(
        &self,
        owner: OwnerId,
        sources: &[&dyn Upstream],
        compute: impl Fn() -> T + 'static,
    ) -> Result<DerivedCell<T>> {
        DerivedCell::from_sources(self, owner, sources, compute)
    }

    pub fn new_flag_all(
        &self,
        owner: OwnerId,
        sources: &[&dyn Source<bool>],
    ) -> Result<ComputedFlag> {
        ComputedFlag::all(self, owner, sources)
    }

    pub fn new_flag_any(
        &self,
        owner: OwnerId,
        sources: &[&dyn Source<bool>],
    ) -> Result<ComputedFlag> {
        ComputedFlag::any(self, owner, sources)
    }

    pub fn new_flag_not(&self, owner: OwnerId, source: &dyn Source<bool>) -> Result<ComputedFlag> {
        ComputedFlag::not(self, owner, source)
    }

    pub fn new_event(&self, owner: OwnerId, scope: EventScope) -> Result<EventCell> {
        self.ensure_owner(owner)?;
        Ok(EventCell::create(self.clone(), owner, scope))
    }

    pub fn new_list<T: CellValue>(
        &self,
        items: Vec<T>,
        owner: OwnerId,
        writer: WriterPolicy,
    ) -> Result<ListCell<T>> {
        self.ensure_owner(owner)?;
        Ok(ListCell::create(self.clone(), items, owner, writer))
    }

    /// New modifier ledger whose output cell holds `base` converted to `N`.
    pub fn new_ledger<N: LedgerNumeric>(
        &self,
        base: f64,
        owner: OwnerId,
    ) -> Result<ModifierLedger<N>> {
        self.ensure_owner(owner)?;
        let id = LedgerId(self.next_id());
        self.inner.ledgers.borrow_mut().insert(id, owner);
        ModifierLedger::create(self.clone(), id, owner, base)
    }

    // ===== observation =====

    /// Removes the subscription behind `handle`. Returns `false` when the
    /// cell is gone or the entry was already removed.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let control = self
            .inner
            .cells
            .borrow()
            .get(&handle.cell)
            .and_then(|slot| slot.control.upgrade());
        control.is_some_and(|c| c.remove_subscription(handle.id))
    }

    // ===== lifecycle =====

    /// Runs every pending notification. Called by the host once per tick.
    pub fn flush_queue(&self) -> FlushReport {
        self.inner.queue.flush(self.inner.config.max_flush_actions)
    }

    pub fn queue(&self) -> &NotificationQueue {
        &self.inner.queue
    }

    pub fn pending_notifications(&self) -> usize {
        self.inner.queue.len()
    }

    /// Detaches every cell and ledger of `owner`, removes every subscription
    /// it holds on other cells, and unregisters it.
    pub fn teardown(&self, owner: OwnerId) -> Result<TeardownReport> {
        self.ensure_owner(owner)?;
        let mut report = TeardownReport::default();

        let live: Vec<(CellId, OwnerId, Rc<dyn CellControl>)> = self
            .inner
            .cells
            .borrow()
            .iter()
            .filter_map(|(id, slot)| slot.control.upgrade().map(|c| (*id, slot.owner, c)))
            .collect();

        for (id, cell_owner, control) in &live {
            if *cell_owner == owner {
                report.subscriptions_removed += control.detach();
                report.cells_detached += 1;
                if self.inner.queue.cancel((*id).into()) {
                    report.notifications_cancelled += 1;
                }
            } else {
                report.subscriptions_removed += control.purge_context(owner);
            }
        }
        drop(live);

        self.inner
            .cells
            .borrow_mut()
            .retain(|_, slot| slot.owner != owner && slot.control.strong_count() > 0);

        {
            let mut ledgers = self.inner.ledgers.borrow_mut();
            let before = ledgers.len();
            ledgers.retain(|_, ledger_owner| *ledger_owner != owner);
            report.ledgers_detached = before - ledgers.len();
        }

        self.inner.owners.borrow_mut().remove(owner);

        debug!(
            target: "reactive::runtime",
            owner = %owner,
            cells = report.cells_detached,
            subscriptions = report.subscriptions_removed,
            ledgers = report.ledgers_detached,
            "owner torn down"
        );
        Ok(report)
    }

    // ===== diagnostics =====

    /// Owner whose notification chain is currently executing.
    pub fn current_owner(&self) -> Option<OwnerId> {
        self.inner.stack.current_owner()
    }

    pub fn context_stack(&self) -> &ExecutionContextStack {
        &self.inner.stack
    }

    pub fn live_cells(&self) -> usize {
        self.inner
            .cells
            .borrow()
            .values()
            .filter(|slot| slot.control.strong_count() > 0)
            .count()
    }

    // ===== crate internals =====

    pub(crate) fn next_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    pub(crate) fn next_cell_id(&self) -> CellId {
        CellId(self.next_id())
    }

    pub(crate) fn next_subscription_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id())
    }

    pub(crate) fn ensure_owner(&self, owner: OwnerId) -> Result<()> {
        if self.is_registered(owner) {
            Ok(())
        } else {
            Err(ReactiveError::UnknownOwner { owner })
        }
    }

    pub(crate) fn with_validator<R>(&self, check: impl FnOnce(&AccessValidator<'_>) -> R) -> R {
        let owners = self.inner.owners.borrow();
        check(&AccessValidator::new(&owners))
    }

    pub(crate) fn track_cell(&self, id: CellId, owner: OwnerId, control: Weak<dyn CellControl>) {
        let mut cells = self.inner.cells.borrow_mut();
        cells.retain(|_, slot| slot.control.strong_count() > 0);
        cells.insert(id, CellSlot { owner, control });
    }

    pub(crate) fn is_ledger_live(&self, ledger: LedgerId) -> bool {
        self.inner.ledgers.borrow().contains_key(&ledger)
    }
}

impl Default for ReactiveRuntime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl std::fmt::Debug for ReactiveRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveRuntime")
            .field("config", &self.inner.config)
            .field("owners", &self.inner.owners.borrow().len())
            .field("cells", &self.inner.cells.borrow().len())
            .field("pending", &self.inner.queue.len())
            .finish()
    }
}
