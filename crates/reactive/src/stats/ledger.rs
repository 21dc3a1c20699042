//! Per-subject modifier ledgers.
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, trace};

use super::calculation::Calculation;
use super::modifier::{Modifier, ModifierHandle, ModifierKey, ModifierKind, StackId, StackPolicy};
use super::numeric::LedgerNumeric;
use crate::cell::{CellOptions, ValueCell};
use crate::error::{ReactiveError, Result};
use crate::runtime::ReactiveRuntime;
use crate::types::{LedgerId, OwnerId};

#[derive(Debug)]
struct KeySlot {
    policy: StackPolicy,
    instances: Vec<Modifier>,
}

#[derive(Debug, Default)]
struct LedgerState {
    base: f64,
    slots: BTreeMap<ModifierKey, KeySlot>,
    next_order: u64,
    next_stack: u32,
}

impl LedgerState {
    fn live(&self) -> impl Iterator<Item = &Modifier> {
        self.slots.values().flat_map(|slot| slot.instances.iter())
    }

    fn calculate(&self, base: f64) -> Calculation {
        Calculation::from_modifiers(base, self.live())
    }

    fn next_order(&mut self) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        order
    }
}

struct LedgerInner<N> {
    id: LedgerId,
    owner: OwnerId,
    state: RefCell<LedgerState>,
    output: ValueCell<N>,
    runtime: ReactiveRuntime,
}

/// Keyed collection of numeric modifiers deriving one value from a base.
///
/// Every mutation recomputes the result from the full live set and writes it,
/// converted to `N`, into the ledger's output cell. Subscribers observe the
/// ledger through [`ModifierLedger::cell`].
///
/// # Example
/// ```
/// # use reactive_core::*;
/// # use reactive_core::stats::{ModifierKind, StackPolicy};
/// let runtime = ReactiveRuntime::default();
/// let hero = runtime.register_owner(OwnerSpec::model("hero")).unwrap();
/// let attack = runtime.new_ledger::<i32>(100.0, hero).unwrap();
///
/// attack.set_modifier("weapon/axe", ModifierKind::OriginAdd, 20.0, StackPolicy::ReplaceLatest).unwrap();
/// attack.set_modifier("buff/rage", ModifierKind::AddMultiplier, 0.5, StackPolicy::ReplaceLatest).unwrap();
/// assert_eq!(attack.value(), 180);
/// ```
pub struct ModifierLedger<N> {
    inner: Rc<LedgerInner<N>>,
}

impl<N> Clone for ModifierLedger<N> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<N: LedgerNumeric> std::fmt::Debug for ModifierLedger<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModifierLedger")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner)
            .field("state", &*self.inner.state.borrow())
            .field("value", &self.value())
            .finish()
    }
}

impl<N: LedgerNumeric> ModifierLedger<N> {
    pub(crate) fn create(
        runtime: ReactiveRuntime,
        id: LedgerId,
        owner: OwnerId,
        base: f64,
    ) -> Result<Self> {
        let output = runtime.new_cell_with(
            N::from_ledger(base),
            owner,
            CellOptions::state().with_label(id.to_string()),
        )?;
        debug!(target: "reactive::ledger", ledger = %id, owner = %owner, base, "ledger created");
        Ok(Self {
            inner: Rc::new(LedgerInner {
                id,
                owner,
                state: RefCell::new(LedgerState {
                    base,
                    ..LedgerState::default()
                }),
                output,
                runtime,
            }),
        })
    }

    pub fn id(&self) -> LedgerId {
        self.inner.id
    }

    pub fn owner(&self) -> OwnerId {
        self.inner.owner
    }

    /// False once the owner has been torn down.
    pub fn is_attached(&self) -> bool {
        self.inner.runtime.is_ledger_live(self.inner.id)
    }

    /// Output cell holding the converted result.
    pub fn cell(&self) -> &ValueCell<N> {
        &self.inner.output
    }

    pub fn value(&self) -> N {
        self.inner.output.read()
    }

    pub fn base(&self) -> f64 {
        self.inner.state.borrow().base
    }

    /// Adds or updates the modifier under `key`.
    ///
    /// Under [`StackPolicy::ReplaceLatest`] the existing instance is
    /// overwritten in place and keeps its insertion order. Under
    /// [`StackPolicy::Stack`] a new instance with a fresh [`StackId`] is added.
    /// Re-setting a key under the other policy fails with `PolicyConflict`.
    pub fn set_modifier(
        &self,
        key: impl Into<ModifierKey>,
        kind: ModifierKind,
        value: f64,
        policy: StackPolicy,
    ) -> Result<ModifierHandle> {
        self.ensure_attached()?;
        let key = key.into();

        let stack = {
            let mut state = self.inner.state.borrow_mut();
            if let Some(slot) = state.slots.get(&key)
                && slot.policy != policy
            {
                return Err(ReactiveError::PolicyConflict {
                    ledger: self.inner.id,
                    key: key.to_string(),
                });
            }

            match policy {
                StackPolicy::ReplaceLatest => {
                    let order = state.next_order();
                    let slot = state.slots.entry(key.clone()).or_insert_with(|| KeySlot {
                        policy,
                        instances: Vec::with_capacity(1),
                    });
                    match slot.instances.first_mut() {
                        Some(existing) => {
                            existing.kind = kind;
                            existing.value = value;
                        }
                        None => slot.instances.push(Modifier {
                            key: key.clone(),
                            kind,
                            value,
                            order,
                            stack: None,
                        }),
                    }
                    None
                }
                StackPolicy::Stack => {
                    let order = state.next_order();
                    let stack = StackId(state.next_stack);
                    state.next_stack += 1;
                    state
                        .slots
                        .entry(key.clone())
                        .or_insert_with(|| KeySlot {
                            policy,
                            instances: Vec::new(),
                        })
                        .instances
                        .push(Modifier {
                            key: key.clone(),
                            kind,
                            value,
                            order,
                            stack: Some(stack),
                        });
                    Some(stack)
                }
            }
        };

        trace!(
            target: "reactive::ledger",
            ledger = %self.inner.id,
            key = %key,
            kind = %kind,
            value,
            stack = ?stack,
            "modifier set"
        );
        self.recompute()?;
        Ok(ModifierHandle {
            ledger: self.inner.id,
            key,
            stack,
        })
    }

    /// Removes every instance of `key`, or only the instance `stack` when given.
    /// Returns how many instances were removed.
    pub fn remove_modifier(
        &self,
        key: impl Into<ModifierKey>,
        stack: Option<StackId>,
    ) -> Result<usize> {
        self.ensure_attached()?;
        let key = key.into();

        let removed = {
            let mut state = self.inner.state.borrow_mut();
            let Some(slot) = state.slots.get_mut(&key) else {
                return Ok(0);
            };
            let before = slot.instances.len();
            match stack {
                Some(stack) => slot.instances.retain(|m| m.stack != Some(stack)),
                None => slot.instances.clear(),
            }
            let removed = before - slot.instances.len();
            if slot.instances.is_empty() {
                state.slots.remove(&key);
            }
            removed
        };

        if removed > 0 {
            trace!(target: "reactive::ledger", ledger = %self.inner.id, key = %key, removed, "modifier removed");
            self.recompute()?;
        }
        Ok(removed)
    }

    /// Removes the instance a previous `set_modifier` returned.
    pub fn remove_handle(&self, handle: &ModifierHandle) -> Result<usize> {
        if handle.ledger != self.inner.id {
            return Err(ReactiveError::UnknownLedgerInstance {
                ledger: handle.ledger,
            });
        }
        self.remove_modifier(handle.key.clone(), handle.stack)
    }

    /// Drops every modifier. Returns how many instances were removed.
    pub fn clear(&self) -> Result<usize> {
        self.ensure_attached()?;
        let removed = {
            let mut state = self.inner.state.borrow_mut();
            let removed = state.live().count();
            state.slots.clear();
            removed
        };
        if removed > 0 {
            self.recompute()?;
        }
        Ok(removed)
    }

    pub fn set_base(&self, base: f64) -> Result<()> {
        self.ensure_attached()?;
        self.inner.state.borrow_mut().base = base;
        self.recompute()
    }

    /// Result of the formula over the live set for an arbitrary `base`.
    pub fn calculate(&self, base: f64) -> f64 {
        self.breakdown(base).result
    }

    pub fn breakdown(&self, base: f64) -> Calculation {
        self.inner.state.borrow().calculate(base)
    }

    /// Breakdown for the ledger's own base.
    pub fn current(&self) -> Calculation {
        let state = self.inner.state.borrow();
        state.calculate(state.base)
    }

    /// Combined term of `kind`: sum for additive kinds, product for
    /// [`ModifierKind::Multiplier`].
    pub fn contribution(&self, kind: ModifierKind) -> f64 {
        let state = self.inner.state.borrow();
        let values = state.live().filter(|m| m.kind == kind).map(|m| m.value);
        if kind.is_product() {
            values.product()
        } else {
            values.sum()
        }
    }

    /// Live modifiers in insertion order.
    pub fn modifiers(&self) -> Vec<Modifier> {
        let mut live: Vec<Modifier> = self.inner.state.borrow().live().cloned().collect();
        live.sort_by_key(|m| m.order);
        live
    }

    pub fn len(&self) -> usize {
        self.inner.state.borrow().live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.borrow().slots.is_empty()
    }

    fn ensure_attached(&self) -> Result<()> {
        if self.is_attached() {
            Ok(())
        } else {
            Err(ReactiveError::UnknownLedgerInstance {
                ledger: self.inner.id,
            })
        }
    }

    fn recompute(&self) -> Result<()> {
        let calc = self.current();
        let value = N::from_ledger(calc.result);
        let changed = self.inner.output.write(value, self.inner.owner)?;
        trace!(
            target: "reactive::ledger",
            ledger = %self.inner.id,
            formula = %calc,
            changed,
            "ledger recomputed"
        );
        Ok(())
    }
}
