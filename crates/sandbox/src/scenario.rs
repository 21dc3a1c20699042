//! A hero, a goblin and the observers around them.
use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use reactive_core::stats::{ModifierKind, ModifierLedger, StackPolicy};
use reactive_core::{
    ComputedFlag, DerivedCell, EventCell, EventScope, ListCell, ListDelta, OwnerId, OwnerSpec,
    ReactiveRuntime, RelationKind, RuntimeConfig, ValueCell, WriterPolicy,
};
use serde_json::json;
use tracing::{debug, info, warn};

struct Owners {
    hud: OwnerId,
    hero: OwnerId,
    goblin: OwnerId,
    combat: OwnerId,
    status: OwnerId,
}

pub struct Arena {
    runtime: ReactiveRuntime,
    owners: Owners,
    hp: ValueCell<i32>,
    max_hp: ModifierLedger<i32>,
    goblin_attack: ModifierLedger<i32>,
    alive: ComputedFlag,
    hp_ratio: DerivedCell<f64>,
    log: ListCell<String>,
    /// HUD-side copy of `log`, rebuilt only from delivered deltas.
    hud_log: Rc<RefCell<Vec<String>>>,
}

impl Arena {
    pub fn build(config: RuntimeConfig) -> Result<Self> {
        let runtime = ReactiveRuntime::new(config);

        let hud = runtime.register_owner(OwnerSpec::presenter("hud").as_root())?;
        let owners = Owners {
            hud,
            hero: runtime.register_owner(OwnerSpec::model("hero").with_parent(hud))?,
            goblin: runtime.register_owner(OwnerSpec::model("goblin"))?,
            combat: runtime.register_owner(OwnerSpec::manager("combat"))?,
            status: runtime.register_owner(OwnerSpec::interactor("status").with_parent(hud))?,
        };

        let max_hp = runtime.new_ledger::<i32>(100.0, owners.hero)?;
        max_hp.set_modifier(
            "gear/amulet",
            ModifierKind::AddMultiplier,
            0.2,
            StackPolicy::ReplaceLatest,
        )?;

        let hp = runtime.new_cell(max_hp.value(), owners.hero, WriterPolicy::AnyLogical)?;
        let hp_ratio = DerivedCell::map2(&hp, max_hp.cell(), &runtime, owners.hero, |hp, max| {
            if max == 0 {
                0.0
            } else {
                f64::from(hp) / f64::from(max)
            }
        })?;
        let dead = DerivedCell::map(&hp, &runtime, owners.hero, |hp| hp <= 0)?;
        let alive = runtime.new_flag_not(owners.hero, &dead)?;

        let goblin_attack = runtime.new_ledger::<i32>(9.0, owners.goblin)?;
        goblin_attack.set_modifier(
            "weapon/club",
            ModifierKind::OriginAdd,
            3.0,
            StackPolicy::ReplaceLatest,
        )?;

        let defeated = runtime.new_event(owners.hero, EventScope::Global)?;
        let log = runtime.new_list(Vec::new(), owners.combat, WriterPolicy::OwnerOnly)?;
        let hud_log = Rc::new(RefCell::new(Vec::new()));

        let arena = Self {
            runtime,
            owners,
            hp,
            max_hp,
            goblin_attack,
            alive,
            hp_ratio,
            log,
            hud_log,
        };
        arena.wire_hud()?;
        arena.wire_status()?;
        arena.wire_combat(&defeated)?;
        Ok(arena)
    }

    fn wire_hud(&self) -> Result<()> {
        let hud = self.owners.hud;
        self.hp_ratio
            .subscribe_fn(hud, RelationKind::Functional, |ratio| {
                info!(target: "sandbox::hud", health = %format!("{:.0}%", ratio * 100.0), "health bar");
                Ok(())
            })?;

        let mirror = Rc::clone(&self.hud_log);
        self.log
            .subscribe_fn(hud, RelationKind::Functional, move |batch: &Vec<ListDelta<String>>| {
                let mut lines = mirror.borrow_mut();
                for delta in batch {
                    anyhow::ensure!(delta.apply_to(&mut lines), "hud log diverged at {delta:?}");
                }
                Ok(())
            })?;
        Ok(())
    }

    /// The hero guards once below half health, halving incoming damage.
    fn wire_status(&self) -> Result<()> {
        let max_hp = self.max_hp.clone();
        let goblin_attack = self.goblin_attack.clone();
        self.hp.subscribe_fn(self.owners.status, RelationKind::Logical, move |hp| {
            if *hp > 0 && *hp * 2 < max_hp.value() {
                goblin_attack.set_modifier(
                    "status/guard",
                    ModifierKind::Multiplier,
                    0.5,
                    StackPolicy::ReplaceLatest,
                )?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn wire_combat(&self, defeated: &EventCell) -> Result<()> {
        let combat = self.owners.combat;

        let event = defeated.clone();
        self.alive.subscribe(
            reactive_core::Callback::new(move |alive: &bool| {
                if !alive {
                    event.raise(combat)?;
                }
                Ok(())
            }),
            combat,
            RelationKind::Logical,
        )?;

        let log = self.log.clone();
        defeated.on_raised(combat, move || {
            warn!(target: "sandbox::combat", "hero defeated");
            log.push("the hero falls".to_string(), combat)?;
            Ok(())
        })?;
        Ok(())
    }

    /// Runs one tick. Returns `false` once the hero is down.
    pub fn step(&self, tick: u32) -> Result<bool> {
        let combat = self.owners.combat;

        self.goblin_attack.set_modifier(
            "status/rage",
            ModifierKind::AddMultiplier,
            0.25,
            StackPolicy::Stack,
        )?;
        let damage = self.goblin_attack.value();
        self.hp.update(combat, |hp| (hp - damage).max(0))?;
        self.log
            .push(format!("tick {tick}: goblin hits for {damage}"), combat)?;

        let report = self.runtime.flush_queue();
        debug!(
            target: "sandbox::host",
            tick,
            executed = report.executed,
            failed = report.failed,
            cancelled = report.cancelled,
            truncated = report.truncated,
            "flushed"
        );
        if let Some(err) = report.fatal {
            return Err(err.into());
        }
        info!(
            target: "sandbox::host",
            tick,
            hp = self.hp.read(),
            attack = %self.goblin_attack.current(),
            "tick done"
        );
        Ok(self.alive.is_set())
    }

    pub fn summary(&self) -> serde_json::Value {
        json!({
            "hero": {
                "hp": self.hp.read(),
                "max_hp": self.max_hp.value(),
                "max_hp_breakdown": self.max_hp.current(),
                "alive": self.alive.is_set(),
            },
            "goblin_attack": {
                "value": self.goblin_attack.value(),
                "breakdown": self.goblin_attack.current(),
                "formula": self.goblin_attack.current().to_string(),
                "modifiers": self.goblin_attack.modifiers(),
            },
            "log": self.hud_log.borrow().clone(),
        })
    }

    /// Tears every owner down, leaves first.
    pub fn shutdown(self) -> Result<()> {
        let Owners {
            hud,
            hero,
            goblin,
            combat,
            status,
        } = self.owners;
        for owner in [status, combat, goblin, hero, hud] {
            let name = self.runtime.owner_name(owner).unwrap_or_default();
            let report = self.runtime.teardown(owner)?;
            info!(
                target: "sandbox::host",
                owner = %name,
                cells = report.cells_detached,
                subscriptions = report.subscriptions_removed,
                ledgers = report.ledgers_detached,
                "owner released"
            );
        }
        debug!(target: "sandbox::host", live_cells = self.runtime.live_cells(), "shutdown complete");
        Ok(())
    }
}
