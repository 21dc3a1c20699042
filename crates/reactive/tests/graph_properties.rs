use std::cell::{Cell, RefCell};
use std::rc::Rc;

use reactive_core::stats::{ModifierKind, StackPolicy};
use reactive_core::{
    Callback, DerivedCell, OwnerSpec, QueueKey, ReactiveError, ReactiveRuntime, RelationKind,
    RuntimeConfig, WriterPolicy,
};

fn counter() -> (Rc<Cell<u32>>, Callback<i32>) {
    let hits = Rc::new(Cell::new(0));
    let counted = Rc::clone(&hits);
    let callback = Callback::infallible(move |_: &i32| counted.set(counted.get() + 1));
    (hits, callback)
}

#[test]
fn write_then_read_and_idempotent_rewrite() {
    let runtime = ReactiveRuntime::default();
    let hero = runtime.register_owner(OwnerSpec::model("hero")).unwrap();
    let quests = runtime
        .register_owner(OwnerSpec::manager("quests"))
        .unwrap();
    let hp = runtime
        .new_cell(100, hero, WriterPolicy::OwnerOnly)
        .unwrap();
    let (hits, callback) = counter();
    hp.subscribe(callback, quests, RelationKind::Logical)
        .unwrap();

    assert_eq!(hp.write(60, hero), Ok(true));
    assert_eq!(hp.read(), 60);
    runtime.flush_queue();
    assert_eq!(hits.get(), 1);

    assert_eq!(hp.write(60, hero), Ok(false));
    runtime.flush_queue();
    assert_eq!(hits.get(), 1);
}

#[test]
fn duplicate_subscribe_is_idempotent() {
    let runtime = ReactiveRuntime::default();
    let hero = runtime.register_owner(OwnerSpec::model("hero")).unwrap();
    let hud = runtime.register_owner(OwnerSpec::presenter("hud")).unwrap();
    let hp = runtime.new_cell(1, hero, WriterPolicy::OwnerOnly).unwrap();
    let (hits, callback) = counter();

    let first = hp
        .subscribe(callback.clone(), hud, RelationKind::Functional)
        .unwrap();
    let second = hp
        .subscribe(callback.clone(), hud, RelationKind::Functional)
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(hp.subscriber_count(), 1);

    hp.write(2, hero).unwrap();
    runtime.flush_queue();
    assert_eq!(hits.get(), 1);

    assert_eq!(hp.unsubscribe_callback(&callback, Some(hud)), 1);
    assert_eq!(hp.subscriber_count(), 0);
}

#[test]
fn empty_ledger_calculates_base() {
    let runtime = ReactiveRuntime::default();
    let hero = runtime.register_owner(OwnerSpec::model("hero")).unwrap();
    let speed = runtime.new_ledger::<f64>(4.25, hero).unwrap();
    assert_eq!(speed.calculate(4.25), 4.25);
    assert_eq!(speed.calculate(-3.0), -3.0);
}

#[test]
fn stacked_poison_contributes_each_instance() {
    let runtime = ReactiveRuntime::default();
    let hero = runtime.register_owner(OwnerSpec::model("hero")).unwrap();
    let damage = runtime.new_ledger::<i64>(0.0, hero).unwrap();

    let a = damage
        .set_modifier(
            "debuff/poison",
            ModifierKind::OriginAdd,
            5.0,
            StackPolicy::Stack,
        )
        .unwrap();
    damage
        .set_modifier(
            "debuff/poison",
            ModifierKind::OriginAdd,
            3.0,
            StackPolicy::Stack,
        )
        .unwrap();
    assert_eq!(damage.contribution(ModifierKind::OriginAdd), 8.0);

    damage.remove_handle(&a).unwrap();
    assert_eq!(damage.contribution(ModifierKind::OriginAdd), 3.0);
}

#[test]
fn formula_matches_reference_breakdown() {
    let runtime = ReactiveRuntime::default();
    let hero = runtime.register_owner(OwnerSpec::model("hero")).unwrap();
    let attack = runtime.new_ledger::<i32>(100.0, hero).unwrap();
    let policy = StackPolicy::ReplaceLatest;

    attack
        .set_modifier("a", ModifierKind::OriginAdd, 20.0, policy)
        .unwrap();
    attack
        .set_modifier("b", ModifierKind::AddMultiplier, 0.5, policy)
        .unwrap();
    attack
        .set_modifier("c", ModifierKind::Multiplier, 2.0, policy)
        .unwrap();
    attack
        .set_modifier("d", ModifierKind::FinalAdd, -10.0, policy)
        .unwrap();

    assert_eq!(attack.calculate(100.0), 350.0);
    assert_eq!(attack.value(), 350);
}

#[test]
fn keyed_enqueue_runs_once_per_flush() {
    let runtime = ReactiveRuntime::default();
    let hits = Rc::new(Cell::new(0));
    for _ in 0..2 {
        let counted = Rc::clone(&hits);
        runtime.queue().enqueue_keyed(QueueKey::Custom(7), move || {
            counted.set(counted.get() + 1);
            Ok(())
        });
    }
    let report = runtime.flush_queue();
    assert_eq!(hits.get(), 1);
    assert_eq!(report.executed, 1);
}

#[test]
fn scope_mismatch_only_across_roots() {
    let runtime = ReactiveRuntime::default();
    let inventory = runtime
        .register_owner(OwnerSpec::presenter("inventory").as_root())
        .unwrap();
    let shop = runtime
        .register_owner(OwnerSpec::presenter("shop").as_root())
        .unwrap();
    let bag = runtime
        .register_owner(OwnerSpec::model("bag").with_parent(inventory))
        .unwrap();
    let sorter = runtime
        .register_owner(OwnerSpec::interactor("sorter").with_parent(inventory))
        .unwrap();
    let buyer = runtime
        .register_owner(OwnerSpec::interactor("buyer").with_parent(shop))
        .unwrap();
    let gold = runtime
        .new_cell(0_i32, bag, WriterPolicy::OwnerOnly)
        .unwrap();

    let (_, callback) = counter();
    assert!(
        gold.subscribe(callback.clone(), sorter, RelationKind::Logical)
            .is_ok()
    );
    assert_eq!(
        gold.subscribe(callback.clone(), buyer, RelationKind::Logical),
        Err(ReactiveError::ScopeMismatch {
            cell: gold.id(),
            context: buyer,
            context_root: shop,
            owner_root: inventory,
        })
    );
    // Functional observation is never scope-bound.
    assert!(
        gold.subscribe(callback, buyer, RelationKind::Functional)
            .is_ok()
    );
}

#[test]
fn derived_is_fresh_before_flush() {
    let runtime = ReactiveRuntime::default();
    let hero = runtime.register_owner(OwnerSpec::model("hero")).unwrap();
    let hp = runtime
        .new_cell(80_i32, hero, WriterPolicy::OwnerOnly)
        .unwrap();
    let max_hp = runtime
        .new_cell(100_i32, hero, WriterPolicy::OwnerOnly)
        .unwrap();
    let ratio = DerivedCell::map2(&hp, &max_hp, &runtime, hero, |hp, max| {
        f64::from(hp) / f64::from(max)
    })
    .unwrap();

    hp.write(25, hero).unwrap();
    assert_eq!(ratio.read(), 0.25);
    assert_eq!(runtime.pending_notifications(), 0);
}

#[test]
fn ledger_feeds_derived_cell() {
    let runtime = ReactiveRuntime::default();
    let hero = runtime.register_owner(OwnerSpec::model("hero")).unwrap();
    let max_hp = runtime.new_ledger::<i32>(100.0, hero).unwrap();
    let hp = runtime
        .new_cell(100_i32, hero, WriterPolicy::OwnerOnly)
        .unwrap();
    let missing = DerivedCell::map2(max_hp.cell(), &hp, &runtime, hero, |max, hp| max - hp)
        .unwrap();

    max_hp
        .set_modifier(
            "gear/amulet",
            ModifierKind::AddMultiplier,
            0.2,
            StackPolicy::ReplaceLatest,
        )
        .unwrap();
    assert_eq!(missing.read(), 20);
}

#[test]
fn failing_subscriber_does_not_block_others() {
    let runtime = ReactiveRuntime::default();
    let hero = runtime.register_owner(OwnerSpec::model("hero")).unwrap();
    let a = runtime.register_owner(OwnerSpec::manager("a")).unwrap();
    let b = runtime.register_owner(OwnerSpec::manager("b")).unwrap();
    let hp = runtime.new_cell(1, hero, WriterPolicy::OwnerOnly).unwrap();

    hp.subscribe_fn(a, RelationKind::Logical, |_| anyhow::bail!("boom"))
        .unwrap();
    let (hits, callback) = counter();
    hp.subscribe(callback, b, RelationKind::Logical).unwrap();

    hp.write(2, hero).unwrap();
    let report = runtime.flush_queue();
    assert_eq!(hits.get(), 1);
    assert_eq!(report.failed, 0);
}

#[test]
fn mutual_derivation_is_a_fatal_cycle() {
    let runtime = ReactiveRuntime::default();
    let hero = runtime.register_owner(OwnerSpec::model("hero")).unwrap();
    let seed = runtime
        .new_cell(1_i32, hero, WriterPolicy::OwnerOnly)
        .unwrap();
    let echo = runtime
        .new_cell(0_i32, hero, WriterPolicy::OwnerOnly)
        .unwrap();
    let doubled = DerivedCell::map2(&seed, &echo, &runtime, hero, |s, e| s * 2 + e).unwrap();

    // Writing the derived value back into one of its own inputs closes the loop.
    let back = echo.clone();
    doubled
        .subscribe_fn(hero, RelationKind::Functional, move |v| {
            back.write(*v, hero)?;
            Ok(())
        })
        .unwrap();

    let err = seed.write(2, hero).unwrap_err();
    assert!(err.is_fatal(), "unexpected error: {err}");
    assert_eq!(runtime.context_stack().depth(), 0);
}

#[test]
fn cycle_reached_from_deferred_callback_surfaces_in_flush_report() {
    let runtime = ReactiveRuntime::default();
    let hero = runtime.register_owner(OwnerSpec::model("hero")).unwrap();
    let director = runtime
        .register_owner(OwnerSpec::manager("director"))
        .unwrap();
    let seed = runtime
        .new_cell(1_i32, hero, WriterPolicy::AnyLogical)
        .unwrap();
    let echo = runtime
        .new_cell(0_i32, hero, WriterPolicy::OwnerOnly)
        .unwrap();
    let doubled = DerivedCell::map2(&seed, &echo, &runtime, hero, |s, e| s * 2 + e).unwrap();
    let back = echo.clone();
    doubled
        .subscribe_fn(hero, RelationKind::Functional, move |v| {
            back.write(*v, hero)?;
            Ok(())
        })
        .unwrap();

    let round = runtime
        .new_cell(0_u32, director, WriterPolicy::OwnerOnly)
        .unwrap();
    let target = seed.clone();
    round
        .subscribe_fn(director, RelationKind::Logical, move |_| {
            target.write(5, director)?;
            Ok(())
        })
        .unwrap();

    round.write(1, director).unwrap();
    let report = runtime.flush_queue();
    assert_eq!(report.failed, 1);
    assert!(matches!(
        report.fatal,
        Some(ReactiveError::CycleDetected { .. })
    ));
    assert_eq!(runtime.context_stack().depth(), 0);
}

#[test]
fn runaway_nesting_hits_depth_limit() {
    let runtime = ReactiveRuntime::new(RuntimeConfig::default().with_max_context_depth(4));
    let hero = runtime.register_owner(OwnerSpec::model("hero")).unwrap();

    let source = runtime
        .new_cell(0_i32, hero, WriterPolicy::OwnerOnly)
        .unwrap();
    let mut chain = vec![DerivedCell::map(&source, &runtime, hero, |v| v).unwrap()];
    for _ in 0..6 {
        let next = DerivedCell::map(&chain[chain.len() - 1], &runtime, hero, |v| v + 1).unwrap();
        chain.push(next);
    }

    assert!(matches!(
        source.write(1, hero),
        Err(ReactiveError::ReentrancyLimit { limit: 4, .. })
    ));
}

#[test]
fn long_acyclic_chain_stays_fresh_under_default_limit() {
    let runtime = ReactiveRuntime::default();
    let hero = runtime.register_owner(OwnerSpec::model("hero")).unwrap();
    let source = runtime
        .new_cell(0_i32, hero, WriterPolicy::OwnerOnly)
        .unwrap();

    let mut chain = vec![DerivedCell::map(&source, &runtime, hero, |v| v).unwrap()];
    for _ in 0..39 {
        let next = DerivedCell::map(&chain[chain.len() - 1], &runtime, hero, |v| v + 1).unwrap();
        chain.push(next);
    }
    let (hits, callback) = counter();
    chain[chain.len() - 1]
        .subscribe(callback, hero, RelationKind::Functional)
        .unwrap();

    assert_eq!(source.write(1, hero), Ok(true));
    assert_eq!(chain[chain.len() - 1].read(), 40);
    assert_eq!(hits.get(), 1);
    assert_eq!(runtime.context_stack().depth(), 0);
}

#[test]
fn chain_as_deep_as_the_limit_is_accepted() {
    let runtime = ReactiveRuntime::new(RuntimeConfig::default().with_max_context_depth(4));
    let hero = runtime.register_owner(OwnerSpec::model("hero")).unwrap();
    let source = runtime
        .new_cell(0_i32, hero, WriterPolicy::OwnerOnly)
        .unwrap();

    // source, first and second dispatch; the third has no subscribers.
    let first = DerivedCell::map(&source, &runtime, hero, |v| v).unwrap();
    let second = DerivedCell::map(&first, &runtime, hero, |v| v * 2).unwrap();
    let third = DerivedCell::map(&second, &runtime, hero, |v| v + 1).unwrap();

    assert_eq!(source.write(3, hero), Ok(true));
    assert_eq!(third.read(), 7);
}

#[test]
fn teardown_releases_everything_owned() {
    let runtime = ReactiveRuntime::default();
    let hero = runtime.register_owner(OwnerSpec::model("hero")).unwrap();
    let hud = runtime.register_owner(OwnerSpec::presenter("hud")).unwrap();
    let hp = runtime
        .new_cell(10_i32, hero, WriterPolicy::OwnerOnly)
        .unwrap();
    let armor = runtime.new_ledger::<i32>(5.0, hero).unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    hp.subscribe_fn(hud, RelationKind::Functional, move |v| {
        log.borrow_mut().push(*v);
        Ok(())
    })
    .unwrap();
    hp.write(9, hero).unwrap();

    let report = runtime.teardown(hero).unwrap();
    assert_eq!(report.cells_detached, 2);
    assert_eq!(report.ledgers_detached, 1);
    assert_eq!(report.subscriptions_removed, 1);
    assert_eq!(report.notifications_cancelled, 1);

    runtime.flush_queue();
    assert!(seen.borrow().is_empty());
    assert_eq!(hp.subscriber_count(), 0);
    assert!(!armor.is_attached());
    assert!(matches!(
        hp.subscribe_fn(hud, RelationKind::Functional, |_| Ok(())),
        Err(ReactiveError::Detached { .. })
    ));
    assert_eq!(runtime.owner_name(hero), None);
}
