//! End-to-end coverage of the linksto cursor: planning, production,
//! morphing, preevaluation, freeze/thaw and the budget protocol, all over
//! the in-memory store.

use gravel::budget::Budget;
use gravel::error::Interrupt;
use gravel::freeze::FreezeFlags;
use gravel::iter::fixed::fixed_cursor;
use gravel::iter::linksto::{linksto_cursor, linksto_cursor_plain, LinkstoSpec};
use gravel::iter::{Cursor, Direction, PrimitiveSummary, Restriction};
use gravel::pdb::{Guid, Id, Linkage, MemStore, Primitive, Store, ID_MAX};
use rand::prelude::StdRng;
use rand::{Rng, SeedableRng};

/// Dense store: primitive `i` has guid `0x1000 + i`; `links(i)` names its
/// linkage targets by primitive id.
fn dense_store(n: u64, links: impl Fn(u64) -> Vec<(Linkage, u64)>) -> Store {
    let mut b = MemStore::builder();
    for i in 0..n {
        let mut p = Primitive::new(Guid(0x1000 + i as u128));
        for (linkage, target) in links(i) {
            p = p.with_link(linkage, Guid(0x1000 + target as u128));
        }
        b.insert(p);
    }
    b.build()
}

fn guid_of(id: u64) -> Guid {
    Guid(0x1000 + id as u128)
}

fn drain(c: &Cursor) -> Vec<Id> {
    let mut out = Vec::new();
    let mut b = Budget::new(1_000_000);
    for _ in 0..2_000_000 {
        match c.next(&mut b) {
            Ok(id) => out.push(id),
            Err(Interrupt::No) => return out,
            Err(Interrupt::More) => b = Budget::new(1_000_000),
            Err(Interrupt::Fail(e)) => panic!("cursor failed: {e}"),
        }
    }
    panic!("cursor did not terminate");
}

fn run_statistics(c: &Cursor) {
    let mut b = Budget::new(10_000_000);
    loop {
        match c.statistics(&mut b) {
            Ok(()) => return,
            Err(Interrupt::More) => b = Budget::new(10_000_000),
            Err(e) => panic!("statistics failed: {e:?}"),
        }
    }
}

fn check(c: &Cursor, id: Id) -> bool {
    let mut b = Budget::new(1_000_000);
    loop {
        match c.check(&mut b, id) {
            Ok(v) => return v,
            Err(Interrupt::More) => b = Budget::new(1_000_000),
            Err(e) => panic!("check failed: {e:?}"),
        }
    }
}

/// S1: three endpoints with fanins {100,101}, {}, {102}.
fn s1_store() -> Store {
    dense_store(103, |i| match i {
        100 | 101 => vec![(Linkage::Left, 10)],
        102 => vec![(Linkage::Left, 30)],
        _ => vec![],
    })
}

#[test]
fn s1_subfanin_enumeration_and_check() {
    let store = s1_store();
    let sub = fixed_cursor(vec![10, 20, 30], 0, ID_MAX, true);
    let c = linksto_cursor_plain(&store, LinkstoSpec::new(Linkage::Left, 0, ID_MAX, true), sub);
    run_statistics(&c);
    assert_eq!(c.stats().unwrap().n, 3);
    assert_eq!(drain(&c), vec![100, 101, 102]);
    assert!(check(&c, 101));
    assert!(!check(&c, 50));
}

#[test]
fn s2_empty_fanin_preevaluates_to_null() {
    let store = dense_store(2, |_| vec![]);
    let sub = fixed_cursor(vec![1], 0, ID_MAX, true);
    let c = linksto_cursor(&store, LinkstoSpec::new(Linkage::Left, 0, ID_MAX, true), sub).unwrap();
    assert_eq!(c.kind(), "null");
    assert!(drain(&c).is_empty());
    assert!(!check(&c, 1));
    assert!(!check(&c, 0));
}

/// S3 fixture: endpoints 10, 20, 30 with fanin sizes 2, 3, 2.
fn s3_store() -> Store {
    dense_store(107, |i| match i {
        100 | 101 => vec![(Linkage::Left, 10)],
        102 | 103 | 104 => vec![(Linkage::Left, 20)],
        105 | 106 => vec![(Linkage::Left, 30)],
        _ => vec![],
    })
}

#[test]
fn s3_preevaluation_materializes_and_masquerades() -> anyhow::Result<()> {
    let store = s3_store();
    let sub = fixed_cursor(vec![10, 20, 30], 0, ID_MAX, true);
    let c = linksto_cursor(&store, LinkstoSpec::new(Linkage::Left, 0, ID_MAX, true), sub)?;
    assert_eq!(c.kind(), "fixed");
    assert_eq!(drain(&c), vec![100, 101, 102, 103, 104, 105, 106]);
    let frozen = c.freeze(FreezeFlags::SET)?;
    assert_eq!(frozen, "fixed-linksto:+0:left->(fixed:+0:(10,20,30))");

    // The masquerade thaws back into the same result set.
    let thawed = gravel::thaw(&store, &frozen)?;
    assert_eq!(drain(&thawed), vec![100, 101, 102, 103, 104, 105, 106]);
    Ok(())
}

/// S4 fixture: endpoint 1, type primitive 2; five LEFT pointers at the
/// endpoint, two of which carry TYPEGUID = guid(2).
fn s4_store() -> Store {
    dense_store(15, |i| match i {
        10 | 12 => vec![(Linkage::Left, 1), (Linkage::Typeguid, 2)],
        11 | 13 | 14 => vec![(Linkage::Left, 1)],
        _ => vec![],
    })
}

#[test]
fn s4_hint_restricts_enumeration() {
    let store = s4_store();
    let sub = fixed_cursor(vec![1], 0, ID_MAX, true);
    let spec = LinkstoSpec::new(Linkage::Left, 0, ID_MAX, true)
        .with_hint(Linkage::Typeguid, guid_of(2));
    let c = linksto_cursor_plain(&store, spec, sub);
    run_statistics(&c);
    assert_eq!(drain(&c), vec![10, 12]);
    assert!(check(&c, 10));
    assert!(!check(&c, 11));
    assert!(!check(&c, 2));
}

/// Fixture large enough that sampling fills its quotas instead of
/// exhausting a child: 60 endpoints, three LEFT pointers each.
fn grind_store() -> Store {
    dense_store(240, |i| {
        if i >= 60 {
            vec![(Linkage::Left, (i - 60) / 3)]
        } else {
            vec![]
        }
    })
}

fn grind_cursor(store: &Store) -> Cursor {
    let endpoints: Vec<Id> = (0..60).collect();
    let sub = fixed_cursor(endpoints, 0, ID_MAX, true);
    linksto_cursor_plain(store, LinkstoSpec::new(Linkage::Left, 0, ID_MAX, true), sub)
}

#[test]
fn s5_unit_budget_grind_terminates_and_replays() {
    let store = grind_store();
    let c = grind_cursor(&store);
    run_statistics(&c);

    let mut got = Vec::new();
    let mut calls = 0u32;
    let mut grind_consumed = 0u64;
    loop {
        let mut b = Budget::new(1);
        calls += 1;
        assert!(calls <= 10_000, "grind did not terminate");
        let r = c.next(&mut b);
        grind_consumed += b.consumed();
        match r {
            Ok(id) => got.push(id),
            Err(Interrupt::No) => break,
            Err(Interrupt::More) => {}
            Err(Interrupt::Fail(e)) => panic!("cursor failed: {e}"),
        }
    }
    assert_eq!(got.len(), 180);

    // The same enumeration replays after a reset, and the total charged
    // work is independent of how the budget was split.
    c.reset();
    let mut big = Budget::new(10_000_000);
    let mut replay = Vec::new();
    loop {
        match c.next(&mut big) {
            Ok(id) => replay.push(id),
            Err(Interrupt::No) => break,
            Err(e) => panic!("unexpected {e:?}"),
        }
    }
    assert_eq!(got, replay);
    assert_eq!(grind_consumed, big.consumed());
}

#[test]
fn s6_freeze_mid_statistics_thaw_completes() {
    let store = grind_store();
    let c = grind_cursor(&store);

    // A few dribbles of budget: sampling starts but cannot finish.
    for _ in 0..2 {
        let mut b = Budget::new(3);
        match c.statistics(&mut b) {
            Err(Interrupt::More) => {}
            Ok(()) => panic!("statistics finished too early for this test"),
            Err(e) => panic!("unexpected {e:?}"),
        }
    }
    let frozen = c.freeze(FreezeFlags::ALL).unwrap();
    assert!(frozen.contains("stat."), "expected in-progress planner state in {frozen:?}");

    let thawed = gravel::thaw(&store, &frozen).unwrap();
    run_statistics(&thawed);
    let mut from_thawed = drain(&thawed);
    from_thawed.sort_unstable();

    let reference = grind_cursor(&store);
    run_statistics(&reference);
    let mut from_reference = drain(&reference);
    from_reference.sort_unstable();
    assert_eq!(from_thawed, from_reference);
}

#[test]
fn p1_membership_matches_enumeration() {
    let mut rng = StdRng::seed_from_u64(0x9e3779b97f4a7c15);
    let store = dense_store(200, |i| {
        if i >= 50 && i % 3 != 0 {
            vec![(Linkage::Left, i % 50)]
        } else {
            vec![]
        }
    });
    let mut endpoints: Vec<Id> = (0..50).filter(|_| rng.random_bool(0.5)).collect();
    if endpoints.is_empty() {
        endpoints.push(7);
    }
    let sub = fixed_cursor(endpoints, 0, ID_MAX, true);
    let c = linksto_cursor_plain(&store, LinkstoSpec::new(Linkage::Left, 0, ID_MAX, true), sub);
    run_statistics(&c);
    let mut enumerated = drain(&c);
    enumerated.sort_unstable();
    for id in 0..200 {
        let member = enumerated.binary_search(&id).is_ok();
        assert_eq!(check(&c, id), member, "check({id}) disagrees with enumeration");
        // P7: asking twice changes nothing.
        assert_eq!(check(&c, id), member);
    }
}

#[test]
fn p2_typecheck_output_is_strictly_ascending() {
    let store = grind_store();
    // Preset method through a thawed specification string.
    let sub_frozen = {
        let endpoints: Vec<Id> = (0..60).collect();
        let sub = fixed_cursor(endpoints, 0, ID_MAX, true);
        sub.freeze(FreezeFlags::SET).unwrap()
    };
    let frozen = format!("linksto:+0:left->({sub_frozen})[md:typecheck]");
    let c = gravel::thaw(&store, &frozen).unwrap();
    run_statistics(&c);
    assert!(c.stats().unwrap().sorted);
    let ids = drain(&c);
    assert_eq!(ids.len(), 180);
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "not strictly ascending");
}

#[test]
fn p3_find_returns_least_at_or_after_target() {
    let store = s4_store();
    let sub_frozen = fixed_cursor(vec![1], 0, ID_MAX, true)
        .freeze(FreezeFlags::SET)
        .unwrap();
    let frozen = format!(
        "linksto:+0:left->({sub_frozen})[md:typecheck][h:typeguid={}]",
        guid_of(2)
    );
    let c = gravel::thaw(&store, &frozen).unwrap();
    run_statistics(&c);
    let all = drain(&c); // {10, 12}
    assert_eq!(all, vec![10, 12]);

    let mut b = Budget::new(1_000_000);
    c.reset();
    assert_eq!(c.find(&mut b, 11).unwrap(), 12);
    c.reset();
    assert_eq!(c.find(&mut b, 10).unwrap(), 10);
    c.reset();
    assert!(matches!(c.find(&mut b, 13), Err(Interrupt::No)));
}

#[test]
fn p4_freeze_roundtrip_mid_production() {
    let store = grind_store();
    let c = grind_cursor(&store);
    run_statistics(&c);

    // Stop after a prefix, freeze, and let both sides finish.
    let mut b = Budget::new(1_000_000);
    let mut prefix = Vec::new();
    for _ in 0..7 {
        match c.next(&mut b) {
            Ok(id) => prefix.push(id),
            Err(e) => panic!("unexpected {e:?}"),
        }
    }
    let frozen = c.freeze(FreezeFlags::ALL).unwrap();
    let thawed = gravel::thaw(&store, &frozen).unwrap();
    let rest_original = drain(&c);
    let rest_thawed = drain(&thawed);
    assert_eq!(rest_original, rest_thawed);
    assert_eq!(prefix.len() + rest_original.len(), 180);
}

#[test]
fn p6_work_to_exhaustion_is_split_invariant() {
    let store = grind_store();
    let a = grind_cursor(&store);
    run_statistics(&a);
    let mut total_dribbled = 0u64;
    let mut n_a = 0usize;
    loop {
        let mut b = Budget::new(13);
        let r = a.next(&mut b);
        total_dribbled += b.consumed();
        match r {
            Ok(_) => n_a += 1,
            Err(Interrupt::No) => break,
            Err(Interrupt::More) => {}
            Err(e) => panic!("unexpected {e:?}"),
        }
    }

    a.reset();
    let mut one_shot = Budget::new(10_000_000);
    let mut n_b = 0usize;
    loop {
        match a.next(&mut one_shot) {
            Ok(_) => n_b += 1,
            Err(Interrupt::No) => break,
            Err(e) => panic!("unexpected {e:?}"),
        }
    }
    assert_eq!(n_a, n_b);
    assert_eq!(total_dribbled, one_shot.consumed());
}

#[test]
fn or_preevaluation_pairs_a_check_channel() {
    // Eight endpoints with large fanins: too big for FIXED, wide enough
    // for the OR to get a paired check cursor.
    let store = dense_store(1608, |i| {
        if i >= 8 {
            vec![(Linkage::Left, (i - 8) / 200)]
        } else {
            vec![]
        }
    });
    let sub = fixed_cursor((0..8).collect(), 0, ID_MAX, true);
    let c = linksto_cursor(&store, LinkstoSpec::new(Linkage::Left, 0, ID_MAX, true), sub).unwrap();
    assert_eq!(c.kind(), "or");
    let frozen = c.freeze(FreezeFlags::SET).unwrap();
    assert!(frozen.starts_with("or-linksto:"), "unexpected freeze {frozen:?}");
    assert!(check(&c, 8));
    assert!(!check(&c, 3));
    let ids = drain(&c);
    assert_eq!(ids.len(), 1600);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn restrict_installs_a_hint() {
    let store = s4_store();
    let sub = fixed_cursor(vec![1], 0, ID_MAX, true);
    let c = linksto_cursor_plain(&store, LinkstoSpec::new(Linkage::Left, 0, ID_MAX, true), sub);

    let mut ps = PrimitiveSummary::new();
    ps.lock(Linkage::Typeguid, guid_of(2));
    let restricted = match c.restrict(&ps).unwrap() {
        Restriction::Replaced(r) => r,
        _ => panic!("expected a replacement"),
    };
    run_statistics(&restricted);
    assert_eq!(drain(&restricted), vec![10, 12]);
    // The original is untouched and still unrestricted.
    run_statistics(&c);
    assert_eq!(drain(&c), vec![10, 11, 12, 13, 14]);

    // An already-hinted cursor only accepts the identical lock.
    let sub2 = fixed_cursor(vec![1], 0, ID_MAX, true);
    let spec2 = LinkstoSpec::new(Linkage::Left, 0, ID_MAX, true)
        .with_hint(Linkage::Typeguid, guid_of(2));
    let hinted = linksto_cursor_plain(&store, spec2, sub2);
    assert!(matches!(hinted.restrict(&ps).unwrap(), Restriction::Unchanged));
    let mut other = PrimitiveSummary::new();
    other.lock(Linkage::Typeguid, guid_of(3));
    assert!(matches!(hinted.restrict(&other).unwrap(), Restriction::Incompatible));
}

#[test]
fn primitive_summary_reports_the_hint() {
    let store = s4_store();
    let sub = fixed_cursor(vec![1], 0, ID_MAX, true);
    let spec = LinkstoSpec::new(Linkage::Left, 0, ID_MAX, true)
        .with_hint(Linkage::Typeguid, guid_of(2));
    let c = linksto_cursor_plain(&store, spec, sub);
    let ps = c.primitive_summary().expect("hinted cursor has a summary");
    assert!(ps.is_locked(Linkage::Typeguid));
    assert_eq!(ps.guid(Linkage::Typeguid), Some(guid_of(2)));
    assert!(!ps.complete);
    assert_eq!(ps.result, None);

    let sub2 = fixed_cursor(vec![1], 0, ID_MAX, true);
    let plain = linksto_cursor_plain(&store, LinkstoSpec::new(Linkage::Left, 0, ID_MAX, true), sub2);
    assert!(plain.primitive_summary().is_none());
}

#[test]
fn sabotage_suspends_production() {
    let store = grind_store();
    let c = grind_cursor(&store);
    run_statistics(&c);
    let flag = gravel::sabotage_flag();
    let mut b = Budget::with_sabotage(1_000_000, flag.clone());
    assert!(c.next(&mut b).is_ok());
    flag.set(true);
    assert!(matches!(c.next(&mut b), Err(Interrupt::More)));
    flag.set(false);
    assert!(c.next(&mut b).is_ok());
}

#[test]
fn beyond_is_false_until_planned_and_tracks_progress() {
    let store = grind_store();
    let c = grind_cursor(&store);
    assert!(!c.beyond(0));
    run_statistics(&c);
    let mut b = Budget::new(1_000_000);
    let first = loop {
        match c.next(&mut b) {
            Ok(id) => break id,
            Err(Interrupt::More) => continue,
            Err(e) => panic!("unexpected {e:?}"),
        }
    };
    // Ordered subfanin production delegates to sub progress.
    let _ = first;
    assert!(c.stats().is_some());
}

#[test]
fn thaw_rejects_inconsistent_state() {
    let store = dense_store(4, |_| vec![]);
    // Sample count above the quota.
    let bad = "linksto:+0:left->(null:+0)/-:-:-/0:(-/-):-:[stat.sf:(null:+0):1:9:0:0:]";
    match gravel::thaw(&store, bad) {
        Err(gravel::EngineError::BadCursor(_)) => {}
        other => panic!("expected BadCursor, got {other:?}"),
    }
    // Unknown leading tag.
    match gravel::thaw(&store, "mystery:+0") {
        Err(gravel::EngineError::Lexical(_)) => {}
        other => panic!("expected Lexical, got {other:?}"),
    }
    // Call state that contradicts the committed method.
    let bad_state = "linksto:+0:left->(null:+0)[md:typecheck]/typecheck:-:-/1:(-/-):-:-";
    match gravel::thaw(&store, bad_state) {
        Err(gravel::EngineError::BadCursor(_)) => {}
        other => panic!("expected BadCursor, got {other:?}"),
    }
}

#[test]
fn direction_preference_still_plans() {
    let store = grind_store();
    let c = grind_cursor(&store);
    c.set_direction(Direction::Forward);
    run_statistics(&c);
    let ids = drain(&c);
    assert_eq!(ids.len(), 180);
}
