//! Synthetic network driver.

use chrono::NaiveDate;
use network_comp_core::{
    engine::CompEngine,
    population::{run_population, PopulationPlan, ROOT_MEMBER_ID},
    types::{EdgeType, IncomeType, Side, VolumeKind},
    volume::VolumeEvent,
};

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

#[test]
fn signs_up_the_planned_member_count() {
    let mut engine = CompEngine::build_test().unwrap();
    let summary = run_population(&mut engine, &PopulationPlan::new(42, 50, 10, start())).unwrap();

    assert_eq!(summary.members, 50);
    assert_eq!(summary.days, 10);
    assert_eq!(summary.last_day, NaiveDate::from_ymd_opt(2025, 1, 10));
    assert_eq!(engine.store.member_count().unwrap(), 51);
    assert_eq!(engine.graph().root_id(), Some(ROOT_MEMBER_ID));
    assert_eq!(engine.enumerate(ROOT_MEMBER_ID, EdgeType::Placement, None).unwrap().len(), 50);
}

#[test]
fn root_legs_carry_all_booked_volume() {
    let mut engine = CompEngine::build_test().unwrap();
    let summary = run_population(&mut engine, &PopulationPlan::new(7, 80, 30, start())).unwrap();
    assert!(summary.volume_events > 0);

    let root = engine.store.member(ROOT_MEMBER_ID).unwrap();
    let booked: f64 = engine.store.members().unwrap().iter().map(|m| m.personal_bv).sum();
    assert!((root.personal_bv + root.team_bv - booked).abs() < 1e-6);
    assert!((booked - summary.volume_total).abs() < 1e-6);
}

#[test]
fn a_second_run_continues_the_same_network() {
    let mut engine = CompEngine::build_test().unwrap();
    run_population(&mut engine, &PopulationPlan::new(3, 20, 7, start())).unwrap();
    let next = NaiveDate::from_ymd_opt(2025, 1, 8).unwrap();
    let summary = run_population(&mut engine, &PopulationPlan::new(4, 10, 7, next)).unwrap();

    assert_eq!(summary.members, 10);
    assert_eq!(engine.store.member_count().unwrap(), 31);
    let ids: Vec<String> = engine.store.members().unwrap().into_iter().map(|m| m.member_id).collect();
    assert!(ids.contains(&"M000030".to_string()));
}

#[test]
fn summary_matches_the_income_ledger() {
    let mut engine = CompEngine::build_test().unwrap();
    let summary = run_population(&mut engine, &PopulationPlan::new(11, 60, 40, start())).unwrap();

    for (income_type, count, total) in &summary.income_by_type {
        let ledger: Vec<_> = engine
            .store
            .all_income_entries()
            .unwrap()
            .into_iter()
            .filter(|e| e.income_type == *income_type)
            .collect();
        assert_eq!(ledger.len() as i64, *count);
        assert!((ledger.iter().map(|e| e.amount).sum::<f64>() - total).abs() < 1e-6);
    }
    assert!(summary
        .income_by_type
        .iter()
        .all(|(t, _, _)| *t != IncomeType::ClubIncomeReversal));
}

#[test]
fn generated_network_keeps_tree_and_carry_invariants() {
    let mut engine = CompEngine::build_test().unwrap();
    run_population(&mut engine, &PopulationPlan::new(19, 60, 21, start())).unwrap();

    // Dated inside the first window, which closed on 01-08.
    for (source_ref, member_id) in [("late-1", "M000001"), ("late-2", "M000002"), ("late-3", "M000003")] {
        engine
            .apply_personal_volume(&VolumeEvent {
                source_ref: source_ref.into(),
                member_id: member_id.into(),
                kind: VolumeKind::Sale,
                amount: 750.0,
                booked_on: NaiveDate::from_ymd_opt(2025, 1, 3).unwrap(),
            })
            .unwrap();
    }
    engine.run_day(NaiveDate::from_ymd_opt(2025, 1, 22).unwrap()).unwrap();
    let last_closed = NaiveDate::from_ymd_opt(2025, 1, 21).unwrap();

    let members = engine.store.members().unwrap();
    for m in &members {
        let id = m.member_id.as_str();
        assert!(!engine.is_descendant(id, id).unwrap(), "{id} is its own ancestor");
        if id != ROOT_MEMBER_ID {
            assert!(engine.is_descendant(ROOT_MEMBER_ID, id).unwrap(), "{id} is outside the root subtree");
        }

        let cycles = engine.store.matching_cycles(id).unwrap();
        let mut carry = (0.0, 0.0);
        let mut paired = (0.0, 0.0);
        for c in &cycles {
            assert!((c.carry_in_left - carry.0).abs() < 1e-6 && (c.carry_in_right - carry.1).abs() < 1e-6);
            let total_left = c.left_cycle_bv + c.carry_in_left;
            let total_right = c.right_cycle_bv + c.carry_in_right;
            assert!(c.matched_volume <= total_left.min(total_right) + 1e-6);
            assert!(c.carry_out_left >= 0.0 && c.carry_out_right >= 0.0);
            assert!((c.carry_out_left - (total_left - c.matched_volume)).abs() < 1e-6);
            assert!((c.carry_out_right - (total_right - c.matched_volume)).abs() < 1e-6);
            carry = (c.carry_out_left, c.carry_out_right);
            paired = (paired.0 + c.left_cycle_bv, paired.1 + c.right_cycle_bv);
        }

        // Every leg booking through the last closed window is paired exactly once.
        let booked_left = engine.store.leg_volume_through(id, Side::Left, last_closed).unwrap();
        let booked_right = engine.store.leg_volume_through(id, Side::Right, last_closed).unwrap();
        assert!((paired.0 - booked_left).abs() < 1e-6 * booked_left.max(1.0), "{id} left leg");
        assert!((paired.1 - booked_right).abs() < 1e-6 * booked_right.max(1.0), "{id} right leg");
    }
}
