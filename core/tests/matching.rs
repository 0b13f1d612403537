//! Binary matching, carry-forward and the upline matching bonus.

use chrono::NaiveDate;
use network_comp_core::{
    command::AdminCommand,
    engine::{CompEngine, Registration},
    error::EngineError,
    types::{IncomeType, MemberStatus, Side, VolumeKind},
    volume::VolumeEvent,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// R ─ A (left), B (right); A ─ C, D; C ─ E, F. Each member is sponsored
/// by its placement parent.
fn network() -> CompEngine {
    let day = d(2025, 1, 1);
    let mut engine = CompEngine::build_test().unwrap();
    engine.register_root("R", day).unwrap();
    for (id, parent, side) in [
        ("A", "R", Side::Left),
        ("B", "R", Side::Right),
        ("C", "A", Side::Left),
        ("D", "A", Side::Right),
        ("E", "C", Side::Left),
        ("F", "C", Side::Right),
    ] {
        engine
            .register_member(&Registration::new(id, parent, day).explicit(parent, side))
            .unwrap();
    }
    engine
}

fn book(engine: &CompEngine, source_ref: &str, member_id: &str, amount: f64, on: NaiveDate) {
    engine
        .apply_personal_volume(&VolumeEvent {
            source_ref: source_ref.into(),
            member_id: member_id.into(),
            kind: VolumeKind::Sale,
            amount,
            booked_on: on,
        })
        .unwrap();
}

fn first_week(engine: &CompEngine) {
    book(engine, "c1", "C", 4_000.0, d(2025, 1, 2));
    book(engine, "d1", "D", 4_000.0, d(2025, 1, 3));
    book(engine, "e1", "E", 2_000.0, d(2025, 1, 4));
    book(engine, "f1", "F", 2_000.0, d(2025, 1, 5));
}

#[test]
fn weaker_leg_is_matched_and_residual_carries_forward() {
    let engine = network();
    first_week(&engine);

    let out = engine.compute_matching("A", d(2025, 1, 1), d(2025, 1, 7)).unwrap();
    assert!(out.computed);
    assert_eq!((out.cycle.left_cycle_bv, out.cycle.right_cycle_bv), (8_000.0, 4_000.0));
    assert_eq!(out.cycle.matched_volume, 4_000.0);
    assert_eq!((out.cycle.carry_out_left, out.cycle.carry_out_right), (4_000.0, 0.0));
    assert!((out.cycle.binary_commission - 400.0).abs() < 1e-9);

    let a = engine.store.member("A").unwrap();
    assert_eq!((a.carry_forward(Side::Left), a.carry_forward(Side::Right)), (4_000.0, 0.0));
    assert!((engine.store.income_total("A", IncomeType::Binary).unwrap() - 400.0).abs() < 1e-9);

    // Next cycle: carry joins the new right-leg volume.
    book(&engine, "d2", "D", 1_000.0, d(2025, 1, 9));
    let next = engine.compute_matching("A", d(2025, 1, 8), d(2025, 1, 14)).unwrap();
    assert_eq!((next.cycle.carry_in_left, next.cycle.carry_in_right), (4_000.0, 0.0));
    assert_eq!(next.cycle.matched_volume, 1_000.0);
    assert_eq!((next.cycle.carry_out_left, next.cycle.carry_out_right), (3_000.0, 0.0));
}

#[test]
fn zero_leg_matches_nothing() {
    let engine = network();
    first_week(&engine);
    let out = engine.compute_matching("R", d(2025, 1, 1), d(2025, 1, 7)).unwrap();
    assert_eq!(out.cycle.matched_volume, 0.0);
    assert_eq!((out.cycle.carry_out_left, out.cycle.carry_out_right), (12_000.0, 0.0));
    assert_eq!(out.cycle.binary_commission, 0.0);
    assert!(engine.store.income_entries("R").unwrap().is_empty());
}

#[test]
fn late_booking_into_a_closed_window_pairs_in_the_next_cycle() {
    let engine = network();
    let first = engine.compute_matching("R", d(2025, 1, 1), d(2025, 1, 7)).unwrap();
    assert_eq!(first.cycle.matched_volume, 0.0);

    // Dated inside the window that is already closed.
    book(&engine, "a-late", "A", 1_000.0, d(2025, 1, 3));
    book(&engine, "b-late", "B", 1_000.0, d(2025, 1, 3));
    // Dated after the next window; stays for a later cycle.
    book(&engine, "b-future", "B", 500.0, d(2025, 1, 20));

    let next = engine.compute_matching("R", d(2025, 1, 8), d(2025, 1, 14)).unwrap();
    assert_eq!((next.cycle.left_cycle_bv, next.cycle.right_cycle_bv), (1_000.0, 1_000.0));
    assert_eq!(next.cycle.matched_volume, 1_000.0);
    assert_eq!((next.cycle.carry_out_left, next.cycle.carry_out_right), (0.0, 0.0));

    let total: f64 = engine.store.matching_cycles("R").unwrap().iter().map(|c| c.matched_volume).sum();
    assert_eq!(total, 1_000.0);

    let third = engine.compute_matching("R", d(2025, 1, 15), d(2025, 1, 21)).unwrap();
    assert_eq!((third.cycle.left_cycle_bv, third.cycle.right_cycle_bv), (0.0, 500.0));
    assert_eq!(third.cycle.carry_out_right, 500.0);
}

#[test]
fn recomputing_a_cycle_is_idempotent_and_overlaps_are_rejected() {
    let engine = network();
    first_week(&engine);
    engine.compute_matching("A", d(2025, 1, 1), d(2025, 1, 7)).unwrap();

    let again = engine.compute_matching("A", d(2025, 1, 1), d(2025, 1, 7)).unwrap();
    assert!(!again.computed);
    assert_eq!(engine.store.matching_cycles("A").unwrap().len(), 1);
    assert_eq!(engine.store.income_entries("A").unwrap().len(), 1);

    let err = engine.compute_matching("A", d(2025, 1, 5), d(2025, 1, 12)).unwrap_err();
    assert!(matches!(err, EngineError::InvalidCycle { .. }), "got {err}");
    assert!(engine.compute_matching("A", d(2025, 1, 9), d(2025, 1, 8)).is_err());
}

#[test]
fn upline_earns_only_within_its_unlocked_depth() {
    let mut engine = network();
    first_week(&engine);
    // Bronze unlocks one generation at 10%.
    engine
        .execute(
            AdminCommand::OverrideRank {
                member_id: "R".into(),
                tier_id:   Some("bronze".into()),
                reason:    "seed rank".into(),
                actor:     "ops".into(),
            },
            d(2025, 1, 1),
        )
        .unwrap();

    let a = engine.compute_matching("A", d(2025, 1, 1), d(2025, 1, 7)).unwrap();
    assert_eq!(a.details.len(), 1);
    let detail = &a.details[0];
    assert_eq!((detail.recipient_id.as_str(), detail.generation), ("R", 1));
    assert!((detail.contribution - 40.0).abs() < 1e-9);

    // C's commission is generation 2 for R: past bronze depth.
    let c = engine.compute_matching("C", d(2025, 1, 1), d(2025, 1, 7)).unwrap();
    assert!((c.cycle.binary_commission - 200.0).abs() < 1e-9);
    assert!(c.details.is_empty());

    let recipient = engine.store.matching_details_for("R").unwrap();
    assert_eq!(recipient.len(), 1);
    assert!((engine.store.income_total("R", IncomeType::Matching).unwrap() - 40.0).abs() < 1e-9);
}

#[test]
fn inactive_member_keeps_pairing_but_earns_nothing() {
    let mut engine = network();
    first_week(&engine);
    engine.set_member_status("A", MemberStatus::Inactive, "ops", d(2025, 1, 6)).unwrap();

    let out = engine.compute_matching("A", d(2025, 1, 1), d(2025, 1, 7)).unwrap();
    assert_eq!(out.cycle.matched_volume, 4_000.0);
    assert_eq!(out.cycle.binary_commission, 0.0);
    assert_eq!(engine.store.income_total("A", IncomeType::Binary).unwrap(), 0.0);
}

#[test]
fn scheduled_cycle_closes_on_the_boundary_day() {
    let mut engine = network();
    first_week(&engine);
    for day in 1..=7 {
        engine.run_day(d(2025, 1, day)).unwrap();
    }
    assert!(engine.store.matching_cycles("A").unwrap().is_empty());

    engine.run_day(d(2025, 1, 8)).unwrap();
    let cycles = engine.store.matching_cycles("A").unwrap();
    assert_eq!(cycles.len(), 1);
    assert_eq!((cycles[0].cycle_start, cycles[0].cycle_end), (d(2025, 1, 1), d(2025, 1, 7)));
    assert_eq!(cycles[0].computed_on, d(2025, 1, 8));
    assert!(engine
        .store
        .evaluation_runs()
        .unwrap()
        .iter()
        .any(|r| r.kind == "matching" && r.evaluated == 7));
}
