//! Monthly club qualification, payout and admin overrides.

use chrono::NaiveDate;
use network_comp_core::{
    command::AdminCommand,
    engine::{CompEngine, Registration},
    error::EngineError,
    period::Period,
    types::{ClubStatus, IncomeType, KycStatus, Side, VolumeKind},
    volume::VolumeEvent,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn jan() -> Period {
    Period::new(2025, 1).unwrap()
}

/// R with one member in each leg and the given leg volume booked on `on`.
fn network(left: f64, right: f64, on: NaiveDate) -> CompEngine {
    let joined = d(2024, 12, 1);
    let mut engine = CompEngine::build_test().unwrap();
    engine.register_root("R", joined).unwrap();
    engine.register_member(&Registration::new("A", "R", joined).explicit("R", Side::Left)).unwrap();
    engine.register_member(&Registration::new("B", "R", joined).explicit("R", Side::Right)).unwrap();
    for (source_ref, member_id, amount) in [("a-1", "A", left), ("b-1", "B", right)] {
        engine
            .apply_personal_volume(&VolumeEvent {
                source_ref: source_ref.into(),
                member_id: member_id.into(),
                kind: VolumeKind::Investment,
                amount,
                booked_on: on,
            })
            .unwrap();
    }
    engine
}

fn recompute(engine: &mut CompEngine) {
    engine
        .execute(AdminCommand::RecomputePeriod { period: jan() }, d(2025, 2, 1))
        .unwrap();
}

fn club_entries(engine: &CompEngine, member_id: &str) -> usize {
    engine
        .store
        .income_entries(member_id)
        .unwrap()
        .iter()
        .filter(|e| matches!(e.income_type, IncomeType::ClubIncome | IncomeType::ClubIncomeReversal))
        .count()
}

#[test]
fn one_deep_leg_is_disqualified_on_balancing() {
    let mut engine = network(1_000_000.0, 10_000.0, d(2025, 1, 10));
    recompute(&mut engine);

    for tier_id in ["star", "diamond"] {
        let q = engine.store.club_qualification("R", tier_id, jan()).unwrap().unwrap();
        assert_eq!(q.status, ClubStatus::DisqualifiedBalancing, "tier {tier_id}");
        assert_eq!(q.strongest_leg, 1_000_000.0);
        assert_eq!(q.other_legs, 10_000.0);
        assert_eq!(q.net_amount, 0.0);
    }
    let star = engine.store.club_qualification("R", "star", jan()).unwrap().unwrap();
    assert_eq!(star.capped_strongest, 60_000.0);
    assert_eq!(engine.store.club_qualifications_for_period(jan()).unwrap().len(), 2);
    assert_eq!(club_entries(&engine, "R"), 0);
}

#[test]
fn balanced_legs_are_awarded_once_with_tds() {
    let mut engine = network(60_000.0, 50_000.0, d(2025, 1, 10));
    recompute(&mut engine);

    let q = engine.store.club_qualification("R", "star", jan()).unwrap().unwrap();
    assert_eq!(q.status, ClubStatus::Awarded);
    assert!((q.bonus_gross - 2_200.0).abs() < 1e-9);
    assert!((q.tds_amount - 110.0).abs() < 1e-9);
    assert!((q.net_amount - 2_090.0).abs() < 1e-9);
    assert_eq!(q.awarded_on, Some(d(2025, 2, 1)));
    // Below the diamond requirement: no record at all.
    assert!(engine.store.club_qualification("R", "diamond", jan()).unwrap().is_none());

    recompute(&mut engine);
    assert_eq!(club_entries(&engine, "R"), 1, "re-running an awarded period never re-pays");
    assert!((engine.store.income_total("R", IncomeType::ClubIncome).unwrap() - 2_090.0).abs() < 1e-9);

    let runs: Vec<_> = engine
        .store
        .evaluation_runs()
        .unwrap()
        .into_iter()
        .filter(|r| r.kind == "recompute")
        .collect();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[1].period, Some(jan()));
    assert!(runs[1].skipped >= 1);
}

#[test]
fn period_without_new_sales_is_disqualified() {
    let mut engine = network(60_000.0, 50_000.0, d(2024, 12, 15));
    recompute(&mut engine);
    let q = engine.store.club_qualification("R", "star", jan()).unwrap().unwrap();
    assert_eq!(q.status, ClubStatus::DisqualifiedNewSales);
    assert_eq!(q.new_sales_volume, 0.0);
}

#[test]
fn kyc_must_be_approved() {
    let mut engine = network(60_000.0, 50_000.0, d(2025, 1, 10));
    engine.set_kyc_status("R", KycStatus::Pending, "ops", d(2025, 1, 20)).unwrap();
    recompute(&mut engine);
    let q = engine.store.club_qualification("R", "star", jan()).unwrap().unwrap();
    assert_eq!(q.status, ClubStatus::DisqualifiedKyc);
}

#[test]
fn month_start_evaluates_the_previous_month() {
    let mut engine = network(60_000.0, 50_000.0, d(2025, 1, 10));
    engine.run_day(d(2025, 1, 31)).unwrap();
    assert!(engine.store.club_qualification("R", "star", jan()).unwrap().is_none());

    engine.run_day(d(2025, 2, 1)).unwrap();
    let q = engine.store.club_qualification("R", "star", jan()).unwrap().unwrap();
    assert_eq!(q.status, ClubStatus::Awarded);
}

#[test]
fn override_reverses_and_reawards_without_double_pay() {
    let mut engine = network(60_000.0, 50_000.0, d(2025, 1, 10));
    recompute(&mut engine);

    let revoke = AdminCommand::OverrideClubQualification {
        member_id: "R".into(),
        tier_id:   "star".into(),
        period:    jan(),
        status:    ClubStatus::DisqualifiedKyc,
        reason:    "documents expired".into(),
        actor:     "compliance".into(),
    };
    engine.execute(revoke.clone(), d(2025, 2, 5)).unwrap();

    let q = engine.store.club_qualification("R", "star", jan()).unwrap().unwrap();
    assert_eq!(q.status, ClubStatus::DisqualifiedKyc);
    assert!(q.manual_override);
    assert_eq!(q.override_by.as_deref(), Some("compliance"));
    assert!((engine.store.income_total("R", IncomeType::ClubIncomeReversal).unwrap() + 2_090.0).abs() < 1e-9);

    // Same status again is a duplicate, not a second reversal.
    assert!(matches!(engine.execute(revoke, d(2025, 2, 6)), Err(EngineError::DuplicateQualification { .. })));

    engine
        .execute(
            AdminCommand::OverrideClubQualification {
                member_id: "R".into(),
                tier_id:   "star".into(),
                period:    jan(),
                status:    ClubStatus::Awarded,
                reason:    "documents renewed".into(),
                actor:     "compliance".into(),
            },
            d(2025, 2, 7),
        )
        .unwrap();
    let net: f64 = engine
        .store
        .income_entries("R")
        .unwrap()
        .iter()
        .filter(|e| matches!(e.income_type, IncomeType::ClubIncome | IncomeType::ClubIncomeReversal))
        .map(|e| e.amount)
        .sum();
    assert!((net - 2_090.0).abs() < 1e-9);
    assert_eq!(club_entries(&engine, "R"), 3);

    // Manual records are left alone by the batch.
    recompute(&mut engine);
    assert_eq!(club_entries(&engine, "R"), 3);

    let actions: Vec<String> = engine.store.audit_entries().unwrap().into_iter().map(|a| a.action).collect();
    assert_eq!(actions.iter().filter(|a| *a == "override_club_qualification").count(), 2);
}

#[test]
fn override_needs_reason_and_actor() {
    let mut engine = network(60_000.0, 50_000.0, d(2025, 1, 10));
    let err = engine
        .execute(
            AdminCommand::OverrideClubQualification {
                member_id: "R".into(),
                tier_id:   "star".into(),
                period:    jan(),
                status:    ClubStatus::Awarded,
                reason:    "  ".into(),
                actor:     "ops".into(),
            },
            d(2025, 2, 1),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidOverride(_)));
}
