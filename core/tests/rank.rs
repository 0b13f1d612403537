//! Rank promotion, monthly rank bonus and admin rank overrides.

use chrono::NaiveDate;
use network_comp_core::{
    command::AdminCommand,
    engine::{CompEngine, Registration},
    period::Period,
    types::{IncomeType, MemberStatus, Side, VolumeKind},
    volume::VolumeEvent,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// R with 60,000 of team volume booked on 2025-01-15.
fn network() -> CompEngine {
    let joined = d(2025, 1, 1);
    let mut engine = CompEngine::build_test().unwrap();
    engine.register_root("R", joined).unwrap();
    engine.register_member(&Registration::new("A", "R", joined).explicit("R", Side::Left)).unwrap();
    engine.register_member(&Registration::new("B", "R", joined).explicit("R", Side::Right)).unwrap();
    for (source_ref, member_id) in [("a-1", "A"), ("b-1", "B")] {
        engine
            .apply_personal_volume(&VolumeEvent {
                source_ref: source_ref.into(),
                member_id: member_id.into(),
                kind: VolumeKind::Sale,
                amount: 30_000.0,
                booked_on: d(2025, 1, 15),
            })
            .unwrap();
    }
    engine
}

fn override_rank(engine: &mut CompEngine, tier_id: Option<&str>) {
    engine
        .execute(
            AdminCommand::OverrideRank {
                member_id: "R".into(),
                tier_id:   tier_id.map(Into::into),
                reason:    "plan review".into(),
                actor:     "ops".into(),
            },
            d(2025, 1, 16),
        )
        .unwrap();
}

#[test]
fn every_crossed_tier_is_achieved_and_paid_once() {
    let mut engine = network();
    engine.run_day(d(2025, 1, 15)).unwrap();

    let r = engine.store.member("R").unwrap();
    assert_eq!(r.rank_order, Some(2));
    let achieved: Vec<String> = engine
        .store
        .rank_achievements("R")
        .unwrap()
        .into_iter()
        .map(|a| a.tier_id)
        .collect();
    assert_eq!(achieved, ["bronze", "silver"]);
    assert!((engine.store.income_total("R", IncomeType::RankBonus).unwrap() - 2_500.0).abs() < 1e-9);

    engine.run_day(d(2025, 1, 16)).unwrap();
    assert_eq!(engine.store.rank_achievements("R").unwrap().len(), 2);
    assert!((engine.store.income_total("R", IncomeType::RankBonus).unwrap() - 2_500.0).abs() < 1e-9);
    assert_eq!(engine.store.member("A").unwrap().rank_order, None);
}

#[test]
fn monthly_bonus_is_paid_once_per_period() {
    let mut engine = network();
    engine.run_day(d(2025, 1, 15)).unwrap();
    engine.run_day(d(2025, 2, 1)).unwrap();

    let jan = Period::new(2025, 1).unwrap();
    assert_eq!(engine.store.rank_monthly_payout_count(jan).unwrap(), 1);
    assert!((engine.store.income_total("R", IncomeType::RankMonthly).unwrap() - 300.0).abs() < 1e-9);

    engine.recompute_period(jan).unwrap();
    assert_eq!(engine.store.rank_monthly_payout_count(jan).unwrap(), 1);
    assert!((engine.store.income_total("R", IncomeType::RankMonthly).unwrap() - 300.0).abs() < 1e-9);
}

#[test]
fn inactive_members_are_neither_promoted_nor_paid_monthly() {
    let mut engine = network();
    engine.set_member_status("R", MemberStatus::Inactive, "ops", d(2025, 1, 14)).unwrap();
    engine.run_day(d(2025, 1, 15)).unwrap();
    assert_eq!(engine.store.member("R").unwrap().rank_order, None);

    engine.set_member_status("R", MemberStatus::Active, "ops", d(2025, 1, 20)).unwrap();
    engine.run_day(d(2025, 1, 20)).unwrap();
    assert_eq!(engine.store.member("R").unwrap().rank_order, Some(2));

    engine.set_member_status("R", MemberStatus::Inactive, "ops", d(2025, 1, 25)).unwrap();
    engine.run_day(d(2025, 2, 1)).unwrap();
    assert_eq!(engine.store.income_total("R", IncomeType::RankMonthly).unwrap(), 0.0);
}

#[test]
fn admin_demotion_sticks() {
    let mut engine = network();
    engine.run_day(d(2025, 1, 15)).unwrap();

    override_rank(&mut engine, Some("bronze"));
    assert_eq!(engine.store.member("R").unwrap().rank_order, Some(1));
    engine.run_day(d(2025, 1, 17)).unwrap();
    assert_eq!(engine.store.member("R").unwrap().rank_order, Some(1), "held tiers are not re-awarded");

    override_rank(&mut engine, None);
    engine.run_day(d(2025, 1, 18)).unwrap();
    assert_eq!(engine.store.member("R").unwrap().rank_order, None);
    assert!((engine.store.income_total("R", IncomeType::RankBonus).unwrap() - 2_500.0).abs() < 1e-9);

    let audit = engine.store.audit_entries().unwrap();
    assert_eq!(audit.iter().filter(|a| a.action == "override_rank").count(), 2);
}

#[test]
fn admin_promotion_pays_no_bonus() {
    let mut engine = network();
    override_rank(&mut engine, Some("gold"));
    assert_eq!(engine.store.member("R").unwrap().rank_order, Some(3));
    assert_eq!(engine.store.income_total("R", IncomeType::RankBonus).unwrap(), 0.0);

    // Below gold already: the daily pass never lowers the rank.
    engine.run_day(d(2025, 1, 17)).unwrap();
    assert_eq!(engine.store.member("R").unwrap().rank_order, Some(3));
}
