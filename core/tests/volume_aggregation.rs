//! BV roll-up along the placement chain.

use chrono::NaiveDate;
use network_comp_core::{
    engine::{CompEngine, Registration},
    error::EngineError,
    types::{EdgeType, Side, VolumeKind},
    volume::{VolumeEvent, VolumeOutcome},
};

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

fn rabc() -> CompEngine {
    let mut engine = CompEngine::build_test().unwrap();
    engine.register_root("R", day()).unwrap();
    engine.register_member(&Registration::new("A", "R", day()).explicit("R", Side::Left)).unwrap();
    engine.register_member(&Registration::new("B", "R", day()).explicit("R", Side::Right)).unwrap();
    engine.register_member(&Registration::new("C", "A", day()).explicit("A", Side::Left)).unwrap();
    engine
}

fn sale(source_ref: &str, member_id: &str, amount: f64) -> VolumeEvent {
    VolumeEvent {
        source_ref: source_ref.into(),
        member_id: member_id.into(),
        kind: VolumeKind::Sale,
        amount,
        booked_on: day(),
    }
}

#[test]
fn volume_on_c_reaches_left_legs_of_a_and_r_only() {
    let engine = rabc();
    let outcome = engine.apply_personal_volume(&sale("ord-1", "C", 1_000.0)).unwrap();
    assert_eq!(outcome, VolumeOutcome::Applied { ancestors: 2 });

    let c = engine.store.member("C").unwrap();
    let a = engine.store.member("A").unwrap();
    let r = engine.store.member("R").unwrap();
    let b = engine.store.member("B").unwrap();

    assert_eq!(c.personal_bv, 1_000.0);
    assert_eq!((c.left_bv, c.right_bv, c.team_bv), (0.0, 0.0, 0.0));
    assert_eq!((a.left_bv, a.right_bv, a.team_bv), (1_000.0, 0.0, 1_000.0));
    assert_eq!((r.left_bv, r.right_bv, r.team_bv), (1_000.0, 0.0, 1_000.0));
    assert_eq!((b.personal_bv, b.left_bv, b.right_bv, b.team_bv), (0.0, 0.0, 0.0, 0.0));
    assert_eq!(a.personal_bv, 0.0, "ancestors get leg volume, not personal volume");
}

#[test]
fn reapplying_a_source_ref_is_a_no_op() {
    let engine = rabc();
    engine.apply_personal_volume(&sale("ord-1", "C", 1_000.0)).unwrap();
    let again = engine.apply_personal_volume(&sale("ord-1", "C", 1_000.0)).unwrap();
    assert_eq!(again, VolumeOutcome::Duplicate);
    assert_eq!(engine.store.member("R").unwrap().left_bv, 1_000.0);
    assert_eq!(engine.store.volume_entries("C").unwrap().len(), 1);
}

#[test]
fn non_positive_volume_is_rejected() {
    let engine = rabc();
    let err = engine.apply_personal_volume(&sale("ord-x", "C", -10.0)).unwrap_err();
    assert!(matches!(err, EngineError::InvalidVolume { .. }));
    assert_eq!(engine.store.member("C").unwrap().personal_bv, 0.0);
}

#[test]
fn leg_sums_equal_descendant_personal_volume() {
    let engine = rabc();
    let bookings = [("o1", "A", 250.0), ("o2", "B", 700.0), ("o3", "C", 1_000.0), ("o4", "C", 50.5)];
    for (source_ref, member, amount) in bookings {
        engine.apply_personal_volume(&sale(source_ref, member, amount)).unwrap();
    }

    for id in ["R", "A", "B", "C"] {
        let m = engine.store.member(id).unwrap();
        for side in Side::BOTH {
            let leg: f64 = engine
                .enumerate(id, EdgeType::Placement, Some(side))
                .unwrap()
                .iter()
                .map(|d| engine.store.member(d).unwrap().personal_bv)
                .sum();
            assert!(
                (m.leg_bv(side) - leg).abs() < 1e-9,
                "{id} {side} leg {} != descendant volume {leg}",
                m.leg_bv(side)
            );
        }
        assert!((m.team_bv - m.left_bv - m.right_bv).abs() < 1e-9);
    }
}

#[test]
fn unknown_member_volume_fails_cleanly() {
    let engine = rabc();
    let err = engine.apply_personal_volume(&sale("ord-9", "ghost", 10.0)).unwrap_err();
    assert!(matches!(err, EngineError::MemberNotFound(_)));
    assert!(!engine.store.volume_entry_exists("ord-9").unwrap());
}
