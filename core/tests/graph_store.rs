//! Registration, placement and traversal through the engine.

use chrono::NaiveDate;
use network_comp_core::{
    config::{CompConfig, SpilloverScope},
    engine::{CompEngine, Registration},
    error::EngineError,
    event::EngineEvent,
    tree_view::Viewer,
    types::{EdgeType, MemberStatus, Side},
};

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

/// R at the root, A and B placed under R, C under A's left.
fn rabc(config: CompConfig) -> CompEngine {
    let mut engine = CompEngine::build_test_with(config).unwrap();
    engine.register_root("R", day()).unwrap();
    engine.register_member(&Registration::new("A", "R", day()).explicit("R", Side::Left)).unwrap();
    engine.register_member(&Registration::new("B", "R", day()).explicit("R", Side::Right)).unwrap();
    engine.register_member(&Registration::new("C", "A", day()).explicit("A", Side::Left)).unwrap();
    engine
}

fn sorted(mut ids: Vec<String>) -> Vec<String> {
    ids.sort();
    ids
}

#[test]
fn rabc_enumeration_and_descendant_checks() {
    let engine = rabc(CompConfig::default_test());

    assert_eq!(sorted(engine.enumerate("R", EdgeType::Placement, None).unwrap()), ["A", "B", "C"]);
    assert_eq!(sorted(engine.enumerate("R", EdgeType::Placement, Some(Side::Left)).unwrap()), ["A", "C"]);
    assert_eq!(engine.enumerate("R", EdgeType::Placement, Some(Side::Right)).unwrap(), ["B"]);
    assert_eq!(engine.enumerate("A", EdgeType::Sponsor, None).unwrap(), ["C"]);

    assert!(engine.is_descendant("R", "C").unwrap());
    assert!(engine.is_descendant("A", "C").unwrap());
    assert!(!engine.is_descendant("B", "C").unwrap());
    assert!(!engine.is_descendant("C", "C").unwrap(), "a node is not its own descendant");
    assert!(!engine.is_descendant("C", "R").unwrap());
}

#[test]
fn occupied_explicit_slot_is_a_slot_conflict() {
    let mut engine = rabc(CompConfig::default_test());
    let err = engine
        .register_member(&Registration::new("D", "R", day()).explicit("R", Side::Left))
        .unwrap_err();
    assert!(
        matches!(err, EngineError::SlotConflict { ref parent_id, side: Side::Left } if parent_id == "R"),
        "expected SlotConflict, got {err}"
    );
    assert!(!engine.store.member_exists("D").unwrap(), "failed registration must leave no row");
    assert!(!engine.graph().contains("D"));
}

#[test]
fn auto_placement_spills_to_shallowest_open_slot() {
    let mut engine = rabc(CompConfig::default_test());

    let event = engine.register_member(&Registration::new("D", "R", day())).unwrap();
    match event {
        EngineEvent::MemberRegistered { parent_id, side, attempts, .. } => {
            assert_eq!((parent_id.as_str(), side, attempts), ("A", Side::Right, 1));
        }
        other => panic!("unexpected event {other:?}"),
    }

    // Preferring the right leg searches below B first.
    engine.register_member(&Registration::new("E", "R", day()).auto(Some(Side::Right))).unwrap();
    let e = engine.store.member("E").unwrap();
    assert_eq!(e.placement_parent_id.as_deref(), Some("B"));
    assert_eq!(e.placement_side, Some(Side::Left));
    assert_eq!(e.sponsor_id.as_deref(), Some("R"));
}

#[test]
fn global_spillover_starts_at_the_root() {
    let mut config = CompConfig::default_test();
    config.tree.spillover = SpilloverScope::Global;
    let mut engine = rabc(config);

    // C sponsors, but the search begins at R: A's right slot is the shallowest.
    engine.register_member(&Registration::new("D", "C", day())).unwrap();
    let d = engine.store.member("D").unwrap();
    assert_eq!(d.placement_parent_id.as_deref(), Some("A"));
    assert_eq!(d.placement_side, Some(Side::Right));
}

#[test]
fn duplicate_members_and_second_roots_are_rejected() {
    let mut engine = rabc(CompConfig::default_test());
    assert!(matches!(
        engine.register_member(&Registration::new("C", "R", day())),
        Err(EngineError::MemberExists(_))
    ));
    assert!(matches!(engine.register_root("Z", day()), Err(EngineError::RootExists(_))));
    assert!(matches!(
        engine.register_member(&Registration::new("Y", "nobody", day())),
        Err(EngineError::MemberNotFound(_))
    ));
}

#[test]
fn graph_survives_a_reload_from_the_store() {
    let mut engine = rabc(CompConfig::default_test());
    engine.reload_graph().unwrap();
    assert_eq!(engine.graph().len(), 4);
    assert_eq!(engine.graph().root_id(), Some("R"));
    assert!(engine.is_descendant("R", "C").unwrap());
}

#[test]
fn status_changes_are_soft_and_audited() {
    let mut engine = rabc(CompConfig::default_test());
    engine.set_member_status("C", MemberStatus::Inactive, "ops", day()).unwrap();

    let stats = engine.team_stats("R").unwrap();
    assert_eq!(stats.direct_referrals, 2);
    assert_eq!(stats.total_downline, 3);
    assert_eq!((stats.placement_left, stats.placement_right), (2, 1));
    assert_eq!((stats.active, stats.inactive), (2, 1));
    assert_eq!((stats.sponsor_left, stats.sponsor_right), (2, 1));

    assert_eq!(engine.store.member("C").unwrap().status, MemberStatus::Inactive);
    let audit = engine.store.audit_entries().unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, "set_member_status");
    assert_eq!(audit[0].target, "C");
}

#[test]
fn tree_view_is_limited_to_own_downline() {
    let engine = rabc(CompConfig::default_test());

    let view = engine.tree_view(&Viewer::Member("A".into()), "A", None).unwrap();
    assert_eq!(view.member_id, "A");
    assert_eq!(view.left.as_ref().map(|n| n.member_id.as_str()), Some("C"));
    assert!(view.right.is_none());

    // A may look below itself but not at its sibling or its upline.
    assert!(engine.tree_view(&Viewer::Member("A".into()), "C", None).is_ok());
    assert!(matches!(
        engine.tree_view(&Viewer::Member("A".into()), "B", None),
        Err(EngineError::AccessDenied { .. })
    ));
    assert!(matches!(
        engine.tree_view(&Viewer::Member("C".into()), "R", None),
        Err(EngineError::AccessDenied { .. })
    ));

    let admin = engine.tree_view(&Viewer::Admin, "R", Some(1)).unwrap();
    let a = admin.left.as_ref().unwrap();
    assert_eq!(a.member_id, "A");
    assert_eq!(a.depth, 1);
    assert!(a.left.is_none(), "depth 1 stops below R's children");
}

#[test]
fn registration_events_are_logged() {
    let engine = rabc(CompConfig::default_test());
    let log = engine.store.events_between(day(), day()).unwrap();
    let types: Vec<&str> = log.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types, ["root_registered", "member_registered", "member_registered", "member_registered"]);
    assert!(log.iter().all(|e| e.component == "graph"));
}

#[test]
fn members_can_join_inactive() {
    let mut engine = rabc(CompConfig::default_test());
    engine
        .register_member(&Registration::new("D", "B", day()).explicit("B", Side::Left).with_status(MemberStatus::Inactive))
        .unwrap();
    assert_eq!(engine.store.member("D").unwrap().status, MemberStatus::Inactive);
    let stats = engine.team_stats("B").unwrap();
    assert_eq!((stats.active, stats.inactive), (0, 1));
}
