//! Loading and validating the compensation plan files.

use network_comp_core::{
    config::{BonanzaPeriod, CompConfig, RewardType, SpilloverScope},
    error::EngineError,
};

#[test]
fn shipped_plan_loads_and_validates() {
    let config = CompConfig::load("../data").expect("plan files in data/plan");

    assert_eq!(config.tree.spillover, SpilloverScope::SponsorSubtree);
    assert_eq!(config.matching.cycle_days, 7);
    let ranks: Vec<&str> = config.rank_tiers.iter().map(|t| t.tier_id.as_str()).collect();
    assert_eq!(ranks, ["associate", "manager", "director", "executive"]);
    assert_eq!(config.club_tiers.len(), 3);
    assert_eq!(config.max_matching_depth(), 5);

    let pool = config.bonanza("leaders_pool").unwrap();
    assert_eq!(pool.reward_type, RewardType::PoolShare);
    assert_eq!(pool.max_qualifiers, Some(25));
    assert_eq!(
        config.bonanza("fast_start").unwrap().period,
        BonanzaPeriod::FromJoinDate { period_days: 60 }
    );
}

#[test]
fn missing_plan_directory_is_an_error() {
    assert!(CompConfig::load("../no-such-dir").is_err());
}

fn rejects(mut config: CompConfig, needle: &str) {
    match config.validate() {
        Err(EngineError::Configuration(msg)) => assert!(msg.contains(needle), "unexpected message: {msg}"),
        other => panic!("expected a configuration error mentioning '{needle}', got {other:?}"),
    }
}

#[test]
fn unbalanced_club_split_is_rejected() {
    let mut config = CompConfig::default_test();
    config.club_tiers[0].strong_leg_pct = 70.0;
    rejects(config, "does not sum to 100");
}

#[test]
fn matching_percentages_must_cover_the_depth() {
    let mut config = CompConfig::default_test();
    config.rank_tiers[1].matching.depth = 3;
    rejects(config, "matching percentages");
}

#[test]
fn decreasing_rank_thresholds_are_rejected() {
    let mut config = CompConfig::default_test();
    config.rank_tiers[2].required_team_volume = 1_000.0;
    rejects(config, "below the previous tier");
}

#[test]
fn bonanza_needs_criteria_and_a_pool() {
    let mut config = CompConfig::default_test();
    config.bonanzas[0].criteria = Default::default();
    rejects(config, "has no criteria");

    let mut config = CompConfig::default_test();
    config.bonanzas[0].reward_type = RewardType::PoolShare;
    rejects(config, "pool amount must be positive");
}

#[test]
fn tree_view_depth_is_capped() {
    let mut config = CompConfig::default_test();
    config.tree.tree_view_depth = 9;
    rejects(config, "tree_view_depth");
}
