use crate::error::{EngineError, EngineResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Upper bound for the read-only tree view regardless of configuration.
pub const MAX_TREE_VIEW_DEPTH: usize = 5;

// ── Tree ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpilloverScope {
    /// Search below the sponsor, starting in the requested leg.
    SponsorSubtree,
    /// Search the whole tree from the root.
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Longest ancestor chain a walk may follow before it is treated as a cycle.
    pub max_depth: usize,
    pub tree_view_depth: usize,
    pub spillover: SpilloverScope,
    /// AUTO placements retried after losing a slot to another writer.
    pub placement_retries: u32,
}

// ── Matching ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub binary_percentage: f64,
    pub cycle_days: u32,
    pub cycle_anchor: NaiveDate,
}

/// Generations of downline binary commission a rank may match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchingRule {
    pub depth: u32,
    #[serde(default)]
    pub percentages: Vec<f64>,
    #[serde(default)]
    pub min_personally_sponsored: u32,
    #[serde(default)]
    pub requires_direct_sale: bool,
}

impl MatchingRule {
    /// Percentage for a 1-based generation, `None` past the unlocked depth.
    pub fn percentage_for(&self, generation: u32) -> Option<f64> {
        if generation == 0 || generation > self.depth {
            return None;
        }
        self.percentages.get(generation as usize - 1).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutConfig {
    /// Tax withheld at source on club income.
    pub tds_percentage: f64,
}

// ── Tiers ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankTierConfig {
    pub tier_id: String,
    pub name: String,
    pub display_order: u32,
    pub required_team_volume: f64,
    #[serde(default)]
    pub one_time_bonus: f64,
    #[serde(default)]
    pub monthly_bonus: f64,
    #[serde(default)]
    pub commission_boost_pct: f64,
    #[serde(default)]
    pub matching: MatchingRule,
}

fn default_strong_leg_pct() -> f64 {
    60.0
}
fn default_weak_leg_pct() -> f64 {
    40.0
}
fn default_new_sales_pct() -> f64 {
    10.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClubTierConfig {
    pub tier_id: String,
    pub name: String,
    pub display_order: u32,
    pub required_team_business: f64,
    pub bonus_percentage: f64,
    #[serde(default = "default_strong_leg_pct")]
    pub strong_leg_pct: f64,
    #[serde(default = "default_weak_leg_pct")]
    pub weak_leg_pct: f64,
    #[serde(default = "default_new_sales_pct")]
    pub new_sales_pct: f64,
}

// ── Bonanzas ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BonanzaPeriod {
    FixedDates,
    FromJoinDate { period_days: u32 },
    Monthly,
    Quarterly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRatioRule {
    /// Required share of the top legs, strongest first.
    pub leg_shares: Vec<f64>,
    pub tolerance: f64,
}

impl Default for GroupRatioRule {
    fn default() -> Self {
        Self { leg_shares: vec![40.0, 40.0, 20.0], tolerance: 5.0 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BonanzaCriteria {
    #[serde(default)]
    pub sales_volume: Option<f64>,
    #[serde(default)]
    pub direct_referrals: Option<u32>,
    #[serde(default)]
    pub team_volume: Option<f64>,
    #[serde(default)]
    pub group_ratio: Option<GroupRatioRule>,
    /// Minimum rank by display order.
    #[serde(default)]
    pub min_rank: Option<u32>,
}

impl BonanzaCriteria {
    pub fn is_empty(&self) -> bool {
        self.sales_volume.is_none()
            && self.direct_referrals.is_none()
            && self.team_volume.is_none()
            && self.group_ratio.is_none()
            && self.min_rank.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardType {
    Fixed,
    Percentage,
    PoolShare,
    Item,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BonanzaConfig {
    pub bonanza_id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub period: BonanzaPeriod,
    pub criteria: BonanzaCriteria,
    pub reward_type: RewardType,
    #[serde(default)]
    pub reward_amount: f64,
    #[serde(default)]
    pub pool_amount: f64,
    #[serde(default)]
    pub reward_item: Option<String>,
    #[serde(default)]
    pub max_qualifiers: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardWeights {
    pub sales: f64,
    pub referrals: f64,
    /// Volume-equivalent of one direct referral.
    pub referral_unit: f64,
    pub team: f64,
}

impl Default for LeaderboardWeights {
    fn default() -> Self {
        Self { sales: 0.4, referrals: 0.3, referral_unit: 100_000.0, team: 0.3 }
    }
}

// ── Files ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct PlanFile {
    tree: TreeConfig,
    matching: MatchingConfig,
    payout: PayoutConfig,
    #[serde(default)]
    leaderboard: LeaderboardWeights,
}

#[derive(Debug, Clone, Deserialize)]
struct RankTiersFile {
    rank_tiers: Vec<RankTierConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClubTiersFile {
    club_tiers: Vec<ClubTierConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct BonanzasFile {
    bonanzas: Vec<BonanzaConfig>,
}

/// The compensation plan. Built once, validated once, passed into the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompConfig {
    pub tree: TreeConfig,
    pub matching: MatchingConfig,
    pub payout: PayoutConfig,
    /// Sorted by display order after `validate`.
    pub rank_tiers: Vec<RankTierConfig>,
    pub club_tiers: Vec<ClubTierConfig>,
    pub bonanzas: Vec<BonanzaConfig>,
    pub leaderboard: LeaderboardWeights,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    serde_json::from_str(&content).map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))
}

impl CompConfig {
    /// Load from the data/ directory.
    /// In tests, use CompConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let plan: PlanFile = read_json(&format!("{data_dir}/plan/plan.json"))?;
        let ranks: RankTiersFile = read_json(&format!("{data_dir}/plan/rank_tiers.json"))?;
        let clubs: ClubTiersFile = read_json(&format!("{data_dir}/plan/club_tiers.json"))?;
        let bonanzas: BonanzasFile = read_json(&format!("{data_dir}/plan/bonanzas.json"))?;

        let mut config = Self {
            tree: plan.tree,
            matching: plan.matching,
            payout: plan.payout,
            rank_tiers: ranks.rank_tiers,
            club_tiers: clubs.club_tiers,
            bonanzas: bonanzas.bonanzas,
            leaderboard: plan.leaderboard,
        };
        config.validate()?;
        log::info!(
            "loaded plan from {data_dir}: ranks={} clubs={} bonanzas={}",
            config.rank_tiers.len(),
            config.club_tiers.len(),
            config.bonanzas.len()
        );
        Ok(config)
    }

    /// Reject malformed thresholds before anything is applied.
    /// Sorts tier lists by display order on success.
    pub fn validate(&mut self) -> EngineResult<()> {
        let bad = |msg: String| Err(EngineError::Configuration(msg));

        if self.tree.max_depth == 0 {
            return bad("tree.max_depth must be positive".into());
        }
        if self.tree.tree_view_depth == 0 || self.tree.tree_view_depth > MAX_TREE_VIEW_DEPTH {
            return bad(format!(
                "tree.tree_view_depth must be within 1..={MAX_TREE_VIEW_DEPTH}"
            ));
        }
        if self.matching.cycle_days == 0 {
            return bad("matching.cycle_days must be positive".into());
        }
        if !is_pct(self.matching.binary_percentage) {
            return bad("matching.binary_percentage must be within 0..=100".into());
        }
        if !(0.0..100.0).contains(&self.payout.tds_percentage) {
            return bad("payout.tds_percentage must be within 0..100".into());
        }

        self.rank_tiers.sort_by_key(|t| t.display_order);
        let mut orders = HashSet::new();
        let mut ids = HashSet::new();
        let mut prev_threshold = f64::NEG_INFINITY;
        for tier in &self.rank_tiers {
            if !orders.insert(tier.display_order) || !ids.insert(tier.tier_id.as_str()) {
                return bad(format!("rank tier '{}' is not unique", tier.tier_id));
            }
            if !(tier.required_team_volume >= 0.0) {
                return bad(format!("rank tier '{}' has a negative threshold", tier.tier_id));
            }
            if tier.required_team_volume < prev_threshold {
                return bad(format!(
                    "rank tier '{}' threshold {} is below the previous tier",
                    tier.tier_id, tier.required_team_volume
                ));
            }
            prev_threshold = tier.required_team_volume;
            if tier.one_time_bonus < 0.0 || tier.monthly_bonus < 0.0 {
                return bad(format!("rank tier '{}' has a negative bonus", tier.tier_id));
            }
            if tier.commission_boost_pct < 0.0 {
                return bad(format!("rank tier '{}' has a negative boost", tier.tier_id));
            }
            let rule = &tier.matching;
            if rule.percentages.len() != rule.depth as usize {
                return bad(format!(
                    "rank tier '{}' lists {} matching percentages for depth {}",
                    tier.tier_id,
                    rule.percentages.len(),
                    rule.depth
                ));
            }
            if rule.percentages.iter().any(|p| !is_pct(*p)) {
                return bad(format!("rank tier '{}' matching percentage out of range", tier.tier_id));
            }
        }

        self.club_tiers.sort_by_key(|t| t.display_order);
        let mut orders = HashSet::new();
        let mut ids = HashSet::new();
        for tier in &self.club_tiers {
            if !orders.insert(tier.display_order) || !ids.insert(tier.tier_id.as_str()) {
                return bad(format!("club tier '{}' is not unique", tier.tier_id));
            }
            if !(tier.required_team_business > 0.0) {
                return bad(format!("club tier '{}' requires no business", tier.tier_id));
            }
            for (name, v) in [
                ("bonus_percentage", tier.bonus_percentage),
                ("strong_leg_pct", tier.strong_leg_pct),
                ("weak_leg_pct", tier.weak_leg_pct),
                ("new_sales_pct", tier.new_sales_pct),
            ] {
                if !is_pct(v) {
                    return bad(format!("club tier '{}' {name} must be within 0..=100", tier.tier_id));
                }
            }
            if (tier.strong_leg_pct + tier.weak_leg_pct - 100.0).abs() > 1e-9 {
                return bad(format!(
                    "club tier '{}' balancing rule {}/{} does not sum to 100",
                    tier.tier_id, tier.strong_leg_pct, tier.weak_leg_pct
                ));
            }
        }

        let mut ids = HashSet::new();
        for b in &self.bonanzas {
            if !ids.insert(b.bonanza_id.as_str()) {
                return bad(format!("bonanza '{}' is not unique", b.bonanza_id));
            }
            if b.start_date > b.end_date {
                return bad(format!("bonanza '{}' ends before it starts", b.bonanza_id));
            }
            if let BonanzaPeriod::FromJoinDate { period_days: 0 } = b.period {
                return bad(format!("bonanza '{}' has a zero-day join window", b.bonanza_id));
            }
            if b.criteria.is_empty() {
                return bad(format!("bonanza '{}' has no criteria", b.bonanza_id));
            }
            if let Some(gr) = &b.criteria.group_ratio {
                let total: f64 = gr.leg_shares.iter().sum();
                if gr.leg_shares.is_empty() || (total - 100.0).abs() > 1e-9 || gr.tolerance < 0.0 {
                    return bad(format!("bonanza '{}' group ratio is malformed", b.bonanza_id));
                }
            }
            if let Some(rank) = b.criteria.min_rank {
                if self.rank_by_order(rank).is_none() {
                    return bad(format!("bonanza '{}' references unknown rank {rank}", b.bonanza_id));
                }
            }
            match b.reward_type {
                RewardType::PoolShare if !(b.pool_amount > 0.0) => {
                    return bad(format!("bonanza '{}' pool amount must be positive", b.bonanza_id));
                }
                RewardType::Percentage if !is_pct(b.reward_amount) => {
                    return bad(format!("bonanza '{}' percentage out of range", b.bonanza_id));
                }
                RewardType::Fixed if b.reward_amount < 0.0 => {
                    return bad(format!("bonanza '{}' reward is negative", b.bonanza_id));
                }
                _ => {}
            }
        }

        let w = &self.leaderboard;
        if w.sales < 0.0 || w.referrals < 0.0 || w.team < 0.0 || w.referral_unit < 0.0 {
            return bad("leaderboard weights must be non-negative".into());
        }
        Ok(())
    }

    // ── Lookups ────────────────────────────────────────────────────

    pub fn rank_by_order(&self, display_order: u32) -> Option<&RankTierConfig> {
        self.rank_tiers.iter().find(|t| t.display_order == display_order)
    }

    pub fn rank_tier(&self, tier_id: &str) -> EngineResult<&RankTierConfig> {
        self.rank_tiers
            .iter()
            .find(|t| t.tier_id == tier_id)
            .ok_or_else(|| EngineError::UnknownConfigEntry { kind: "rank tier", id: tier_id.into() })
    }

    pub fn club_tier(&self, tier_id: &str) -> EngineResult<&ClubTierConfig> {
        self.club_tiers
            .iter()
            .find(|t| t.tier_id == tier_id)
            .ok_or_else(|| EngineError::UnknownConfigEntry { kind: "club tier", id: tier_id.into() })
    }

    pub fn bonanza(&self, bonanza_id: &str) -> EngineResult<&BonanzaConfig> {
        self.bonanzas
            .iter()
            .find(|b| b.bonanza_id == bonanza_id)
            .ok_or_else(|| EngineError::UnknownConfigEntry { kind: "bonanza", id: bonanza_id.into() })
    }

    /// Highest tier whose threshold the volume reaches. Equal thresholds
    /// resolve to the lowest display order.
    pub fn rank_for_volume(&self, team_volume: f64) -> Option<&RankTierConfig> {
        let mut best: Option<&RankTierConfig> = None;
        for tier in &self.rank_tiers {
            if tier.required_team_volume > team_volume {
                continue;
            }
            best = match best {
                Some(b) if b.required_team_volume >= tier.required_team_volume => Some(b),
                _ => Some(tier),
            };
        }
        best
    }

    /// Deepest generation any rank unlocks.
    pub fn max_matching_depth(&self) -> u32 {
        self.rank_tiers.iter().map(|t| t.matching.depth).max().unwrap_or(0)
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN);
        let rule = |depth: u32, pcts: &[f64], min: u32, sale: bool| MatchingRule {
            depth,
            percentages: pcts.to_vec(),
            min_personally_sponsored: min,
            requires_direct_sale: sale,
        };

        Self {
            tree: TreeConfig {
                max_depth: 1_000,
                tree_view_depth: MAX_TREE_VIEW_DEPTH,
                spillover: SpilloverScope::SponsorSubtree,
                placement_retries: 3,
            },
            matching: MatchingConfig {
                binary_percentage: 10.0,
                cycle_days: 7,
                cycle_anchor: date(2025, 1, 1),
            },
            payout: PayoutConfig { tds_percentage: 5.0 },
            rank_tiers: vec![
                RankTierConfig {
                    tier_id: "bronze".into(),
                    name: "Bronze".into(),
                    display_order: 1,
                    required_team_volume: 10_000.0,
                    one_time_bonus: 500.0,
                    monthly_bonus: 100.0,
                    commission_boost_pct: 0.0,
                    matching: rule(1, &[10.0], 1, false),
                },
                RankTierConfig {
                    tier_id: "silver".into(),
                    name: "Silver".into(),
                    display_order: 2,
                    required_team_volume: 50_000.0,
                    one_time_bonus: 2_000.0,
                    monthly_bonus: 300.0,
                    commission_boost_pct: 5.0,
                    matching: rule(2, &[10.0, 5.0], 2, false),
                },
                RankTierConfig {
                    tier_id: "gold".into(),
                    name: "Gold".into(),
                    display_order: 3,
                    required_team_volume: 200_000.0,
                    one_time_bonus: 10_000.0,
                    monthly_bonus: 1_000.0,
                    commission_boost_pct: 10.0,
                    matching: rule(3, &[15.0, 10.0, 5.0], 3, true),
                },
            ],
            club_tiers: vec![
                ClubTierConfig {
                    tier_id: "star".into(),
                    name: "Star Club".into(),
                    display_order: 1,
                    required_team_business: 100_000.0,
                    bonus_percentage: 2.0,
                    strong_leg_pct: 60.0,
                    weak_leg_pct: 40.0,
                    new_sales_pct: 10.0,
                },
                ClubTierConfig {
                    tier_id: "diamond".into(),
                    name: "Diamond Club".into(),
                    display_order: 2,
                    required_team_business: 500_000.0,
                    bonus_percentage: 3.0,
                    strong_leg_pct: 60.0,
                    weak_leg_pct: 40.0,
                    new_sales_pct: 10.0,
                },
            ],
            bonanzas: vec![BonanzaConfig {
                bonanza_id: "fast_start".into(),
                name: "Fast Start".into(),
                start_date: date(2025, 1, 1),
                end_date: date(2025, 12, 31),
                period: BonanzaPeriod::FromJoinDate { period_days: 60 },
                criteria: BonanzaCriteria {
                    sales_volume: Some(5_000.0),
                    direct_referrals: Some(2),
                    ..Default::default()
                },
                reward_type: RewardType::Fixed,
                reward_amount: 1_000.0,
                pool_amount: 0.0,
                reward_item: None,
                max_qualifiers: None,
            }],
            leaderboard: LeaderboardWeights::default(),
        }
    }
}

fn is_pct(v: f64) -> bool {
    (0.0..=100.0).contains(&v)
}
