//! Time-boxed bonanza campaigns.
//!
//! Each (member, bonanza) pair moves PENDING → IN_PROGRESS → QUALIFIED →
//! AWARDED, with DISQUALIFIED and EXPIRED absorbing. Metrics are always
//! measured inside the member's window, so volume booked after the window
//! closes can never qualify it.
//!
//! Overall progress is the minimum across the configured criteria.

use crate::{
    config::{BonanzaConfig, BonanzaCriteria, BonanzaPeriod, CompConfig, GroupRatioRule, LeaderboardWeights, RewardType},
    enumerator,
    error::{EngineError, EngineResult},
    event::EngineEvent,
    graph::NetworkGraph,
    period::{CycleWindow, Period},
    store::{AuditEntry, BonanzaQualificationRow, IncomeEntry, MemberRecord, NetworkStore},
    subsystem::{BatchCounts, CompSubsystem, JobContext},
    types::{BonanzaStatus, EdgeType, IncomeType, MemberStatus},
};
use chrono::{Duration, NaiveDate};

// ── Windows ────────────────────────────────────────────────────────

/// The window a member is measured in on `as_of`, or `None` when the member
/// is not eligible (joined outside a join-based campaign, or the campaign
/// has not started).
pub fn member_window(bonanza: &BonanzaConfig, joined_on: NaiveDate, as_of: NaiveDate) -> Option<CycleWindow> {
    if as_of < bonanza.start_date {
        return None;
    }
    let bounds = CycleWindow::new(bonanza.start_date, bonanza.end_date)?;
    match bonanza.period {
        BonanzaPeriod::FixedDates => Some(bounds),
        BonanzaPeriod::FromJoinDate { period_days } => {
            if !bounds.contains(joined_on) {
                return None;
            }
            CycleWindow::new(joined_on, joined_on + Duration::days(i64::from(period_days)))
        }
        BonanzaPeriod::Monthly => Period::containing(as_of.min(bonanza.end_date)).window().clip(&bounds),
        BonanzaPeriod::Quarterly => CycleWindow::quarter_of(as_of.min(bonanza.end_date)).clip(&bounds),
    }
}

/// Last date any member window of the campaign can reach.
pub fn horizon(bonanza: &BonanzaConfig) -> NaiveDate {
    match bonanza.period {
        BonanzaPeriod::FromJoinDate { period_days } => bonanza.end_date + Duration::days(i64::from(period_days)),
        _ => bonanza.end_date,
    }
}

// ── Assessment ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BonanzaMetrics {
    pub sales_volume:     f64,
    pub direct_referrals: u32,
    pub team_volume:      f64,
    /// Strongest sponsor legs first; only measured when the criterion is set.
    pub group_legs:       Vec<f64>,
    pub rank_order:       Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BonanzaAssessment {
    pub progress:        f64,
    pub all_met:         bool,
    pub group_ratio_met: bool,
    pub score:           f64,
}

fn ratio_progress(actual: f64, required: f64) -> f64 {
    if required <= 0.0 {
        return 100.0;
    }
    (actual / required).min(1.0) * 100.0
}

/// Top legs must each carry their required share of the top-leg total,
/// less the tolerance. Fewer legs than shares never passes.
pub fn group_ratio_met(legs: &[f64], rule: &GroupRatioRule) -> bool {
    let n = rule.leg_shares.len();
    if n == 0 || legs.len() < n {
        return false;
    }
    let top = &legs[..n];
    let total: f64 = top.iter().sum();
    if total <= 0.0 {
        return false;
    }
    top.iter()
        .zip(&rule.leg_shares)
        .all(|(v, required)| v / total * 100.0 >= required - rule.tolerance)
}

pub fn leaderboard_score(m: &BonanzaMetrics, w: &LeaderboardWeights) -> f64 {
    m.sales_volume * w.sales + f64::from(m.direct_referrals) * w.referral_unit * w.referrals + m.team_volume * w.team
}

pub fn assess(criteria: &BonanzaCriteria, metrics: &BonanzaMetrics, weights: &LeaderboardWeights) -> BonanzaAssessment {
    let mut parts = Vec::new();
    if let Some(req) = criteria.sales_volume {
        parts.push(ratio_progress(metrics.sales_volume, req));
    }
    if let Some(req) = criteria.direct_referrals {
        parts.push(ratio_progress(f64::from(metrics.direct_referrals), f64::from(req)));
    }
    if let Some(req) = criteria.team_volume {
        parts.push(ratio_progress(metrics.team_volume, req));
    }
    let group_ok = criteria
        .group_ratio
        .as_ref()
        .map(|rule| group_ratio_met(&metrics.group_legs, rule));
    if let Some(ok) = group_ok {
        parts.push(if ok { 100.0 } else { 0.0 });
    }
    if let Some(min) = criteria.min_rank {
        parts.push(if metrics.rank_order.is_some_and(|r| r >= min) { 100.0 } else { 0.0 });
    }

    let progress = parts.iter().copied().fold(100.0, f64::min);
    BonanzaAssessment {
        progress,
        all_met: !parts.is_empty() && parts.iter().all(|p| *p >= 100.0),
        group_ratio_met: group_ok.unwrap_or(false),
        score: leaderboard_score(metrics, weights),
    }
}

/// Status for an open record after an assessment.
pub fn next_status(a: &BonanzaAssessment, as_of: NaiveDate, window: &CycleWindow, cap_reached: bool) -> BonanzaStatus {
    if a.all_met {
        if cap_reached {
            BonanzaStatus::Disqualified
        } else {
            BonanzaStatus::Qualified
        }
    } else if as_of > window.end {
        BonanzaStatus::Expired
    } else if a.progress > 0.0 {
        BonanzaStatus::InProgress
    } else {
        BonanzaStatus::Pending
    }
}

pub fn measure(
    store: &NetworkStore,
    graph: &NetworkGraph,
    criteria: &BonanzaCriteria,
    member: &MemberRecord,
    window: &CycleWindow,
) -> EngineResult<BonanzaMetrics> {
    let node = graph.node_by_id(&member.member_id)?;
    let direct_referrals = node
        .sponsored
        .iter()
        .map(|idx| graph.node(*idx))
        .filter(|n| window.contains(n.joined_on) && n.status != MemberStatus::Suspended)
        .count() as u32;

    let mut group_legs = Vec::new();
    if criteria.group_ratio.is_some() {
        for child in &node.sponsored {
            let mut ids = vec![graph.id(*child).to_string()];
            ids.extend(enumerator::enumerate(graph, graph.id(*child), EdgeType::Sponsor, None)?);
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            group_legs.push(store.group_volume_between(&refs, window)?);
        }
        group_legs.sort_by(|a, b| b.total_cmp(a));
    }

    Ok(BonanzaMetrics {
        sales_volume: store.personal_volume_between(&member.member_id, window)?,
        direct_referrals,
        team_volume: store.leg_volume_between(&member.member_id, None, window)?,
        group_legs,
        rank_order: member.rank_order,
    })
}

fn bonanza_ref(bonanza_id: &str, member_id: &str) -> String {
    format!("BONANZA:{bonanza_id}:{member_id}")
}

/// Cash reward due on qualification. Pool shares are paid at close.
fn reward_on_qualify(bonanza: &BonanzaConfig, metrics_sales: f64) -> f64 {
    match bonanza.reward_type {
        RewardType::Fixed      => bonanza.reward_amount,
        RewardType::Percentage => metrics_sales * bonanza.reward_amount / 100.0,
        RewardType::PoolShare  => 0.0,
        RewardType::Item       => 0.0,
    }
}

// ── Batch ──────────────────────────────────────────────────────────

/// Evaluate one campaign for every member on `as_of`.
pub fn evaluate_bonanza(
    ctx: &JobContext<'_>,
    bonanza: &BonanzaConfig,
) -> EngineResult<(BatchCounts, Vec<EngineEvent>)> {
    let mut counts = BatchCounts::default();
    let mut events = Vec::new();
    if ctx.as_of < bonanza.start_date {
        return Ok((counts, events));
    }
    let past_horizon = ctx.as_of > horizon(bonanza);

    let members: Vec<MemberRecord> = if past_horizon {
        // Only open records are left to expire.
        let open: Vec<String> = ctx
            .store
            .bonanza_qualifications(&bonanza.bonanza_id, None)?
            .into_iter()
            .filter(|q| q.status.is_open() && !q.manual_override)
            .map(|q| q.member_id)
            .collect();
        let refs: Vec<&str> = open.iter().map(String::as_str).collect();
        ctx.store.members_in(&refs)?
    } else {
        ctx.store.members()?
    };

    for member in members {
        match evaluate_member(ctx, bonanza, &member) {
            Ok(None) => {}
            Ok(Some(evs)) => {
                counts.evaluated += 1;
                counts.succeeded += 1;
                events.extend(evs);
            }
            Err(e) if e.is_duplicate() => {
                counts.evaluated += 1;
                counts.skipped += 1;
            }
            Err(e) => {
                counts.evaluated += 1;
                counts.failed += 1;
                log::error!(
                    "bonanza evaluation failed: member={} bonanza={} error={e}",
                    member.member_id,
                    bonanza.bonanza_id
                );
            }
        }
    }

    if let Some(max) = bonanza.max_qualifiers {
        if ctx.store.bonanza_qualified_count(&bonanza.bonanza_id)? >= i64::from(max) {
            let closed = ctx.store.disqualify_open_bonanza_records(&bonanza.bonanza_id, ctx.as_of)?;
            if closed > 0 {
                log::info!("bonanza cap reached: bonanza={} closed={closed}", bonanza.bonanza_id);
            }
        }
    }

    if bonanza.reward_type == RewardType::PoolShare && past_horizon {
        events.extend(distribute_pool(ctx, bonanza)?);
    }

    log::debug!(
        "bonanza {} on {}: evaluated={} updated={} skipped={} failed={}",
        bonanza.bonanza_id,
        ctx.as_of,
        counts.evaluated,
        counts.succeeded,
        counts.skipped,
        counts.failed
    );
    Ok((counts, events))
}

/// `None` when the member is not eligible or its record is already settled.
fn evaluate_member(
    ctx: &JobContext<'_>,
    bonanza: &BonanzaConfig,
    member: &MemberRecord,
) -> EngineResult<Option<Vec<EngineEvent>>> {
    let existing = ctx.store.bonanza_qualification(&member.member_id, &bonanza.bonanza_id)?;
    // Pool qualifiers keep their standing but their score tracks the window.
    let standing = existing.as_ref().filter(|q| {
        q.status == BonanzaStatus::Qualified && bonanza.reward_type == RewardType::PoolShare
    });
    if let Some(q) = &existing {
        if (!q.status.is_open() && standing.is_none()) || q.manual_override {
            return Ok(None);
        }
    }
    if !member.status.is_active() && existing.is_none() {
        return Ok(None);
    }
    let window = match standing {
        Some(q) => CycleWindow::new(q.window_start, q.window_end),
        None => member_window(bonanza, member.joined_on, ctx.as_of),
    };
    let Some(window) = window else {
        return Ok(None);
    };

    let metrics = measure(ctx.store, ctx.graph, &bonanza.criteria, member, &window)?;
    let a = assess(&bonanza.criteria, &metrics, &ctx.config.leaderboard);
    let cap_reached = match (standing, bonanza.max_qualifiers) {
        (None, Some(max)) => ctx.store.bonanza_qualified_count(&bonanza.bonanza_id)? >= i64::from(max),
        _ => false,
    };
    let mut status = match standing {
        Some(_) => BonanzaStatus::Qualified,
        None => next_status(&a, ctx.as_of, &window, cap_reached),
    };
    if standing.is_none() && !member.status.is_active() && status == BonanzaStatus::Qualified {
        // Inactive members keep their progress but cannot qualify.
        status = BonanzaStatus::InProgress;
    }

    let mut row = BonanzaQualificationRow {
        member_id:        member.member_id.clone(),
        bonanza_id:       bonanza.bonanza_id.clone(),
        status,
        window_start:     window.start,
        window_end:       window.end,
        sales_volume:     metrics.sales_volume,
        direct_referrals: metrics.direct_referrals,
        team_volume:      metrics.team_volume,
        group_ratio_met:  a.group_ratio_met,
        progress:         a.progress,
        score:            a.score,
        reward_amount:    0.0,
        evaluated_on:     ctx.as_of,
        qualified_on:     standing.and_then(|q| q.qualified_on),
        awarded_on:       None,
        manual_override:  false,
        override_reason:  None,
        override_by:      None,
    };

    let unchanged = existing.as_ref().is_some_and(|q| {
        q.status == row.status && q.progress == row.progress && q.score == row.score && q.window_start == row.window_start
    });
    if unchanged {
        return Ok(None);
    }

    let mut events = Vec::new();
    let mut paid = 0.0;
    if status == BonanzaStatus::Qualified && standing.is_none() {
        row.qualified_on = Some(ctx.as_of);
        if bonanza.reward_type != RewardType::PoolShare {
            paid = reward_on_qualify(bonanza, metrics.sales_volume);
            row.reward_amount = paid;
            row.status = BonanzaStatus::Awarded;
            row.awarded_on = Some(ctx.as_of);
        }
    }

    ctx.store.in_transaction(|s| {
        s.upsert_bonanza_qualification(&row)?;
        if paid > 0.0 {
            s.insert_income(&IncomeEntry {
                member_id:    row.member_id.clone(),
                income_type:  IncomeType::Bonanza,
                gross_amount: paid,
                tds_amount:   0.0,
                amount:       paid,
                source_ref:   bonanza_ref(&row.bonanza_id, &row.member_id),
                booked_on:    ctx.as_of,
            })?;
        }
        Ok(())
    })?;

    events.push(EngineEvent::BonanzaProgressed {
        member_id:  row.member_id.clone(),
        bonanza_id: row.bonanza_id.clone(),
        status:     row.status,
        progress:   row.progress,
    });
    if row.status == BonanzaStatus::Awarded {
        log::info!(
            "bonanza awarded: member={} bonanza={} amount={paid}",
            row.member_id,
            row.bonanza_id
        );
        events.push(EngineEvent::BonanzaAwarded {
            member_id:  row.member_id.clone(),
            bonanza_id: row.bonanza_id.clone(),
            amount:     paid,
        });
    }
    Ok(Some(events))
}

/// Re-measure a qualifier over its stored window so the split uses the
/// score the whole window earned, not the score on the day it qualified.
fn final_standing(ctx: &JobContext<'_>, bonanza: &BonanzaConfig, q: &mut BonanzaQualificationRow) -> EngineResult<()> {
    let Some(window) = CycleWindow::new(q.window_start, q.window_end) else {
        return Ok(());
    };
    let member = ctx.store.member(&q.member_id)?;
    let metrics = measure(ctx.store, ctx.graph, &bonanza.criteria, &member, &window)?;
    let a = assess(&bonanza.criteria, &metrics, &ctx.config.leaderboard);
    q.sales_volume = metrics.sales_volume;
    q.direct_referrals = metrics.direct_referrals;
    q.team_volume = metrics.team_volume;
    q.group_ratio_met = a.group_ratio_met;
    q.progress = a.progress;
    q.score = a.score;
    q.evaluated_on = ctx.as_of;
    Ok(())
}

/// Split a closed pool among QUALIFIED records in proportion to their final
/// score; an all-zero field shares equally. Safe to call repeatedly.
pub fn distribute_pool(ctx: &JobContext<'_>, bonanza: &BonanzaConfig) -> EngineResult<Vec<EngineEvent>> {
    let (store, on) = (ctx.store, ctx.as_of);
    if bonanza.reward_type != RewardType::PoolShare {
        return Err(EngineError::InvalidOverride(format!(
            "bonanza '{}' is not a pool-share campaign",
            bonanza.bonanza_id
        )));
    }
    if on <= horizon(bonanza) {
        return Err(EngineError::InvalidOverride(format!(
            "bonanza '{}' pool closes after {}",
            bonanza.bonanza_id,
            horizon(bonanza)
        )));
    }
    let mut qualifiers = store.bonanza_qualifications(&bonanza.bonanza_id, Some(BonanzaStatus::Qualified))?;
    if qualifiers.is_empty() {
        return Ok(Vec::new());
    }
    for q in qualifiers.iter_mut().filter(|q| !q.manual_override) {
        final_standing(ctx, bonanza, q)?;
    }
    let total_score: f64 = qualifiers.iter().map(|q| q.score.max(0.0)).sum();
    let n = qualifiers.len() as f64;

    let events = store.in_transaction(|s| {
        let mut events = Vec::with_capacity(qualifiers.len());
        for q in &qualifiers {
            let share = if total_score > 0.0 {
                bonanza.pool_amount * q.score.max(0.0) / total_score
            } else {
                bonanza.pool_amount / n
            };
            let mut row = q.clone();
            row.status = BonanzaStatus::Awarded;
            row.reward_amount = share;
            row.awarded_on = Some(on);
            s.replace_bonanza_qualification(&row)?;
            if share > 0.0 {
                s.insert_income(&IncomeEntry {
                    member_id:    row.member_id.clone(),
                    income_type:  IncomeType::Bonanza,
                    gross_amount: share,
                    tds_amount:   0.0,
                    amount:       share,
                    source_ref:   bonanza_ref(&row.bonanza_id, &row.member_id),
                    booked_on:    on,
                })?;
            }
            events.push(EngineEvent::BonanzaAwarded {
                member_id:  row.member_id,
                bonanza_id: row.bonanza_id,
                amount:     share,
            });
        }
        Ok(events)
    })?;

    log::info!(
        "bonanza pool distributed: bonanza={} pool={} qualifiers={}",
        bonanza.bonanza_id,
        bonanza.pool_amount,
        events.len()
    );
    Ok(events)
}

/// Audited admin award. Pays `amount`, or the campaign's own reward when
/// none is given. A member is awarded at most once per bonanza.
#[allow(clippy::too_many_arguments)]
pub fn manual_award(
    store: &NetworkStore,
    graph: &NetworkGraph,
    config: &CompConfig,
    member_id: &str,
    bonanza_id: &str,
    amount: Option<f64>,
    reason: &str,
    actor: &str,
    on: NaiveDate,
) -> EngineResult<f64> {
    let bonanza = config.bonanza(bonanza_id)?;
    if reason.trim().is_empty() || actor.trim().is_empty() {
        return Err(EngineError::InvalidOverride("an award needs an actor and a reason".into()));
    }
    if amount.is_some_and(|a| !(a.is_finite() && a >= 0.0)) {
        return Err(EngineError::InvalidOverride(format!("award amount {amount:?} is not valid")));
    }
    let member = store.member(member_id)?;
    let existing = store.bonanza_qualification(member_id, bonanza_id)?;
    if existing.as_ref().is_some_and(|q| q.status == BonanzaStatus::Awarded) {
        return Err(EngineError::DuplicateQualification {
            key: format!("bonanza:{member_id}:{bonanza_id}"),
        });
    }

    let window = match &existing {
        Some(q) => CycleWindow { start: q.window_start, end: q.window_end },
        None => member_window(bonanza, member.joined_on, on)
            .unwrap_or(CycleWindow { start: bonanza.start_date, end: bonanza.end_date }),
    };
    let metrics = measure(store, graph, &bonanza.criteria, &member, &window)?;
    let a = assess(&bonanza.criteria, &metrics, &config.leaderboard);

    let paid = match (amount, bonanza.reward_type) {
        (Some(v), _) => v,
        (None, RewardType::PoolShare) => {
            return Err(EngineError::InvalidOverride(format!(
                "bonanza '{bonanza_id}' is pool-share; an explicit amount is required"
            )))
        }
        (None, _) => reward_on_qualify(bonanza, metrics.sales_volume),
    };

    let row = BonanzaQualificationRow {
        member_id:        member_id.to_string(),
        bonanza_id:       bonanza_id.to_string(),
        status:           BonanzaStatus::Awarded,
        window_start:     window.start,
        window_end:       window.end,
        sales_volume:     metrics.sales_volume,
        direct_referrals: metrics.direct_referrals,
        team_volume:      metrics.team_volume,
        group_ratio_met:  a.group_ratio_met,
        progress:         a.progress,
        score:            a.score,
        reward_amount:    paid,
        evaluated_on:     on,
        qualified_on:     Some(on),
        awarded_on:       Some(on),
        manual_override:  true,
        override_reason:  Some(reason.to_string()),
        override_by:      Some(actor.to_string()),
    };
    let before_json = existing.as_ref().map(serde_json::to_string).transpose()?;

    store.in_transaction(|s| {
        s.replace_bonanza_qualification(&row)?;
        if paid > 0.0 {
            s.insert_income(&IncomeEntry {
                member_id:    member_id.to_string(),
                income_type:  IncomeType::Bonanza,
                gross_amount: paid,
                tds_amount:   0.0,
                amount:       paid,
                source_ref:   bonanza_ref(bonanza_id, member_id),
                booked_on:    on,
            })?;
        }
        s.insert_audit(&AuditEntry {
            actor:       actor.to_string(),
            action:      "manual_bonanza_award".into(),
            target:      format!("{member_id}:{bonanza_id}"),
            reason:      reason.to_string(),
            before_json,
            after_json:  Some(serde_json::to_string(&row)?),
            recorded_on: on,
        })
    })?;

    log::warn!("bonanza manually awarded: member={member_id} bonanza={bonanza_id} amount={paid} actor={actor}");
    Ok(paid)
}

/// Evaluates every campaign daily.
#[derive(Default)]
pub struct BonanzaSubsystem {
    counts: BatchCounts,
}

impl BonanzaSubsystem {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CompSubsystem for BonanzaSubsystem {
    fn name(&self) -> &'static str {
        "bonanza"
    }

    fn update(&mut self, ctx: &JobContext<'_>, _events_in: &[EngineEvent]) -> EngineResult<Vec<EngineEvent>> {
        self.counts = BatchCounts::default();
        let mut events = Vec::new();
        for bonanza in &ctx.config.bonanzas {
            match evaluate_bonanza(ctx, bonanza) {
                Ok((counts, evs)) => {
                    self.counts.absorb(counts);
                    events.extend(evs);
                }
                Err(e) => {
                    self.counts.failed += 1;
                    log::error!("bonanza batch failed: bonanza={} error={e}", bonanza.bonanza_id);
                }
            }
        }
        Ok(events)
    }

    fn last_counts(&self) -> BatchCounts {
        self.counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn join_window_runs_from_join_date() {
        let config = CompConfig::default_test();
        let b = config.bonanza("fast_start").unwrap();
        let w = member_window(b, d(2025, 3, 1), d(2025, 3, 5)).unwrap();
        assert_eq!((w.start, w.end), (d(2025, 3, 1), d(2025, 4, 30)));
        assert!(member_window(b, d(2024, 12, 31), d(2025, 3, 5)).is_none());
    }

    #[test]
    fn overall_progress_is_the_weakest_criterion() {
        let criteria = BonanzaCriteria {
            sales_volume: Some(10_000.0),
            direct_referrals: Some(4),
            ..Default::default()
        };
        let metrics = BonanzaMetrics { sales_volume: 10_000.0, direct_referrals: 1, ..Default::default() };
        let a = assess(&criteria, &metrics, &LeaderboardWeights::default());
        assert_eq!(a.progress, 25.0);
        assert!(!a.all_met);
        assert_eq!(a.score, 10_000.0 * 0.4 + 100_000.0 * 0.3);
    }

    #[test]
    fn group_ratio_allows_tolerance() {
        let rule = GroupRatioRule::default();
        assert!(group_ratio_met(&[36.0, 44.0, 20.0], &rule));
        assert!(!group_ratio_met(&[70.0, 20.0, 10.0], &rule));
        assert!(!group_ratio_met(&[50.0, 50.0], &rule));
    }

    #[test]
    fn unmet_criteria_after_the_window_expire() {
        let window = CycleWindow::new(d(2025, 1, 1), d(2025, 3, 2)).unwrap();
        let a = BonanzaAssessment { progress: 80.0, all_met: false, group_ratio_met: false, score: 0.0 };
        assert_eq!(next_status(&a, d(2025, 3, 2), &window, false), BonanzaStatus::InProgress);
        assert_eq!(next_status(&a, d(2025, 3, 3), &window, false), BonanzaStatus::Expired);
        let met = BonanzaAssessment { all_met: true, progress: 100.0, ..a };
        assert_eq!(next_status(&met, d(2025, 3, 1), &window, true), BonanzaStatus::Disqualified);
    }
}
