//! Rank promotion and the monthly rank bonus.
//!
//! Rank is the highest tier whose threshold the member's cumulative team
//! volume reaches. It only moves up on its own; an admin override is the one
//! way down. Every tier crossed on the way up is recorded and pays its
//! one-time bonus exactly once.

use crate::{
    config::CompConfig,
    error::EngineResult,
    event::EngineEvent,
    period::Period,
    store::{AuditEntry, IncomeEntry, MemberRecord, NetworkStore, RankAchievementRow},
    subsystem::{BatchCounts, CompSubsystem, JobContext},
    types::IncomeType,
};
use chrono::{Datelike, NaiveDate};
use std::collections::HashSet;

/// Promote one member if its team volume crossed tiers it has never held.
/// Returns the achievements written.
pub fn promote_member(ctx: &JobContext<'_>, member: &MemberRecord) -> EngineResult<Vec<RankAchievementRow>> {
    if !member.status.is_active() {
        return Ok(Vec::new());
    }
    let Some(target) = ctx.config.rank_for_volume(member.team_bv) else {
        return Ok(Vec::new());
    };
    let current = member.rank_order.unwrap_or(0);
    if target.display_order <= current {
        return Ok(Vec::new());
    }

    // Tiers held before (and then overridden away) are not re-awarded.
    let held: HashSet<String> = ctx
        .store
        .rank_achievements(&member.member_id)?
        .into_iter()
        .map(|a| a.tier_id)
        .collect();
    let crossed: Vec<RankAchievementRow> = ctx
        .config
        .rank_tiers
        .iter()
        .filter(|t| t.display_order > current && t.display_order <= target.display_order)
        .filter(|t| !held.contains(&t.tier_id))
        .map(|t| RankAchievementRow {
            member_id:      member.member_id.clone(),
            tier_id:        t.tier_id.clone(),
            display_order:  t.display_order,
            team_bv:        member.team_bv,
            one_time_bonus: t.one_time_bonus,
            achieved_on:    ctx.as_of,
        })
        .collect();
    let Some(new_order) = crossed.iter().map(|a| a.display_order).max() else {
        return Ok(Vec::new());
    };

    ctx.store.in_transaction(|s| {
        for a in &crossed {
            if s.insert_rank_achievement(a)? && a.one_time_bonus > 0.0 {
                s.insert_income(&IncomeEntry {
                    member_id:    a.member_id.clone(),
                    income_type:  IncomeType::RankBonus,
                    gross_amount: a.one_time_bonus,
                    tds_amount:   0.0,
                    amount:       a.one_time_bonus,
                    source_ref:   format!("RANK_BONUS:{}:{}", a.member_id, a.tier_id),
                    booked_on:    ctx.as_of,
                })?;
            }
        }
        s.set_rank_order(&member.member_id, Some(new_order))
    })?;

    log::info!(
        "rank promoted: member={} from={current} to={new_order} team_bv={}",
        member.member_id,
        member.team_bv
    );
    Ok(crossed)
}

/// Daily promotion pass over every member.
pub fn run_promotions(ctx: &JobContext<'_>) -> EngineResult<(BatchCounts, Vec<EngineEvent>)> {
    let mut counts = BatchCounts::default();
    let mut events = Vec::new();
    for member in ctx.store.members()? {
        counts.evaluated += 1;
        match promote_member(ctx, &member) {
            Ok(achieved) if achieved.is_empty() => counts.skipped += 1,
            Ok(achieved) => {
                counts.succeeded += 1;
                events.extend(achieved.into_iter().map(|a| EngineEvent::RankAchieved {
                    member_id:     a.member_id,
                    tier_id:       a.tier_id,
                    display_order: a.display_order,
                    bonus:         a.one_time_bonus,
                }));
            }
            Err(e) => {
                counts.failed += 1;
                log::error!("rank promotion failed: member={} error={e}", member.member_id);
            }
        }
    }
    Ok((counts, events))
}

/// Pay each ACTIVE ranked member its tier's monthly bonus for `period`,
/// once per (member, period).
pub fn pay_monthly(ctx: &JobContext<'_>, period: Period) -> EngineResult<(BatchCounts, Vec<EngineEvent>)> {
    let mut counts = BatchCounts::default();
    let mut events = Vec::new();
    for member in ctx.store.members()? {
        let Some(tier) = member.rank_order.and_then(|o| ctx.config.rank_by_order(o)) else {
            continue;
        };
        if !member.status.is_active() || tier.monthly_bonus <= 0.0 {
            continue;
        }
        counts.evaluated += 1;
        let result = ctx.store.in_transaction(|s| {
            if !s.insert_rank_monthly_payout(&member.member_id, period, &tier.tier_id, tier.monthly_bonus, ctx.as_of)? {
                return Ok(false);
            }
            s.insert_income(&IncomeEntry {
                member_id:    member.member_id.clone(),
                income_type:  IncomeType::RankMonthly,
                gross_amount: tier.monthly_bonus,
                tds_amount:   0.0,
                amount:       tier.monthly_bonus,
                source_ref:   format!("RANK_MONTHLY:{}:{period}", member.member_id),
                booked_on:    ctx.as_of,
            })?;
            Ok(true)
        });
        match result {
            Ok(true) => {
                counts.succeeded += 1;
                events.push(EngineEvent::RankMonthlyPaid {
                    member_id: member.member_id.clone(),
                    period,
                    amount: tier.monthly_bonus,
                });
            }
            Ok(false) => counts.skipped += 1,
            Err(e) => {
                counts.failed += 1;
                log::error!("rank monthly failed: member={} period={period} error={e}", member.member_id);
            }
        }
    }
    log::info!(
        "rank monthly {period}: paid={} skipped={} failed={}",
        counts.succeeded,
        counts.skipped,
        counts.failed
    );
    Ok((counts, events))
}

/// Set or clear a member's rank by hand. Pays no bonus; the tier is marked
/// as held so the daily pass will not pay it later either.
pub fn override_rank(
    store: &NetworkStore,
    config: &CompConfig,
    member_id: &str,
    tier_id: Option<&str>,
    reason: &str,
    actor: &str,
    on: NaiveDate,
) -> EngineResult<Option<u32>> {
    let before = store.member(member_id)?;
    let tier = tier_id.map(|id| config.rank_tier(id)).transpose()?;
    let new_order = tier.map(|t| t.display_order);

    store.in_transaction(|s| {
        if let Some(t) = tier {
            s.insert_rank_achievement(&RankAchievementRow {
                member_id:      member_id.to_string(),
                tier_id:        t.tier_id.clone(),
                display_order:  t.display_order,
                team_bv:        before.team_bv,
                one_time_bonus: 0.0,
                achieved_on:    on,
            })?;
        }
        s.set_rank_order(member_id, new_order)?;
        s.insert_audit(&AuditEntry {
            actor:       actor.to_string(),
            action:      "override_rank".into(),
            target:      member_id.to_string(),
            reason:      reason.to_string(),
            before_json: Some(serde_json::to_string(&before.rank_order)?),
            after_json:  Some(serde_json::to_string(&new_order)?),
            recorded_on: on,
        })
    })?;

    log::warn!(
        "rank overridden: member={member_id} from={:?} to={new_order:?} actor={actor} reason={reason}",
        before.rank_order
    );
    Ok(new_order)
}

/// Daily promotions; on the first of the month, the previous month's
/// monthly bonus is paid before anyone is promoted.
#[derive(Default)]
pub struct RankSubsystem {
    counts: BatchCounts,
}

impl RankSubsystem {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CompSubsystem for RankSubsystem {
    fn name(&self) -> &'static str {
        "rank"
    }

    fn update(&mut self, ctx: &JobContext<'_>, _events_in: &[EngineEvent]) -> EngineResult<Vec<EngineEvent>> {
        self.counts = BatchCounts::default();
        let mut events = Vec::new();
        if ctx.as_of.day() == 1 {
            let (counts, paid) = pay_monthly(ctx, Period::containing(ctx.as_of).previous())?;
            self.counts.absorb(counts);
            events.extend(paid);
        }
        let (counts, promoted) = run_promotions(ctx)?;
        self.counts.absorb(counts);
        events.extend(promoted);
        Ok(events)
    }

    fn last_counts(&self) -> BatchCounts {
        self.counts
    }
}
