//! Monthly club-tier qualification.
//!
//! Snapshots are read sequentially, evaluated in parallel (pure rule code
//! over immutable inputs), then written one at a time. The primary key on
//! (member, tier, period) serializes the writes; a finalized record is never
//! rewritten and never re-paid.

use crate::{
    config::{ClubTierConfig, CompConfig},
    error::{EngineError, EngineResult},
    event::EngineEvent,
    period::Period,
    store::{AuditEntry, ClubQualificationRow, IncomeEntry, MemberRecord, NetworkStore},
    subsystem::{BatchCounts, CompSubsystem, JobContext},
    types::{ClubStatus, IncomeType, KycStatus, MemberId, MemberStatus, Side},
};
use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;

/// Immutable inputs for one member's evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ClubSnapshot {
    pub member_id: MemberId,
    pub status:    MemberStatus,
    pub kyc:       KycStatus,
    /// Cumulative leg volume through the end of the period, [left, right].
    pub legs:      [f64; 2],
    /// Team volume booked inside the period.
    pub new_sales: f64,
}

impl ClubSnapshot {
    pub fn total(&self) -> f64 {
        self.legs[0] + self.legs[1]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClubEvaluation {
    pub status:           ClubStatus,
    pub total:            f64,
    pub strongest:        f64,
    pub others:           f64,
    pub capped_strongest: f64,
    pub new_sales:        f64,
    pub gross:            f64,
    pub tds:              f64,
    pub net:              f64,
}

/// (gross, tds, net) for a club bonus on `total` business.
pub fn club_payout(total: f64, tier: &ClubTierConfig, tds_pct: f64) -> (f64, f64, f64) {
    let gross = total * tier.bonus_percentage / 100.0;
    let tds = gross * tds_pct / 100.0;
    (gross, tds, gross - tds)
}

/// Evaluate one member against one tier. `None` when total business is
/// below the tier requirement; there is nothing to qualify for.
///
/// Checks run in order: activation, KYC, new sales, balancing.
pub fn evaluate_club(snapshot: &ClubSnapshot, tier: &ClubTierConfig, tds_pct: f64) -> Option<ClubEvaluation> {
    let required = tier.required_team_business;
    let total = snapshot.total();
    if total < required {
        return None;
    }
    let strongest = snapshot.legs[0].max(snapshot.legs[1]);
    let others = total - strongest;
    let capped_strongest = strongest.min(required * tier.strong_leg_pct / 100.0);

    let status = if !snapshot.status.is_active() {
        ClubStatus::DisqualifiedActivation
    } else if snapshot.kyc != KycStatus::Approved {
        ClubStatus::DisqualifiedKyc
    } else if snapshot.new_sales < required * tier.new_sales_pct / 100.0 {
        ClubStatus::DisqualifiedNewSales
    } else if capped_strongest + others < required || others < required * tier.weak_leg_pct / 100.0 {
        ClubStatus::DisqualifiedBalancing
    } else {
        ClubStatus::Qualified
    };

    let (gross, tds, net) = if status == ClubStatus::Qualified {
        club_payout(total, tier, tds_pct)
    } else {
        (0.0, 0.0, 0.0)
    };
    Some(ClubEvaluation {
        status,
        total,
        strongest,
        others,
        capped_strongest,
        new_sales: snapshot.new_sales,
        gross,
        tds,
        net,
    })
}

pub fn club_snapshot(store: &NetworkStore, member: &MemberRecord, period: Period) -> EngineResult<ClubSnapshot> {
    let end = period.last_day();
    Ok(ClubSnapshot {
        member_id: member.member_id.clone(),
        status:    member.status,
        kyc:       member.kyc_status,
        legs:      [
            store.leg_volume_through(&member.member_id, Side::Left, end)?,
            store.leg_volume_through(&member.member_id, Side::Right, end)?,
        ],
        new_sales: store.leg_volume_between(&member.member_id, None, &period.window())?,
    })
}

fn club_ref(member_id: &str, tier_id: &str, period: Period) -> String {
    format!("CLUB:{member_id}:{tier_id}:{period}")
}

fn row_from_evaluation(
    member_id: &str,
    tier_id: &str,
    period: Period,
    eval: &ClubEvaluation,
    on: NaiveDate,
) -> ClubQualificationRow {
    ClubQualificationRow {
        member_id:           member_id.to_string(),
        tier_id:             tier_id.to_string(),
        period,
        status:              eval.status,
        total_team_business: eval.total,
        strongest_leg:       eval.strongest,
        other_legs:          eval.others,
        capped_strongest:    eval.capped_strongest,
        new_sales_volume:    eval.new_sales,
        bonus_gross:         eval.gross,
        tds_amount:          eval.tds,
        net_amount:          eval.net,
        evaluated_on:        on,
        awarded_on:          None,
        manual_override:     false,
        override_reason:     None,
        override_by:         None,
    }
}

/// Write one evaluation. A qualified record is awarded and paid in the same
/// transaction.
fn persist(
    store: &NetworkStore,
    snapshot: &ClubSnapshot,
    tier: &ClubTierConfig,
    period: Period,
    eval: &ClubEvaluation,
    on: NaiveDate,
) -> EngineResult<ClubStatus> {
    let mut row = row_from_evaluation(&snapshot.member_id, &tier.tier_id, period, eval, on);
    store.in_transaction(|s| {
        if eval.status == ClubStatus::Qualified {
            row.status = ClubStatus::Awarded;
            row.awarded_on = Some(on);
            s.upsert_club_qualification(&row)?;
            s.insert_income(&IncomeEntry {
                member_id:    row.member_id.clone(),
                income_type:  IncomeType::ClubIncome,
                gross_amount: eval.gross,
                tds_amount:   eval.tds,
                amount:       eval.net,
                source_ref:   club_ref(&row.member_id, &row.tier_id, period),
                booked_on:    on,
            })?;
        } else {
            s.upsert_club_qualification(&row)?;
        }
        Ok(row.status)
    })
}

/// Evaluate every club tier for `period`. Tiers are independent: a member
/// may hold several in the same month.
pub fn evaluate_period(ctx: &JobContext<'_>, period: Period) -> EngineResult<(BatchCounts, Vec<EngineEvent>)> {
    let mut counts = BatchCounts::default();
    let mut events = Vec::new();
    if ctx.config.club_tiers.is_empty() {
        return Ok((counts, events));
    }

    let mut snapshots = Vec::new();
    for member in ctx.store.members()? {
        if member.joined_on > period.last_day() {
            continue;
        }
        match club_snapshot(ctx.store, &member, period) {
            Ok(s) => snapshots.push(s),
            Err(e) => {
                counts.failed += 1;
                log::error!("club snapshot failed: member={} period={period} error={e}", member.member_id);
            }
        }
    }

    let tds_pct = ctx.config.payout.tds_percentage;
    let jobs: Vec<(&ClubSnapshot, &ClubTierConfig)> = snapshots
        .iter()
        .flat_map(|s| ctx.config.club_tiers.iter().map(move |t| (s, t)))
        .collect();
    let results: Vec<Option<ClubEvaluation>> = jobs
        .par_iter()
        .map(|(s, t)| evaluate_club(s, t, tds_pct))
        .collect();

    for ((snapshot, tier), eval) in jobs.into_iter().zip(results) {
        let Some(eval) = eval else { continue };
        counts.evaluated += 1;
        match persist(ctx.store, snapshot, tier, period, &eval, ctx.as_of) {
            Ok(status) => {
                counts.succeeded += 1;
                events.push(EngineEvent::ClubEvaluated {
                    member_id: snapshot.member_id.clone(),
                    tier_id: tier.tier_id.clone(),
                    period,
                    status: eval.status,
                });
                if status == ClubStatus::Awarded {
                    events.push(EngineEvent::ClubAwarded {
                        member_id:  snapshot.member_id.clone(),
                        tier_id:    tier.tier_id.clone(),
                        period,
                        net_amount: eval.net,
                    });
                }
            }
            Err(e) if e.is_duplicate() => counts.skipped += 1,
            Err(e) => {
                counts.failed += 1;
                log::error!(
                    "club evaluation failed: member={} tier={} period={period} error={e}",
                    snapshot.member_id,
                    tier.tier_id
                );
            }
        }
    }

    log::info!(
        "club period {period}: evaluated={} awarded_or_updated={} skipped={} failed={}",
        counts.evaluated,
        counts.succeeded,
        counts.skipped,
        counts.failed
    );
    Ok((counts, events))
}

/// Audited manual status change for one (member, tier, period).
///
/// Moving an AWARDED record to a disqualified status reverses what was
/// paid; moving any record to AWARDED pays it if nothing is outstanding.
/// Returns the net amount booked (negative for a reversal).
#[allow(clippy::too_many_arguments)]
pub fn override_club(
    store: &NetworkStore,
    config: &CompConfig,
    member_id: &str,
    tier_id: &str,
    period: Period,
    status: ClubStatus,
    reason: &str,
    actor: &str,
    on: NaiveDate,
) -> EngineResult<f64> {
    let tier = config.club_tier(tier_id)?;
    if reason.trim().is_empty() || actor.trim().is_empty() {
        return Err(EngineError::InvalidOverride("an override needs an actor and a reason".into()));
    }
    let member = store.member(member_id)?;
    let existing = store.club_qualification(member_id, tier_id, period)?;
    if existing.as_ref().map(|r| r.status) == Some(status) {
        return Err(EngineError::DuplicateQualification {
            key: format!("club:{member_id}:{tier_id}:{period}"),
        });
    }

    let mut row = match &existing {
        Some(r) => r.clone(),
        None => {
            let snapshot = club_snapshot(store, &member, period)?;
            let total = snapshot.total();
            let strongest = snapshot.legs[0].max(snapshot.legs[1]);
            ClubQualificationRow {
                member_id:           member_id.to_string(),
                tier_id:             tier_id.to_string(),
                period,
                status,
                total_team_business: total,
                strongest_leg:       strongest,
                other_legs:          total - strongest,
                capped_strongest:    strongest.min(tier.required_team_business * tier.strong_leg_pct / 100.0),
                new_sales_volume:    snapshot.new_sales,
                bonus_gross:         0.0,
                tds_amount:          0.0,
                net_amount:          0.0,
                evaluated_on:        on,
                awarded_on:          None,
                manual_override:     false,
                override_reason:     None,
                override_by:         None,
            }
        }
    };
    let before_json = existing.as_ref().map(serde_json::to_string).transpose()?;

    row.status = status;
    row.manual_override = true;
    row.override_reason = Some(reason.to_string());
    row.override_by = Some(actor.to_string());
    row.evaluated_on = on;

    let base_ref = club_ref(member_id, tier_id, period);
    let booked = store.in_transaction(|s| {
        let (entries, net_paid) = s.income_for_ref(&base_ref)?;
        let mut booked = 0.0;
        if status == ClubStatus::Awarded {
            row.awarded_on = Some(on);
            if net_paid <= 0.0 {
                let (gross, tds, net) = club_payout(row.total_team_business, tier, config.payout.tds_percentage);
                row.bonus_gross = gross;
                row.tds_amount = tds;
                row.net_amount = net;
                s.insert_income(&IncomeEntry {
                    member_id:    member_id.to_string(),
                    income_type:  IncomeType::ClubIncome,
                    gross_amount: gross,
                    tds_amount:   tds,
                    amount:       net,
                    source_ref:   format!("{base_ref}:award:{entries}"),
                    booked_on:    on,
                })?;
                booked = net;
            }
        } else if status.is_disqualified() && net_paid > 0.0 {
            let (gross, tds) = if row.net_amount > 0.0 {
                let share = net_paid / row.net_amount;
                (row.bonus_gross * share, row.tds_amount * share)
            } else {
                (net_paid, 0.0)
            };
            s.insert_income(&IncomeEntry {
                member_id:    member_id.to_string(),
                income_type:  IncomeType::ClubIncomeReversal,
                gross_amount: -gross,
                tds_amount:   -tds,
                amount:       -net_paid,
                source_ref:   format!("{base_ref}:reversal:{entries}"),
                booked_on:    on,
            })?;
            row.awarded_on = None;
            booked = -net_paid;
        }
        s.replace_club_qualification(&row)?;
        s.insert_audit(&AuditEntry {
            actor:       actor.to_string(),
            action:      "override_club_qualification".into(),
            target:      format!("{member_id}:{tier_id}:{period}"),
            reason:      reason.to_string(),
            before_json: before_json.clone(),
            after_json:  Some(serde_json::to_string(&row)?),
            recorded_on: on,
        })?;
        Ok(booked)
    })?;

    log::warn!(
        "club overridden: member={member_id} tier={tier_id} period={period} status={} booked={booked} actor={actor}",
        status.as_str()
    );
    Ok(booked)
}

/// Evaluates the previous month on the first day of each month.
#[derive(Default)]
pub struct ClubSubsystem {
    counts: BatchCounts,
}

impl ClubSubsystem {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CompSubsystem for ClubSubsystem {
    fn name(&self) -> &'static str {
        "club"
    }

    fn update(&mut self, ctx: &JobContext<'_>, _events_in: &[EngineEvent]) -> EngineResult<Vec<EngineEvent>> {
        self.counts = BatchCounts::default();
        if ctx.as_of.day() != 1 {
            return Ok(Vec::new());
        }
        let (counts, events) = evaluate_period(ctx, Period::containing(ctx.as_of).previous())?;
        self.counts = counts;
        Ok(events)
    }

    fn last_counts(&self) -> BatchCounts {
        self.counts
    }
}
