//! Binary matching and the upline matching bonus.
//!
//! Each cycle pairs the leg volume no earlier cycle has consumed (anything
//! booked on or before the window end, so late bookings into a closed window
//! roll into the next one) plus carry-forward, and pays the binary commission
//! on the matched amount. Sponsor ancestors then earn a generation-based share of that
//! commission, limited by the depth their rank unlocks.
//!
//! Idempotency key: (member, cycle_start, cycle_end). A window that overlaps
//! or precedes an existing cycle is rejected; its carry-forward would be wrong.

use crate::{
    error::{EngineError, EngineResult},
    event::EngineEvent,
    period::{CycleSchedule, CycleWindow},
    store::{IncomeEntry, MatchingBonusDetailRow, MatchingCycleRow, MemberRecord},
    subsystem::{BatchCounts, CompSubsystem, JobContext},
    types::{IncomeType, Side},
};

#[derive(Debug, Clone, PartialEq)]
pub struct MatchingOutcome {
    pub cycle:   MatchingCycleRow,
    pub details: Vec<MatchingBonusDetailRow>,
    /// False when the cycle was already on record and nothing was written.
    pub computed: bool,
}

/// Pair the legs for one cycle. `carry_in` is (left, right).
pub fn pair_legs(left: f64, right: f64, carry_in: (f64, f64)) -> (f64, f64, f64) {
    let total_left = left + carry_in.0;
    let total_right = right + carry_in.1;
    let matched = total_left.min(total_right).max(0.0);
    (matched, (total_left - matched).max(0.0), (total_right - matched).max(0.0))
}

fn commission_boost(ctx: &JobContext<'_>, member: &MemberRecord) -> f64 {
    member
        .rank_order
        .and_then(|order| ctx.config.rank_by_order(order))
        .map(|tier| tier.commission_boost_pct)
        .unwrap_or(0.0)
}

/// `computeMatching(memberId, cycleStart, cycleEnd)`.
pub fn compute_matching(
    ctx: &JobContext<'_>,
    member_id: &str,
    window: CycleWindow,
) -> EngineResult<MatchingOutcome> {
    ctx.store.member(member_id)?;
    if let Some(existing) = ctx.store.matching_cycle(member_id, &window)? {
        return Ok(MatchingOutcome { cycle: existing, details: Vec::new(), computed: false });
    }
    if let Some(conflict) = ctx.store.conflicting_cycle(member_id, &window)? {
        return Err(EngineError::InvalidCycle {
            member_id: member_id.to_string(),
            reason:    format!(
                "window {window} overlaps or precedes cycle {}..{}",
                conflict.cycle_start, conflict.cycle_end
            ),
        });
    }

    // Leg sums, pairing and the writes share one IMMEDIATE transaction so a
    // booking that lands mid-cycle is either consumed here or left unpaired.
    let (cycle, details) = ctx.store.in_transaction(|s| {
        let member = s.member(member_id)?;
        let left = s.unpaired_leg_volume(member_id, Side::Left, window.end)?;
        let right = s.unpaired_leg_volume(member_id, Side::Right, window.end)?;
        let carry_in = (member.carry_forward_left, member.carry_forward_right);
        let (matched, carry_left, carry_right) = pair_legs(left, right, carry_in);

        let commission = if member.status.is_active() {
            matched * ctx.config.matching.binary_percentage / 100.0
                * (1.0 + commission_boost(ctx, &member) / 100.0)
        } else {
            0.0
        };

        let cycle = MatchingCycleRow {
            member_id:         member_id.to_string(),
            cycle_start:       window.start,
            cycle_end:         window.end,
            left_cycle_bv:     left,
            right_cycle_bv:    right,
            carry_in_left:     carry_in.0,
            carry_in_right:    carry_in.1,
            matched_volume:    matched,
            carry_out_left:    carry_left,
            carry_out_right:   carry_right,
            binary_commission: commission,
            computed_on:       ctx.as_of,
        };

        let details = if commission > 0.0 {
            upline_details(ctx, member_id, commission, &window)?
        } else {
            Vec::new()
        };

        s.insert_matching_cycle(&cycle)?;
        s.mark_leg_volume_paired(member_id, window.end)?;
        if commission > 0.0 {
            s.insert_income(&IncomeEntry {
                member_id:    member_id.to_string(),
                income_type:  IncomeType::Binary,
                gross_amount: commission,
                tds_amount:   0.0,
                amount:       commission,
                source_ref:   format!("BINARY:{member_id}:{}:{}", window.start, window.end),
                booked_on:    ctx.as_of,
            })?;
        }
        for d in &details {
            s.insert_matching_detail(d)?;
            s.insert_income(&IncomeEntry {
                member_id:    d.recipient_id.clone(),
                income_type:  IncomeType::Matching,
                gross_amount: d.contribution,
                tds_amount:   0.0,
                amount:       d.contribution,
                source_ref:   format!(
                    "MATCHING:{}:{member_id}:{}:{}",
                    d.recipient_id, window.start, window.end
                ),
                booked_on:    ctx.as_of,
            })?;
        }
        Ok((cycle, details))
    })?;

    log::debug!(
        "matching cycle closed: member={member_id} window={window} matched={} commission={} uplines={}",
        cycle.matched_volume,
        cycle.binary_commission,
        details.len()
    );
    Ok(MatchingOutcome { cycle, details, computed: true })
}

/// Matching credit for each eligible sponsor ancestor. A recipient never
/// earns from a generation deeper than its own rank unlocks.
fn upline_details(
    ctx: &JobContext<'_>,
    member_id: &str,
    commission: f64,
    window: &CycleWindow,
) -> EngineResult<Vec<MatchingBonusDetailRow>> {
    let max_depth = ctx.config.max_matching_depth() as usize;
    if max_depth == 0 {
        return Ok(Vec::new());
    }
    let idx = ctx.graph.index_of(member_id)?;
    let mut details = Vec::new();
    for (i, ancestor) in ctx.graph.sponsor_ancestors(idx)?.into_iter().take(max_depth).enumerate() {
        let generation = i as u32 + 1;
        let recipient = ctx.store.member(ctx.graph.id(ancestor))?;
        let Some(tier) = recipient.rank_order.and_then(|o| ctx.config.rank_by_order(o)) else {
            continue;
        };
        let rule = &tier.matching;
        let Some(pct) = rule.percentage_for(generation) else {
            continue;
        };
        let sponsored = ctx.graph.node(ancestor).sponsored.len();
        let eligible = recipient.status.is_active()
            && sponsored >= rule.min_personally_sponsored as usize
            && (!rule.requires_direct_sale || recipient.personal_bv > 0.0);
        if !eligible {
            continue;
        }
        details.push(MatchingBonusDetailRow {
            recipient_id:       recipient.member_id,
            downline_member_id: member_id.to_string(),
            generation,
            base_type:          IncomeType::Binary,
            base_amount:        commission,
            percentage:         pct,
            contribution:       commission * pct / 100.0,
            cycle_start:        window.start,
            cycle_end:          window.end,
        });
    }
    Ok(details)
}

/// Close `window` for every member (or one member). Rows that fail are
/// logged and counted; the rest of the batch continues.
pub fn run_cycle(
    ctx: &JobContext<'_>,
    window: CycleWindow,
    only: Option<&str>,
) -> EngineResult<(BatchCounts, Vec<EngineEvent>)> {
    let mut counts = BatchCounts::default();
    let mut events = Vec::new();

    let targets: Vec<String> = match only {
        Some(id) => vec![ctx.graph.node_by_id(id)?.member_id.clone()],
        None => ctx
            .graph
            .nodes()
            .filter(|(_, n)| n.joined_on <= window.end)
            .map(|(_, n)| n.member_id.clone())
            .collect(),
    };

    for member_id in targets {
        counts.evaluated += 1;
        match compute_matching(ctx, &member_id, window) {
            Ok(outcome) if !outcome.computed => counts.skipped += 1,
            Ok(outcome) => {
                counts.succeeded += 1;
                if outcome.cycle.matched_volume > 0.0 {
                    events.push(EngineEvent::MatchingCycleClosed {
                        member_id:         member_id.clone(),
                        cycle_start:       window.start,
                        cycle_end:         window.end,
                        matched_volume:    outcome.cycle.matched_volume,
                        binary_commission: outcome.cycle.binary_commission,
                    });
                }
                events.extend(outcome.details.into_iter().map(|d| EngineEvent::MatchingBonusCredited {
                    recipient_id: d.recipient_id,
                    downline_id:  d.downline_member_id,
                    generation:   d.generation,
                    contribution: d.contribution,
                }));
            }
            Err(e) => {
                counts.failed += 1;
                log::error!("matching failed: member={member_id} window={window} error={e}");
            }
        }
    }

    log::info!(
        "matching cycle {window}: evaluated={} computed={} skipped={} failed={}",
        counts.evaluated,
        counts.succeeded,
        counts.skipped,
        counts.failed
    );
    Ok((counts, events))
}

/// Closes the matching cycle that ended yesterday, on cycle boundaries.
#[derive(Default)]
pub struct MatchingSubsystem {
    counts: BatchCounts,
}

impl MatchingSubsystem {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CompSubsystem for MatchingSubsystem {
    fn name(&self) -> &'static str {
        "matching"
    }

    fn update(&mut self, ctx: &JobContext<'_>, _events_in: &[EngineEvent]) -> EngineResult<Vec<EngineEvent>> {
        self.counts = BatchCounts::default();
        let schedule = CycleSchedule {
            anchor:     ctx.config.matching.cycle_anchor,
            cycle_days: ctx.config.matching.cycle_days,
        };
        let Some(window) = schedule.closing_on(ctx.as_of) else {
            return Ok(Vec::new());
        };
        let (counts, events) = run_cycle(ctx, window, None)?;
        self.counts = counts;
        Ok(events)
    }

    fn last_counts(&self) -> BatchCounts {
        self.counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weaker_leg_bounds_the_match() {
        assert_eq!(pair_legs(5_000.0, 3_000.0, (0.0, 0.0)), (3_000.0, 2_000.0, 0.0));
        assert_eq!(pair_legs(0.0, 3_000.0, (0.0, 0.0)), (0.0, 0.0, 3_000.0));
    }

    #[test]
    fn carry_forward_joins_the_next_cycle() {
        let (matched, left, right) = pair_legs(1_000.0, 4_000.0, (2_000.0, 0.0));
        assert_eq!(matched, 3_000.0);
        assert_eq!((left, right), (0.0, 1_000.0));
    }
}
