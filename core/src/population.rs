//! Synthetic network driver.
//!
//! Grows a network from a single root, books Pareto-distributed volume and
//! runs the daily schedule. Every draw comes from a seeded slot, so one seed
//! always yields the same network and the same income ledger.

use crate::{
    engine::{CompEngine, Registration},
    error::EngineResult,
    rng::{RngSlot, SlotRng},
    types::{IncomeType, KycStatus, MemberId, MemberStatus, Side, VolumeKind},
    volume::{VolumeEvent, VolumeOutcome},
};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

pub const ROOT_MEMBER_ID: &str = "M000000";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationPlan {
    pub seed:    u64,
    /// Members to sign up, spread evenly over the run.
    pub members: usize,
    pub days:    u64,
    pub start:   NaiveDate,
    /// Daily chance that a member books volume.
    pub volume_rate:     f64,
    /// Daily chance that an active member lapses.
    pub inactivity_rate: f64,
}

impl PopulationPlan {
    pub fn new(seed: u64, members: usize, days: u64, start: NaiveDate) -> Self {
        Self {
            seed,
            members,
            days,
            start,
            volume_rate: 0.08,
            inactivity_rate: 0.002,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub members:        usize,
    pub volume_events:  usize,
    pub volume_total:   f64,
    pub lapsed:         usize,
    pub days:           u64,
    pub last_day:       Option<NaiveDate>,
    pub income_by_type: Vec<(IncomeType, i64, f64)>,
}

struct Streams {
    signup:    SlotRng,
    placement: SlotRng,
    volume:    SlotRng,
    status:    SlotRng,
}

pub fn run_population(engine: &mut CompEngine, plan: &PopulationPlan) -> EngineResult<RunSummary> {
    let mut rng = Streams {
        signup:    SlotRng::for_slot(plan.seed, RngSlot::Signup),
        placement: SlotRng::for_slot(plan.seed, RngSlot::Placement),
        volume:    SlotRng::for_slot(plan.seed, RngSlot::Volume),
        status:    SlotRng::for_slot(plan.seed, RngSlot::Status),
    };
    let mut summary = RunSummary::default();

    if engine.graph().root().is_none() {
        engine.register_root(ROOT_MEMBER_ID, plan.start)?;
    }

    let mut next_serial = engine.graph().len();
    for day in 0..plan.days {
        let date = plan.start + Duration::days(day as i64);

        // Cumulative target keeps the total exact regardless of rounding.
        let target = plan.members * (day as usize + 1) / plan.days.max(1) as usize;
        while summary.members < target {
            let member_id = format!("M{next_serial:06}");
            next_serial += 1;
            match signup(engine, &mut rng, &member_id, date) {
                Ok(()) => summary.members += 1,
                Err(e) => {
                    log::warn!("synthetic signup failed: member={member_id} error={e}");
                    break;
                }
            }
        }

        book_volume(engine, &mut rng, plan, date, &mut summary)?;
        lapse_members(engine, &mut rng, plan, date, &mut summary)?;
        engine.run_day(date)?;
        summary.days += 1;
        summary.last_day = Some(date);
    }

    summary.income_by_type = engine.store.income_summary()?;
    log::info!(
        "population run done: seed={} members={} volume_events={} days={}",
        plan.seed,
        summary.members,
        summary.volume_events,
        summary.days
    );
    Ok(summary)
}

fn signup(engine: &mut CompEngine, rng: &mut Streams, member_id: &str, date: NaiveDate) -> EngineResult<()> {
    let pool = engine.graph().len() as u64;
    let sponsor_idx = rng.signup.below(pool) as usize;
    let sponsor_id = engine.graph().id(sponsor_idx).to_string();
    let kyc = if rng.signup.chance(0.85) { KycStatus::Approved } else { KycStatus::Pending };
    let preferred = match rng.placement.below(3) {
        0 => None,
        1 => Some(Side::Left),
        _ => Some(Side::Right),
    };
    let reg = Registration::new(member_id, sponsor_id, date).auto(preferred).with_kyc(kyc);
    engine.register_member(&reg)?;
    Ok(())
}

fn book_volume(
    engine: &CompEngine,
    rng: &mut Streams,
    plan: &PopulationPlan,
    date: NaiveDate,
    summary: &mut RunSummary,
) -> EngineResult<()> {
    let active: Vec<MemberId> = engine
        .graph()
        .nodes()
        .filter(|(_, n)| n.status.is_active())
        .map(|(_, n)| n.member_id.clone())
        .collect();

    for (n, member_id) in active.into_iter().enumerate() {
        if !rng.volume.chance(plan.volume_rate) {
            continue;
        }
        let amount = (rng.volume.pareto(500.0, 1.6).min(250_000.0) * 100.0).round() / 100.0;
        let kind = match rng.volume.below(10) {
            0..=5 => VolumeKind::Sale,
            6..=8 => VolumeKind::Investment,
            _     => VolumeKind::Repayment,
        };
        let event = VolumeEvent {
            source_ref: format!("SYN:{date}:{n}"),
            member_id,
            kind,
            amount,
            booked_on: date,
        };
        if let VolumeOutcome::Applied { .. } = engine.apply_personal_volume(&event)? {
            summary.volume_events += 1;
            summary.volume_total += amount;
        }
    }
    Ok(())
}

fn lapse_members(
    engine: &mut CompEngine,
    rng: &mut Streams,
    plan: &PopulationPlan,
    date: NaiveDate,
    summary: &mut RunSummary,
) -> EngineResult<()> {
    let root = engine.graph().root();
    let candidates: Vec<MemberId> = engine
        .graph()
        .nodes()
        .filter(|(idx, n)| Some(*idx) != root && n.status.is_active())
        .map(|(_, n)| n.member_id.clone())
        .collect();

    for member_id in candidates {
        if rng.status.chance(plan.inactivity_rate) {
            engine.set_member_status(&member_id, MemberStatus::Inactive, "population", date)?;
            summary.lapsed += 1;
        }
    }
    Ok(())
}
