//! The compensation engine: graph writes, volume intake and the daily schedule.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Matching subsystem  (closes binary cycles ending yesterday)
//!   2. Rank subsystem      (monthly rank pay on day 1, then promotions)
//!   3. Club subsystem      (previous month, on day 1)
//!   4. Bonanza subsystem   (every campaign, daily)
//!
//! RULES:
//!   - Subsystems execute in registration order, once per business day.
//!   - No subsystem calls another subsystem's functions directly.
//!   - Registration and volume intake are synchronous; evaluation is scheduled.
//!   - All state changes are recorded in the event log.

use crate::{
    bonanza_subsystem::{self, BonanzaSubsystem},
    clock::BusinessClock,
    club_subsystem::{self, ClubSubsystem},
    command::AdminCommand,
    config::{CompConfig, SpilloverScope},
    enumerator::{self, TeamStats},
    error::{EngineError, EngineResult},
    event::{EngineEvent, EventLogEntry},
    graph::NetworkGraph,
    matching_subsystem::{self, MatchingOutcome, MatchingSubsystem},
    period::{CycleSchedule, CycleWindow, Period},
    rank_subsystem::{self, RankSubsystem},
    store::{AuditEntry, BonanzaQualificationRow, EvaluationRunRow, NetworkStore, NewMember},
    subsystem::{BatchCounts, CompSubsystem, JobContext},
    tree_view::{self, TreeNode, Viewer},
    types::{EdgeType, KycStatus, MemberId, MemberStatus, Side},
    volume::{self, VolumeEvent, VolumeOutcome},
};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

// ── Registration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PlacementRequest {
    /// Attach under `parent_id` on `side`; an occupied slot is an error.
    Explicit { parent_id: MemberId, side: Side },
    /// Spillover to the shallowest open slot, optionally starting in one leg.
    Auto { preferred: Option<Side> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub member_id:  MemberId,
    pub sponsor_id: MemberId,
    pub placement:  PlacementRequest,
    pub status:     MemberStatus,
    pub kyc_status: KycStatus,
    pub joined_on:  NaiveDate,
}

impl Registration {
    /// Active, KYC pending, auto-placed.
    pub fn new(member_id: impl Into<MemberId>, sponsor_id: impl Into<MemberId>, joined_on: NaiveDate) -> Self {
        Self {
            member_id: member_id.into(),
            sponsor_id: sponsor_id.into(),
            placement: PlacementRequest::Auto { preferred: None },
            status: MemberStatus::Active,
            kyc_status: KycStatus::Pending,
            joined_on,
        }
    }

    pub fn explicit(mut self, parent_id: impl Into<MemberId>, side: Side) -> Self {
        self.placement = PlacementRequest::Explicit { parent_id: parent_id.into(), side };
        self
    }

    pub fn auto(mut self, preferred: Option<Side>) -> Self {
        self.placement = PlacementRequest::Auto { preferred };
        self
    }

    pub fn with_status(mut self, status: MemberStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_kyc(mut self, kyc_status: KycStatus) -> Self {
        self.kyc_status = kyc_status;
        self
    }
}

// ── Engine ─────────────────────────────────────────────────────────

pub struct CompEngine {
    pub config: CompConfig,
    pub store:  NetworkStore,
    pub clock:  BusinessClock,
    graph:      NetworkGraph,
    subsystems: Vec<Box<dyn CompSubsystem>>,
}

impl CompEngine {
    /// Validate the plan, migrate the store and load the graph.
    /// No subsystems are registered; use `build` for the standard schedule.
    pub fn new(mut config: CompConfig, store: NetworkStore) -> EngineResult<Self> {
        config.validate()?;
        store.migrate()?;
        let graph = NetworkGraph::from_records(store.load_topology()?, config.tree.max_depth)?;
        log::info!("engine ready: members={} max_depth={}", graph.len(), config.tree.max_depth);
        Ok(Self {
            config,
            store,
            clock: BusinessClock::new(),
            graph,
            subsystems: Vec::new(),
        })
    }

    /// Fully wired engine with every subsystem registered.
    pub fn build(config: CompConfig, store: NetworkStore) -> EngineResult<Self> {
        let mut engine = Self::new(config, store)?;

        // EXECUTION ORDER: fixed, never reordered.
        engine.register(Box::new(MatchingSubsystem::new()));
        engine.register(Box::new(RankSubsystem::new()));
        engine.register(Box::new(ClubSubsystem::new()));
        engine.register(Box::new(BonanzaSubsystem::new()));
        Ok(engine)
    }

    /// In-memory engine on the test plan.
    pub fn build_test() -> EngineResult<Self> {
        Self::build_test_with(CompConfig::default_test())
    }

    pub fn build_test_with(config: CompConfig) -> EngineResult<Self> {
        Self::build(config, NetworkStore::in_memory()?)
    }

    /// Register a subsystem. Call in the documented execution order.
    pub fn register(&mut self, subsystem: Box<dyn CompSubsystem>) {
        self.subsystems.push(subsystem);
    }

    pub fn graph(&self) -> &NetworkGraph {
        &self.graph
    }

    /// Rebuild the arena from the store, picking up other writers' members.
    pub fn reload_graph(&mut self) -> EngineResult<()> {
        self.graph = NetworkGraph::from_records(self.store.load_topology()?, self.config.tree.max_depth)?;
        log::debug!("graph reloaded: members={}", self.graph.len());
        Ok(())
    }

    pub fn context(&self, as_of: NaiveDate) -> JobContext<'_> {
        JobContext {
            as_of,
            store: &self.store,
            graph: &self.graph,
            config: &self.config,
        }
    }

    // ── Graph writes ───────────────────────────────────────────────

    pub fn register_root(&mut self, member_id: &str, joined_on: NaiveDate) -> EngineResult<EngineEvent> {
        if let Some(root) = self.graph.root_id() {
            return Err(EngineError::RootExists(root.to_string()));
        }
        let event = EngineEvent::RootRegistered { member_id: member_id.to_string() };
        self.store.in_transaction(|s| {
            s.insert_root(member_id, joined_on)?;
            persist_events(s, "graph", joined_on, std::slice::from_ref(&event))
        })?;
        self.graph.attach_root(member_id, joined_on)?;
        log::info!("root registered: member={member_id}");
        Ok(event)
    }

    /// Sponsor link and placement in one transaction. An AUTO placement that
    /// loses its slot to another writer reloads the graph and tries the next
    /// open slot; an explicit placement fails on the first conflict.
    pub fn register_member(&mut self, reg: &Registration) -> EngineResult<EngineEvent> {
        if self.graph.contains(&reg.member_id) {
            return Err(EngineError::MemberExists(reg.member_id.clone()));
        }
        if !self.graph.contains(&reg.sponsor_id) {
            self.reload_graph()?;
        }
        self.graph.index_of(&reg.sponsor_id)?;

        let max_attempts = match reg.placement {
            PlacementRequest::Explicit { .. } => 1,
            PlacementRequest::Auto { .. } => self.config.tree.placement_retries + 1,
        };
        let mut attempt = 0;
        loop {
            attempt += 1;
            let (parent_id, side) = self.resolve_slot(reg)?;
            if self.graph.would_create_cycle(&reg.member_id, &parent_id)? {
                return Err(EngineError::GraphCycle {
                    member_id: reg.member_id.clone(),
                    operation: "register",
                    depth:     0,
                });
            }

            let event = EngineEvent::MemberRegistered {
                member_id:  reg.member_id.clone(),
                sponsor_id: reg.sponsor_id.clone(),
                parent_id:  parent_id.clone(),
                side,
                attempts:   attempt,
            };
            let row = NewMember {
                member_id:  &reg.member_id,
                sponsor_id: &reg.sponsor_id,
                parent_id:  &parent_id,
                side,
                status:     reg.status,
                kyc_status: reg.kyc_status,
                joined_on:  reg.joined_on,
            };
            let result = self.store.in_transaction(|s| {
                s.insert_member(&row)?;
                persist_events(s, "graph", reg.joined_on, std::slice::from_ref(&event))
            });

            match result {
                Ok(()) => {
                    self.graph.attach(
                        &reg.member_id,
                        &reg.sponsor_id,
                        &parent_id,
                        side,
                        reg.status,
                        reg.joined_on,
                    )?;
                    log::info!(
                        "member registered: member={} sponsor={} parent={parent_id} side={side} attempts={attempt}",
                        reg.member_id,
                        reg.sponsor_id
                    );
                    return Ok(event);
                }
                Err(EngineError::SlotConflict { parent_id, side }) if attempt < max_attempts => {
                    log::warn!(
                        "placement slot taken: member={} parent={parent_id} side={side} attempt={attempt}",
                        reg.member_id
                    );
                    self.reload_graph()?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn resolve_slot(&self, reg: &Registration) -> EngineResult<(MemberId, Side)> {
        match &reg.placement {
            PlacementRequest::Explicit { parent_id, side } => {
                let parent = self.graph.node_by_id(parent_id)?;
                if parent.child(*side).is_some() {
                    return Err(EngineError::SlotConflict { parent_id: parent_id.clone(), side: *side });
                }
                Ok((parent_id.clone(), *side))
            }
            PlacementRequest::Auto { preferred } => {
                let start = match self.config.tree.spillover {
                    SpilloverScope::SponsorSubtree => reg.sponsor_id.as_str(),
                    SpilloverScope::Global => self
                        .graph
                        .root_id()
                        .ok_or_else(|| EngineError::MemberNotFound("root".into()))?,
                };
                self.graph
                    .find_open_slot(start, *preferred)?
                    .ok_or_else(|| EngineError::NoOpenSlot(start.to_string()))
            }
        }
    }

    /// Soft enable/disable. Members are never deleted.
    pub fn set_member_status(
        &mut self,
        member_id: &str,
        status: MemberStatus,
        actor: &str,
        on: NaiveDate,
    ) -> EngineResult<EngineEvent> {
        let before = self.store.member(member_id)?;
        let event = EngineEvent::MemberStatusChanged { member_id: member_id.to_string(), status };
        self.store.in_transaction(|s| {
            s.set_member_status(member_id, status)?;
            s.insert_audit(&AuditEntry {
                actor:       actor.to_string(),
                action:      "set_member_status".into(),
                target:      member_id.to_string(),
                reason:      format!("status {} -> {status}", before.status),
                before_json: Some(serde_json::to_string(&before.status)?),
                after_json:  Some(serde_json::to_string(&status)?),
                recorded_on: on,
            })?;
            persist_events(s, "graph", on, std::slice::from_ref(&event))
        })?;
        self.graph.set_status(member_id, status)?;
        log::info!("member status: member={member_id} from={} to={status} actor={actor}", before.status);
        Ok(event)
    }

    pub fn set_kyc_status(
        &mut self,
        member_id: &str,
        kyc_status: KycStatus,
        actor: &str,
        on: NaiveDate,
    ) -> EngineResult<EngineEvent> {
        let before = self.store.member(member_id)?;
        let event = EngineEvent::KycStatusChanged { member_id: member_id.to_string(), kyc_status };
        self.store.in_transaction(|s| {
            s.set_kyc_status(member_id, kyc_status)?;
            s.insert_audit(&AuditEntry {
                actor:       actor.to_string(),
                action:      "set_kyc_status".into(),
                target:      member_id.to_string(),
                reason:      format!("kyc {} -> {kyc_status}", before.kyc_status),
                before_json: Some(serde_json::to_string(&before.kyc_status)?),
                after_json:  Some(serde_json::to_string(&kyc_status)?),
                recorded_on: on,
            })?;
            persist_events(s, "graph", on, std::slice::from_ref(&event))
        })?;
        Ok(event)
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn is_descendant(&self, ancestor_id: &str, node_id: &str) -> EngineResult<bool> {
        self.graph.is_descendant(ancestor_id, node_id)
    }

    pub fn enumerate(&self, root_id: &str, edge: EdgeType, side: Option<Side>) -> EngineResult<Vec<MemberId>> {
        enumerator::enumerate(&self.graph, root_id, edge, side)
    }

    pub fn team_stats(&self, member_id: &str) -> EngineResult<TeamStats> {
        enumerator::team_stats(&self.graph, member_id)
    }

    pub fn tree_view(&self, viewer: &Viewer, root_id: &str, depth: Option<usize>) -> EngineResult<TreeNode> {
        tree_view::tree_view(&self.store, &self.graph, &self.config.tree, viewer, root_id, depth)
    }

    /// Ranked bonanza standings, best score first.
    pub fn leaderboard(&self, bonanza_id: &str, limit: usize) -> EngineResult<Vec<BonanzaQualificationRow>> {
        self.config.bonanza(bonanza_id)?;
        self.store.bonanza_leaderboard(bonanza_id, limit)
    }

    // ── Volume and matching ────────────────────────────────────────

    pub fn apply_personal_volume(&self, event: &VolumeEvent) -> EngineResult<VolumeOutcome> {
        let outcome = volume::apply_personal_volume(&self.store, &self.graph, event)?;
        if let VolumeOutcome::Applied { ancestors } = outcome {
            let applied = EngineEvent::VolumeApplied {
                source_ref: event.source_ref.clone(),
                member_id:  event.member_id.clone(),
                amount:     event.amount,
                ancestors,
            };
            persist_events(&self.store, "volume", event.booked_on, &[applied])?;
        }
        Ok(outcome)
    }

    /// One member's cycle over `[start, end]`. Re-running the same window
    /// returns the stored cycle unchanged.
    pub fn compute_matching(&self, member_id: &str, start: NaiveDate, end: NaiveDate) -> EngineResult<MatchingOutcome> {
        let window = cycle_window(member_id, start, end)?;
        matching_subsystem::compute_matching(&self.context(end), member_id, window)
    }

    // ── Schedule ───────────────────────────────────────────────────

    /// Run every subsystem for one business day.
    pub fn run_day(&mut self, date: NaiveDate) -> EngineResult<Vec<EngineEvent>> {
        let mut day_events = vec![EngineEvent::DayStarted { date }];
        persist_events(&self.store, "engine", date, &day_events)?;

        let ctx = JobContext {
            as_of:  date,
            store:  &self.store,
            graph:  &self.graph,
            config: &self.config,
        };
        // Each subsystem sees all events emitted so far this day.
        for subsystem in &mut self.subsystems {
            let new_events = subsystem.update(&ctx, &day_events)?;
            persist_events(&self.store, subsystem.name(), date, &new_events)?;
            day_events.extend(new_events);

            let counts = subsystem.last_counts();
            if counts.evaluated > 0 {
                let done = record_run(&self.store, subsystem.name(), None, date, counts)?;
                day_events.push(done);
            }
        }

        let completed = EngineEvent::DayCompleted { date };
        persist_events(&self.store, "engine", date, std::slice::from_ref(&completed))?;
        day_events.push(completed);
        self.clock.mark(date);
        log::debug!("day processed: date={date} events={}", day_events.len());
        Ok(day_events)
    }

    /// Run `n` consecutive days after the last processed one (or from `start`).
    pub fn run_days(&mut self, start: NaiveDate, n: u64) -> EngineResult<()> {
        for _ in 0..n {
            let date = self.clock.next_day(start);
            self.run_day(date)?;
        }
        Ok(())
    }

    // ── Admin ──────────────────────────────────────────────────────

    /// Re-run the matching cycles closing inside `period`, the club
    /// evaluation and the monthly rank pay. Finalized rows are skipped,
    /// so repeated calls change nothing.
    pub fn recompute_period(&mut self, period: Period) -> EngineResult<Vec<EngineEvent>> {
        let as_of = period.next().first_day();
        let ctx = self.context(as_of);
        let mut counts = BatchCounts::default();
        let mut events = Vec::new();

        let schedule = CycleSchedule {
            anchor:     self.config.matching.cycle_anchor,
            cycle_days: self.config.matching.cycle_days,
        };
        let mut day = period.first_day() + Duration::days(1);
        while day <= as_of {
            if let Some(window) = schedule.closing_on(day) {
                let (c, evs) = matching_subsystem::run_cycle(&ctx, window, None)?;
                counts.absorb(c);
                events.extend(evs);
            }
            day += Duration::days(1);
        }

        let (c, evs) = club_subsystem::evaluate_period(&ctx, period)?;
        counts.absorb(c);
        events.extend(evs);
        let (c, evs) = rank_subsystem::pay_monthly(&ctx, period)?;
        counts.absorb(c);
        events.extend(evs);

        persist_events(&self.store, "admin", as_of, &events)?;
        events.push(record_run(&self.store, "recompute", Some(period), as_of, counts)?);
        log::info!(
            "recompute finished: period={period} evaluated={} succeeded={} skipped={} failed={}",
            counts.evaluated,
            counts.succeeded,
            counts.skipped,
            counts.failed
        );
        Ok(events)
    }

    pub fn execute(&mut self, cmd: AdminCommand, on: NaiveDate) -> EngineResult<Vec<EngineEvent>> {
        log::info!("admin command: cmd={} on={on}", cmd.name());
        let events = match cmd {
            AdminCommand::RecomputePeriod { period } => return self.recompute_period(period),
            AdminCommand::SetMemberStatus { member_id, status, actor } => {
                return Ok(vec![self.set_member_status(&member_id, status, &actor, on)?]);
            }
            AdminCommand::SetKycStatus { member_id, kyc_status, actor } => {
                return Ok(vec![self.set_kyc_status(&member_id, kyc_status, &actor, on)?]);
            }
            AdminCommand::RunMatchingCycle { member_id, start, end } => {
                let window = cycle_window(member_id.as_deref().unwrap_or("*"), start, end)?;
                let (counts, mut events) =
                    matching_subsystem::run_cycle(&self.context(end), window, member_id.as_deref())?;
                persist_events(&self.store, "admin", on, &events)?;
                events.push(record_run(&self.store, "matching", None, on, counts)?);
                return Ok(events);
            }
            AdminCommand::OverrideClubQualification { member_id, tier_id, period, status, reason, actor } => {
                let net = club_subsystem::override_club(
                    &self.store, &self.config, &member_id, &tier_id, period, status, &reason, &actor, on,
                )?;
                let mut events = vec![EngineEvent::ClubOverridden {
                    member_id: member_id.clone(),
                    tier_id: tier_id.clone(),
                    period,
                    status,
                    reversed: (-net).max(0.0),
                }];
                if net > 0.0 {
                    events.push(EngineEvent::ClubAwarded { member_id, tier_id, period, net_amount: net });
                }
                events
            }
            AdminCommand::OverrideRank { member_id, tier_id, reason, actor } => {
                let rank_order = rank_subsystem::override_rank(
                    &self.store,
                    &self.config,
                    &member_id,
                    tier_id.as_deref(),
                    &reason,
                    &actor,
                    on,
                )?;
                vec![EngineEvent::RankOverridden { member_id, rank_order }]
            }
            AdminCommand::ManualBonanzaAward { member_id, bonanza_id, amount, reason, actor } => {
                let paid = bonanza_subsystem::manual_award(
                    &self.store, &self.graph, &self.config, &member_id, &bonanza_id, amount, &reason, &actor, on,
                )?;
                vec![EngineEvent::BonanzaAwarded { member_id, bonanza_id, amount: paid }]
            }
            AdminCommand::DistributePoolShares { bonanza_id } => {
                bonanza_subsystem::distribute_pool(&self.context(on), self.config.bonanza(&bonanza_id)?)?
            }
        };
        persist_events(&self.store, "admin", on, &events)?;
        Ok(events)
    }
}

fn cycle_window(member_id: &str, start: NaiveDate, end: NaiveDate) -> EngineResult<CycleWindow> {
    CycleWindow::new(start, end).ok_or_else(|| EngineError::InvalidCycle {
        member_id: member_id.to_string(),
        reason:    format!("cycle end {end} precedes start {start}"),
    })
}

/// Append events to the log under `component`, in order.
fn persist_events(store: &NetworkStore, component: &str, on: NaiveDate, events: &[EngineEvent]) -> EngineResult<()> {
    for event in events {
        store.append_event(&EventLogEntry {
            id:          None,
            occurred_on: on,
            component:   component.to_string(),
            event_type:  event.type_name().to_string(),
            payload:     serde_json::to_string(event)?,
        })?;
    }
    Ok(())
}

fn record_run(
    store: &NetworkStore,
    kind: &str,
    period: Option<Period>,
    as_of: NaiveDate,
    counts: BatchCounts,
) -> EngineResult<EngineEvent> {
    let run_id = uuid::Uuid::new_v4().to_string();
    store.insert_evaluation_run(&EvaluationRunRow {
        run_id: run_id.clone(),
        kind: kind.to_string(),
        period,
        as_of,
        evaluated: counts.evaluated,
        succeeded: counts.succeeded,
        skipped: counts.skipped,
        failed: counts.failed,
    })?;
    let event = EngineEvent::EvaluationCompleted {
        run_id,
        kind:      kind.to_string(),
        evaluated: counts.evaluated,
        failed:    counts.failed,
    };
    persist_events(store, "engine", as_of, std::slice::from_ref(&event))?;
    Ok(event)
}
