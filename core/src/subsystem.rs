//! Subsystem trait and job context.
//!
//! RULE: Every scheduled job implements CompSubsystem.
//! The engine calls update() on each registered subsystem
//! in registration order, once per business day.
//! Execution order is fixed and documented in engine.rs.

use crate::{
    config::CompConfig,
    error::EngineResult,
    event::EngineEvent,
    graph::NetworkGraph,
    store::NetworkStore,
};
use chrono::NaiveDate;

/// Read-only view of the engine handed to a job for one day.
/// Writes go through `store`; the graph and plan are immutable here.
pub struct JobContext<'a> {
    pub as_of:  NaiveDate,
    pub store:  &'a NetworkStore,
    pub graph:  &'a NetworkGraph,
    pub config: &'a CompConfig,
}

/// Outcome counters for one batch. A failed row never aborts the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    pub evaluated: usize,
    pub succeeded: usize,
    pub skipped:   usize,
    pub failed:    usize,
}

impl BatchCounts {
    pub fn absorb(&mut self, other: BatchCounts) {
        self.evaluated += other.evaluated;
        self.succeeded += other.succeeded;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// The contract every scheduled job must fulfill.
pub trait CompSubsystem: Send {
    /// Unique stable name for this subsystem.
    fn name(&self) -> &'static str;

    /// Called once per business day by the engine.
    ///
    /// - `ctx`:       the day being processed and the engine state
    /// - `events_in`: events emitted by earlier subsystems this day
    ///
    /// Returns a vec of new events to add to the day's event log.
    fn update(&mut self, ctx: &JobContext<'_>, events_in: &[EngineEvent]) -> EngineResult<Vec<EngineEvent>>;

    /// Counters from the most recent `update`.
    fn last_counts(&self) -> BatchCounts;
}
