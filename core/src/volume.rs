//! BV aggregation: one business event rolls up the placement chain.
//!
//! Propagation is synchronous with the triggering event and runs in a single
//! transaction. The chain is resolved before anything is written, so a
//! corrupt tree never leaves a half-applied event behind.

use crate::{
    error::{EngineError, EngineResult},
    graph::NetworkGraph,
    store::{NetworkStore, VolumeEntryRow},
    types::{MemberId, VolumeKind},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A business event that carries volume (investment, sale, repayment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeEvent {
    /// Idempotency key; re-applying the same reference is a no-op.
    pub source_ref: String,
    pub member_id:  MemberId,
    pub kind:       VolumeKind,
    pub amount:     f64,
    pub booked_on:  NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeOutcome {
    /// Applied to the member and credited to this many ancestors.
    Applied { ancestors: usize },
    Duplicate,
}

pub fn apply_personal_volume(
    store: &NetworkStore,
    graph: &NetworkGraph,
    event: &VolumeEvent,
) -> EngineResult<VolumeOutcome> {
    if !(event.amount.is_finite() && event.amount > 0.0) {
        return Err(EngineError::InvalidVolume {
            source_ref: event.source_ref.clone(),
            amount:     event.amount,
        });
    }

    let idx = graph.index_of(&event.member_id)?;
    let chain = graph.placement_ancestors(idx)?;

    let row = VolumeEntryRow {
        source_ref: event.source_ref.clone(),
        member_id:  event.member_id.clone(),
        kind:       event.kind,
        amount:     event.amount,
        booked_on:  event.booked_on,
    };

    store.in_transaction(|s| {
        if s.volume_entry_exists(&row.source_ref)? {
            log::debug!("volume already applied: source_ref={}", row.source_ref);
            return Ok(VolumeOutcome::Duplicate);
        }
        s.insert_volume_entry(&row)?;
        for (ancestor, side) in &chain {
            s.credit_leg_volume(graph.id(*ancestor), *side, &row)?;
        }
        log::debug!(
            "volume applied: member={} source_ref={} amount={} ancestors={}",
            row.member_id,
            row.source_ref,
            row.amount,
            chain.len()
        );
        Ok(VolumeOutcome::Applied { ancestors: chain.len() })
    })
}
