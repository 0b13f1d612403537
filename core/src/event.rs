//! Engine events: the append-only record of everything the engine did.
//!
//! RULE: Every state change a subsystem makes is reported as an event.
//! The engine persists them to `event_log` in emission order.

use crate::{
    period::Period,
    types::{BonanzaStatus, ClubStatus, KycStatus, MemberId, MemberStatus, Side, TierId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    // ── Engine events ──────────────────────────────
    DayStarted {
        date: NaiveDate,
    },
    DayCompleted {
        date: NaiveDate,
    },
    EvaluationCompleted {
        run_id:    String,
        kind:      String,
        evaluated: usize,
        failed:    usize,
    },

    // ── Graph events ───────────────────────────────
    RootRegistered {
        member_id: MemberId,
    },
    MemberRegistered {
        member_id:  MemberId,
        sponsor_id: MemberId,
        parent_id:  MemberId,
        side:       Side,
        attempts:   u32,
    },
    MemberStatusChanged {
        member_id: MemberId,
        status:    MemberStatus,
    },
    KycStatusChanged {
        member_id:  MemberId,
        kyc_status: KycStatus,
    },

    // ── Volume events ──────────────────────────────
    VolumeApplied {
        source_ref: String,
        member_id:  MemberId,
        amount:     f64,
        ancestors:  usize,
    },

    // ── Matching events ────────────────────────────
    MatchingCycleClosed {
        member_id:         MemberId,
        cycle_start:       NaiveDate,
        cycle_end:         NaiveDate,
        matched_volume:    f64,
        binary_commission: f64,
    },
    MatchingBonusCredited {
        recipient_id: MemberId,
        downline_id:  MemberId,
        generation:   u32,
        contribution: f64,
    },

    // ── Rank events ────────────────────────────────
    RankAchieved {
        member_id:     MemberId,
        tier_id:       TierId,
        display_order: u32,
        bonus:         f64,
    },
    RankMonthlyPaid {
        member_id: MemberId,
        period:    Period,
        amount:    f64,
    },
    RankOverridden {
        member_id:  MemberId,
        rank_order: Option<u32>,
    },

    // ── Club events ────────────────────────────────
    ClubEvaluated {
        member_id: MemberId,
        tier_id:   TierId,
        period:    Period,
        status:    ClubStatus,
    },
    ClubAwarded {
        member_id:  MemberId,
        tier_id:    TierId,
        period:     Period,
        net_amount: f64,
    },
    ClubOverridden {
        member_id: MemberId,
        tier_id:   TierId,
        period:    Period,
        status:    ClubStatus,
        reversed:  f64,
    },

    // ── Bonanza events ─────────────────────────────
    BonanzaProgressed {
        member_id:  MemberId,
        bonanza_id: String,
        status:     BonanzaStatus,
        progress:   f64,
    },
    BonanzaAwarded {
        member_id:  MemberId,
        bonanza_id: String,
        amount:     f64,
    },
}

impl EngineEvent {
    /// Stable name for the `event_type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::DayStarted { .. }            => "day_started",
            Self::DayCompleted { .. }          => "day_completed",
            Self::EvaluationCompleted { .. }   => "evaluation_completed",
            Self::RootRegistered { .. }        => "root_registered",
            Self::MemberRegistered { .. }      => "member_registered",
            Self::MemberStatusChanged { .. }   => "member_status_changed",
            Self::KycStatusChanged { .. }      => "kyc_status_changed",
            Self::VolumeApplied { .. }         => "volume_applied",
            Self::MatchingCycleClosed { .. }   => "matching_cycle_closed",
            Self::MatchingBonusCredited { .. } => "matching_bonus_credited",
            Self::RankAchieved { .. }          => "rank_achieved",
            Self::RankMonthlyPaid { .. }       => "rank_monthly_paid",
            Self::RankOverridden { .. }        => "rank_overridden",
            Self::ClubEvaluated { .. }         => "club_evaluated",
            Self::ClubAwarded { .. }           => "club_awarded",
            Self::ClubOverridden { .. }        => "club_overridden",
            Self::BonanzaProgressed { .. }     => "bonanza_progressed",
            Self::BonanzaAwarded { .. }        => "bonanza_awarded",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:          Option<i64>,
    pub occurred_on: NaiveDate,
    pub component:   String,
    pub event_type:  String,
    pub payload:     String, // JSON-serialized EngineEvent
}
