use crate::{
    period::Period,
    types::{ClubStatus, KycStatus, MemberId, MemberStatus, TierId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Admin-issued commands. Every override carries an actor and a reason and
/// leaves an audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Re-run every periodic evaluation for a month. Idempotent.
    RecomputePeriod {
        period: Period,
    },
    RunMatchingCycle {
        member_id: Option<MemberId>,
        start:     NaiveDate,
        end:       NaiveDate,
    },
    OverrideClubQualification {
        member_id: MemberId,
        tier_id:   TierId,
        period:    Period,
        status:    ClubStatus,
        reason:    String,
        actor:     String,
    },
    /// `tier_id = None` clears the rank.
    OverrideRank {
        member_id: MemberId,
        tier_id:   Option<TierId>,
        reason:    String,
        actor:     String,
    },
    ManualBonanzaAward {
        member_id:  MemberId,
        bonanza_id: String,
        amount:     Option<f64>,
        reason:     String,
        actor:      String,
    },
    DistributePoolShares {
        bonanza_id: String,
    },
    SetMemberStatus {
        member_id: MemberId,
        status:    MemberStatus,
        actor:     String,
    },
    SetKycStatus {
        member_id:  MemberId,
        kyc_status: KycStatus,
        actor:      String,
    },
}

impl AdminCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RecomputePeriod { .. }           => "recompute_period",
            Self::RunMatchingCycle { .. }          => "run_matching_cycle",
            Self::OverrideClubQualification { .. } => "override_club_qualification",
            Self::OverrideRank { .. }              => "override_rank",
            Self::ManualBonanzaAward { .. }        => "manual_bonanza_award",
            Self::DistributePoolShares { .. }      => "distribute_pool_shares",
            Self::SetMemberStatus { .. }           => "set_member_status",
            Self::SetKycStatus { .. }              => "set_kyc_status",
        }
    }
}
