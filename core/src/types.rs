//! Shared primitive types used across the entire engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A stable, unique identifier for a member node.
pub type MemberId = String;

/// Identifier of a configured tier or bonanza.
pub type TierId = String;

/// Which child slot of a placement parent a member occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left  => "LEFT",
            Self::Right => "RIGHT",
        }
    }

    pub fn other(&self) -> Side {
        match self {
            Self::Left  => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LEFT"  => Ok(Self::Left),
            "RIGHT" => Ok(Self::Right),
            other   => Err(format!("unknown side '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberStatus {
    Active,
    Inactive,
    Suspended,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active    => "ACTIVE",
            Self::Inactive  => "INACTIVE",
            Self::Suspended => "SUSPENDED",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE"    => Ok(Self::Active),
            "INACTIVE"  => Ok(Self::Inactive),
            "SUSPENDED" => Ok(Self::Suspended),
            other       => Err(format!("unknown member status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KycStatus {
    Pending,
    /// Some upstream KYC providers report this as VERIFIED.
    #[serde(alias = "VERIFIED")]
    Approved,
    Rejected,
}

impl KycStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending  => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for KycStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KycStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING"               => Ok(Self::Pending),
            "APPROVED" | "VERIFIED" => Ok(Self::Approved),
            "REJECTED"              => Ok(Self::Rejected),
            other                   => Err(format!("unknown kyc status '{other}'")),
        }
    }
}

/// Which parent relation a traversal follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    Sponsor,
    Placement,
}

/// Kind of business event that produces personal volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeKind {
    Investment,
    Sale,
    Repayment,
}

impl VolumeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Investment => "INVESTMENT",
            Self::Sale       => "SALE",
            Self::Repayment  => "REPAYMENT",
        }
    }
}

impl FromStr for VolumeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INVESTMENT" => Ok(Self::Investment),
            "SALE"       => Ok(Self::Sale),
            "REPAYMENT"  => Ok(Self::Repayment),
            other        => Err(format!("unknown volume kind '{other}'")),
        }
    }
}

/// Club qualification state per (member, tier, period).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClubStatus {
    Pending,
    Qualified,
    DisqualifiedActivation,
    DisqualifiedKyc,
    DisqualifiedNewSales,
    DisqualifiedBalancing,
    Awarded,
}

impl ClubStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending                => "PENDING",
            Self::Qualified              => "QUALIFIED",
            Self::DisqualifiedActivation => "DISQUALIFIED_ACTIVATION",
            Self::DisqualifiedKyc        => "DISQUALIFIED_KYC",
            Self::DisqualifiedNewSales   => "DISQUALIFIED_NEW_SALES",
            Self::DisqualifiedBalancing  => "DISQUALIFIED_BALANCING",
            Self::Awarded                => "AWARDED",
        }
    }

    pub fn is_disqualified(&self) -> bool {
        matches!(
            self,
            Self::DisqualifiedActivation
                | Self::DisqualifiedKyc
                | Self::DisqualifiedNewSales
                | Self::DisqualifiedBalancing
        )
    }
}

impl FromStr for ClubStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING"                 => Ok(Self::Pending),
            "QUALIFIED"               => Ok(Self::Qualified),
            "DISQUALIFIED_ACTIVATION" => Ok(Self::DisqualifiedActivation),
            "DISQUALIFIED_KYC"        => Ok(Self::DisqualifiedKyc),
            "DISQUALIFIED_NEW_SALES"  => Ok(Self::DisqualifiedNewSales),
            "DISQUALIFIED_BALANCING"  => Ok(Self::DisqualifiedBalancing),
            "AWARDED"                 => Ok(Self::Awarded),
            other                     => Err(format!("unknown club status '{other}'")),
        }
    }
}

/// Bonanza qualification state per (member, bonanza).
/// `Awarded`, `Disqualified` and `Expired` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BonanzaStatus {
    Pending,
    InProgress,
    Qualified,
    Awarded,
    Disqualified,
    Expired,
}

impl BonanzaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending      => "PENDING",
            Self::InProgress   => "IN_PROGRESS",
            Self::Qualified    => "QUALIFIED",
            Self::Awarded      => "AWARDED",
            Self::Disqualified => "DISQUALIFIED",
            Self::Expired      => "EXPIRED",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl FromStr for BonanzaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING"      => Ok(Self::Pending),
            "IN_PROGRESS"  => Ok(Self::InProgress),
            "QUALIFIED"    => Ok(Self::Qualified),
            "AWARDED"      => Ok(Self::Awarded),
            "DISQUALIFIED" => Ok(Self::Disqualified),
            "EXPIRED"      => Ok(Self::Expired),
            other          => Err(format!("unknown bonanza status '{other}'")),
        }
    }
}

/// Income categories written to the wallet outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncomeType {
    Binary,
    Matching,
    RankBonus,
    RankMonthly,
    ClubIncome,
    ClubIncomeReversal,
    Bonanza,
}

impl IncomeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binary             => "BINARY",
            Self::Matching           => "MATCHING",
            Self::RankBonus          => "RANK_BONUS",
            Self::RankMonthly        => "RANK_MONTHLY",
            Self::ClubIncome         => "CLUB_INCOME",
            Self::ClubIncomeReversal => "CLUB_INCOME_REVERSAL",
            Self::Bonanza            => "BONANZA",
        }
    }
}

impl FromStr for IncomeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BINARY"               => Ok(Self::Binary),
            "MATCHING"             => Ok(Self::Matching),
            "RANK_BONUS"           => Ok(Self::RankBonus),
            "RANK_MONTHLY"         => Ok(Self::RankMonthly),
            "CLUB_INCOME"          => Ok(Self::ClubIncome),
            "CLUB_INCOME_REVERSAL" => Ok(Self::ClubIncomeReversal),
            "BONANZA"              => Ok(Self::Bonanza),
            other                  => Err(format!("unknown income type '{other}'")),
        }
    }
}
