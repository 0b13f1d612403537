use crate::types::{MemberId, Side};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Graph cycle detected at member '{member_id}' during {operation} (depth reached: {depth})")]
    GraphCycle {
        member_id: MemberId,
        operation: &'static str,
        depth:     usize,
    },

    #[error("Placement slot {side} under '{parent_id}' is already occupied")]
    SlotConflict { parent_id: MemberId, side: Side },

    #[error("Qualification already finalized: {key}")]
    DuplicateQualification { key: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Member '{0}' not found")]
    MemberNotFound(MemberId),

    #[error("Member '{0}' already exists")]
    MemberExists(MemberId),

    #[error("Network already has a root member '{0}'")]
    RootExists(MemberId),

    #[error("No open placement slot reachable from '{0}'")]
    NoOpenSlot(MemberId),

    #[error("Access denied: '{viewer}' may not view '{target}'")]
    AccessDenied { viewer: MemberId, target: MemberId },

    #[error("Invalid volume {amount} for source '{source_ref}'")]
    InvalidVolume { source_ref: String, amount: f64 },

    #[error("Invalid matching cycle for '{member_id}': {reason}")]
    InvalidCycle { member_id: MemberId, reason: String },

    #[error("Invalid override: {0}")]
    InvalidOverride(String),

    #[error("Unknown {kind} '{id}'")]
    UnknownConfigEntry { kind: &'static str, id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Errors a batch treats as "already done" rather than a failure.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateQualification { .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
