//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Subsystems call store methods; they never execute SQL directly.

mod bonanza;
mod ledger;
mod matching;
mod member;
mod qualification;
mod volume;

pub use member::NewMember;

use crate::{
    error::EngineResult,
    event::EventLogEntry,
    period::Period,
    types::{
        BonanzaStatus, ClubStatus, IncomeType, KycStatus, MemberId, MemberStatus, Side, TierId,
        VolumeKind,
    },
};
use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct NetworkStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl NetworkStore {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based databases, this opens the same file.
    pub fn reopen(&self) -> EngineResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_network.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_volume.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_matching.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/005_qualification.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/006_bonanza.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/007_ledger.sql"))?;
        Ok(())
    }

    /// Run `f` inside one write transaction. Any error rolls everything back.
    ///
    /// IMMEDIATE takes the write lock up front so two connections racing for
    /// the same placement slot serialize on the unique index, not on a
    /// lock upgrade.
    pub fn in_transaction<T>(&self, f: impl FnOnce(&Self) -> EngineResult<T>) -> EngineResult<T> {
        let tx = rusqlite::Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (occurred_on, component, event_type, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![entry.occurred_on, entry.component, entry.event_type, entry.payload],
        )?;
        Ok(())
    }

    pub fn events_between(&self, from: NaiveDate, to: NaiveDate) -> EngineResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, occurred_on, component, event_type, payload
             FROM event_log WHERE occurred_on >= ?1 AND occurred_on <= ?2
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![from, to], |row| {
                Ok(EventLogEntry {
                    id:          Some(row.get(0)?),
                    occurred_on: row.get(1)?,
                    component:   row.get(2)?,
                    event_type:  row.get(3)?,
                    payload:     row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ── Evaluation runs ────────────────────────────────────────

    pub fn insert_evaluation_run(&self, run: &EvaluationRunRow) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO evaluation_run (
                run_id, kind, period, as_of, evaluated, succeeded, skipped, failed
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.run_id,
                run.kind,
                run.period,
                run.as_of,
                run.evaluated as i64,
                run.succeeded as i64,
                run.skipped as i64,
                run.failed as i64,
            ],
        )?;
        Ok(())
    }

    pub fn evaluation_runs(&self) -> EngineResult<Vec<EvaluationRunRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, kind, period, as_of, evaluated, succeeded, skipped, failed
             FROM evaluation_run ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EvaluationRunRow {
                run_id:    row.get(0)?,
                kind:      row.get(1)?,
                period:    row.get(2)?,
                as_of:     row.get(3)?,
                evaluated: row.get::<_, i64>(4)? as usize,
                succeeded: row.get::<_, i64>(5)? as usize,
                skipped:   row.get::<_, i64>(6)? as usize,
                failed:    row.get::<_, i64>(7)? as usize,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Audit ──────────────────────────────────────────────────

    pub fn insert_audit(&self, entry: &AuditEntry) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO audit_entry (
                actor, action, target, reason, before_json, after_json, recorded_on
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.actor,
                entry.action,
                entry.target,
                entry.reason,
                entry.before_json,
                entry.after_json,
                entry.recorded_on,
            ],
        )?;
        Ok(())
    }

    pub fn audit_entries(&self) -> EngineResult<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT actor, action, target, reason, before_json, after_json, recorded_on
             FROM audit_entry ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AuditEntry {
                actor:       row.get(0)?,
                action:      row.get(1)?,
                target:      row.get(2)?,
                reason:      row.get(3)?,
                before_json: row.get(4)?,
                after_json:  row.get(5)?,
                recorded_on: row.get(6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

// ── Column codecs ──────────────────────────────────────────────────

/// Enums persist as their upper-case names.
macro_rules! text_column {
    ($($ty:ty),* $(,)?) => {$(
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    )*};
}

text_column!(Side, MemberStatus, KycStatus, VolumeKind, ClubStatus, BonanzaStatus, IncomeType);

impl ToSql for Period {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for Period {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

// ── Row types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub member_id:           MemberId,
    pub sponsor_id:          Option<MemberId>,
    pub placement_parent_id: Option<MemberId>,
    pub placement_side:      Option<Side>,
    pub status:              MemberStatus,
    pub kyc_status:          KycStatus,
    pub joined_on:           NaiveDate,
    pub personal_bv:         f64,
    pub left_bv:             f64,
    pub right_bv:            f64,
    pub carry_forward_left:  f64,
    pub carry_forward_right: f64,
    pub team_bv:             f64,
    /// Display order of the current rank tier.
    pub rank_order:          Option<u32>,
}

impl MemberRecord {
    pub fn leg_bv(&self, side: Side) -> f64 {
        match side {
            Side::Left  => self.left_bv,
            Side::Right => self.right_bv,
        }
    }

    pub fn carry_forward(&self, side: Side) -> f64 {
        match side {
            Side::Left  => self.carry_forward_left,
            Side::Right => self.carry_forward_right,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeEntryRow {
    pub source_ref: String,
    pub member_id:  MemberId,
    pub kind:       VolumeKind,
    pub amount:     f64,
    pub booked_on:  NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingCycleRow {
    pub member_id:         MemberId,
    pub cycle_start:       NaiveDate,
    pub cycle_end:         NaiveDate,
    pub left_cycle_bv:     f64,
    pub right_cycle_bv:    f64,
    pub carry_in_left:     f64,
    pub carry_in_right:    f64,
    pub matched_volume:    f64,
    pub carry_out_left:    f64,
    pub carry_out_right:   f64,
    pub binary_commission: f64,
    pub computed_on:       NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingBonusDetailRow {
    pub recipient_id:       MemberId,
    pub downline_member_id: MemberId,
    pub generation:         u32,
    pub base_type:          IncomeType,
    pub base_amount:        f64,
    pub percentage:         f64,
    pub contribution:       f64,
    pub cycle_start:        NaiveDate,
    pub cycle_end:          NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClubQualificationRow {
    pub member_id:           MemberId,
    pub tier_id:             TierId,
    pub period:              Period,
    pub status:              ClubStatus,
    pub total_team_business: f64,
    pub strongest_leg:       f64,
    pub other_legs:          f64,
    pub capped_strongest:    f64,
    pub new_sales_volume:    f64,
    pub bonus_gross:         f64,
    pub tds_amount:          f64,
    pub net_amount:          f64,
    pub evaluated_on:        NaiveDate,
    pub awarded_on:          Option<NaiveDate>,
    pub manual_override:     bool,
    pub override_reason:     Option<String>,
    pub override_by:         Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankAchievementRow {
    pub member_id:      MemberId,
    pub tier_id:        TierId,
    pub display_order:  u32,
    pub team_bv:        f64,
    pub one_time_bonus: f64,
    pub achieved_on:    NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonanzaQualificationRow {
    pub member_id:        MemberId,
    pub bonanza_id:       String,
    pub status:           BonanzaStatus,
    pub window_start:     NaiveDate,
    pub window_end:       NaiveDate,
    pub sales_volume:     f64,
    pub direct_referrals: u32,
    pub team_volume:      f64,
    pub group_ratio_met:  bool,
    pub progress:         f64,
    pub score:            f64,
    pub reward_amount:    f64,
    pub evaluated_on:     NaiveDate,
    pub qualified_on:     Option<NaiveDate>,
    pub awarded_on:       Option<NaiveDate>,
    pub manual_override:  bool,
    pub override_reason:  Option<String>,
    pub override_by:      Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeEntry {
    pub member_id:    MemberId,
    pub income_type:  IncomeType,
    pub gross_amount: f64,
    pub tds_amount:   f64,
    /// Net amount credited; negative for reversals.
    pub amount:       f64,
    pub source_ref:   String,
    pub booked_on:    NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor:       String,
    pub action:      String,
    pub target:      String,
    pub reason:      String,
    pub before_json: Option<String>,
    pub after_json:  Option<String>,
    pub recorded_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRunRow {
    pub run_id:    String,
    pub kind:      String,
    pub period:    Option<Period>,
    pub as_of:     NaiveDate,
    pub evaluated: usize,
    pub succeeded: usize,
    pub skipped:   usize,
    pub failed:    usize,
}
