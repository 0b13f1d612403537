use super::{MemberRecord, NetworkStore};
use crate::{
    error::{EngineError, EngineResult},
    graph::NodeRecord,
    types::{KycStatus, MemberStatus, Side},
};
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, ErrorCode, OptionalExtension, Row};

const MEMBER_COLUMNS: &str = "member_id, sponsor_id, placement_parent_id, placement_side,
    status, kyc_status, joined_on, personal_bv, left_bv, right_bv,
    carry_forward_left, carry_forward_right, team_bv, rank_order";

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<MemberRecord> {
    Ok(MemberRecord {
        member_id:           row.get(0)?,
        sponsor_id:          row.get(1)?,
        placement_parent_id: row.get(2)?,
        placement_side:      row.get(3)?,
        status:              row.get(4)?,
        kyc_status:          row.get(5)?,
        joined_on:           row.get(6)?,
        personal_bv:         row.get(7)?,
        left_bv:             row.get(8)?,
        right_bv:            row.get(9)?,
        carry_forward_left:  row.get(10)?,
        carry_forward_right: row.get(11)?,
        team_bv:             row.get(12)?,
        rank_order:          row.get(13)?,
    })
}

/// New member row; the volume columns start at zero.
#[derive(Debug, Clone)]
pub struct NewMember<'a> {
    pub member_id:  &'a str,
    pub sponsor_id: &'a str,
    pub parent_id:  &'a str,
    pub side:       Side,
    pub status:     MemberStatus,
    pub kyc_status: KycStatus,
    pub joined_on:  NaiveDate,
}

impl NetworkStore {
    pub fn insert_root(&self, member_id: &str, joined_on: NaiveDate) -> EngineResult<()> {
        if let Some(root) = self.root_id()? {
            return Err(EngineError::RootExists(root));
        }
        self.conn.execute(
            "INSERT INTO member (member_id, status, kyc_status, joined_on)
             VALUES (?1, 'ACTIVE', 'APPROVED', ?2)",
            params![member_id, joined_on],
        )?;
        Ok(())
    }

    /// Insert a placed member. The unique slot index is the serialization
    /// point: losing a race surfaces as `SlotConflict`.
    pub fn insert_member(&self, m: &NewMember<'_>) -> EngineResult<()> {
        if self.member_exists(m.member_id)? {
            return Err(EngineError::MemberExists(m.member_id.to_string()));
        }
        let result = self.conn.execute(
            "INSERT INTO member (
                member_id, sponsor_id, placement_parent_id, placement_side,
                status, kyc_status, joined_on
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                m.member_id,
                m.sponsor_id,
                m.parent_id,
                m.side,
                m.status,
                m.kyc_status,
                m.joined_on,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, Some(msg)))
                if e.code == ErrorCode::ConstraintViolation
                    && msg.starts_with("UNIQUE")
                    && msg.contains("placement_side") =>
            {
                Err(EngineError::SlotConflict { parent_id: m.parent_id.to_string(), side: m.side })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn member_exists(&self, member_id: &str) -> EngineResult<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM member WHERE member_id = ?1",
            params![member_id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn root_id(&self) -> EngineResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT member_id FROM member WHERE placement_parent_id IS NULL LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn member(&self, member_id: &str) -> EngineResult<MemberRecord> {
        self.conn
            .query_row(
                &format!("SELECT {MEMBER_COLUMNS} FROM member WHERE member_id = ?1"),
                params![member_id],
                member_from_row,
            )
            .optional()?
            .ok_or_else(|| EngineError::MemberNotFound(member_id.to_string()))
    }

    /// All members in insertion order.
    pub fn members(&self) -> EngineResult<Vec<MemberRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {MEMBER_COLUMNS} FROM member ORDER BY rowid ASC"))?;
        let rows = stmt.query_map([], member_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Bulk fetch for a known id set, in insertion order.
    pub fn members_in(&self, member_ids: &[&str]) -> EngineResult<Vec<MemberRecord>> {
        if member_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; member_ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEMBER_COLUMNS} FROM member WHERE member_id IN ({placeholders}) ORDER BY rowid ASC"
        ))?;
        let rows = stmt.query_map(params_from_iter(member_ids.iter()), member_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Topology only, for loading the graph arena.
    pub fn load_topology(&self) -> EngineResult<Vec<NodeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT member_id, sponsor_id, placement_parent_id, placement_side, status, joined_on
             FROM member ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(NodeRecord {
                member_id:           row.get(0)?,
                sponsor_id:          row.get(1)?,
                placement_parent_id: row.get(2)?,
                placement_side:      row.get(3)?,
                status:              row.get(4)?,
                joined_on:           row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn set_member_status(&self, member_id: &str, status: MemberStatus) -> EngineResult<()> {
        let n = self.conn.execute(
            "UPDATE member SET status = ?1 WHERE member_id = ?2",
            params![status, member_id],
        )?;
        if n == 0 {
            return Err(EngineError::MemberNotFound(member_id.to_string()));
        }
        Ok(())
    }

    pub fn set_kyc_status(&self, member_id: &str, kyc: KycStatus) -> EngineResult<()> {
        let n = self.conn.execute(
            "UPDATE member SET kyc_status = ?1 WHERE member_id = ?2",
            params![kyc, member_id],
        )?;
        if n == 0 {
            return Err(EngineError::MemberNotFound(member_id.to_string()));
        }
        Ok(())
    }

    pub fn set_rank_order(&self, member_id: &str, rank_order: Option<u32>) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE member SET rank_order = ?1 WHERE member_id = ?2",
            params![rank_order, member_id],
        )?;
        Ok(())
    }

    pub fn member_count(&self) -> EngineResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM member", [], |row| row.get(0))
            .map_err(Into::into)
    }
}
