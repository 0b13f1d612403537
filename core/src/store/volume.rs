use super::{NetworkStore, VolumeEntryRow};
use crate::{error::EngineResult, period::CycleWindow, types::Side};
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, types::Value};

impl NetworkStore {
    pub fn volume_entry_exists(&self, source_ref: &str) -> EngineResult<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM volume_entry WHERE source_ref = ?1",
            params![source_ref],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn insert_volume_entry(&self, entry: &VolumeEntryRow) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO volume_entry (source_ref, member_id, kind, amount, booked_on)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![entry.source_ref, entry.member_id, entry.kind, entry.amount, entry.booked_on],
        )?;
        self.conn.execute(
            "UPDATE member SET personal_bv = personal_bv + ?1 WHERE member_id = ?2",
            params![entry.amount, entry.member_id],
        )?;
        Ok(())
    }

    /// Credit one ancestor's leg with downline volume and record the
    /// dated breakdown row.
    pub fn credit_leg_volume(
        &self,
        ancestor_id: &str,
        side: Side,
        entry: &VolumeEntryRow,
    ) -> EngineResult<()> {
        let sql = match side {
            Side::Left => {
                "UPDATE member SET left_bv = left_bv + ?1, team_bv = team_bv + ?1
                 WHERE member_id = ?2"
            }
            Side::Right => {
                "UPDATE member SET right_bv = right_bv + ?1, team_bv = team_bv + ?1
                 WHERE member_id = ?2"
            }
        };
        self.conn.execute(sql, params![entry.amount, ancestor_id])?;
        self.conn.execute(
            "INSERT INTO leg_volume (member_id, side, origin_member_id, amount, booked_on, source_ref)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ancestor_id,
                side,
                entry.member_id,
                entry.amount,
                entry.booked_on,
                entry.source_ref,
            ],
        )?;
        Ok(())
    }

    pub fn volume_entries(&self, member_id: &str) -> EngineResult<Vec<VolumeEntryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_ref, member_id, kind, amount, booked_on
             FROM volume_entry WHERE member_id = ?1
             ORDER BY booked_on ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![member_id], |row| {
            Ok(VolumeEntryRow {
                source_ref: row.get(0)?,
                member_id:  row.get(1)?,
                kind:       row.get(2)?,
                amount:     row.get(3)?,
                booked_on:  row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Downline volume booked into a member's leg(s) inside `window`.
    /// `side = None` sums both legs.
    pub fn leg_volume_between(
        &self,
        member_id: &str,
        side: Option<Side>,
        window: &CycleWindow,
    ) -> EngineResult<f64> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(amount), 0.0) FROM leg_volume
                 WHERE member_id = ?1 AND (?2 IS NULL OR side = ?2)
                   AND booked_on >= ?3 AND booked_on <= ?4",
                params![member_id, side, window.start, window.end],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Leg volume booked on or before `through` that no matching cycle has
    /// consumed yet. Late bookings dated inside a closed window land here.
    pub fn unpaired_leg_volume(&self, member_id: &str, side: Side, through: NaiveDate) -> EngineResult<f64> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(amount), 0.0) FROM leg_volume
                 WHERE member_id = ?1 AND side = ?2 AND paired_cycle_end IS NULL AND booked_on <= ?3",
                params![member_id, side, through],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Hand every unpaired row booked on or before `cycle_end` to that cycle.
    pub fn mark_leg_volume_paired(&self, member_id: &str, cycle_end: NaiveDate) -> EngineResult<usize> {
        self.conn
            .execute(
                "UPDATE leg_volume SET paired_cycle_end = ?2
                 WHERE member_id = ?1 AND paired_cycle_end IS NULL AND booked_on <= ?2",
                params![member_id, cycle_end],
            )
            .map_err(Into::into)
    }

    /// Cumulative leg volume booked on or before `date`.
    pub fn leg_volume_through(&self, member_id: &str, side: Side, date: NaiveDate) -> EngineResult<f64> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(amount), 0.0) FROM leg_volume
                 WHERE member_id = ?1 AND side = ?2 AND booked_on <= ?3",
                params![member_id, side, date],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    pub fn personal_volume_between(&self, member_id: &str, window: &CycleWindow) -> EngineResult<f64> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(amount), 0.0) FROM volume_entry
                 WHERE member_id = ?1 AND booked_on >= ?2 AND booked_on <= ?3",
                params![member_id, window.start, window.end],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Combined personal volume of a member set inside `window`.
    pub fn group_volume_between(&self, member_ids: &[&str], window: &CycleWindow) -> EngineResult<f64> {
        if member_ids.is_empty() {
            return Ok(0.0);
        }
        let placeholders = vec!["?"; member_ids.len()].join(", ");
        let sql = format!(
            "SELECT COALESCE(SUM(amount), 0.0) FROM volume_entry
             WHERE booked_on >= ? AND booked_on <= ? AND member_id IN ({placeholders})"
        );
        let mut values: Vec<Value> = vec![
            Value::Text(window.start.to_string()),
            Value::Text(window.end.to_string()),
        ];
        values.extend(member_ids.iter().map(|id| Value::Text(id.to_string())));
        self.conn
            .query_row(&sql, params_from_iter(values), |row| row.get(0))
            .map_err(Into::into)
    }
}
