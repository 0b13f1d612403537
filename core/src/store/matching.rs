use super::{MatchingBonusDetailRow, MatchingCycleRow, NetworkStore};
use crate::{error::EngineResult, period::CycleWindow};
use rusqlite::{params, OptionalExtension, Row};

const CYCLE_COLUMNS: &str = "member_id, cycle_start, cycle_end, left_cycle_bv, right_cycle_bv,
    carry_in_left, carry_in_right, matched_volume, carry_out_left, carry_out_right,
    binary_commission, computed_on";

fn cycle_from_row(row: &Row<'_>) -> rusqlite::Result<MatchingCycleRow> {
    Ok(MatchingCycleRow {
        member_id:         row.get(0)?,
        cycle_start:       row.get(1)?,
        cycle_end:         row.get(2)?,
        left_cycle_bv:     row.get(3)?,
        right_cycle_bv:    row.get(4)?,
        carry_in_left:     row.get(5)?,
        carry_in_right:    row.get(6)?,
        matched_volume:    row.get(7)?,
        carry_out_left:    row.get(8)?,
        carry_out_right:   row.get(9)?,
        binary_commission: row.get(10)?,
        computed_on:       row.get(11)?,
    })
}

impl NetworkStore {
    pub fn matching_cycle(
        &self,
        member_id: &str,
        window: &CycleWindow,
    ) -> EngineResult<Option<MatchingCycleRow>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {CYCLE_COLUMNS} FROM matching_cycle
                     WHERE member_id = ?1 AND cycle_start = ?2 AND cycle_end = ?3"
                ),
                params![member_id, window.start, window.end],
                cycle_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Most recent cycle that intersects `window` or starts after it.
    /// Either one makes `window` unusable: the carry-forward would be wrong.
    pub fn conflicting_cycle(
        &self,
        member_id: &str,
        window: &CycleWindow,
    ) -> EngineResult<Option<MatchingCycleRow>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {CYCLE_COLUMNS} FROM matching_cycle
                     WHERE member_id = ?1 AND cycle_end >= ?2
                     ORDER BY cycle_end DESC LIMIT 1"
                ),
                params![member_id, window.start],
                cycle_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn matching_cycles(&self, member_id: &str) -> EngineResult<Vec<MatchingCycleRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CYCLE_COLUMNS} FROM matching_cycle
             WHERE member_id = ?1 ORDER BY cycle_start ASC"
        ))?;
        let rows = stmt.query_map(params![member_id], cycle_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Persist the cycle and roll the member's carry-forward to its residuals.
    pub fn insert_matching_cycle(&self, c: &MatchingCycleRow) -> EngineResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO matching_cycle ({CYCLE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                c.member_id,
                c.cycle_start,
                c.cycle_end,
                c.left_cycle_bv,
                c.right_cycle_bv,
                c.carry_in_left,
                c.carry_in_right,
                c.matched_volume,
                c.carry_out_left,
                c.carry_out_right,
                c.binary_commission,
                c.computed_on,
            ],
        )?;
        self.conn.execute(
            "UPDATE member SET carry_forward_left = ?1, carry_forward_right = ?2
             WHERE member_id = ?3",
            params![c.carry_out_left, c.carry_out_right, c.member_id],
        )?;
        Ok(())
    }

    pub fn insert_matching_detail(&self, d: &MatchingBonusDetailRow) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO matching_bonus_detail (
                recipient_id, downline_member_id, generation, base_type, base_amount,
                percentage, contribution, cycle_start, cycle_end
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                d.recipient_id,
                d.downline_member_id,
                d.generation,
                d.base_type,
                d.base_amount,
                d.percentage,
                d.contribution,
                d.cycle_start,
                d.cycle_end,
            ],
        )?;
        Ok(())
    }

    pub fn matching_details_for(&self, recipient_id: &str) -> EngineResult<Vec<MatchingBonusDetailRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT recipient_id, downline_member_id, generation, base_type, base_amount,
                    percentage, contribution, cycle_start, cycle_end
             FROM matching_bonus_detail WHERE recipient_id = ?1
             ORDER BY cycle_start ASC, generation ASC, downline_member_id ASC",
        )?;
        let rows = stmt.query_map(params![recipient_id], |row| {
            Ok(MatchingBonusDetailRow {
                recipient_id:       row.get(0)?,
                downline_member_id: row.get(1)?,
                generation:         row.get(2)?,
                base_type:          row.get(3)?,
                base_amount:        row.get(4)?,
                percentage:         row.get(5)?,
                contribution:       row.get(6)?,
                cycle_start:        row.get(7)?,
                cycle_end:          row.get(8)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
