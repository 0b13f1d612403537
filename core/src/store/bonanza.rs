use super::{BonanzaQualificationRow, NetworkStore};
use crate::{
    error::{EngineError, EngineResult},
    types::BonanzaStatus,
};
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};

const BONANZA_COLUMNS: &str = "member_id, bonanza_id, status, window_start, window_end,
    sales_volume, direct_referrals, team_volume, group_ratio_met, progress, score,
    reward_amount, evaluated_on, qualified_on, awarded_on, manual_override,
    override_reason, override_by";

fn bonanza_from_row(row: &Row<'_>) -> rusqlite::Result<BonanzaQualificationRow> {
    Ok(BonanzaQualificationRow {
        member_id:        row.get(0)?,
        bonanza_id:       row.get(1)?,
        status:           row.get(2)?,
        window_start:     row.get(3)?,
        window_end:       row.get(4)?,
        sales_volume:     row.get(5)?,
        direct_referrals: row.get(6)?,
        team_volume:      row.get(7)?,
        group_ratio_met:  row.get::<_, i64>(8)? != 0,
        progress:         row.get(9)?,
        score:            row.get(10)?,
        reward_amount:    row.get(11)?,
        evaluated_on:     row.get(12)?,
        qualified_on:     row.get(13)?,
        awarded_on:       row.get(14)?,
        manual_override:  row.get::<_, i64>(15)? != 0,
        override_reason:  row.get(16)?,
        override_by:      row.get(17)?,
    })
}

impl NetworkStore {
    pub fn bonanza_qualification(
        &self,
        member_id: &str,
        bonanza_id: &str,
    ) -> EngineResult<Option<BonanzaQualificationRow>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {BONANZA_COLUMNS} FROM bonanza_qualification
                     WHERE member_id = ?1 AND bonanza_id = ?2"
                ),
                params![member_id, bonanza_id],
                bonanza_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn bonanza_qualifications(
        &self,
        bonanza_id: &str,
        status: Option<BonanzaStatus>,
    ) -> EngineResult<Vec<BonanzaQualificationRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {BONANZA_COLUMNS} FROM bonanza_qualification
             WHERE bonanza_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY member_id ASC"
        ))?;
        let rows = stmt.query_map(params![bonanza_id, status], bonanza_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Progress write from the periodic tracker. Absorbing states and manual
    /// overrides are never rewritten.
    pub fn upsert_bonanza_qualification(&self, q: &BonanzaQualificationRow) -> EngineResult<()> {
        let changed = self.conn.execute(
            &format!(
                "INSERT INTO bonanza_qualification ({BONANZA_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                 ON CONFLICT (member_id, bonanza_id) DO UPDATE SET
                    status = excluded.status,
                    window_start = excluded.window_start,
                    window_end = excluded.window_end,
                    sales_volume = excluded.sales_volume,
                    direct_referrals = excluded.direct_referrals,
                    team_volume = excluded.team_volume,
                    group_ratio_met = excluded.group_ratio_met,
                    progress = excluded.progress,
                    score = excluded.score,
                    reward_amount = excluded.reward_amount,
                    evaluated_on = excluded.evaluated_on,
                    qualified_on = excluded.qualified_on,
                    awarded_on = excluded.awarded_on
                 WHERE bonanza_qualification.status NOT IN ('AWARDED', 'DISQUALIFIED', 'EXPIRED')
                   AND bonanza_qualification.manual_override = 0"
            ),
            params![
                q.member_id,
                q.bonanza_id,
                q.status,
                q.window_start,
                q.window_end,
                q.sales_volume,
                q.direct_referrals,
                q.team_volume,
                q.group_ratio_met as i64,
                q.progress,
                q.score,
                q.reward_amount,
                q.evaluated_on,
                q.qualified_on,
                q.awarded_on,
                q.manual_override as i64,
                q.override_reason,
                q.override_by,
            ],
        )?;
        if changed == 0 {
            return Err(EngineError::DuplicateQualification {
                key: format!("bonanza:{}:{}", q.member_id, q.bonanza_id),
            });
        }
        Ok(())
    }

    /// Unconditional write used for pool awards and audited admin awards.
    pub fn replace_bonanza_qualification(&self, q: &BonanzaQualificationRow) -> EngineResult<()> {
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO bonanza_qualification ({BONANZA_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
            ),
            params![
                q.member_id,
                q.bonanza_id,
                q.status,
                q.window_start,
                q.window_end,
                q.sales_volume,
                q.direct_referrals,
                q.team_volume,
                q.group_ratio_met as i64,
                q.progress,
                q.score,
                q.reward_amount,
                q.evaluated_on,
                q.qualified_on,
                q.awarded_on,
                q.manual_override as i64,
                q.override_reason,
                q.override_by,
            ],
        )?;
        Ok(())
    }

    /// Qualifiers counted against `max_qualifiers`.
    pub fn bonanza_qualified_count(&self, bonanza_id: &str) -> EngineResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM bonanza_qualification
                 WHERE bonanza_id = ?1 AND status IN ('QUALIFIED', 'AWARDED')",
                params![bonanza_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Close every open record once the qualifier cap is reached.
    pub fn disqualify_open_bonanza_records(&self, bonanza_id: &str, on: NaiveDate) -> EngineResult<usize> {
        let n = self.conn.execute(
            "UPDATE bonanza_qualification SET status = 'DISQUALIFIED', evaluated_on = ?2
             WHERE bonanza_id = ?1 AND status IN ('PENDING', 'IN_PROGRESS')
               AND manual_override = 0",
            params![bonanza_id, on],
        )?;
        Ok(n)
    }

    /// Ranked by score; disqualified records are excluded.
    pub fn bonanza_leaderboard(&self, bonanza_id: &str, limit: usize) -> EngineResult<Vec<BonanzaQualificationRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {BONANZA_COLUMNS} FROM bonanza_qualification
             WHERE bonanza_id = ?1 AND status <> 'DISQUALIFIED'
             ORDER BY score DESC, member_id ASC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![bonanza_id, limit as i64], bonanza_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
