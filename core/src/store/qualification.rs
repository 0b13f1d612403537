use super::{ClubQualificationRow, NetworkStore, RankAchievementRow};
use crate::{
    error::{EngineError, EngineResult},
    period::Period,
};
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};

const CLUB_COLUMNS: &str = "member_id, tier_id, period, status, total_team_business,
    strongest_leg, other_legs, capped_strongest, new_sales_volume, bonus_gross,
    tds_amount, net_amount, evaluated_on, awarded_on, manual_override,
    override_reason, override_by";

fn club_from_row(row: &Row<'_>) -> rusqlite::Result<ClubQualificationRow> {
    Ok(ClubQualificationRow {
        member_id:           row.get(0)?,
        tier_id:             row.get(1)?,
        period:              row.get(2)?,
        status:              row.get(3)?,
        total_team_business: row.get(4)?,
        strongest_leg:       row.get(5)?,
        other_legs:          row.get(6)?,
        capped_strongest:    row.get(7)?,
        new_sales_volume:    row.get(8)?,
        bonus_gross:         row.get(9)?,
        tds_amount:          row.get(10)?,
        net_amount:          row.get(11)?,
        evaluated_on:        row.get(12)?,
        awarded_on:          row.get(13)?,
        manual_override:     row.get::<_, i64>(14)? != 0,
        override_reason:     row.get(15)?,
        override_by:         row.get(16)?,
    })
}

impl NetworkStore {
    // ── Club ───────────────────────────────────────────────────

    pub fn club_qualification(
        &self,
        member_id: &str,
        tier_id: &str,
        period: Period,
    ) -> EngineResult<Option<ClubQualificationRow>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {CLUB_COLUMNS} FROM club_qualification
                     WHERE member_id = ?1 AND tier_id = ?2 AND period = ?3"
                ),
                params![member_id, tier_id, period],
                club_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn club_qualifications_for_period(&self, period: Period) -> EngineResult<Vec<ClubQualificationRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CLUB_COLUMNS} FROM club_qualification
             WHERE period = ?1 ORDER BY member_id ASC, tier_id ASC"
        ))?;
        let rows = stmt.query_map(params![period], club_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Write an evaluation result. Finalized records (AWARDED or manually
    /// overridden) are left untouched and reported as a duplicate.
    pub fn upsert_club_qualification(&self, q: &ClubQualificationRow) -> EngineResult<()> {
        let changed = self.conn.execute(
            &format!(
                "INSERT INTO club_qualification ({CLUB_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                 ON CONFLICT (member_id, tier_id, period) DO UPDATE SET
                    status = excluded.status,
                    total_team_business = excluded.total_team_business,
                    strongest_leg = excluded.strongest_leg,
                    other_legs = excluded.other_legs,
                    capped_strongest = excluded.capped_strongest,
                    new_sales_volume = excluded.new_sales_volume,
                    bonus_gross = excluded.bonus_gross,
                    tds_amount = excluded.tds_amount,
                    net_amount = excluded.net_amount,
                    evaluated_on = excluded.evaluated_on,
                    awarded_on = excluded.awarded_on
                 WHERE club_qualification.status <> 'AWARDED'
                   AND club_qualification.manual_override = 0"
            ),
            params![
                q.member_id,
                q.tier_id,
                q.period,
                q.status,
                q.total_team_business,
                q.strongest_leg,
                q.other_legs,
                q.capped_strongest,
                q.new_sales_volume,
                q.bonus_gross,
                q.tds_amount,
                q.net_amount,
                q.evaluated_on,
                q.awarded_on,
                q.manual_override as i64,
                q.override_reason,
                q.override_by,
            ],
        )?;
        if changed == 0 {
            return Err(EngineError::DuplicateQualification {
                key: format!("club:{}:{}:{}", q.member_id, q.tier_id, q.period),
            });
        }
        Ok(())
    }

    /// Unconditional write used by audited admin overrides.
    pub fn replace_club_qualification(&self, q: &ClubQualificationRow) -> EngineResult<()> {
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO club_qualification ({CLUB_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ),
            params![
                q.member_id,
                q.tier_id,
                q.period,
                q.status,
                q.total_team_business,
                q.strongest_leg,
                q.other_legs,
                q.capped_strongest,
                q.new_sales_volume,
                q.bonus_gross,
                q.tds_amount,
                q.net_amount,
                q.evaluated_on,
                q.awarded_on,
                q.manual_override as i64,
                q.override_reason,
                q.override_by,
            ],
        )?;
        Ok(())
    }

    // ── Rank ───────────────────────────────────────────────────

    /// Returns false when the tier was already achieved.
    pub fn insert_rank_achievement(&self, a: &RankAchievementRow) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO rank_achievement (
                member_id, tier_id, display_order, team_bv, one_time_bonus, achieved_on
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                a.member_id,
                a.tier_id,
                a.display_order,
                a.team_bv,
                a.one_time_bonus,
                a.achieved_on,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn rank_achievements(&self, member_id: &str) -> EngineResult<Vec<RankAchievementRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT member_id, tier_id, display_order, team_bv, one_time_bonus, achieved_on
             FROM rank_achievement WHERE member_id = ?1 ORDER BY display_order ASC",
        )?;
        let rows = stmt.query_map(params![member_id], |row| {
            Ok(RankAchievementRow {
                member_id:      row.get(0)?,
                tier_id:        row.get(1)?,
                display_order:  row.get(2)?,
                team_bv:        row.get(3)?,
                one_time_bonus: row.get(4)?,
                achieved_on:    row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Returns false when the member was already paid for `period`.
    pub fn insert_rank_monthly_payout(
        &self,
        member_id: &str,
        period: Period,
        tier_id: &str,
        amount: f64,
        paid_on: NaiveDate,
    ) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO rank_monthly_payout (member_id, period, tier_id, amount, paid_on)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![member_id, period, tier_id, amount, paid_on],
        )?;
        Ok(changed > 0)
    }

    pub fn rank_monthly_payout_count(&self, period: Period) -> EngineResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM rank_monthly_payout WHERE period = ?1",
                params![period],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }
}
