use super::{IncomeEntry, NetworkStore};
use crate::{error::EngineResult, types::IncomeType};
use rusqlite::{params, Row};

fn income_from_row(row: &Row<'_>) -> rusqlite::Result<IncomeEntry> {
    Ok(IncomeEntry {
        member_id:    row.get(0)?,
        income_type:  row.get(1)?,
        gross_amount: row.get(2)?,
        tds_amount:   row.get(3)?,
        amount:       row.get(4)?,
        source_ref:   row.get(5)?,
        booked_on:    row.get(6)?,
    })
}

impl NetworkStore {
    /// Append to the wallet outbox. Returns false when `source_ref` was
    /// already booked, which makes every payout path idempotent.
    pub fn insert_income(&self, entry: &IncomeEntry) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO income_entry (
                member_id, income_type, gross_amount, tds_amount, amount, source_ref, booked_on
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.member_id,
                entry.income_type,
                entry.gross_amount,
                entry.tds_amount,
                entry.amount,
                entry.source_ref,
                entry.booked_on,
            ],
        )?;
        if changed == 0 {
            log::debug!("income already booked: source_ref={}", entry.source_ref);
        }
        Ok(changed > 0)
    }

    pub fn income_entries(&self, member_id: &str) -> EngineResult<Vec<IncomeEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT member_id, income_type, gross_amount, tds_amount, amount, source_ref, booked_on
             FROM income_entry WHERE member_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![member_id], income_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn all_income_entries(&self) -> EngineResult<Vec<IncomeEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT member_id, income_type, gross_amount, tds_amount, amount, source_ref, booked_on
             FROM income_entry ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], income_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn income_total(&self, member_id: &str, income_type: IncomeType) -> EngineResult<f64> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(amount), 0.0) FROM income_entry
                 WHERE member_id = ?1 AND income_type = ?2",
                params![member_id, income_type],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Entry count and net total for a base reference and its suffixed
    /// follow-ups (`base`, `base:...`).
    pub fn income_for_ref(&self, base_ref: &str) -> EngineResult<(i64, f64)> {
        self.conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(amount), 0.0) FROM income_entry
                 WHERE source_ref = ?1 OR source_ref LIKE ?1 || ':%'",
                params![base_ref],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(Into::into)
    }

    /// (type, entry count, net total) across the whole ledger.
    pub fn income_summary(&self) -> EngineResult<Vec<(IncomeType, i64, f64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT income_type, COUNT(*), COALESCE(SUM(amount), 0.0)
             FROM income_entry GROUP BY income_type ORDER BY income_type ASC",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
