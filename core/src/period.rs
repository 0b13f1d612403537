//! Calendar periods and cycle windows.
//!
//! Business dates are `NaiveDate` throughout. A `Period` is one calendar
//! month (the unit of club and rank-monthly evaluation); a `CycleWindow` is
//! an inclusive date range (the unit of matching and bonanza evaluation).

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fields are kept private so a `Period` always names a month whose bounds
/// chrono can represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year:  i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if !(1..=12).contains(&month) {
            return None;
        }
        let candidate = Self { year, month };
        let next = candidate.next();
        NaiveDate::from_ymd_opt(year, month, 1)?;
        NaiveDate::from_ymd_opt(next.year, next.month, 1)?;
        Some(candidate)
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self { year: date.year(), month: date.month() }
    }

    /// Saturates at chrono's range; `new` rejects such months.
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MAX)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next().first_day().pred_opt().unwrap_or(NaiveDate::MAX)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    pub fn window(&self) -> CycleWindow {
        CycleWindow { start: self.first_day(), end: self.last_day() }
    }
}

impl TryFrom<String> for Period {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Period> for String {
    fn from(p: Period) -> Self {
        p.to_string()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (y, m) = s
            .split_once('-')
            .ok_or_else(|| format!("period '{s}' is not YYYY-MM"))?;
        let year: i32 = y.parse().map_err(|_| format!("bad year in '{s}'"))?;
        let month: u32 = m.parse().map_err(|_| format!("bad month in '{s}'"))?;
        Period::new(year, month).ok_or_else(|| format!("month out of range in '{s}'"))
    }
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CycleWindow {
    pub start: NaiveDate,
    pub end:   NaiveDate,
}

impl CycleWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn overlaps(&self, other: &CycleWindow) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Calendar quarter containing `date`.
    pub fn quarter_of(date: NaiveDate) -> Self {
        let first_month = (date.month0() / 3) * 3 + 1;
        let start = Period { year: date.year(), month: first_month };
        let end = Period { year: date.year(), month: first_month + 2 };
        Self { start: start.first_day(), end: end.last_day() }
    }

    /// Clip to `bounds`; `None` when the ranges do not intersect.
    pub fn clip(&self, bounds: &CycleWindow) -> Option<Self> {
        CycleWindow::new(self.start.max(bounds.start), self.end.min(bounds.end))
    }
}

impl fmt::Display for CycleWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Fixed-length matching cycles laid end to end from an anchor date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSchedule {
    pub anchor:     NaiveDate,
    pub cycle_days: u32,
}

impl CycleSchedule {
    /// The cycle that ended the day before `date`, if `date` opens a new cycle.
    pub fn closing_on(&self, date: NaiveDate) -> Option<CycleWindow> {
        let elapsed = (date - self.anchor).num_days();
        let len = i64::from(self.cycle_days);
        if len == 0 || elapsed < len || elapsed % len != 0 {
            return None;
        }
        CycleWindow::new(date - Duration::days(len), date - Duration::days(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn period_bounds_handle_year_rollover() {
        let dec = Period::new(2024, 12).unwrap();
        assert_eq!(dec.last_day(), d(2024, 12, 31));
        assert_eq!(dec.next(), Period::new(2025, 1).unwrap());
        assert_eq!(Period::new(2025, 1).unwrap().previous(), dec);
        assert_eq!(Period::new(2024, 2).unwrap().last_day(), d(2024, 2, 29));
    }

    #[test]
    fn period_parses_and_prints() {
        let p: Period = "2025-03".parse().unwrap();
        assert_eq!(p.to_string(), "2025-03");
        assert!("2025-13".parse::<Period>().is_err());
        assert!("202503".parse::<Period>().is_err());
    }

    #[test]
    fn period_outside_the_calendar_range_is_rejected() {
        assert_eq!(Period::new(300_000, 1), None);
        assert_eq!(Period::new(-300_000, 6), None);
        assert!("300000-01".parse::<Period>().is_err());
        assert!(serde_json::from_str::<Period>("\"300000-01\"").is_err());

        let last = Period::containing(NaiveDate::MAX).previous();
        assert_eq!(Period::new(last.year(), last.month()), Some(last));
        assert!(last.last_day() < NaiveDate::MAX);
    }

    #[test]
    fn schedule_closes_only_on_boundaries() {
        let s = CycleSchedule { anchor: d(2025, 1, 1), cycle_days: 7 };
        assert_eq!(s.closing_on(d(2025, 1, 5)), None);
        assert_eq!(s.closing_on(d(2025, 1, 1)), None);
        let w = s.closing_on(d(2025, 1, 8)).unwrap();
        assert_eq!(w.start, d(2025, 1, 1));
        assert_eq!(w.end, d(2025, 1, 7));
    }

    #[test]
    fn quarter_window_covers_three_months() {
        let q = CycleWindow::quarter_of(d(2025, 5, 17));
        assert_eq!(q.start, d(2025, 4, 1));
        assert_eq!(q.end, d(2025, 6, 30));
    }
}
