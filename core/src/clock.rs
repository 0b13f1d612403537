//! Business clock: the last day the schedule has processed.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusinessClock {
    pub last_processed: Option<NaiveDate>,
    pub days_processed: u64,
}

impl BusinessClock {
    pub fn new() -> Self {
        Self { last_processed: None, days_processed: 0 }
    }

    /// Day after the last processed one, or `start` on a fresh clock.
    pub fn next_day(&self, start: NaiveDate) -> NaiveDate {
        match self.last_processed {
            Some(d) => d + Duration::days(1),
            None => start,
        }
    }

    /// Record `date` as processed. Re-running an earlier day does not move
    /// the clock back.
    pub fn mark(&mut self, date: NaiveDate) {
        self.days_processed += 1;
        if self.last_processed.map_or(true, |d| date > d) {
            self.last_processed = Some(date);
        }
    }
}

impl Default for BusinessClock {
    fn default() -> Self {
        Self::new()
    }
}
