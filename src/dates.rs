//! Departure/return date-pair generation.
//!
//! Departures start at `today + min_days_from_now` and advance by
//! `date_step_days` up to `today + max_days_from_now`. For each departure,
//! stays run from `min_stay_days` in steps of `stay_days_step` up to
//! `min(max_stay_days, 14)`; a pair is kept only if its return date also
//! falls inside the window.

use chrono::{Duration, NaiveDate};

use crate::config::ScanConfig;
use crate::models::DatePair;

/// Hard ceiling on stay length.
pub const MAX_STAY_CAP: u32 = 14;

/// Furthest departure horizon a configuration may ask for.
pub const MAX_WINDOW_DAYS: u32 = 365;

/// Inputs of the generator.
#[derive(Debug, Clone, Copy)]
pub struct DateWindow {
    pub today: NaiveDate,
    pub min_days_from_now: u32,
    pub max_days_from_now: u32,
    pub min_stay_days: u32,
    pub max_stay_days: u32,
    pub stay_step: u32,
    pub date_step: u32,
}

impl DateWindow {
    pub fn from_config(today: NaiveDate, scan: &ScanConfig) -> Self {
        Self {
            today,
            min_days_from_now: scan.min_days_from_now,
            max_days_from_now: scan.max_days_from_now,
            min_stay_days: scan.min_stay_days,
            max_stay_days: scan.max_stay_days,
            stay_step: scan.stay_days_step,
            date_step: scan.date_step_days,
        }
    }

    /// Lazily enumerate the pairs. Calling again restarts from the beginning.
    pub fn pairs(&self) -> DatePairs {
        DatePairs {
            window: *self,
            departure_offset: self.min_days_from_now,
            stay: self.min_stay_days,
        }
    }

    fn last_date(&self) -> Option<NaiveDate> {
        offset(self.today, self.max_days_from_now)
    }

    fn max_stay(&self) -> u32 {
        self.max_stay_days.min(MAX_STAY_CAP)
    }
}

/// Iterator over [`DatePair`]s in departure-major, stay-minor order.
#[derive(Debug, Clone)]
pub struct DatePairs {
    window: DateWindow,
    departure_offset: u32,
    stay: u32,
}

impl Iterator for DatePairs {
    type Item = DatePair;

    fn next(&mut self) -> Option<DatePair> {
        let w = &self.window;
        if w.date_step == 0 || w.stay_step == 0 {
            return None;
        }
        let last = w.last_date()?;

        while self.departure_offset <= w.max_days_from_now {
            let departure = offset(w.today, self.departure_offset)?;

            while self.stay <= w.max_stay() {
                let stay = self.stay;
                self.stay = self.stay.saturating_add(w.stay_step);
                if stay == 0 {
                    continue;
                }
                let return_date = offset(departure, stay)?;
                if return_date <= last {
                    return Some(DatePair {
                        departure,
                        return_date,
                    });
                }
                // Later stays only move further past the window.
                break;
            }

            self.departure_offset = self.departure_offset.checked_add(w.date_step)?;
            self.stay = w.min_stay_days;
        }

        None
    }
}

fn offset(date: NaiveDate, days: u32) -> Option<NaiveDate> {
    date.checked_add_signed(Duration::days(i64::from(days)))
}
