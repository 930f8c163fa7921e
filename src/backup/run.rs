// backuptool/src/backup/run.rs
use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};

use crate::errors::{AppError, Result};

const RANGE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parameters of one backup invocation.
///
/// `start_date`/`end_date` are the labels used for the destination folder;
/// `range_start..range_end` is the half-open time range handed to producers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRun {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub range_start: NaiveDateTime,
    pub range_end: NaiveDateTime,
    pub filter_sensitive: bool,
    pub clear_archived: bool,
}

impl BackupRun {
    /// Builds run parameters from optional CLI dates.
    ///
    /// Without dates the run covers yesterday: `[yesterday 00:00, today 00:00)`.
    /// An explicit end date is inclusive, so the range extends to the start of
    /// the following day.
    pub fn from_options(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        filter_sensitive: bool,
        clear_archived: bool,
        today: NaiveDate,
    ) -> Result<Self> {
        let start_date = match start {
            Some(date) => date,
            None => today
                .checked_sub_days(Days::new(1))
                .ok_or_else(|| AppError::InvalidInput(format!("No day before {}", today)))?,
        };

        let (end_date, range_end_day) = match end {
            Some(date) => (date, next_day(date)?),
            None => (today, today),
        };

        if start_date > end_date {
            return Err(AppError::InvalidInput(format!(
                "Start date {} is after end date {}",
                start_date, end_date
            )));
        }

        Ok(BackupRun {
            start_date,
            end_date,
            range_start: start_date.and_time(NaiveTime::MIN),
            range_end: range_end_day.and_time(NaiveTime::MIN),
            filter_sensitive,
            clear_archived,
        })
    }

    pub fn range_start_label(&self) -> String {
        self.range_start.format(RANGE_FORMAT).to_string()
    }

    pub fn range_end_label(&self) -> String {
        self.range_end.format(RANGE_FORMAT).to_string()
    }
}

fn next_day(date: NaiveDate) -> Result<NaiveDate> {
    date.checked_add_days(Days::new(1))
        .ok_or_else(|| AppError::InvalidInput(format!("No day after {}", date)))
}

/// Splits `[start, end]` (inclusive) into consecutive windows of at most
/// `window_days` days. The last window is truncated at `end`.
pub fn split_windows(start: NaiveDate, end: NaiveDate, window_days: u32) -> Result<Vec<(NaiveDate, NaiveDate)>> {
    if window_days == 0 {
        return Err(AppError::InvalidInput("--window-days must be at least 1".to_string()));
    }
    if start > end {
        return Err(AppError::InvalidInput(format!(
            "Start date {} is after end date {}",
            start, end
        )));
    }

    let mut windows = Vec::new();
    let mut window_start = start;
    loop {
        let window_end = window_start
            .checked_add_days(Days::new(u64::from(window_days - 1)))
            .map_or(end, |d| d.min(end));
        windows.push((window_start, window_end));
        if window_end >= end {
            break;
        }
        window_start = next_day(window_end)?;
    }
    Ok(windows)
}
