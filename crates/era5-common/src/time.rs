//! Date windows and hour steps for ERA5 requests and image iteration.

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{Era5Error, Era5Result};

/// Inclusive date interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Era5Result<Self> {
        if start > end {
            return Err(Era5Error::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Every day in the window, ascending.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |day| *day <= end)
    }

    pub fn num_days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    /// Stem used for staging files, e.g. `20170115_20170131`.
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}",
            self.start.format("%Y%m%d"),
            self.end.format("%Y%m%d")
        )
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Splits `[start, end]` into windows that never cross a month boundary.
///
/// Windows are ascending and contiguous; each ends at its month's last day or
/// at `end`.
#[derive(Debug, Clone)]
pub struct MonthChunks {
    next: Option<NaiveDate>,
    end: NaiveDate,
}

impl MonthChunks {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Era5Result<Self> {
        if start > end {
            return Err(Era5Error::InvalidDateRange { start, end });
        }
        Ok(Self {
            next: Some(start),
            end,
        })
    }
}

impl Iterator for MonthChunks {
    type Item = DateWindow;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next?;
        let chunk_end = last_day_of_month(start).min(self.end);

        self.next = chunk_end.succ_opt().filter(|next| *next <= self.end);
        Some(DateWindow {
            start,
            end: chunk_end,
        })
    }
}

/// Collect the month windows covering `[start, end]`.
pub fn month_windows(start: NaiveDate, end: NaiveDate) -> Era5Result<Vec<DateWindow>> {
    Ok(MonthChunks::new(start, end)?.collect())
}

fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1)
        .and_then(|first| first.checked_add_months(Months::new(1)))
        .and_then(|next_first| next_first.pred_opt())
        .unwrap_or(date)
}

/// Full hours of the day at which images are requested and read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourSteps(Vec<u32>);

impl HourSteps {
    /// Keeps the given order and drops repeated hours.
    pub fn new(hours: impl IntoIterator<Item = u32>) -> Era5Result<Self> {
        let mut steps = Vec::new();
        for hour in hours {
            if hour > 23 {
                return Err(Era5Error::InvalidHourStep(hour));
            }
            if !steps.contains(&hour) {
                steps.push(hour);
            }
        }

        if steps.is_empty() {
            return Err(Era5Error::EmptyHourSteps);
        }
        Ok(Self(steps))
    }

    pub fn hours(&self) -> &[u32] {
        &self.0
    }

    pub fn times_of_day(&self) -> Vec<NaiveTime> {
        self.0
            .iter()
            .filter_map(|&hour| NaiveTime::from_hms_opt(hour, 0, 0))
            .collect()
    }

    /// Times as requested from the archive service, e.g. `"06:00"`.
    pub fn request_times(&self) -> Vec<String> {
        self.0.iter().map(|hour| format!("{:02}:00", hour)).collect()
    }
}

impl Default for HourSteps {
    fn default() -> Self {
        Self(vec![0, 6, 12, 18])
    }
}

/// All timestamps at the given hour steps within `[start, end]`.
///
/// Days are iterated from `start`'s date to `end`'s date; timestamps outside
/// the interval are dropped. Output is ascending when the hour steps are.
pub fn timestamps(
    start: NaiveDateTime,
    end: NaiveDateTime,
    steps: &HourSteps,
) -> Era5Result<Vec<NaiveDateTime>> {
    let window = DateWindow::new(start.date(), end.date())?;
    let times = steps.times_of_day();

    let mut stamps: Vec<NaiveDateTime> = window
        .days()
        .flat_map(|day| times.iter().map(move |time| day.and_time(*time)))
        .filter(|ts| *ts >= start && *ts <= end)
        .collect();
    stamps.sort();
    Ok(stamps)
}

/// Parse a date or date-time given on the command line.
///
/// Accepts `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM` and `YYYY-MM-DDTHH:MM:SS`. A bare
/// date means midnight.
pub fn parse_datetime(s: &str) -> Era5Result<NaiveDateTime> {
    parse_datetime_or_day(s, NaiveTime::MIN)
}

/// Parse the inclusive end of a range. A bare date covers the whole day, so
/// `2017-01-02` includes the 18:00 image of that day.
pub fn parse_end_datetime(s: &str) -> Era5Result<NaiveDateTime> {
    let last = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)
        .ok_or_else(|| Era5Error::InvalidDateTime(s.to_string()))?;
    parse_datetime_or_day(s, last)
}

fn parse_datetime_or_day(s: &str, day_time: NaiveTime) -> Era5Result<NaiveDateTime> {
    let s = s.trim();

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(day_time));
    }

    Err(Era5Error::InvalidDateTime(s.to_string()))
}

/// Parse `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Era5Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| Era5Error::InvalidDateTime(s.to_string()))
}
