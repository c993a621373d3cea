//! CF-convention time axes (`<unit> since <epoch>`).

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

/// A parsed time axis definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeUnits {
    pub step: Duration,
    pub epoch: NaiveDateTime,
}

impl TimeUnits {
    /// Parse units such as `hours since 1900-01-01 00:00:00.0`.
    pub fn parse(units: &str) -> Option<Self> {
        let (unit, epoch) = units.trim().split_once(" since ")?;
        let step = match unit.trim().to_ascii_lowercase().as_str() {
            "seconds" | "second" | "s" => Duration::seconds(1),
            "minutes" | "minute" | "min" => Duration::minutes(1),
            "hours" | "hour" | "h" => Duration::hours(1),
            "days" | "day" | "d" => Duration::days(1),
            _ => return None,
        };

        Some(Self {
            step,
            epoch: parse_epoch(epoch.trim())?,
        })
    }

    /// Timestamp of an axis value, rounded to whole seconds.
    pub fn to_datetime(&self, value: f64) -> NaiveDateTime {
        let seconds = (value * self.step.num_seconds() as f64).round() as i64;
        self.epoch + Duration::seconds(seconds)
    }
}

fn parse_epoch(s: &str) -> Option<NaiveDateTime> {
    // drop fractional seconds and a trailing zone designator
    let s = s.trim_end_matches('Z').trim_end_matches(" UTC");
    let s = s.split('.').next()?;

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_era5_hours_since_1900() {
        let units = TimeUnits::parse("hours since 1900-01-01 00:00:00.0").unwrap();
        let dt = units.to_datetime(1_025_634.0);
        assert_eq!(dt.to_string(), "2017-01-01 18:00:00");
    }

    #[test]
    fn test_seconds_since_unix_epoch() {
        let units = TimeUnits::parse("seconds since 1970-01-01").unwrap();
        assert_eq!(units.to_datetime(86_400.0).to_string(), "1970-01-02 00:00:00");
    }

    #[test]
    fn test_invalid_units() {
        assert!(TimeUnits::parse("fortnights since 1900-01-01").is_none());
        assert!(TimeUnits::parse("hours").is_none());
    }
}
