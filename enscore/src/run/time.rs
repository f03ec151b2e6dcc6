use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};

use crate::error::ConfigError;

/// Format used for run directories and the run-date registry.
pub const RUN_TIME_FORMAT: &str = "%Y%m%d%H";

/// Ensemble cycles are launched twice daily.
pub const CYCLE_HOURS: i64 = 12;

/// Initialization time of an ensemble run, at hour resolution (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunInit(DateTime<Utc>);

impl RunInit {
    /// Truncates to the hour.
    pub fn new(time: DateTime<Utc>) -> Self {
        let naive = time.date_naive().and_time(NaiveTime::MIN) + Duration::hours(time.hour() as i64);
        RunInit(Utc.from_utc_datetime(&naive))
    }

    pub fn from_ymdh(year: i32, month: u32, day: u32, hour: u32) -> Result<Self, ConfigError> {
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| ConfigError::InvalidRunTime(format!("{:04}{:02}{:02}{:02}", year, month, day, hour)))?;
        if hour > 23 {
            return Err(ConfigError::InvalidRunTime(format!("{:04}{:02}{:02}{:02}", year, month, day, hour)));
        }
        let naive = date.and_time(NaiveTime::MIN) + Duration::hours(hour as i64);
        Ok(RunInit(Utc.from_utc_datetime(&naive)))
    }

    /// Most recent completed run at `submitted`: before 12 UTC that is the
    /// previous day's 00Z cycle, otherwise the same day's 12Z cycle.
    pub fn most_recent(submitted: DateTime<Utc>) -> Self {
        let date = submitted.date_naive();
        let (date, hour) = if submitted.hour() < 12 {
            (date.pred_opt().unwrap_or(date), 0)
        } else {
            (date, 12)
        };
        let naive = date.and_time(NaiveTime::MIN) + Duration::hours(hour);
        RunInit(Utc.from_utc_datetime(&naive))
    }

    /// The most recent run followed by `count - 1` earlier cycles.
    pub fn recent(submitted: DateTime<Utc>, count: usize) -> Vec<RunInit> {
        let newest = RunInit::most_recent(submitted);
        (0..count as i64)
            .map(|i| RunInit(newest.0 - Duration::hours(i * CYCLE_HOURS)))
            .collect()
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Valid time `hours` into the forecast.
    pub fn lead(&self, hours: u32) -> RunInit {
        RunInit(self.0 + Duration::hours(hours as i64))
    }

    pub fn stamp(&self) -> String {
        self.0.format(RUN_TIME_FORMAT).to_string()
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }
}

impl Display for RunInit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.stamp())
    }
}

impl FromStr for RunInit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ConfigError::InvalidRunTime(s.to_string());
        if s.len() != 10 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let year = s[0..4].parse().map_err(|_| invalid())?;
        let month = s[4..6].parse().map_err(|_| invalid())?;
        let day = s[6..8].parse().map_err(|_| invalid())?;
        let hour = s[8..10].parse().map_err(|_| invalid())?;
        RunInit::from_ymdh(year, month, day, hour).map_err(|_| invalid())
    }
}

/// Run to use when the caller did not pick one.
pub fn default_run_init(submitted: DateTime<Utc>) -> RunInit {
    RunInit::most_recent(submitted)
}
