use anyhow::Context;
use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveTime, SecondsFormat};

/// Source of "now" for everything that depends on the calendar day.
#[derive(Debug, Clone)]
pub enum Clock {
    System,
    Fixed(DateTime<FixedOffset>),
}

impl Clock {
    /// `None` or a blank value selects the system clock.
    pub fn parse_override(raw: Option<&str>) -> anyhow::Result<Self> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::System),
            Some(v) => {
                let at = DateTime::parse_from_rfc3339(v)
                    .with_context(|| format!("clock override is not RFC 3339: {}", v))?;
                Ok(Self::Fixed(at))
            }
        }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        match self {
            Self::System => Local::now().fixed_offset(),
            Self::Fixed(at) => *at,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Midnight of `now`'s calendar day, in `now`'s offset.
pub fn day_start(now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    now - now.time().signed_duration_since(NaiveTime::MIN)
}

pub fn format_day(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

pub fn format_timestamp(at: DateTime<FixedOffset>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, false)
}
