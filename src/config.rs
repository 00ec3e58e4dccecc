use chrono::{NaiveDate, NaiveTime, TimeDelta};

use crate::limits::{DEFAULT_DAILY_CAPACITY, SLOT_MINUTES};
use crate::model::normalize_time;

/// Clinic-wide scheduling rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClinicConfig {
    /// First bookable start time.
    pub opens_at: NaiveTime,
    /// The clinic closes here; the last bookable start is one slot earlier.
    pub closes_at: NaiveTime,
    /// No visit may be booked after this date.
    pub last_date: NaiveDate,
    pub daily_capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse { var: &'static str, value: String },
    WindowTooShort { opens_at: NaiveTime, closes_at: NaiveTime },
    ZeroCapacity,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Parse { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::WindowTooShort { opens_at, closes_at } => write!(
                f,
                "operating window {opens_at}-{closes_at} is shorter than one appointment"
            ),
            ConfigError::ZeroCapacity => write!(f, "daily capacity must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for ClinicConfig {
    fn default() -> Self {
        Self {
            opens_at: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            closes_at: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
            last_date: NaiveDate::from_ymd_opt(2026, 3, 12).unwrap_or(NaiveDate::MAX),
            daily_capacity: DEFAULT_DAILY_CAPACITY,
        }
    }
}

impl ClinicConfig {
    pub fn new(
        opens_at: NaiveTime,
        closes_at: NaiveTime,
        last_date: NaiveDate,
        daily_capacity: u32,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            opens_at: normalize_time(opens_at),
            closes_at: normalize_time(closes_at),
            last_date,
            daily_capacity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Read `VETSCHED_OPENS_AT`, `VETSCHED_CLOSES_AT`, `VETSCHED_LAST_DATE` and
    /// `VETSCHED_DAILY_CAPACITY`, falling back to the defaults for unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let opens_at = read(&lookup, "VETSCHED_OPENS_AT", parse_time)?.unwrap_or(defaults.opens_at);
        let closes_at =
            read(&lookup, "VETSCHED_CLOSES_AT", parse_time)?.unwrap_or(defaults.closes_at);
        let last_date =
            read(&lookup, "VETSCHED_LAST_DATE", parse_date)?.unwrap_or(defaults.last_date);
        let daily_capacity = read(&lookup, "VETSCHED_DAILY_CAPACITY", |s| s.parse().ok())?
            .unwrap_or(defaults.daily_capacity);
        Self::new(opens_at, closes_at, last_date, daily_capacity)
    }

    /// Latest admissible start: one appointment before closing.
    pub fn last_start(&self) -> NaiveTime {
        self.closes_at - TimeDelta::minutes(SLOT_MINUTES as i64)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let window = self.closes_at.signed_duration_since(self.opens_at);
        if window < TimeDelta::minutes(SLOT_MINUTES as i64) {
            return Err(ConfigError::WindowTooShort {
                opens_at: self.opens_at,
                closes_at: self.closes_at,
            });
        }
        if self.daily_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

fn read<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => parse(raw.trim())
            .map(Some)
            .ok_or(ConfigError::Parse { var, value: raw }),
    }
}

/// Accepts `HH:MM` and `HH:MM:SS`.
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Accepts ISO `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_clinic_rules() {
        let c = ClinicConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(c, ClinicConfig::default());
        assert_eq!(c.opens_at, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(c.last_start(), NaiveTime::from_hms_opt(15, 0, 0).unwrap());
        assert_eq!(c.last_date, NaiveDate::from_ymd_opt(2026, 3, 12).unwrap());
        assert_eq!(c.daily_capacity, 8);
    }

    #[test]
    fn env_overrides() {
        let c = ClinicConfig::from_lookup(lookup(&[
            ("VETSCHED_OPENS_AT", "09:30"),
            ("VETSCHED_CLOSES_AT", "18:00:00"),
            ("VETSCHED_LAST_DATE", "2027-12-31"),
            ("VETSCHED_DAILY_CAPACITY", "12"),
        ]))
        .unwrap();
        assert_eq!(c.opens_at, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(c.last_start(), NaiveTime::from_hms_opt(17, 0, 0).unwrap());
        assert_eq!(c.last_date, NaiveDate::from_ymd_opt(2027, 12, 31).unwrap());
        assert_eq!(c.daily_capacity, 12);
    }

    #[test]
    fn malformed_value_names_the_variable() {
        let err = ClinicConfig::from_lookup(lookup(&[("VETSCHED_LAST_DATE", "12/03/2026")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Parse {
                var: "VETSCHED_LAST_DATE",
                value: "12/03/2026".into()
            }
        );
        assert!(err.to_string().contains("VETSCHED_LAST_DATE"));
    }

    #[test]
    fn window_shorter_than_a_slot_is_rejected() {
        let err = ClinicConfig::from_lookup(lookup(&[
            ("VETSCHED_OPENS_AT", "08:00"),
            ("VETSCHED_CLOSES_AT", "08:30"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::WindowTooShort { .. }));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err =
            ClinicConfig::from_lookup(lookup(&[("VETSCHED_DAILY_CAPACITY", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::ZeroCapacity);
    }

    #[test]
    fn time_formats() {
        assert_eq!(parse_time("07:05"), NaiveTime::from_hms_opt(7, 5, 0));
        assert_eq!(parse_time("07:05:09"), NaiveTime::from_hms_opt(7, 5, 9));
        assert_eq!(parse_time("7am"), None);
    }
}
