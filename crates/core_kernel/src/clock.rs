//! Time handling for the ledger
//!
//! All timestamps (`created_at`, `approved_at`, `paid_at`) and "today"
//! resolution go through the [`Clock`] trait so tests can run against a
//! fixed instant. The reconciliation report works in the clinic's local
//! calendar day; [`ClinicTimezone`] resolves that day to a UTC interval.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use std::sync::Mutex;

/// Source of the current instant
///
/// Injected into every service that stamps or compares times, so behavior
/// is deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Today's date in the given clinic timezone
    fn today(&self, tz: &ClinicTimezone) -> NaiveDate {
        self.now().with_timezone(&tz.0).date_naive()
    }
}

/// Wall-clock implementation used in production
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to a fixed instant, settable from tests
#[derive(Debug)]
pub struct FixedClock {
    instant: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            instant: Mutex::new(instant),
        }
    }

    /// Moves the clock to a new instant
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.instant.lock().expect("clock lock poisoned") = instant;
    }

    /// Advances the clock by a duration
    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.instant.lock().expect("clock lock poisoned");
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.lock().expect("clock lock poisoned")
    }
}

/// Timezone of the clinic whose books are being kept
///
/// Wraps chrono_tz::Tz with custom serialization support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClinicTimezone(pub Tz);

impl Serialize for ClinicTimezone {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0.name())
    }
}

impl<'de> Deserialize<'de> for ClinicTimezone {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Tz::from_str(&s)
            .map(ClinicTimezone)
            .map_err(|_| serde::de::Error::custom(format!("Invalid timezone: {}", s)))
    }
}

impl ClinicTimezone {
    pub fn new(tz: Tz) -> Self {
        Self(tz)
    }

    /// Converts a UTC datetime to the clinic's local time
    pub fn to_local(&self, utc: DateTime<Utc>) -> DateTime<Tz> {
        utc.with_timezone(&self.0)
    }

    /// Resolves a clinic-local calendar day to the half-open UTC interval
    /// `[start, end)` it covers
    ///
    /// Around DST transitions local midnight may not exist or may be
    /// ambiguous; the earliest valid instant is taken in both cases.
    pub fn day_bounds(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.local_day_start(date);
        let next = date.succ_opt().unwrap_or(date);
        let end = self.local_day_start(next);
        (start, end)
    }

    fn local_day_start(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_time(NaiveTime::MIN);
        match self.0.from_local_datetime(&midnight).earliest() {
            Some(dt) => dt.with_timezone(&Utc),
            // Midnight falls inside a DST gap; step forward to the first
            // representable local time that day.
            None => {
                let mut probe = midnight;
                loop {
                    probe += chrono::Duration::minutes(30);
                    if let Some(dt) = self.0.from_local_datetime(&probe).earliest() {
                        return dt.with_timezone(&Utc);
                    }
                }
            }
        }
    }
}

impl Default for ClinicTimezone {
    fn default() -> Self {
        Self(chrono_tz::UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn instant(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_fixed_clock_set_and_advance() {
        let clock = FixedClock::at(instant("2025-03-10T12:00:00Z"));
        assert_eq!(clock.now(), instant("2025-03-10T12:00:00Z"));

        clock.advance(Duration::hours(2));
        assert_eq!(clock.now(), instant("2025-03-10T14:00:00Z"));

        clock.set(instant("2025-04-01T00:00:00Z"));
        assert_eq!(clock.now(), instant("2025-04-01T00:00:00Z"));
    }

    #[test]
    fn test_day_bounds_kolkata() {
        let tz = ClinicTimezone::new(chrono_tz::Asia::Kolkata);
        let (start, end) = tz.day_bounds(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());

        // IST is UTC+5:30 year round
        assert_eq!(start, instant("2025-03-09T18:30:00Z"));
        assert_eq!(end, instant("2025-03-10T18:30:00Z"));
    }

    #[test]
    fn test_today_in_clinic_timezone() {
        // 20:00 UTC is already the next day in Kolkata
        let clock = FixedClock::at(instant("2025-03-10T20:00:00Z"));
        let tz = ClinicTimezone::new(chrono_tz::Asia::Kolkata);
        assert_eq!(
            clock.today(&tz),
            NaiveDate::from_ymd_opt(2025, 3, 11).unwrap()
        );
    }

    #[test]
    fn test_timezone_serde_round_trip() {
        let tz = ClinicTimezone::new(chrono_tz::Asia::Kolkata);
        let json = serde_json::to_string(&tz).unwrap();
        assert_eq!(json, "\"Asia/Kolkata\"");
        let back: ClinicTimezone = serde_json::from_str(&json).unwrap();
        assert_eq!(tz, back);
    }
}
