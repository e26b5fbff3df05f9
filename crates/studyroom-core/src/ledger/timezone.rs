//! Per-user timezone used to key ledgers by local calendar date.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// An IANA timezone supplied by the user's client.
///
/// Anything absent or unparseable resolves to UTC; the original string is
/// not kept in that case so a bad value cannot survive a save/load cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct UserTimezone {
    tz: Tz,
}

impl UserTimezone {
    pub fn utc() -> Self {
        Self { tz: Tz::UTC }
    }

    /// Resolve a client-supplied timezone name, falling back to UTC.
    pub fn resolve(name: Option<&str>) -> Self {
        let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
            return Self::utc();
        };
        match name.parse::<Tz>() {
            Ok(tz) => Self { tz },
            Err(_) => {
                tracing::warn!(timezone = name, "invalid timezone, falling back to UTC");
                Self::utc()
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.tz.name()
    }

    /// Calendar date of `now` in this timezone.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    /// The instant local `date` begins.
    ///
    /// Zones whose midnight falls into a DST gap start the day at the first
    /// valid hour after it.
    pub fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        let first_valid = (0..4u32).find_map(|hour| {
            let time = NaiveTime::from_hms_opt(hour, 0, 0)?;
            self.tz.from_local_datetime(&date.and_time(time)).earliest()
        });
        match first_valid {
            Some(local) => local.with_timezone(&Utc),
            None => date.and_time(NaiveTime::MIN).and_utc(),
        }
    }

    /// The last whole second belonging to local `date`.
    pub fn end_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        let next = date.succ_opt().unwrap_or(date);
        self.start_of_day(next) - chrono::Duration::seconds(1)
    }
}

impl Default for UserTimezone {
    fn default() -> Self {
        Self::utc()
    }
}

impl From<String> for UserTimezone {
    fn from(name: String) -> Self {
        Self::resolve(Some(&name))
    }
}

impl From<UserTimezone> for String {
    fn from(tz: UserTimezone) -> Self {
        tz.name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn invalid_or_missing_names_fall_back_to_utc() {
        assert_eq!(UserTimezone::resolve(None).name(), "UTC");
        assert_eq!(UserTimezone::resolve(Some("")).name(), "UTC");
        assert_eq!(UserTimezone::resolve(Some("Mars/Olympus")).name(), "UTC");
    }

    #[test]
    fn local_date_follows_the_zone() {
        let tokyo = UserTimezone::resolve(Some("Asia/Tokyo"));
        let instant = at("2024-03-01T16:30:00Z");
        assert_eq!(tokyo.local_date(instant), NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert_eq!(
            UserTimezone::utc().local_date(instant),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
    }

    #[test]
    fn day_bounds_are_in_local_time() {
        let ny = UserTimezone::resolve(Some("America/New_York"));
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(ny.start_of_day(date), at("2024-01-15T05:00:00Z"));
        assert_eq!(ny.end_of_day(date), at("2024-01-16T04:59:59Z"));
    }

    #[test]
    fn serializes_as_iana_name() {
        let tz = UserTimezone::resolve(Some("Europe/Paris"));
        assert_eq!(serde_json::to_string(&tz).unwrap(), "\"Europe/Paris\"");
        let back: UserTimezone = serde_json::from_str("\"not-a-zone\"").unwrap();
        assert_eq!(back, UserTimezone::utc());
    }
}
