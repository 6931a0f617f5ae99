use chrono::{DateTime, Duration, TimeZone, Utc};
use rkyv::{Archive, Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// UTC milliseconds since the unix epoch.
#[derive(
    Archive,
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const fn from_millis(millis: i64) -> Self {
        Timestamp(millis)
    }

    pub fn now() -> Self {
        Utc::now().into()
    }

    /// Time elapsed from `earlier` to self, negative if `earlier` is actually later.
    pub fn since(&self, earlier: Timestamp) -> Duration {
        Duration::milliseconds(self.0.saturating_sub(earlier.0))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Timestamp(dt.timestamp_millis())
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(ts: Timestamp) -> Self {
        Utc.timestamp_millis_opt(ts.0).single().unwrap_or_default()
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let dt: DateTime<Utc> = (*self).into();
        write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

#[cfg(test)]
mod tests {
    use super::Timestamp;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    #[test]
    fn chrono_conversions() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 31, 1, 30, 0).unwrap();
        let ts = Timestamp::from(dt);
        assert_eq!(DateTime::<Utc>::from(ts), dt);
        assert_eq!(ts.to_string(), "2024-03-31 01:30:00.000");
    }

    #[test]
    fn since_is_signed() {
        let a = Timestamp::from_millis(1_000);
        let b = Timestamp::from_millis(4_000);
        assert_eq!(b.since(a), Duration::seconds(3));
        assert_eq!(a.since(b), Duration::seconds(-3));
    }
}
