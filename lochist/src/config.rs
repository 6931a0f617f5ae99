use crate::common::Error;
use crate::consts::{DEFAULT_DAY_GAP_HOURS, DEFAULT_RETENTION_DAYS};
use chrono::Duration;
use std::path::{Path, PathBuf};

/// Store location and retention settings, usually loaded from a RON file:
///
/// ```ron
/// (
///     path: "/var/lib/app/history",
///     retention_days: 10,
/// )
/// ```
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Directory of the sled database. Ignored when empty and `temporary` is set.
    pub path: PathBuf,
    /// Database removed when closed.
    pub temporary: bool,
    /// Active time to keep, idle gaps excluded.
    pub retention_days: i64,
    /// Pauses longer than this count as idle.
    pub day_gap_hours: i64,
    pub flush_every_append: bool,
    /// sled page cache, bytes.
    pub cache_capacity: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            path: PathBuf::from("local_history"),
            temporary: false,
            retention_days: DEFAULT_RETENTION_DAYS,
            day_gap_hours: DEFAULT_DAY_GAP_HOURS,
            flush_every_append: true,
            cache_capacity: 16 * 1024 * 1024,
        }
    }
}

impl HistoryConfig {
    pub fn at<P: AsRef<Path>>(path: P) -> Self {
        HistoryConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Store living in a throwaway location.
    pub fn temporary() -> Self {
        HistoryConfig {
            path: PathBuf::new(),
            temporary: true,
            ..Default::default()
        }
    }

    pub fn from_ron_str(s: &str) -> Result<Self, Error> {
        let config: HistoryConfig =
            ron::de::from_str(s).map_err(|e| Error::Config(format!("{e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let s = std::fs::read_to_string(path.as_ref())?;
        Self::from_ron_str(&s)
    }

    /// Rejects negative periods and periods too long to be represented.
    pub fn validate(&self) -> Result<(), Error> {
        if self.retention_days < 0 || Duration::try_days(self.retention_days).is_none() {
            return Err(Error::Config(format!(
                "retention_days out of range: {}",
                self.retention_days
            )));
        }
        if self.day_gap_hours < 0 || Duration::try_hours(self.day_gap_hours).is_none() {
            return Err(Error::Config(format!(
                "day_gap_hours out of range: {}",
                self.day_gap_hours
            )));
        }
        Ok(())
    }

    /// Saturates instead of failing, call [`HistoryConfig::validate`] to reject bad values.
    pub fn retention(&self) -> Duration {
        Duration::try_days(self.retention_days.max(0)).unwrap_or_else(Duration::max_value)
    }

    pub fn day_gap(&self) -> Duration {
        Duration::try_hours(self.day_gap_hours.max(0)).unwrap_or_else(Duration::max_value)
    }

    pub(crate) fn has_path(&self) -> bool {
        !self.path.as_os_str().is_empty()
    }

    pub(crate) fn sled_config(&self) -> sled::Config {
        let config = sled::Config::new()
            .temporary(self.temporary)
            .cache_capacity(self.cache_capacity);
        if self.has_path() {
            config.path(&self.path)
        } else {
            config
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HistoryConfig;
    use chrono::Duration;

    #[test]
    fn partial_ron_keeps_defaults() {
        let config = HistoryConfig::from_ron_str("(path: \"/tmp/h\", retention_days: 2)").unwrap();
        assert_eq!(config.path.to_str(), Some("/tmp/h"));
        assert_eq!(config.retention(), Duration::days(2));
        assert_eq!(config.day_gap(), Duration::hours(12));
        assert!(config.flush_every_append);
    }

    #[test]
    fn bad_ron_is_a_config_error() {
        let err = HistoryConfig::from_ron_str("(retention_days: \"many\")").unwrap_err();
        assert!(err.to_string().starts_with("config:"));
    }

    #[test]
    fn out_of_range_periods_are_rejected() {
        for ron in [
            "(retention_days: 200000000000000)",
            "(retention_days: -1)",
            "(day_gap_hours: -3)",
            "(day_gap_hours: 9223372036854775807)",
        ] {
            let err = HistoryConfig::from_ron_str(ron).unwrap_err();
            assert!(err.to_string().contains("out of range"), "{ron}: {err}");
        }
        let huge = HistoryConfig {
            retention_days: i64::MAX,
            day_gap_hours: -5,
            ..HistoryConfig::temporary()
        };
        assert!(huge.validate().is_err());
        assert_eq!(huge.retention(), Duration::max_value());
        assert_eq!(huge.day_gap(), Duration::zero());
    }
}
