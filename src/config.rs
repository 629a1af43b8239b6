use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;

use crate::engine::EngineOptions;

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_UTC_OFFSET_HOURS: i32 = 7;
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2000;
const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

const WAL_FILE_NAME: &str = "roomkeep.wal";

/// Process configuration, read from `ROOMKEEP_*` environment variables.
/// Missing or unparsable values fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub utc_offset_hours: i32,
    pub lock_timeout: Duration,
    /// Appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            utc_offset_hours: DEFAULT_UTC_OFFSET_HOURS,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let utc_offset_hours = lookup("ROOMKEEP_UTC_OFFSET_HOURS")
            .and_then(|s| s.trim().parse::<i32>().ok())
            .filter(|h| (-23..=23).contains(h))
            .unwrap_or(defaults.utc_offset_hours);
        Self {
            data_dir: lookup("ROOMKEEP_DATA_DIR")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            utc_offset_hours,
            lock_timeout: lookup("ROOMKEEP_LOCK_TIMEOUT_MS")
                .and_then(|s| s.trim().parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            compact_threshold: lookup("ROOMKEEP_COMPACT_THRESHOLD")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.compact_threshold),
        }
    }

    /// The property time zone.
    pub fn zone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| EngineOptions::default().zone)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            zone: self.zone(),
            lock_timeout: self.lock_timeout,
        }
    }
}
