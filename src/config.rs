use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

pub const TARGET_URL: &str = "https://www.imdb.com/chart/top/?ref_=nv_mv_250";
pub const ROW_SELECTOR: &str = ".ipc-metadata-list-summary-item";

pub const INTERVAL_ENV: &str = "MINUTE_INTERVAL";
pub const DEFAULT_INTERVAL_MINUTES: u64 = 60;

pub const ARCHIVE_DIR: &str = "json";
pub const SNAPSHOT_DIR: &str = "screenshots";
pub const LOG_DIR: &str = "logs";
pub const DB_PATH: &str = "movies.db";

/// Everything a crawler process needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    pub interval_minutes: u64,
    pub archive_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub db_path: PathBuf,
    pub headless: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: TARGET_URL.to_string(),
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            archive_dir: ARCHIVE_DIR.into(),
            snapshot_dir: SNAPSHOT_DIR.into(),
            db_path: DB_PATH.into(),
            headless: true,
        }
    }
}

impl Config {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

/// Load `.env` if one exists. Variables already set in the process win.
///
/// Runs before logging is up, so a read failure is handed back for the
/// caller to log once it can.
pub fn load_dotenv() -> Option<dotenvy::Error> {
    match dotenvy::dotenv() {
        Err(e) if !e.not_found() => Some(e),
        _ => None,
    }
}

/// Resolve the poll interval: explicit flag, then `MINUTE_INTERVAL`, then 60.
pub fn resolve_interval(flag: Option<u64>) -> u64 {
    if let Some(minutes) = flag.filter(|m| *m > 0) {
        return minutes;
    }
    let raw = std::env::var(INTERVAL_ENV).ok();
    parse_interval(raw.as_deref())
}

/// Unset, empty, non-numeric, negative and zero values all fall back to the default.
pub fn parse_interval(raw: Option<&str>) -> u64 {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return DEFAULT_INTERVAL_MINUTES;
    };
    match raw.parse::<u64>() {
        Ok(0) | Err(_) => {
            warn!(
                "{}={:?} is not a positive number of minutes, using {}",
                INTERVAL_ENV, raw, DEFAULT_INTERVAL_MINUTES
            );
            DEFAULT_INTERVAL_MINUTES
        }
        Ok(minutes) => minutes,
    }
}
