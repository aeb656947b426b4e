use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use tracing::info;

use crate::browser::Session;
use crate::parser::MovieRecord;

/// `YYYYMMDD_HHMMSS_micros`, shared by every artifact of one run.
pub fn file_stamp(at: &DateTime<Local>) -> String {
    at.format("%Y%m%d_%H%M%S_%6f").to_string()
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))
}

/// Writes each batch to `<dir>/movies_<stamp>.json`.
#[derive(Debug, Clone)]
pub struct JsonArchiver {
    dir: PathBuf,
}

impl JsonArchiver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn archive(&self, batch: &[MovieRecord], at: &DateTime<Local>) -> Result<PathBuf> {
        ensure_dir(&self.dir)?;
        let path = self.dir.join(format!("movies_{}.json", file_stamp(at)));

        let mut buf = Vec::new();
        let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        batch.serialize(&mut ser)?;

        fs::write(&path, buf).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Archived {} records to {}", batch.len(), path.display());
        Ok(path)
    }
}

/// Saves what the browser currently shows to `<dir>/screenshot_<stamp>.png`.
#[derive(Debug, Clone)]
pub struct Snapshotter {
    dir: PathBuf,
}

impl Snapshotter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub async fn snapshot<S: Session + ?Sized>(
        &self,
        session: &mut S,
        at: &DateTime<Local>,
    ) -> Result<PathBuf> {
        let png = session.screenshot().await.context("Screenshot capture failed")?;

        ensure_dir(&self.dir)?;
        let path = self.dir.join(format!("screenshot_{}.png", file_stamp(at)));
        fs::write(&path, png).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Saved screenshot to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::browser::testing::FakeSession;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap()
            + chrono::Duration::microseconds(42)
    }

    fn movie(title: &str, rating: &str) -> MovieRecord {
        MovieRecord {
            title: title.into(),
            year: "1994".into(),
            duration: "2h 22m".into(),
            placement: "R".into(),
            rating: rating.into(),
        }
    }

    #[test]
    fn stamp_has_microseconds() {
        assert_eq!(file_stamp(&at()), "20240309_070501_000042");
    }

    #[test]
    fn archive_reads_back_identically() {
        let tmp = tempfile::tempdir().unwrap();
        let archiver = JsonArchiver::new(tmp.path().join("json"));
        let batch = vec![movie("A", "9.3"), movie("B \"quoted\"", "9.2"), movie("C", "9.0")];

        let path = archiver.archive(&batch, &at()).unwrap();
        assert_eq!(path.file_name().unwrap(), "movies_20240309_070501_000042.json");

        let text = fs::read_to_string(&path).unwrap();
        let back: Vec<MovieRecord> = serde_json::from_str(&text).unwrap();
        assert_eq!(back, batch);
    }

    #[test]
    fn archive_layout_is_indented_and_ordered() {
        let tmp = tempfile::tempdir().unwrap();
        let path = JsonArchiver::new(tmp.path())
            .archive(&[movie("A", "9.3")], &at())
            .unwrap();
        let text = fs::read_to_string(path).unwrap();

        assert!(text.starts_with("[\n    {\n        \"title\": \"A\","));
        let order: Vec<usize> = ["title", "year", "duration", "placement", "rating"]
            .iter()
            .map(|k| text.find(&format!("\"{}\"", k)).unwrap())
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn empty_batch_is_an_empty_array() {
        let tmp = tempfile::tempdir().unwrap();
        let path = JsonArchiver::new(tmp.path()).archive(&[], &at()).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "[]");
    }

    #[tokio::test]
    async fn snapshot_writes_png() {
        let tmp = tempfile::tempdir().unwrap();
        let mut session = FakeSession::default();

        let path = Snapshotter::new(tmp.path().join("shots"))
            .snapshot(&mut session, &at())
            .await
            .unwrap();

        assert_eq!(path.file_name().unwrap(), "screenshot_20240309_070501_000042.png");
        assert!(fs::read(path).unwrap().starts_with(b"\x89PNG"));
    }

    #[tokio::test]
    async fn failed_capture_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut session = FakeSession {
            fail_screenshot: true,
            ..FakeSession::default()
        };

        let result = Snapshotter::new(tmp.path().join("shots"))
            .snapshot(&mut session, &at())
            .await;
        assert!(result.is_err());
        assert!(!tmp.path().join("shots").exists());
    }
}
