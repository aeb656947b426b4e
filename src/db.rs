use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

use crate::parser::MovieRecord;

/// The `movies` table. Every run appends; nothing is deduplicated.
#[derive(Debug, Clone)]
pub struct MovieStore {
    path: PathBuf,
}

impl MovieStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(conn)
    }

    pub fn ensure_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS movies (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                title     TEXT,
                year      TEXT,
                duration  TEXT,
                placement TEXT,
                rating    TEXT
            );
            ",
        )?;
        Ok(())
    }

    /// Insert the whole batch in one transaction. Any failed insert drops the
    /// transaction, so either every row lands or none does.
    pub fn write(&self, batch: &[MovieRecord]) -> Result<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO movies (title, year, duration, placement, rating)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for m in batch {
                count += stmt.execute(rusqlite::params![
                    m.title, m.year, m.duration, m.placement, m.rating,
                ])?;
            }
        }
        tx.commit()?;
        info!("Stored {} rows in {}", count, self.path.display());
        Ok(count)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.connect()?;
        let n: usize = conn.query_row("SELECT COUNT(*) FROM movies", [], |r| r.get(0))?;
        Ok(n)
    }

    /// Most recently inserted rows first.
    pub fn recent(&self, limit: usize) -> Result<Vec<(i64, MovieRecord)>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, COALESCE(title,''), COALESCE(year,''), COALESCE(duration,''),
                    COALESCE(placement,''), COALESCE(rating,'')
             FROM movies
             ORDER BY id DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get(0)?,
                    MovieRecord {
                        title: row.get(1)?,
                        year: row.get(2)?,
                        duration: row.get(3)?,
                        placement: row.get(4)?,
                        rating: row.get(5)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
