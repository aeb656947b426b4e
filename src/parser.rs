use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::browser::RawRow;

/// Separator between the ordinal prefix and the title on a row's first line.
const TITLE_SEPARATOR: &str = ". ";

/// One ranked entry. Every field is the raw text shown on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub title: String,
    pub year: String,
    pub duration: String,
    pub placement: String,
    pub rating: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowParseError {
    #[error("expected at least 5 lines, found {found}")]
    TooFewSegments { found: usize },
    #[error("first line {line:?} has no \". \" after the rank")]
    MissingTitleSeparator { line: String },
}

/// Split a row's text on line breaks and map lines 0..5 positionally.
///
/// Lines past the fifth (vote counts, buttons) are ignored. No field is
/// checked for meaning, only for presence.
pub fn parse_row(text: &str) -> Result<MovieRecord, RowParseError> {
    let lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();
    let [first, year, duration, placement, rating, ..] = lines.as_slice() else {
        return Err(RowParseError::TooFewSegments { found: lines.len() });
    };

    let (_, title) = first.split_once(TITLE_SEPARATOR).ok_or_else(|| {
        RowParseError::MissingTitleSeparator {
            line: first.to_string(),
        }
    })?;

    Ok(MovieRecord {
        title: title.to_string(),
        year: year.to_string(),
        duration: duration.to_string(),
        placement: placement.to_string(),
        rating: rating.to_string(),
    })
}

/// Rows that parsed, plus the ones that did not.
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub records: Vec<MovieRecord>,
    pub rejected: Vec<(usize, RowParseError)>,
}

pub fn parse_rows(rows: &[RawRow]) -> ParsedBatch {
    let mut batch = ParsedBatch::default();
    for row in rows {
        match parse_row(&row.text) {
            Ok(record) => batch.records.push(record),
            Err(e) => batch.rejected.push((row.index, e)),
        }
    }
    batch
}
