use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer};

use super::domain::Candidate;
use super::normalizer::{normalize_row, NormalizeError};
use super::store::CandidateRow;

/// Failures reading the fallback active set.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("failed to read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid seed CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("seed row {line} is invalid: {source}")]
    Row {
        line: usize,
        #[source]
        source: NormalizeError,
    },
}

pub fn load_seed_file(path: impl AsRef<Path>) -> Result<Vec<Candidate>, SeedError> {
    let file = File::open(path)?;
    parse_seed(file)
}

/// Reads seed candidates from CSV. Rows in terminal stages are ignored because the
/// seed only stands in for the active set.
pub fn parse_seed<R: Read>(reader: R) -> Result<Vec<Candidate>, SeedError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut candidates = Vec::new();

    for (index, record) in csv_reader.deserialize::<SeedRow>().enumerate() {
        let row = record?;
        let candidate = normalize_row(row.into_candidate_row())
            .map_err(|source| SeedError::Row {
                line: index + 2,
                source,
            })?;
        if !candidate.is_terminal() {
            candidates.push(candidate);
        }
    }

    Ok(candidates)
}

#[derive(Debug, Deserialize)]
struct SeedRow {
    id: String,
    name: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    email: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    phone: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    position_id: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    source: Option<String>,
    stage: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    created_at: Option<String>,
}

impl SeedRow {
    fn into_candidate_row(self) -> CandidateRow {
        let created_at = self.created_at.as_deref().and_then(parse_timestamp);
        CandidateRow {
            id: self.id,
            name: Some(self.name),
            email: self.email,
            phone: self.phone,
            position_id: self.position_id,
            source: self.source,
            stage: Some(self.stage),
            created_at,
            updated_at: created_at,
            ..CandidateRow::default()
        }
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
