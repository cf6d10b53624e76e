use std::collections::HashSet;

use chrono::Utc;
use tracing::warn;

use super::domain::{
    AiAnalysis, Candidate, CandidateId, CandidateSource, InterviewRecord, PositionId,
    ResumeReference, UnknownStage,
};
use super::store::CandidateRow;

/// Reasons a remote row cannot become a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("candidate row is missing an id")]
    MissingId,
    #[error("candidate {0} has no stage")]
    MissingStage(String),
    #[error(transparent)]
    UnknownStage(#[from] UnknownStage),
}

/// Turns a remote row into a cache entry, filling defaults for partial payloads.
pub fn normalize_row(row: CandidateRow) -> Result<Candidate, NormalizeError> {
    let id = row.id.trim().to_string();
    if id.is_empty() {
        return Err(NormalizeError::MissingId);
    }

    let stage = match row.stage.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => raw.parse()?,
        _ => return Err(NormalizeError::MissingStage(id)),
    };

    let created_at = row
        .created_at
        .or(row.updated_at)
        .unwrap_or_else(Utc::now);
    let updated_at = row.updated_at.unwrap_or(created_at);

    let ai_analysis = match row.ai_analysis {
        None | Some(serde_json::Value::Null) => None,
        Some(value) => match serde_json::from_value::<AiAnalysis>(value) {
            Ok(analysis) => Some(analysis),
            Err(err) => {
                warn!(candidate_id = %id, error = %err, "discarding unreadable analysis payload");
                None
            }
        },
    };

    let source = row
        .source
        .as_deref()
        .and_then(CandidateSource::from_key)
        .unwrap_or_default();

    let resume = non_blank(row.resume_file_name).map(|file_name| ResumeReference {
        file_name,
        storage_path: non_blank(row.resume_storage_path),
    });

    Ok(Candidate {
        id: CandidateId(id),
        name: row.name.map(|name| name.trim().to_string()).unwrap_or_default(),
        email: row
            .email
            .map(|email| email.trim().to_string())
            .unwrap_or_default(),
        phone: non_blank(row.phone),
        position_id: non_blank(row.position_id).map(PositionId),
        resume,
        source,
        stage,
        ai_analysis,
        notes: row.notes.unwrap_or_default(),
        interviews: dedupe_interviews(row.interviews.unwrap_or_default()),
        rejection_reason: non_blank(row.rejection_reason),
        talent_pool_reason: non_blank(row.talent_pool_reason),
        created_at,
        updated_at,
    })
}

/// Collapses repeated interview ids, keeping the first occurrence.
pub fn dedupe_interviews(interviews: Vec<InterviewRecord>) -> Vec<InterviewRecord> {
    let mut seen = HashSet::new();
    interviews
        .into_iter()
        .filter(|interview| seen.insert(interview.id.clone()))
        .collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|trimmed| !trimmed.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::pipeline::domain::{InterviewStatus, Recommendation, Stage};
    use chrono::TimeZone;
    use serde_json::json;

    fn interview(id: &str, hour: u32) -> InterviewRecord {
        InterviewRecord {
            id: id.to_string(),
            scheduled_at: Utc.with_ymd_and_hms(2025, 3, 4, hour, 0, 0).unwrap(),
            interviewer: None,
            meeting_link: None,
            status: InterviewStatus::Scheduled,
        }
    }

    #[test]
    fn fills_defaults_for_sparse_rows() {
        let updated = Utc.with_ymd_and_hms(2025, 2, 1, 9, 30, 0).unwrap();
        let row = CandidateRow {
            id: " cand-1 ".to_string(),
            stage: Some("review".to_string()),
            updated_at: Some(updated),
            rejection_reason: Some("   ".to_string()),
            ..CandidateRow::default()
        };

        let candidate = normalize_row(row).expect("row normalizes");
        assert_eq!(candidate.id, CandidateId::new("cand-1"));
        assert_eq!(candidate.stage, Stage::Review);
        assert_eq!(candidate.created_at, updated);
        assert_eq!(candidate.updated_at, updated);
        assert!(candidate.notes.is_empty());
        assert!(candidate.interviews.is_empty());
        assert_eq!(candidate.rejection_reason, None);
        assert_eq!(candidate.source, CandidateSource::Manual);
    }

    #[test]
    fn collapses_duplicate_interviews_keeping_first() {
        let row = CandidateRow {
            id: "cand-2".to_string(),
            stage: Some("interview".to_string()),
            interviews: Some(vec![
                interview("int-1", 9),
                interview("int-2", 11),
                interview("int-1", 15),
            ]),
            ..CandidateRow::default()
        };

        let candidate = normalize_row(row).expect("row normalizes");
        assert_eq!(candidate.interviews.len(), 2);
        assert_eq!(candidate.interviews[0].scheduled_at.format("%H").to_string(), "09");
    }

    #[test]
    fn rejects_rows_without_a_usable_stage() {
        let missing = CandidateRow {
            id: "cand-3".to_string(),
            ..CandidateRow::default()
        };
        assert_eq!(
            normalize_row(missing),
            Err(NormalizeError::MissingStage("cand-3".to_string()))
        );

        let unknown = CandidateRow {
            id: "cand-3".to_string(),
            stage: Some("archived".to_string()),
            ..CandidateRow::default()
        };
        assert!(matches!(
            normalize_row(unknown),
            Err(NormalizeError::UnknownStage(_))
        ));

        let blank_id = CandidateRow {
            id: "  ".to_string(),
            stage: Some("review".to_string()),
            ..CandidateRow::default()
        };
        assert_eq!(normalize_row(blank_id), Err(NormalizeError::MissingId));
    }

    #[test]
    fn parses_analysis_blobs_and_drops_garbage() {
        let mut row = CandidateRow {
            id: "cand-4".to_string(),
            stage: Some("scoring".to_string()),
            ai_analysis: Some(json!({
                "score": 7.25,
                "recommendation": "hire",
                "analyzed_at": "2025-03-01T12:00:00Z"
            })),
            ..CandidateRow::default()
        };

        let candidate = normalize_row(row.clone()).expect("row normalizes");
        let analysis = candidate.ai_analysis.expect("analysis parsed");
        assert_eq!(analysis.recommendation, Recommendation::Hire);
        assert!(analysis.sub_scores.is_empty());

        row.ai_analysis = Some(json!({ "status": "pending" }));
        let candidate = normalize_row(row).expect("row normalizes");
        assert!(candidate.ai_analysis.is_none());
    }
}
