use chrono::{DateTime, Duration, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use talent_board::workflows::pipeline::{CandidateRow, InMemoryCandidateStore, Stage};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

struct DemoCandidate {
    id: &'static str,
    name: &'static str,
    position: &'static str,
    source: &'static str,
    stage: Stage,
    age_hours: i64,
    score: Option<f32>,
    reason: Option<&'static str>,
}

const DEMO_CANDIDATES: &[DemoCandidate] = &[
    DemoCandidate {
        id: "cand-1001",
        name: "Maya Okafor",
        position: "pos-platform-eng",
        source: "job_board",
        stage: Stage::NewApplication,
        age_hours: 2,
        score: None,
        reason: None,
    },
    DemoCandidate {
        id: "cand-1002",
        name: "Lucas Brandt",
        position: "pos-platform-eng",
        source: "referral",
        stage: Stage::Scoring,
        age_hours: 5,
        score: None,
        reason: None,
    },
    DemoCandidate {
        id: "cand-1003",
        name: "Priya Raman",
        position: "pos-data-analyst",
        source: "job_board",
        stage: Stage::Review,
        age_hours: 26,
        score: Some(8.4),
        reason: None,
    },
    DemoCandidate {
        id: "cand-1004",
        name: "Tomás Ferreira",
        position: "pos-platform-eng",
        source: "resume_upload",
        stage: Stage::Interview,
        age_hours: 72,
        score: Some(7.1),
        reason: None,
    },
    DemoCandidate {
        id: "cand-1005",
        name: "Hannah Lee",
        position: "pos-data-analyst",
        source: "referral",
        stage: Stage::Offer,
        age_hours: 140,
        score: Some(9.0),
        reason: None,
    },
    DemoCandidate {
        id: "cand-0901",
        name: "Omar Haddad",
        position: "pos-platform-eng",
        source: "job_board",
        stage: Stage::Approved,
        age_hours: 400,
        score: Some(8.8),
        reason: None,
    },
    DemoCandidate {
        id: "cand-0902",
        name: "Elena Petrova",
        position: "pos-data-analyst",
        source: "job_board",
        stage: Stage::Rejected,
        age_hours: 300,
        score: Some(4.2),
        reason: Some("Score below automatic threshold"),
    },
    DemoCandidate {
        id: "cand-0903",
        name: "Kwame Mensah",
        position: "pos-platform-eng",
        source: "resume_upload",
        stage: Stage::TalentPool,
        age_hours: 250,
        score: Some(6.9),
        reason: Some("Strong fit for the Q3 opening"),
    },
];

/// Rows the demo store starts with, created relative to `now`.
pub(crate) fn demo_rows(now: DateTime<Utc>) -> Vec<CandidateRow> {
    DEMO_CANDIDATES
        .iter()
        .map(|demo| {
            let created_at = now - Duration::hours(demo.age_hours);
            let ai_analysis = demo.score.map(|score| {
                json!({
                    "score": score,
                    "recommendation": if score >= 6.5 { "hire" } else { "no_hire" },
                    "reasoning": "Rubric evaluation of resume against the role profile",
                    "analyzed_at": created_at + Duration::hours(1),
                })
            });
            let (rejection_reason, talent_pool_reason) = match demo.stage {
                Stage::Rejected => (demo.reason.map(str::to_string), None),
                Stage::TalentPool => (None, demo.reason.map(str::to_string)),
                _ => (None, None),
            };

            CandidateRow {
                id: demo.id.to_string(),
                name: Some(demo.name.to_string()),
                email: Some(format!("{}@example.com", demo.id)),
                position_id: Some(demo.position.to_string()),
                source: Some(demo.source.to_string()),
                stage: Some(demo.stage.key().to_string()),
                ai_analysis,
                rejection_reason,
                talent_pool_reason,
                created_at: Some(created_at),
                updated_at: Some(created_at),
                ..CandidateRow::default()
            }
        })
        .collect()
}

pub(crate) fn demo_store(with_rows: bool) -> InMemoryCandidateStore {
    let store = InMemoryCandidateStore::new();
    if with_rows {
        store.seed(demo_rows(Utc::now()));
    }
    store
}
