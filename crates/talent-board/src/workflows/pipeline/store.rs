use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::domain::{Candidate, CandidateNote, InterviewRecord, Stage};

/// Row layout of the remote candidate table. Everything except `id` may be absent
/// in change-feed payloads, so the normalizer decides the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRow {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub position_id: Option<String>,
    #[serde(default)]
    pub resume_file_name: Option<String>,
    #[serde(default)]
    pub resume_storage_path: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub ai_analysis: Option<serde_json::Value>,
    #[serde(default)]
    pub notes: Option<Vec<CandidateNote>>,
    #[serde(default)]
    pub interviews: Option<Vec<InterviewRecord>>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub talent_pool_reason: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CandidateRow {
    /// Parsed stage, if the row carries a recognizable one.
    pub fn parsed_stage(&self) -> Option<Stage> {
        self.stage.as_deref().and_then(|raw| raw.parse().ok())
    }

    /// Applies a partial update the way the remote table would.
    pub fn apply_patch(&mut self, patch: &CandidatePatch, now: DateTime<Utc>) {
        if let Some(stage) = patch.stage {
            self.stage = Some(stage.key().to_string());
        }
        if let Some(reason) = &patch.rejection_reason {
            self.rejection_reason = Some(reason.clone());
        }
        if let Some(reason) = &patch.talent_pool_reason {
            self.talent_pool_reason = Some(reason.clone());
        }
        if patch.touch_updated_at {
            self.updated_at = Some(now);
        }
    }
}

impl From<&Candidate> for CandidateRow {
    fn from(candidate: &Candidate) -> Self {
        Self {
            id: candidate.id.0.clone(),
            name: Some(candidate.name.clone()),
            email: Some(candidate.email.clone()),
            phone: candidate.phone.clone(),
            position_id: candidate.position_id.as_ref().map(|id| id.0.clone()),
            resume_file_name: candidate
                .resume
                .as_ref()
                .map(|resume| resume.file_name.clone()),
            resume_storage_path: candidate
                .resume
                .as_ref()
                .and_then(|resume| resume.storage_path.clone()),
            source: serde_json::to_value(candidate.source)
                .ok()
                .and_then(|value| value.as_str().map(str::to_string)),
            stage: Some(candidate.stage.key().to_string()),
            ai_analysis: candidate
                .ai_analysis
                .as_ref()
                .and_then(|analysis| serde_json::to_value(analysis).ok()),
            notes: Some(candidate.notes.clone()),
            interviews: Some(candidate.interviews.clone()),
            rejection_reason: candidate.rejection_reason.clone(),
            talent_pool_reason: candidate.talent_pool_reason.clone(),
            created_at: Some(candidate.created_at),
            updated_at: Some(candidate.updated_at),
        }
    }
}

/// Row predicate understood by the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateFilter {
    All,
    InStage(Stage),
    NotInStages(Vec<Stage>),
}

impl CandidateFilter {
    /// Every candidate whose stage is not terminal.
    pub fn active() -> Self {
        Self::NotInStages(Stage::terminal().to_vec())
    }

    pub fn matches(&self, row: &CandidateRow) -> bool {
        match self {
            CandidateFilter::All => true,
            CandidateFilter::InStage(stage) => row.parsed_stage() == Some(*stage),
            CandidateFilter::NotInStages(excluded) => row
                .parsed_stage()
                .map(|stage| !excluded.contains(&stage))
                .unwrap_or(false),
        }
    }
}

/// Partial update sent when a candidate changes stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub talent_pool_reason: Option<String>,
    /// Ask the store to stamp `updated_at` with its own clock.
    pub touch_updated_at: bool,
}

impl CandidatePatch {
    pub fn stage_change(stage: Stage, reason: Option<String>) -> Self {
        let (rejection_reason, talent_pool_reason) = match stage {
            Stage::Rejected => (reason, None),
            Stage::TalentPool => (None, reason),
            _ => (None, None),
        };

        Self {
            stage: Some(stage),
            rejection_reason,
            talent_pool_reason,
            touch_updated_at: true,
        }
    }
}

/// Ordered notification emitted by the remote table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum ChangeEvent {
    Insert {
        new: CandidateRow,
    },
    Update {
        #[serde(default)]
        old: Option<CandidateRow>,
        new: CandidateRow,
    },
    Delete {
        old: CandidateRow,
    },
}

impl ChangeEvent {
    pub fn candidate_id(&self) -> &str {
        match self {
            ChangeEvent::Insert { new } | ChangeEvent::Update { new, .. } => &new.id,
            ChangeEvent::Delete { old } => &old.id,
        }
    }

    pub const fn operation(&self) -> &'static str {
        match self {
            ChangeEvent::Insert { .. } => "insert",
            ChangeEvent::Update { .. } => "update",
            ChangeEvent::Delete { .. } => "delete",
        }
    }
}

/// Receiving half of a change-feed subscription. Events queue up until consumed.
pub type ChangeFeed = mpsc::UnboundedReceiver<ChangeEvent>;

/// Remote candidate table consumed by the engine.
#[async_trait]
pub trait CandidateStore: Send + Sync {
    /// Rows matching `filter`, newest first, starting at `offset`.
    async fn select_range(
        &self,
        filter: &CandidateFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<CandidateRow>, StoreError>;

    async fn count(&self, filter: &CandidateFilter) -> Result<usize, StoreError>;

    async fn fetch(&self, id: &str) -> Result<Option<CandidateRow>, StoreError>;

    async fn update(&self, id: &str, patch: CandidatePatch) -> Result<(), StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    fn subscribe(&self) -> ChangeFeed;
}

/// Error enumeration for remote store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store rejected request: {0}")]
    Rejected(String),
}
