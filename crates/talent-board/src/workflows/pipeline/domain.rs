use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for candidate rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(pub String);

impl CandidateId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to the open position a candidate applied for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(pub String);

/// Pipeline positions a candidate can occupy, in board order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    NewApplication,
    Scoring,
    Review,
    Interview,
    Offer,
    Approved,
    Rejected,
    TalentPool,
}

impl Stage {
    pub const fn ordered() -> [Self; 8] {
        [
            Self::NewApplication,
            Self::Scoring,
            Self::Review,
            Self::Interview,
            Self::Offer,
            Self::Approved,
            Self::Rejected,
            Self::TalentPool,
        ]
    }

    /// Absorbing stages whose populations are only loaded on demand.
    pub const fn terminal() -> [Self; 3] {
        [Self::Approved, Self::Rejected, Self::TalentPool]
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::TalentPool)
    }

    /// Stages whose entry must carry a free-text reason.
    pub const fn requires_reason(self) -> bool {
        matches!(self, Self::Rejected | Self::TalentPool)
    }

    pub const fn key(self) -> &'static str {
        match self {
            Self::NewApplication => "new_application",
            Self::Scoring => "scoring",
            Self::Review => "review",
            Self::Interview => "interview",
            Self::Offer => "offer",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::TalentPool => "talent_pool",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::NewApplication => "New application",
            Self::Scoring => "AI scoring",
            Self::Review => "Review",
            Self::Interview => "Interview",
            Self::Offer => "Offer",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::TalentPool => "Talent pool",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Stage::ordered()
            .into_iter()
            .find(|stage| stage.key() == normalized)
            .ok_or_else(|| UnknownStage(raw.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown pipeline stage '{0}'")]
pub struct UnknownStage(pub String);

/// How the candidate entered the system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    #[default]
    Manual,
    ResumeUpload,
    Referral,
    JobBoard,
}

impl CandidateSource {
    pub fn from_key(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "manual" => Some(Self::Manual),
            "resume_upload" | "upload" => Some(Self::ResumeUpload),
            "referral" => Some(Self::Referral),
            "job_board" => Some(Self::JobBoard),
            _ => None,
        }
    }
}

/// Pointer to a stored resume; the file itself lives with the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeReference {
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StrongHire,
    Hire,
    Maybe,
    NoHire,
}

/// One weighted rubric criterion reported by the scoring collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubScore {
    pub criterion: String,
    pub score: f32,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

/// Structured result of the external resume analysis. Read-only for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAnalysis {
    pub score: f32,
    #[serde(default)]
    pub sub_scores: Vec<SubScore>,
    pub recommendation: Recommendation,
    #[serde(default)]
    pub reasoning: String,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateNote {
    pub id: String,
    #[serde(default)]
    pub author: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewStatus {
    #[default]
    Scheduled,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewRecord {
    pub id: String,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub interviewer: Option<String>,
    #[serde(default)]
    pub meeting_link: Option<String>,
    #[serde(default)]
    pub status: InterviewStatus,
}

/// Normalized candidate as held by the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub position_id: Option<PositionId>,
    pub resume: Option<ResumeReference>,
    pub source: CandidateSource,
    pub stage: Stage,
    pub ai_analysis: Option<AiAnalysis>,
    pub notes: Vec<CandidateNote>,
    pub interviews: Vec<InterviewRecord>,
    pub rejection_reason: Option<String>,
    pub talent_pool_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Candidate {
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Identity of the current analysis; a new analysis carries a new timestamp.
    pub fn analysis_key(&self) -> Option<DateTime<Utc>> {
        self.ai_analysis
            .as_ref()
            .map(|analysis| analysis.analyzed_at)
    }
}

/// Declared stage-to-stage moves offered to reviewers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGraph {
    edges: BTreeMap<Stage, Vec<Stage>>,
}

impl StageGraph {
    pub fn standard() -> Self {
        let exits = [Stage::Rejected, Stage::TalentPool];
        let mut edges: BTreeMap<Stage, Vec<Stage>> = BTreeMap::new();
        edges.insert(
            Stage::NewApplication,
            [Stage::Scoring].into_iter().chain(exits).collect(),
        );
        edges.insert(
            Stage::Scoring,
            [Stage::Review].into_iter().chain(exits).collect(),
        );
        edges.insert(
            Stage::Review,
            [Stage::Interview].into_iter().chain(exits).collect(),
        );
        edges.insert(
            Stage::Interview,
            [Stage::Offer].into_iter().chain(exits).collect(),
        );
        edges.insert(
            Stage::Offer,
            [Stage::Approved].into_iter().chain(exits).collect(),
        );
        for stage in Stage::terminal() {
            edges.insert(stage, Vec::new());
        }
        Self { edges }
    }

    pub fn successors(&self, stage: Stage) -> &[Stage] {
        self.edges.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn allows(&self, from: Stage, to: Stage) -> bool {
        self.successors(from).contains(&to)
    }

    /// The next stage in board order that `stage` declares as a successor.
    pub fn next_stage(&self, stage: Stage) -> Option<Stage> {
        let successors = self.successors(stage);
        Stage::ordered()
            .into_iter()
            .skip_while(|candidate| *candidate != stage)
            .skip(1)
            .find(|candidate| successors.contains(candidate))
    }
}

impl Default for StageGraph {
    fn default() -> Self {
        Self::standard()
    }
}
