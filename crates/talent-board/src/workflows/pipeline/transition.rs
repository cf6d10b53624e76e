use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::cache::{SharedCache, TransitionKind};
use super::domain::{Candidate, CandidateId, Stage, StageGraph};
use super::normalizer::normalize_row;
use super::store::{CandidatePatch, CandidateStore, StoreError};

/// Who asked for a stage change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOrigin {
    Manual,
    Automation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Applied {
        candidate: Candidate,
        from: Stage,
        kind: TransitionKind,
    },
    Unchanged {
        candidate: Candidate,
    },
    NotCached {
        candidate_id: CandidateId,
    },
}

/// What the coordinator did to the cache after a failed persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Compensation {
    /// The authoritative row was re-fetched and merged.
    Reconciled,
    /// The pre-move snapshot was restored.
    Reverted,
    /// The row no longer exists remotely and was dropped.
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("moving a candidate to '{0}' requires a reason")]
    ReasonRequired(Stage),
    #[error("automation may not move a candidate from '{from}' to '{to}'")]
    NotAllowed { from: Stage, to: Stage },
    #[error("failed to persist move of {candidate_id} to '{to}': {source}")]
    Persist {
        candidate_id: CandidateId,
        to: Stage,
        compensation: Compensation,
        #[source]
        source: StoreError,
    },
}

/// Applies stage moves to the cache immediately, then persists them.
pub struct StageTransitionCoordinator<S> {
    store: Arc<S>,
    cache: SharedCache,
    graph: StageGraph,
}

impl<S> StageTransitionCoordinator<S>
where
    S: CandidateStore + 'static,
{
    pub fn new(store: Arc<S>, cache: SharedCache, graph: StageGraph) -> Self {
        Self {
            store,
            cache,
            graph,
        }
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub async fn move_candidate(
        &self,
        candidate_id: &CandidateId,
        to: Stage,
        reason: Option<String>,
        origin: TransitionOrigin,
    ) -> Result<TransitionOutcome, TransitionError> {
        let Some(current) = self.cache.read(|cache| cache.get(candidate_id).cloned()) else {
            warn!(%candidate_id, %to, ?origin, "stage move requested for a candidate that is not cached");
            return Ok(TransitionOutcome::NotCached {
                candidate_id: candidate_id.clone(),
            });
        };

        let from = current.stage;
        if from == to {
            return Ok(TransitionOutcome::Unchanged { candidate: current });
        }

        let reason = reason
            .map(|raw| raw.trim().to_string())
            .filter(|trimmed| !trimmed.is_empty());
        if to.requires_reason() && reason.is_none() {
            return Err(TransitionError::ReasonRequired(to));
        }
        if origin == TransitionOrigin::Automation && !self.graph.allows(from, to) {
            return Err(TransitionError::NotAllowed { from, to });
        }

        let mut moved = current.clone();
        moved.stage = to;
        match to {
            Stage::Rejected => moved.rejection_reason = reason.clone(),
            Stage::TalentPool => moved.talent_pool_reason = reason.clone(),
            _ => {}
        }
        moved.updated_at = Utc::now();

        let kind = self
            .cache
            .mutate(|cache| cache.upsert(Some(from), moved.clone()));

        let patch = CandidatePatch::stage_change(to, reason);
        match self.store.update(candidate_id.as_str(), patch).await {
            Ok(()) => {
                info!(%candidate_id, %from, %to, ?kind, ?origin, "candidate stage persisted");
                Ok(TransitionOutcome::Applied {
                    candidate: moved,
                    from,
                    kind,
                })
            }
            Err(source) => {
                error!(%candidate_id, %from, %to, error = %source, "failed to persist stage move");
                let compensation = self.compensate(current, to).await;
                Err(TransitionError::Persist {
                    candidate_id: candidate_id.clone(),
                    to,
                    compensation,
                    source,
                })
            }
        }
    }

    // Prefer the remote truth; fall back to the snapshot taken before the move.
    async fn compensate(&self, previous: Candidate, attempted: Stage) -> Compensation {
        let candidate_id = previous.id.clone();
        match self.store.fetch(candidate_id.as_str()).await {
            Ok(Some(row)) => match normalize_row(row) {
                Ok(authoritative) => {
                    self.cache
                        .mutate(|cache| cache.upsert(Some(attempted), authoritative));
                    return Compensation::Reconciled;
                }
                Err(err) => {
                    warn!(%candidate_id, error = %err, "re-fetched row is unusable, reverting")
                }
            },
            Ok(None) => {
                self.cache
                    .mutate(|cache| cache.remove(&candidate_id, Some(attempted)));
                return Compensation::Removed;
            }
            Err(err) => warn!(%candidate_id, error = %err, "re-fetch failed, reverting"),
        }

        self.cache.mutate(|cache| cache.upsert(Some(attempted), previous));
        Compensation::Reverted
    }
}
