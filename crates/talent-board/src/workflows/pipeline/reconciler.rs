use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::automation::CandidateObserver;
use super::cache::{SharedCache, TransitionKind};
use super::domain::{CandidateId, Stage};
use super::normalizer::normalize_row;
use super::store::{CandidateRow, ChangeEvent, ChangeFeed};

/// What a single change event did to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied {
        candidate_id: CandidateId,
        kind: TransitionKind,
    },
    Removed {
        candidate_id: CandidateId,
    },
    /// Delete for an id the cache never accounted for.
    Missing {
        candidate_id: CandidateId,
    },
    Dropped {
        reason: String,
    },
}

/// Applies change-feed events to the cache in arrival order.
pub struct ChangeFeedReconciler {
    cache: SharedCache,
    observer: Option<Arc<dyn CandidateObserver>>,
}

impl ChangeFeedReconciler {
    pub fn new(cache: SharedCache) -> Self {
        Self {
            cache,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CandidateObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn apply(&self, event: ChangeEvent) -> ReconcileOutcome {
        let operation = event.operation();
        let outcome = match event {
            ChangeEvent::Insert { new } => self.merge(None, new),
            ChangeEvent::Update { old, new } => {
                // Without a readable before-image the row is assumed to keep its stage.
                let previous = old
                    .as_ref()
                    .and_then(old_stage)
                    .or_else(|| new.parsed_stage());
                self.merge(previous, new)
            }
            ChangeEvent::Delete { old } => self.delete(old),
        };

        debug!(operation, ?outcome, "change event reconciled");
        outcome
    }

    /// Drains the feed until every sender is gone. Returns the number of events seen.
    pub async fn run(self, mut feed: ChangeFeed) -> usize {
        let mut processed = 0;
        while let Some(event) = feed.recv().await {
            self.apply(event);
            processed += 1;
        }
        info!(processed, "change feed closed");
        processed
    }

    fn merge(&self, previous: Option<Stage>, row: CandidateRow) -> ReconcileOutcome {
        let row_id = row.id.clone();
        let candidate = match normalize_row(row) {
            Ok(candidate) => candidate,
            Err(err) => {
                warn!(candidate_id = %row_id, error = %err, "dropping unusable change event");
                return ReconcileOutcome::Dropped {
                    reason: err.to_string(),
                };
            }
        };

        let candidate_id = candidate.id.clone();
        let kind = self
            .cache
            .mutate(|cache| cache.upsert(previous, candidate.clone()));

        if let Some(observer) = &self.observer {
            observer.observe(&candidate);
        }

        ReconcileOutcome::Applied { candidate_id, kind }
    }

    fn delete(&self, old: CandidateRow) -> ReconcileOutcome {
        let candidate_id = CandidateId(old.id.trim().to_string());
        if candidate_id.0.is_empty() {
            warn!("dropping delete event without an id");
            return ReconcileOutcome::Dropped {
                reason: "delete event without an id".to_string(),
            };
        }

        let previous = old_stage(&old);
        let (known, removed) = self.cache.mutate(|cache| {
            let known = cache.current_stage(&candidate_id).is_some();
            (known, cache.remove(&candidate_id, previous))
        });

        if let Some(observer) = &self.observer {
            observer.forget(&candidate_id);
        }

        if known || removed.is_some() || previous.is_some_and(Stage::is_terminal) {
            ReconcileOutcome::Removed { candidate_id }
        } else {
            ReconcileOutcome::Missing { candidate_id }
        }
    }
}

fn old_stage(row: &CandidateRow) -> Option<Stage> {
    match row.stage.as_deref() {
        None => None,
        Some(raw) => match raw.parse() {
            Ok(stage) => Some(stage),
            Err(err) => {
                warn!(candidate_id = %row.id, error = %err, "ignoring unreadable previous stage");
                None
            }
        },
    }
}
