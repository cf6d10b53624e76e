//! Score-driven re-routing of candidates out of the scoring stage.
//!
//! A candidate seen in the scoring stage with a finished analysis gets one scheduled
//! route per analysis. The route fires after the settle delay and is dropped if the
//! candidate left the scoring stage (or got a different analysis) in the meantime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cache::SharedCache;
use super::domain::{AiAnalysis, Candidate, CandidateId, Stage, StageGraph};
use super::store::CandidateStore;
use super::transition::{StageTransitionCoordinator, TransitionOrigin, TransitionOutcome};

pub const AUTOMATION_REJECTION_REASON: &str = "score below minimum threshold";

/// Hook notified about every candidate state the engine applies.
pub trait CandidateObserver: Send + Sync {
    fn observe(&self, candidate: &Candidate);
    fn forget(&self, candidate_id: &CandidateId);
}

/// Thresholds and destinations for automated routing.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingPolicy {
    pub scoring_stage: Stage,
    pub pass_stage: Stage,
    pub reject_stage: Stage,
    pub threshold: f32,
    pub settle_delay: Duration,
}

impl RoutingPolicy {
    pub fn from_graph(graph: &StageGraph, threshold: f32, settle_delay: Duration) -> Self {
        Self {
            scoring_stage: Stage::Scoring,
            pass_stage: graph.next_stage(Stage::Scoring).unwrap_or(Stage::Review),
            reject_stage: Stage::Rejected,
            threshold,
            settle_delay,
        }
    }

    pub fn route(&self, analysis: &AiAnalysis) -> (Stage, Option<String>) {
        if analysis.score >= self.threshold {
            (self.pass_stage, None)
        } else {
            (
                self.reject_stage,
                Some(AUTOMATION_REJECTION_REASON.to_string()),
            )
        }
    }
}

struct PendingRoute {
    analyzed_at: DateTime<Utc>,
    ticket: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct TriggerState {
    pending: HashMap<CandidateId, PendingRoute>,
    // analysis already routed, per candidate still in scoring
    fired: HashMap<CandidateId, DateTime<Utc>>,
}

struct TriggerInner<S> {
    coordinator: Arc<StageTransitionCoordinator<S>>,
    cache: SharedCache,
    policy: RoutingPolicy,
    state: Mutex<TriggerState>,
    tickets: AtomicU64,
}

/// Schedules one automated route per (candidate, analysis).
pub struct AutomationTrigger<S> {
    inner: Arc<TriggerInner<S>>,
}

impl<S> Clone for AutomationTrigger<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> AutomationTrigger<S>
where
    S: CandidateStore + 'static,
{
    pub fn new(
        coordinator: Arc<StageTransitionCoordinator<S>>,
        cache: SharedCache,
        policy: RoutingPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(TriggerInner {
                coordinator,
                cache,
                policy,
                state: Mutex::new(TriggerState::default()),
                tickets: AtomicU64::new(1),
            }),
        }
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.inner.policy
    }

    /// Schedules a route when the candidate sits in scoring with an analysis, and
    /// cancels any pending route when it does not. Must run inside a Tokio runtime.
    pub fn schedule(&self, candidate: &Candidate) {
        if candidate.stage != self.inner.policy.scoring_stage {
            self.cancel(&candidate.id);
            self.inner.lock_state().fired.remove(&candidate.id);
            return;
        }
        let Some(analyzed_at) = candidate.analysis_key() else {
            return;
        };

        let mut state = self.inner.lock_state();
        if state.fired.get(&candidate.id) == Some(&analyzed_at) {
            return;
        }
        if let Some(existing) = state.pending.get(&candidate.id) {
            if existing.analyzed_at == analyzed_at {
                return;
            }
            existing.handle.abort();
            debug!(candidate_id = %candidate.id, "replacing route for a newer analysis");
        }

        let ticket = self.inner.tickets.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let candidate_id = candidate.id.clone();
        let delay = self.inner.policy.settle_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(candidate_id, analyzed_at, ticket).await;
        });

        debug!(candidate_id = %candidate.id, ?delay, "automated route scheduled");
        state.pending.insert(
            candidate.id.clone(),
            PendingRoute {
                analyzed_at,
                ticket,
                handle,
            },
        );
    }

    /// Aborts a pending route for the candidate, if any.
    pub fn cancel(&self, candidate_id: &CandidateId) -> bool {
        let mut state = self.inner.lock_state();
        match state.pending.remove(candidate_id) {
            Some(route) => {
                route.handle.abort();
                debug!(%candidate_id, "automated route cancelled");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let mut state = self.inner.lock_state();
        for (_, route) in state.pending.drain() {
            route.handle.abort();
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.lock_state().pending.len()
    }

    pub fn is_pending(&self, candidate_id: &CandidateId) -> bool {
        self.inner.lock_state().pending.contains_key(candidate_id)
    }

    /// Candidates whose current analysis has already been routed.
    pub fn routed(&self) -> usize {
        self.inner.lock_state().fired.len()
    }
}

impl<S> TriggerInner<S>
where
    S: CandidateStore + 'static,
{
    fn lock_state(&self) -> std::sync::MutexGuard<'_, TriggerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn fire(&self, candidate_id: CandidateId, analyzed_at: DateTime<Utc>, ticket: u64) {
        let route = {
            let mut state = self.lock_state();
            match state.pending.get(&candidate_id) {
                Some(pending) if pending.ticket == ticket => {}
                _ => return,
            }
            state.pending.remove(&candidate_id);

            let analysis = self.cache.read(|cache| {
                cache
                    .get(&candidate_id)
                    .filter(|candidate| candidate.stage == self.policy.scoring_stage)
                    .and_then(|candidate| candidate.ai_analysis.clone())
                    .filter(|analysis| analysis.analyzed_at == analyzed_at)
            });
            let Some(analysis) = analysis else {
                debug!(%candidate_id, "candidate moved on before the settle delay elapsed");
                return;
            };

            state.fired.insert(candidate_id.clone(), analyzed_at);
            (analysis.score, self.policy.route(&analysis))
        };

        let (score, (to, reason)) = route;
        match self
            .coordinator
            .move_candidate(&candidate_id, to, reason, TransitionOrigin::Automation)
            .await
        {
            Ok(outcome) => info!(
                %candidate_id,
                score,
                %to,
                outcome = outcome_label(&outcome),
                "automated route applied"
            ),
            Err(err) => warn!(%candidate_id, score, %to, error = %err, "automated route failed"),
        }
    }
}

fn outcome_label(outcome: &TransitionOutcome) -> &'static str {
    match outcome {
        TransitionOutcome::Applied { .. } => "applied",
        TransitionOutcome::Unchanged { .. } => "unchanged",
        TransitionOutcome::NotCached { .. } => "not_cached",
    }
}

impl<S> CandidateObserver for AutomationTrigger<S>
where
    S: CandidateStore + 'static,
{
    fn observe(&self, candidate: &Candidate) {
        self.schedule(candidate);
    }

    fn forget(&self, candidate_id: &CandidateId) {
        self.cancel(candidate_id);
        self.inner.lock_state().fired.remove(candidate_id);
    }
}
