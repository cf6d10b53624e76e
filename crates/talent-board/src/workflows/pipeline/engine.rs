use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BoardConfig;

use super::automation::{AutomationTrigger, CandidateObserver, RoutingPolicy};
use super::cache::{Location, PageStatus, SharedCache, TerminalStageView};
use super::domain::{Candidate, CandidateId, Stage, StageGraph};
use super::loader::{ActiveSetLoader, LoadError, TerminalStageAccessor};
use super::reconciler::ChangeFeedReconciler;
use super::stats::BoardStats;
use super::store::{CandidateStore, ChangeFeed};
use super::transition::{
    StageTransitionCoordinator, TransitionError, TransitionOrigin, TransitionOutcome,
};

// Count passes at startup before events arriving mid-count are left to the feed task.
const COUNT_SETTLE_ROUNDS: usize = 3;

/// Tunables for the engine; usually built from `BoardConfig`.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub active_page_size: usize,
    pub terminal_page_size: usize,
    pub settle_delay: Duration,
    pub score_threshold: f32,
    /// Published as the active set when the first bulk load fails.
    pub seed: Vec<Candidate>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            active_page_size: 1000,
            terminal_page_size: 50,
            settle_delay: Duration::from_millis(1500),
            score_threshold: 6.5,
            seed: Vec::new(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &BoardConfig, seed: Vec<Candidate>) -> Self {
        Self {
            active_page_size: config.active_page_size,
            terminal_page_size: config.terminal_page_size,
            settle_delay: config.settle_delay,
            score_threshold: config.score_threshold,
            seed,
        }
    }
}

/// Where the currently published active set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveSource {
    Remote,
    LastKnownGood,
    Seed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartupReport {
    pub active_source: ActiveSource,
    pub active: usize,
    pub terminal_counts: BTreeMap<Stage, usize>,
    pub failed_counts: Vec<Stage>,
}

/// Owns the cache and wires the loaders, reconciler, coordinator, and automation.
pub struct PipelineEngine<S> {
    store: Arc<S>,
    cache: SharedCache,
    active_loader: ActiveSetLoader<S>,
    terminal: TerminalStageAccessor<S>,
    coordinator: Arc<StageTransitionCoordinator<S>>,
    automation: AutomationTrigger<S>,
    seed: Vec<Candidate>,
    feed_task: Mutex<Option<JoinHandle<()>>>,
}

impl<S> PipelineEngine<S>
where
    S: CandidateStore + 'static,
{
    pub fn new(store: Arc<S>, settings: EngineSettings) -> Self {
        let cache = SharedCache::default();
        let graph = StageGraph::standard();
        let policy =
            RoutingPolicy::from_graph(&graph, settings.score_threshold, settings.settle_delay);
        let coordinator = Arc::new(StageTransitionCoordinator::new(
            Arc::clone(&store),
            cache.clone(),
            graph,
        ));
        let automation = AutomationTrigger::new(Arc::clone(&coordinator), cache.clone(), policy);

        Self {
            active_loader: ActiveSetLoader::new(Arc::clone(&store), settings.active_page_size),
            terminal: TerminalStageAccessor::new(Arc::clone(&store), settings.terminal_page_size),
            store,
            cache,
            coordinator,
            automation,
            seed: settings.seed,
            feed_task: Mutex::new(None),
        }
    }

    /// Subscribes to the feed, loads the active set, replays whatever the feed buffered
    /// meanwhile, then queries terminal counts and keeps consuming the feed in the
    /// background. Counts are taken after the replay so their snapshot already
    /// includes replayed terminal inserts. Events that land while the counts are in
    /// flight are applied and the counts taken again, so a count that already includes
    /// an event is never incremented for it.
    pub async fn start(&self) -> StartupReport {
        let mut feed = self.store.subscribe();

        let active_source = self.reload_active().await;

        let observer: Arc<dyn CandidateObserver> = Arc::new(self.automation.clone());
        let reconciler = ChangeFeedReconciler::new(self.cache.clone()).with_observer(observer);
        let replayed = replay_buffered(&reconciler, &mut feed);
        if replayed > 0 {
            info!(replayed, "replayed change events buffered during the bulk load");
        }

        let mut counts = self.terminal.refresh_counts(&self.cache).await;
        for _ in 0..COUNT_SETTLE_ROUNDS {
            let arrived = replay_buffered(&reconciler, &mut feed);
            if arrived == 0 {
                break;
            }
            debug!(arrived, "change events arrived while counting, counting again");
            counts = self.terminal.refresh_counts(&self.cache).await;
        }

        let handle = tokio::spawn(async move {
            reconciler.run(feed).await;
        });
        if let Some(previous) = self.lock_feed_task().replace(handle) {
            previous.abort();
        }

        for candidate in self.cache.read(|cache| cache.active().to_vec()) {
            self.automation.schedule(&candidate);
        }

        let report = StartupReport {
            active_source,
            active: self.cache.read(|cache| cache.active().len()),
            terminal_counts: counts.counted,
            failed_counts: counts.failed,
        };
        info!(
            source = ?report.active_source,
            active = report.active,
            failed_counts = report.failed_counts.len(),
            "pipeline engine started"
        );
        report
    }

    /// Re-reads the whole active set. On failure the previous set stays published, or
    /// the seed set when nothing was ever loaded.
    pub async fn reload_active(&self) -> ActiveSource {
        match self.active_loader.load().await {
            Ok(load) => {
                self.cache
                    .mutate(|cache| cache.replace_active(load.candidates));
                ActiveSource::Remote
            }
            Err(err) => {
                error!(error = %err, "bulk active-set load failed");
                if self.cache.read(|cache| cache.has_active_set()) {
                    warn!("keeping last known good active set");
                    ActiveSource::LastKnownGood
                } else {
                    warn!(seed = self.seed.len(), "publishing seed active set");
                    let seed = self.seed.clone();
                    self.cache.mutate(|cache| cache.replace_active(seed));
                    ActiveSource::Seed
                }
            }
        }
    }

    pub async fn refresh_counts(&self) -> super::loader::CountReport {
        self.terminal.refresh_counts(&self.cache).await
    }

    pub async fn load_next_page(&self, stage: Stage) -> Result<PageStatus, LoadError> {
        self.terminal.load_next_page(&self.cache, stage).await
    }

    /// Manual stage move; automation is re-evaluated for the moved candidate.
    pub async fn move_candidate(
        &self,
        candidate_id: &CandidateId,
        to: Stage,
        reason: Option<String>,
    ) -> Result<TransitionOutcome, TransitionError> {
        let result = self
            .coordinator
            .move_candidate(candidate_id, to, reason, TransitionOrigin::Manual)
            .await;

        if let Some(candidate) = self.cache.read(|cache| cache.get(candidate_id).cloned()) {
            self.automation.schedule(&candidate);
        }

        result
    }

    pub fn stats(&self) -> BoardStats {
        self.cache.read(BoardStats::from_cache)
    }

    pub fn candidate(&self, candidate_id: &CandidateId) -> Option<(Location, Candidate)> {
        self.cache.read(|cache| {
            cache
                .locate(candidate_id)
                .map(|(location, candidate)| (location, candidate.clone()))
        })
    }

    pub fn active_candidates(&self) -> Vec<Candidate> {
        self.cache.read(|cache| cache.active().to_vec())
    }

    pub fn terminal_view(&self, stage: Stage) -> Option<TerminalStageView> {
        self.cache
            .read(|cache| cache.terminal(stage).map(|partition| partition.view(stage)))
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn automation(&self) -> &AutomationTrigger<S> {
        &self.automation
    }

    pub fn graph(&self) -> &StageGraph {
        self.coordinator.graph()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Stops consuming the feed and cancels pending automated routes.
    pub fn shutdown(&self) {
        if let Some(handle) = self.lock_feed_task().take() {
            handle.abort();
        }
        self.automation.cancel_all();
    }

    fn lock_feed_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.feed_task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn replay_buffered(reconciler: &ChangeFeedReconciler, feed: &mut ChangeFeed) -> usize {
    let mut replayed = 0;
    while let Ok(event) = feed.try_recv() {
        reconciler.apply(event);
        replayed += 1;
    }
    replayed
}

impl<S> Drop for PipelineEngine<S> {
    fn drop(&mut self) {
        if let Some(handle) = self
            .feed_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
