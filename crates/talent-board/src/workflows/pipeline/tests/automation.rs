use super::common::*;
use crate::workflows::pipeline::automation::{
    AutomationTrigger, CandidateObserver, RoutingPolicy, AUTOMATION_REJECTION_REASON,
};
use crate::workflows::pipeline::cache::SharedCache;
use crate::workflows::pipeline::domain::{Candidate, Stage, StageGraph};
use crate::workflows::pipeline::loader::ActiveSetLoader;
use crate::workflows::pipeline::store::CandidateRow;
use crate::workflows::pipeline::transition::{StageTransitionCoordinator, TransitionOrigin};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

struct Harness {
    store: Arc<ScriptedStore>,
    cache: SharedCache,
    coordinator: Arc<StageTransitionCoordinator<ScriptedStore>>,
    trigger: AutomationTrigger<ScriptedStore>,
}

impl Harness {
    async fn new(candidates: &[Candidate]) -> Self {
        let store = Arc::new(ScriptedStore::seeded(
            candidates.iter().map(CandidateRow::from),
        ));
        let cache = SharedCache::default();
        let load = ActiveSetLoader::new(Arc::clone(&store), 100)
            .load()
            .await
            .expect("bulk load succeeds");
        cache.mutate(|cache| cache.replace_active(load.candidates));

        let graph = StageGraph::standard();
        let policy = RoutingPolicy::from_graph(&graph, 6.5, Duration::from_millis(1500));
        let coordinator = Arc::new(StageTransitionCoordinator::new(
            Arc::clone(&store),
            cache.clone(),
            graph,
        ));
        let trigger = AutomationTrigger::new(Arc::clone(&coordinator), cache.clone(), policy);

        Self {
            store,
            cache,
            coordinator,
            trigger,
        }
    }

    fn stored_stage(&self, raw_id: &str) -> Option<String> {
        self.store.inner.row(raw_id).and_then(|row| row.stage)
    }
}

#[test]
fn policy_routes_on_the_threshold() {
    let policy = RoutingPolicy::from_graph(&StageGraph::standard(), 6.5, Duration::ZERO);

    assert_eq!(policy.route(&analysis(6.5, 0)), (Stage::Review, None));
    assert_eq!(
        policy.route(&analysis(6.49, 0)),
        (
            Stage::Rejected,
            Some(AUTOMATION_REJECTION_REASON.to_string())
        )
    );
}

#[tokio::test(start_paused = true)]
async fn passing_score_moves_to_the_next_stage_after_the_delay() {
    let candidate = scored("s1", 8.2, 5);
    let harness = Harness::new(&[candidate.clone()]).await;

    harness.trigger.schedule(&candidate);
    sleep(Duration::from_millis(1000)).await;
    assert!(harness.trigger.is_pending(&id("s1")));
    assert_eq!(harness.stored_stage("s1").as_deref(), Some("scoring"));

    sleep(Duration::from_millis(600)).await;
    assert_eq!(harness.trigger.pending(), 0);
    assert_eq!(harness.stored_stage("s1").as_deref(), Some("review"));
    assert_eq!(
        harness
            .cache
            .read(|cache| cache.get(&id("s1")).map(|c| c.stage)),
        Some(Stage::Review)
    );
}

#[tokio::test(start_paused = true)]
async fn failing_score_rejects_with_the_system_reason() {
    let candidate = scored("s2", 4.0, 5);
    let harness = Harness::new(&[candidate.clone()]).await;

    harness.trigger.schedule(&candidate);
    sleep(Duration::from_millis(2000)).await;

    let row = harness.store.inner.row("s2").expect("row exists");
    assert_eq!(row.stage.as_deref(), Some("rejected"));
    assert_eq!(
        row.rejection_reason.as_deref(),
        Some(AUTOMATION_REJECTION_REASON)
    );
    assert_eq!(
        harness
            .cache
            .read(|cache| cache.terminal_counts()[&Stage::Rejected]),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn one_route_per_analysis() {
    let candidate = scored("s3", 9.0, 5);
    let harness = Harness::new(&[candidate.clone()]).await;

    harness.trigger.schedule(&candidate);
    harness.trigger.schedule(&candidate);
    harness.trigger.observe(&candidate);
    assert_eq!(harness.trigger.pending(), 1);

    sleep(Duration::from_millis(1600)).await;
    // a stale scoring snapshot of the same analysis arrives after the route fired
    harness.trigger.observe(&candidate);
    sleep(Duration::from_millis(1600)).await;

    assert_eq!(harness.trigger.pending(), 0);
    assert_eq!(harness.store.update_calls(), 1);
    assert_eq!(harness.stored_stage("s3").as_deref(), Some("review"));
}

#[tokio::test(start_paused = true)]
async fn routed_analysis_is_forgotten_once_the_candidate_leaves_scoring() {
    let candidate = scored("s10", 8.0, 5);
    let harness = Harness::new(&[candidate.clone()]).await;

    harness.trigger.schedule(&candidate);
    sleep(Duration::from_millis(1600)).await;
    assert_eq!(harness.trigger.routed(), 1);

    let mut reviewed = candidate.clone();
    reviewed.stage = Stage::Review;
    harness.trigger.observe(&reviewed);

    assert_eq!(harness.trigger.routed(), 0);
    assert_eq!(harness.trigger.pending(), 0);
    assert_eq!(harness.store.update_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn leaving_scoring_cancels_the_pending_route() {
    let candidate = scored("s4", 9.0, 5);
    let harness = Harness::new(&[candidate.clone()]).await;

    harness.trigger.schedule(&candidate);
    harness
        .coordinator
        .move_candidate(
            &id("s4"),
            Stage::TalentPool,
            Some("hold for next quarter".to_string()),
            TransitionOrigin::Manual,
        )
        .await
        .expect("manual move succeeds");
    let mut moved = candidate.clone();
    moved.stage = Stage::TalentPool;
    harness.trigger.observe(&moved);

    assert!(!harness.trigger.is_pending(&id("s4")));
    sleep(Duration::from_millis(3000)).await;
    assert_eq!(harness.store.update_calls(), 1);
    assert_eq!(harness.stored_stage("s4").as_deref(), Some("talent_pool"));
}

#[tokio::test(start_paused = true)]
async fn route_rechecks_the_cache_when_it_fires() {
    let candidate = scored("s5", 9.0, 5);
    let harness = Harness::new(&[candidate.clone()]).await;

    harness.trigger.schedule(&candidate);
    let mut reviewed = candidate.clone();
    reviewed.stage = Stage::Review;
    harness
        .cache
        .mutate(|cache| cache.upsert(None, reviewed));

    sleep(Duration::from_millis(2000)).await;

    assert_eq!(harness.store.update_calls(), 0);
    assert_eq!(harness.trigger.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn newer_analysis_replaces_the_pending_route() {
    let first = scored("s6", 3.0, 5);
    let harness = Harness::new(&[first.clone()]).await;

    harness.trigger.schedule(&first);
    sleep(Duration::from_millis(1000)).await;

    let rescored = scored("s6", 9.5, 6);
    harness
        .cache
        .mutate(|cache| cache.upsert(None, rescored.clone()));
    harness.trigger.schedule(&rescored);
    assert_eq!(harness.trigger.pending(), 1);

    sleep(Duration::from_millis(600)).await;
    assert_eq!(harness.stored_stage("s6").as_deref(), Some("scoring"));

    sleep(Duration::from_millis(1000)).await;
    assert_eq!(harness.stored_stage("s6").as_deref(), Some("review"));
    assert_eq!(harness.store.update_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn candidates_without_analysis_are_not_scheduled() {
    let waiting = candidate("s7", Stage::Scoring);
    let harness = Harness::new(&[waiting.clone()]).await;

    harness.trigger.schedule(&waiting);

    assert_eq!(harness.trigger.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn forget_and_cancel_all_drop_pending_routes() {
    let first = scored("s8", 9.0, 5);
    let second = scored("s9", 9.0, 5);
    let harness = Harness::new(&[first.clone(), second.clone()]).await;

    harness.trigger.schedule(&first);
    harness.trigger.schedule(&second);
    harness.trigger.forget(&id("s8"));
    assert_eq!(harness.trigger.pending(), 1);

    harness.trigger.cancel_all();
    sleep(Duration::from_millis(3000)).await;

    assert_eq!(harness.trigger.pending(), 0);
    assert_eq!(harness.store.update_calls(), 0);
}
