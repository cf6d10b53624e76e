use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::Notify;

use crate::workflows::pipeline::cache::FetchedPage;
use crate::workflows::pipeline::domain::{
    AiAnalysis, Candidate, CandidateId, CandidateSource, Recommendation, Stage,
};
use crate::workflows::pipeline::engine::{EngineSettings, PipelineEngine};
use crate::workflows::pipeline::memory::InMemoryCandidateStore;
use crate::workflows::pipeline::store::{
    CandidateFilter, CandidatePatch, CandidateRow, CandidateStore, ChangeFeed, StoreError,
};

pub(super) fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
        .single()
        .expect("valid base timestamp")
        + chrono::Duration::minutes(minutes)
}

pub(super) fn id(raw: &str) -> CandidateId {
    CandidateId::new(raw)
}

pub(super) fn candidate(raw_id: &str, stage: Stage) -> Candidate {
    Candidate {
        id: id(raw_id),
        name: format!("Candidate {raw_id}"),
        email: format!("{raw_id}@example.com"),
        phone: None,
        position_id: None,
        resume: None,
        source: CandidateSource::Manual,
        stage,
        ai_analysis: None,
        notes: Vec::new(),
        interviews: Vec::new(),
        rejection_reason: None,
        talent_pool_reason: None,
        created_at: at(0),
        updated_at: at(0),
    }
}

pub(super) fn analysis(score: f32, analyzed_minute: i64) -> AiAnalysis {
    AiAnalysis {
        score,
        sub_scores: Vec::new(),
        recommendation: if score >= 6.5 {
            Recommendation::Hire
        } else {
            Recommendation::NoHire
        },
        reasoning: "rubric evaluation".to_string(),
        analyzed_at: at(analyzed_minute),
    }
}

pub(super) fn scored(raw_id: &str, score: f32, analyzed_minute: i64) -> Candidate {
    let mut candidate = candidate(raw_id, Stage::Scoring);
    candidate.ai_analysis = Some(analysis(score, analyzed_minute));
    candidate
}

pub(super) fn row(raw_id: &str, stage: Stage, created_minute: i64) -> CandidateRow {
    let mut candidate = candidate(raw_id, stage);
    candidate.created_at = at(created_minute);
    candidate.updated_at = at(created_minute);
    match stage {
        Stage::Rejected => candidate.rejection_reason = Some("not a fit".to_string()),
        Stage::TalentPool => candidate.talent_pool_reason = Some("future role".to_string()),
        _ => {}
    }
    CandidateRow::from(&candidate)
}

/// `count` rows in `stage`, ids `{prefix}-{n}`, newest first by index.
pub(super) fn rows(prefix: &str, stage: Stage, count: usize) -> Vec<CandidateRow> {
    (0..count)
        .map(|n| row(&format!("{prefix}-{n}"), stage, -(n as i64)))
        .collect()
}

/// A full page: more rows may follow.
pub(super) fn page(candidates: Vec<Candidate>) -> FetchedPage {
    FetchedPage {
        fetched: candidates.len(),
        candidates,
        exhausted: false,
    }
}

pub(super) fn ids(candidates: &[Candidate]) -> Vec<String> {
    candidates
        .iter()
        .map(|candidate| candidate.id.0.clone())
        .collect()
}

pub(super) fn settings() -> EngineSettings {
    EngineSettings {
        active_page_size: 100,
        terminal_page_size: 10,
        settle_delay: Duration::from_millis(1500),
        score_threshold: 6.5,
        seed: Vec::new(),
    }
}

pub(super) fn engine_over<S>(store: Arc<S>) -> PipelineEngine<S>
where
    S: CandidateStore + 'static,
{
    PipelineEngine::new(store, settings())
}

#[derive(Default)]
struct Faults {
    // zero-based select_range call indices that fail
    failing_selects: HashSet<usize>,
    failing_counts: HashSet<Stage>,
    fail_updates: bool,
    fail_fetches: bool,
}

/// In-memory store with call accounting, injectable failures, and optional gates
/// that hold `select_range`, `update`, or one stage's next `count` until released.
pub(super) struct ScriptedStore {
    pub(super) inner: InMemoryCandidateStore,
    select_calls: AtomicUsize,
    update_calls: AtomicUsize,
    count_calls: AtomicUsize,
    limits: Mutex<Vec<usize>>,
    faults: Mutex<Faults>,
    select_gate: Mutex<Option<Arc<Notify>>>,
    update_gate: Mutex<Option<Arc<Notify>>>,
    count_gates: Mutex<HashMap<Stage, Arc<Notify>>>,
}

impl ScriptedStore {
    pub(super) fn new(inner: InMemoryCandidateStore) -> Self {
        Self {
            inner,
            select_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            count_calls: AtomicUsize::new(0),
            limits: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
            select_gate: Mutex::new(None),
            update_gate: Mutex::new(None),
            count_gates: Mutex::new(HashMap::new()),
        }
    }

    pub(super) fn seeded(rows: impl IntoIterator<Item = CandidateRow>) -> Self {
        let inner = InMemoryCandidateStore::new();
        inner.seed(rows);
        Self::new(inner)
    }

    pub(super) fn select_calls(&self) -> usize {
        self.select_calls.load(Ordering::SeqCst)
    }

    pub(super) fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub(super) fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    pub(super) fn limits(&self) -> Vec<usize> {
        self.limits.lock().expect("limits mutex").clone()
    }

    pub(super) fn fail_select_call(&self, call: usize) {
        self.faults
            .lock()
            .expect("faults mutex")
            .failing_selects
            .insert(call);
    }

    pub(super) fn fail_count(&self, stage: Stage) {
        self.faults
            .lock()
            .expect("faults mutex")
            .failing_counts
            .insert(stage);
    }

    pub(super) fn set_fail_updates(&self, fail: bool) {
        self.faults.lock().expect("faults mutex").fail_updates = fail;
    }

    pub(super) fn set_fail_fetches(&self, fail: bool) {
        self.faults.lock().expect("faults mutex").fail_fetches = fail;
    }

    pub(super) fn gate_selects(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.select_gate.lock().expect("gate mutex") = Some(Arc::clone(&gate));
        gate
    }

    pub(super) fn gate_updates(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.update_gate.lock().expect("gate mutex") = Some(Arc::clone(&gate));
        gate
    }

    /// Holds only the next count of `stage`; later counts run straight through.
    pub(super) fn gate_count(&self, stage: Stage) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.count_gates
            .lock()
            .expect("gate mutex")
            .insert(stage, Arc::clone(&gate));
        gate
    }
}

fn unavailable() -> StoreError {
    StoreError::Unavailable("injected failure".to_string())
}

#[async_trait]
impl CandidateStore for ScriptedStore {
    async fn select_range(
        &self,
        filter: &CandidateFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<CandidateRow>, StoreError> {
        let call = self.select_calls.fetch_add(1, Ordering::SeqCst);
        self.limits.lock().expect("limits mutex").push(limit);

        let gate = self.select_gate.lock().expect("gate mutex").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self
            .faults
            .lock()
            .expect("faults mutex")
            .failing_selects
            .contains(&call)
        {
            return Err(unavailable());
        }
        self.inner.select_range(filter, offset, limit).await
    }

    async fn count(&self, filter: &CandidateFilter) -> Result<usize, StoreError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        if let CandidateFilter::InStage(stage) = filter {
            let gate = self.count_gates.lock().expect("gate mutex").remove(stage);
            if let Some(gate) = gate {
                gate.notified().await;
            }

            if self
                .faults
                .lock()
                .expect("faults mutex")
                .failing_counts
                .contains(stage)
            {
                return Err(unavailable());
            }
        }
        self.inner.count(filter).await
    }

    async fn fetch(&self, id: &str) -> Result<Option<CandidateRow>, StoreError> {
        if self.faults.lock().expect("faults mutex").fail_fetches {
            return Err(unavailable());
        }
        self.inner.fetch(id).await
    }

    async fn update(&self, id: &str, patch: CandidatePatch) -> Result<(), StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.update_gate.lock().expect("gate mutex").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.faults.lock().expect("faults mutex").fail_updates {
            return Err(unavailable());
        }
        self.inner.update(id, patch).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete(id).await
    }

    fn subscribe(&self) -> ChangeFeed {
        self.inner.subscribe()
    }
}

/// Yields until `condition` holds, for tests that interleave with spawned work.
pub(super) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
