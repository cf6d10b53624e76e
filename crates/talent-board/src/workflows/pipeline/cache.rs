//! In-memory working set of the board.
//!
//! Candidates in active stages live in one complete list. Each terminal stage keeps an
//! authoritative remote count plus whatever pages have been materialized so far. A
//! candidate id is held by at most one of those lists at any time.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

use super::domain::{Candidate, CandidateId, Stage};

/// Page loading lifecycle of a terminal stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Error,
}

/// Cache bucket holding a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "partition", content = "stage", rename_all = "snake_case")]
pub enum Location {
    Active,
    Terminal(Stage),
}

/// How a write moved a candidate between buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Insert,
    WithinActive,
    ActiveToTerminal,
    TerminalToActive,
    BetweenTerminal,
    Unchanged,
}

impl TransitionKind {
    pub fn classify(from: Option<Stage>, to: Stage) -> Self {
        match from {
            None => Self::Insert,
            Some(from) if from == to => Self::Unchanged,
            Some(from) => match (from.is_terminal(), to.is_terminal()) {
                (false, false) => Self::WithinActive,
                (false, true) => Self::ActiveToTerminal,
                (true, false) => Self::TerminalToActive,
                (true, true) => Self::BetweenTerminal,
            },
        }
    }
}

/// Result of appending a fetched page to a terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageStatus {
    pub stage: Stage,
    pub appended: usize,
    pub loaded: usize,
    pub total: usize,
    pub has_more: bool,
}

/// One `select_range` result for a terminal stage, after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub candidates: Vec<Candidate>,
    /// Rows the remote returned, including ones that failed to normalize.
    pub fetched: usize,
    /// The remote returned fewer rows than requested.
    pub exhausted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stage '{0}' is not terminal")]
pub struct NotTerminal(pub Stage);

/// Lazily materialized population of one terminal stage.
#[derive(Debug, Clone, Default)]
pub struct TerminalPartition {
    total: usize,
    rows: Option<Vec<Candidate>>,
    state: LoadState,
    // remote rows consumed by paging so far
    cursor: usize,
    // ids counted into `total` by this cache, and ids counted back out
    members: HashSet<CandidateId>,
    departed: HashSet<CandidateId>,
}

impl TerminalPartition {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn rows(&self) -> &[Candidate] {
        self.rows.as_deref().unwrap_or(&[])
    }

    pub fn loaded(&self) -> usize {
        self.rows().len()
    }

    pub fn is_materialized(&self) -> bool {
        self.rows.is_some()
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Remote offset of the next page.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn has_more(&self) -> bool {
        self.loaded() < self.total
    }

    pub fn contains(&self, id: &CandidateId) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: &CandidateId) -> Option<usize> {
        self.rows
            .as_ref()
            .and_then(|rows| rows.iter().position(|candidate| &candidate.id == id))
    }

    // A loaded row leaving the stage shifts the remote rows behind it back by one.
    fn take(&mut self, id: &CandidateId) -> Option<Candidate> {
        let index = self.position(id)?;
        let taken = self.rows.as_mut().map(|rows| rows.remove(index));
        if taken.is_some() {
            self.cursor = self.cursor.saturating_sub(1);
        }
        taken
    }

    fn count_in(&mut self, id: &CandidateId) {
        self.departed.remove(id);
        if self.members.insert(id.clone()) {
            self.total += 1;
        }
    }

    fn count_out(&mut self, id: &CandidateId) {
        self.members.remove(id);
        if self.departed.insert(id.clone()) {
            self.total = self.total.saturating_sub(1);
        }
    }

    // Already part of the remote total; remember it without counting.
    fn note_member(&mut self, id: &CandidateId) {
        self.departed.remove(id);
        self.members.insert(id.clone());
    }

    /// Overwrites the loaded copy. Hands the candidate back when it is not loaded.
    fn replace(&mut self, candidate: Candidate) -> Option<Candidate> {
        match (self.position(&candidate.id), self.rows.as_mut()) {
            (Some(index), Some(rows)) => {
                rows[index] = candidate;
                None
            }
            _ => Some(candidate),
        }
    }

    fn place(&mut self, candidate: Candidate) {
        if let Some(candidate) = self.replace(candidate) {
            if let Some(rows) = self.rows.as_mut() {
                rows.insert(0, candidate);
            }
        }
    }

    pub fn view(&self, stage: Stage) -> TerminalStageView {
        TerminalStageView {
            stage,
            stage_label: stage.label(),
            total: self.total,
            loaded: self.loaded(),
            state: self.state,
            has_more: self.has_more(),
            candidates: self.rows().to_vec(),
        }
    }
}

/// Serializable snapshot of a terminal stage for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct TerminalStageView {
    pub stage: Stage,
    pub stage_label: &'static str,
    pub total: usize,
    pub loaded: usize,
    pub state: LoadState,
    pub has_more: bool,
    pub candidates: Vec<Candidate>,
}

/// Owned board state mutated by the loaders, the reconciler, and stage moves.
#[derive(Debug, Clone)]
pub struct CandidateCache {
    active: Vec<Candidate>,
    active_loaded: bool,
    terminal: BTreeMap<Stage, TerminalPartition>,
}

impl Default for CandidateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateCache {
    pub fn new() -> Self {
        let terminal = Stage::terminal()
            .into_iter()
            .map(|stage| (stage, TerminalPartition::default()))
            .collect();

        Self {
            active: Vec::new(),
            active_loaded: false,
            terminal,
        }
    }

    pub fn active(&self) -> &[Candidate] {
        &self.active
    }

    /// Whether a complete active set has ever been published.
    pub fn has_active_set(&self) -> bool {
        self.active_loaded
    }

    pub fn terminal(&self, stage: Stage) -> Option<&TerminalPartition> {
        self.terminal.get(&stage)
    }

    pub fn terminal_counts(&self) -> BTreeMap<Stage, usize> {
        self.terminal
            .iter()
            .map(|(stage, partition)| (*stage, partition.total))
            .collect()
    }

    pub fn get(&self, id: &CandidateId) -> Option<&Candidate> {
        self.locate(id).map(|(_, candidate)| candidate)
    }

    pub fn locate(&self, id: &CandidateId) -> Option<(Location, &Candidate)> {
        if let Some(candidate) = self.active.iter().find(|candidate| &candidate.id == id) {
            return Some((Location::Active, candidate));
        }

        self.terminal.iter().find_map(|(stage, partition)| {
            partition
                .rows()
                .iter()
                .find(|candidate| &candidate.id == id)
                .map(|candidate| (Location::Terminal(*stage), candidate))
        })
    }

    /// Stage the cache currently accounts the candidate under, whether or not its
    /// terminal page has been materialized.
    pub fn current_stage(&self, id: &CandidateId) -> Option<Stage> {
        if let Some((_, candidate)) = self.locate(id) {
            return Some(candidate.stage);
        }

        self.terminal
            .iter()
            .find(|(_, partition)| partition.members.contains(id))
            .map(|(stage, _)| *stage)
    }

    /// Publishes a freshly loaded active set, replacing the previous one.
    pub fn replace_active(&mut self, candidates: Vec<Candidate>) {
        let mut seen = HashSet::new();
        let active: Vec<Candidate> = candidates
            .into_iter()
            .filter(|candidate| !candidate.is_terminal())
            .filter(|candidate| seen.insert(candidate.id.clone()))
            .collect();

        for candidate in &active {
            for partition in self.terminal.values_mut() {
                if partition.take(&candidate.id).is_some() {
                    partition.members.remove(&candidate.id);
                }
            }
        }

        self.active = active;
        self.active_loaded = true;
    }

    pub fn set_terminal_total(&mut self, stage: Stage, total: usize) {
        if let Some(partition) = self.terminal.get_mut(&stage) {
            partition.total = total;
        }
    }

    pub fn set_load_state(&mut self, stage: Stage, state: LoadState) {
        if let Some(partition) = self.terminal.get_mut(&stage) {
            partition.state = state;
        }
    }

    /// Marks the stage as loading and returns the remote offset of the next page.
    pub fn begin_page(&mut self, stage: Stage) -> Result<usize, NotTerminal> {
        let partition = self.terminal.get_mut(&stage).ok_or(NotTerminal(stage))?;
        partition.state = LoadState::Loading;
        Ok(partition.cursor)
    }

    /// Appends a fetched page, skipping rows the cache already holds or knows are stale.
    /// The cursor advances by every row the remote returned, kept or not.
    pub fn append_page(
        &mut self,
        stage: Stage,
        page: FetchedPage,
    ) -> Result<PageStatus, NotTerminal> {
        if !self.terminal.contains_key(&stage) {
            return Err(NotTerminal(stage));
        }

        let mut fresh = Vec::with_capacity(page.candidates.len());
        for candidate in page.candidates {
            if candidate.stage != stage || self.locate(&candidate.id).is_some() {
                continue;
            }
            if fresh
                .iter()
                .any(|existing: &Candidate| existing.id == candidate.id)
            {
                continue;
            }
            fresh.push(candidate);
        }

        let partition = self.terminal.get_mut(&stage).ok_or(NotTerminal(stage))?;
        let mut appended = 0;
        for candidate in fresh {
            if partition.departed.contains(&candidate.id) {
                continue;
            }
            partition.members.insert(candidate.id.clone());
            partition.rows.get_or_insert_with(Vec::new).push(candidate);
            appended += 1;
        }
        partition.rows.get_or_insert_with(Vec::new);
        partition.cursor += page.fetched;

        // Nothing lies past a short page, so whatever is loaded is the whole stage.
        if page.exhausted {
            partition.total = partition.loaded();
        }
        partition.total = partition.total.max(partition.loaded());
        partition.state = LoadState::Loaded;

        Ok(PageStatus {
            stage,
            appended,
            loaded: partition.loaded(),
            total: partition.total,
            has_more: partition.has_more(),
        })
    }

    /// Writes `candidate` into the bucket its stage belongs to and adjusts terminal
    /// counts. `previous` is only consulted when the cache has no record of the id.
    pub fn upsert(&mut self, previous: Option<Stage>, candidate: Candidate) -> TransitionKind {
        let id = candidate.id.clone();
        let to = candidate.stage;
        let from = self.current_stage(&id).or(previous);
        let kind = TransitionKind::classify(from, to);

        if let Some(from) = from.filter(|stage| stage.is_terminal() && *stage != to) {
            if let Some(partition) = self.terminal.get_mut(&from) {
                partition.count_out(&id);
            }
        }

        if to.is_terminal() {
            self.active.retain(|existing| existing.id != id);
            for (stage, partition) in self.terminal.iter_mut() {
                if *stage != to {
                    partition.take(&id);
                }
            }
            if let Some(partition) = self.terminal.get_mut(&to) {
                if from == Some(to) {
                    // not paged in yet: paging will bring the remote copy
                    partition.note_member(&id);
                    partition.replace(candidate);
                } else {
                    partition.count_in(&id);
                    partition.place(candidate);
                }
            }
        } else {
            for partition in self.terminal.values_mut() {
                partition.take(&id);
            }
            match self.active.iter().position(|existing| existing.id == id) {
                Some(index) => self.active[index] = candidate,
                None if kind == TransitionKind::TerminalToActive => self.active.push(candidate),
                None => self.active.insert(0, candidate),
            }
        }

        kind
    }

    /// Drops the candidate from whichever bucket holds it. `previous` names the stage
    /// the remote row was in, for candidates the cache never materialized.
    pub fn remove(&mut self, id: &CandidateId, previous: Option<Stage>) -> Option<Candidate> {
        let from = self.current_stage(id).or(previous);

        let mut removed = None;
        if let Some(index) = self.active.iter().position(|existing| &existing.id == id) {
            removed = Some(self.active.remove(index));
        }
        for partition in self.terminal.values_mut() {
            if let Some(candidate) = partition.take(id) {
                removed = Some(candidate);
            }
        }

        if let Some(stage) = from.filter(|stage| stage.is_terminal()) {
            if let Some(partition) = self.terminal.get_mut(&stage) {
                partition.count_out(id);
            }
        }

        removed
    }

    /// Ids held by more than one bucket or repeated inside one. Empty when consistent.
    pub fn partition_violations(&self) -> Vec<CandidateId> {
        let mut seen = HashSet::new();
        let mut violations = Vec::new();
        let terminal_rows = self
            .terminal
            .values()
            .flat_map(|partition| partition.rows().iter());

        for candidate in self.active.iter().chain(terminal_rows) {
            if !seen.insert(candidate.id.clone()) {
                violations.push(candidate.id.clone());
            }
        }

        violations
    }
}

/// Shared handle over the cache. Every mutation bumps a revision that observers can
/// watch; the lock is never held across an await point.
#[derive(Clone)]
pub struct SharedCache {
    inner: Arc<Mutex<CandidateCache>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for SharedCache {
    fn default() -> Self {
        Self::new(CandidateCache::new())
    }
}

impl SharedCache {
    pub fn new(cache: CandidateCache) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(cache)),
            revision: Arc::new(revision),
        }
    }

    pub fn read<T>(&self, f: impl FnOnce(&CandidateCache) -> T) -> T {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn mutate<T>(&self, f: impl FnOnce(&mut CandidateCache) -> T) -> T {
        let output = {
            let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        };
        self.revision.send_modify(|revision| *revision += 1);
        output
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Receiver that wakes whenever the cache changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn snapshot(&self) -> CandidateCache {
        self.read(CandidateCache::clone)
    }
}
