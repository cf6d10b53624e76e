use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use super::domain::{AiAnalysis, CandidateNote};
use super::store::{
    CandidateFilter, CandidatePatch, CandidateRow, CandidateStore, ChangeEvent, ChangeFeed,
    StoreError,
};

/// Process-local candidate table with a change feed, used by the demo service and tests.
#[derive(Default)]
pub struct InMemoryCandidateStore {
    rows: Mutex<HashMap<String, CandidateRow>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChangeEvent>>>,
    query_cap: Option<usize>,
}

impl InMemoryCandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps how many rows a single range query returns, like a hosted API limit.
    pub fn with_query_cap(mut self, cap: usize) -> Self {
        self.query_cap = Some(cap.max(1));
        self
    }

    /// Loads existing table contents without emitting change events.
    pub fn seed(&self, rows: impl IntoIterator<Item = CandidateRow>) {
        let mut guard = self.rows();
        for row in rows {
            guard.insert(row.id.clone(), row);
        }
    }

    /// Adds a new row and announces it on the feed.
    pub fn insert(&self, mut row: CandidateRow) -> Result<(), StoreError> {
        let now = Utc::now();
        row.created_at.get_or_insert(now);
        row.updated_at.get_or_insert(now);
        {
            let mut guard = self.rows();
            if guard.contains_key(&row.id) {
                return Err(StoreError::Rejected(format!("duplicate id {}", row.id)));
            }
            guard.insert(row.id.clone(), row.clone());
        }
        self.publish(ChangeEvent::Insert { new: row });
        Ok(())
    }

    /// Records a finished analysis, as the scoring collaborator would.
    pub fn complete_analysis(&self, id: &str, analysis: &AiAnalysis) -> Result<(), StoreError> {
        let value = serde_json::to_value(analysis)
            .map_err(|err| StoreError::Rejected(err.to_string()))?;
        self.modify(id, |row| row.ai_analysis = Some(value))
    }

    pub fn add_note(&self, id: &str, note: CandidateNote) -> Result<(), StoreError> {
        self.modify(id, |row| row.notes.get_or_insert_with(Vec::new).push(note))
    }

    pub fn row(&self, id: &str) -> Option<CandidateRow> {
        self.rows().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    fn modify(&self, id: &str, change: impl FnOnce(&mut CandidateRow)) -> Result<(), StoreError> {
        let (old, new) = {
            let mut guard = self.rows();
            let row = guard.get_mut(id).ok_or(StoreError::NotFound)?;
            let old = row.clone();
            change(row);
            row.updated_at = Some(Utc::now());
            (old, row.clone())
        };
        self.publish(ChangeEvent::Update {
            old: Some(old),
            new,
        });
        Ok(())
    }

    fn publish(&self, event: ChangeEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<String, CandidateRow>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn matching(&self, filter: &CandidateFilter) -> Vec<CandidateRow> {
        let mut rows: Vec<CandidateRow> = self
            .rows()
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        rows
    }
}

#[async_trait]
impl CandidateStore for InMemoryCandidateStore {
    async fn select_range(
        &self,
        filter: &CandidateFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<CandidateRow>, StoreError> {
        let limit = match self.query_cap {
            Some(cap) => limit.min(cap),
            None => limit,
        };
        Ok(self
            .matching(filter)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn count(&self, filter: &CandidateFilter) -> Result<usize, StoreError> {
        Ok(self.rows().values().filter(|row| filter.matches(row)).count())
    }

    async fn fetch(&self, id: &str) -> Result<Option<CandidateRow>, StoreError> {
        Ok(self.row(id))
    }

    async fn update(&self, id: &str, patch: CandidatePatch) -> Result<(), StoreError> {
        let now = Utc::now();
        self.modify(id, |row| row.apply_patch(&patch, now))
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let old = self.rows().remove(id).ok_or(StoreError::NotFound)?;
        self.publish(ChangeEvent::Delete { old });
        Ok(())
    }

    fn subscribe(&self) -> ChangeFeed {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }
}
