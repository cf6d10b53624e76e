use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::cache::{FetchedPage, LoadState, NotTerminal, PageStatus, SharedCache};
use super::domain::{Candidate, Stage};
use super::normalizer::normalize_row;
use super::store::{CandidateFilter, CandidateRow, CandidateStore, StoreError};

/// Failures while populating the cache from the remote store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("active-set query at offset {offset} failed: {source}")]
    ActiveQuery {
        offset: usize,
        #[source]
        source: StoreError,
    },
    #[error("page query for stage '{stage}' at offset {offset} failed: {source}")]
    PageQuery {
        stage: Stage,
        offset: usize,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    NotTerminal(#[from] NotTerminal),
}

/// Outcome of a complete bulk load.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveLoad {
    pub candidates: Vec<Candidate>,
    pub queries: usize,
    pub skipped: usize,
}

/// Reads every candidate in an active stage, page by page, until the store runs dry.
pub struct ActiveSetLoader<S> {
    store: Arc<S>,
    page_size: usize,
}

impl<S> ActiveSetLoader<S>
where
    S: CandidateStore + 'static,
{
    pub fn new(store: Arc<S>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Any failed query aborts the load so a truncated set is never returned.
    pub async fn load(&self) -> Result<ActiveLoad, LoadError> {
        let filter = CandidateFilter::active();
        let mut offset = 0;
        let mut queries = 0;
        let mut skipped = 0;
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        loop {
            let page = self
                .store
                .select_range(&filter, offset, self.page_size)
                .await
                .map_err(|source| LoadError::ActiveQuery { offset, source })?;
            queries += 1;

            let fetched = page.len();
            for candidate in normalize_page(page) {
                if candidate.is_terminal() || !seen.insert(candidate.id.clone()) {
                    skipped += 1;
                    continue;
                }
                candidates.push(candidate);
            }

            debug!(offset, fetched, "active-set page received");
            if fetched < self.page_size {
                break;
            }
            offset += fetched;
        }

        info!(
            candidates = candidates.len(),
            queries, skipped, "active set loaded"
        );

        Ok(ActiveLoad {
            candidates,
            queries,
            skipped,
        })
    }
}

/// Result of the per-stage count queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CountReport {
    pub counted: BTreeMap<Stage, usize>,
    pub failed: Vec<Stage>,
}

/// Counts and pages through terminal stages on demand.
pub struct TerminalStageAccessor<S> {
    store: Arc<S>,
    page_size: usize,
}

impl<S> TerminalStageAccessor<S>
where
    S: CandidateStore + 'static,
{
    pub fn new(store: Arc<S>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Queries every terminal stage's row count in parallel and records the totals.
    pub async fn refresh_counts(&self, cache: &SharedCache) -> CountReport {
        let mut queries = JoinSet::new();
        for stage in Stage::terminal() {
            let store = Arc::clone(&self.store);
            queries.spawn(async move {
                let result = store.count(&CandidateFilter::InStage(stage)).await;
                (stage, result)
            });
        }

        let mut report = CountReport::default();
        while let Some(joined) = queries.join_next().await {
            match joined {
                Ok((stage, Ok(total))) => {
                    cache.mutate(|cache| cache.set_terminal_total(stage, total));
                    report.counted.insert(stage, total);
                }
                Ok((stage, Err(err))) => {
                    warn!(%stage, error = %err, "terminal count query failed");
                    cache.mutate(|cache| cache.set_load_state(stage, LoadState::Error));
                    report.failed.push(stage);
                }
                Err(err) => error!(error = %err, "terminal count task aborted"),
            }
        }

        report.failed.sort();
        report
    }

    /// Fetches the next page of `stage` and merges it into the cache.
    pub async fn load_next_page(
        &self,
        cache: &SharedCache,
        stage: Stage,
    ) -> Result<PageStatus, LoadError> {
        let offset = cache.mutate(|cache| cache.begin_page(stage))?;

        let page = match self
            .store
            .select_range(&CandidateFilter::InStage(stage), offset, self.page_size)
            .await
        {
            Ok(page) => page,
            Err(source) => {
                warn!(%stage, offset, error = %source, "terminal page query failed");
                cache.mutate(|cache| cache.set_load_state(stage, LoadState::Error));
                return Err(LoadError::PageQuery {
                    stage,
                    offset,
                    source,
                });
            }
        };

        let fetched = page.len();
        let page = FetchedPage {
            candidates: normalize_page(page),
            fetched,
            exhausted: fetched < self.page_size,
        };
        let status = cache.mutate(|cache| cache.append_page(stage, page))?;
        debug!(
            %stage,
            offset,
            fetched,
            appended = status.appended,
            loaded = status.loaded,
            total = status.total,
            "terminal page merged"
        );
        Ok(status)
    }
}

fn normalize_page(page: Vec<CandidateRow>) -> Vec<Candidate> {
    page.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            match normalize_row(row) {
                Ok(candidate) => Some(candidate),
                Err(err) => {
                    warn!(candidate_id = %id, error = %err, "skipping malformed candidate row");
                    None
                }
            }
        })
        .collect()
}
