use std::collections::BTreeMap;

use serde::Serialize;

use super::cache::CandidateCache;
use super::domain::Stage;

/// Board-wide counters derived from the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardStats {
    pub total: usize,
    pub active: usize,
    pub by_stage: BTreeMap<Stage, usize>,
    pub approved: usize,
    pub rejected: usize,
    pub talent_pool: usize,
    pub conversion_rate: f64,
}

impl BoardStats {
    /// Terminal stages contribute their remote counts, never their loaded rows, so a
    /// materialized page cannot be counted twice or undercounted.
    pub fn from_cache(cache: &CandidateCache) -> Self {
        let mut by_stage: BTreeMap<Stage, usize> =
            Stage::ordered().into_iter().map(|stage| (stage, 0)).collect();

        for candidate in cache.active() {
            *by_stage.entry(candidate.stage).or_default() += 1;
        }

        let terminal_counts = cache.terminal_counts();
        for (stage, count) in &terminal_counts {
            by_stage.insert(*stage, *count);
        }

        let active = cache.active().len();
        let total = active + terminal_counts.values().sum::<usize>();
        let count_of = |stage: Stage| terminal_counts.get(&stage).copied().unwrap_or(0);
        let approved = count_of(Stage::Approved);

        let conversion_rate = if total == 0 {
            0.0
        } else {
            approved as f64 / total as f64
        };

        Self {
            total,
            active,
            by_stage,
            approved,
            rejected: count_of(Stage::Rejected),
            talent_pool: count_of(Stage::TalentPool),
            conversion_rate,
        }
    }

    pub fn stage_count(&self, stage: Stage) -> usize {
        self.by_stage.get(&stage).copied().unwrap_or(0)
    }
}
