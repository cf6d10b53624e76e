//! Candidate pipeline cache and change-feed reconciliation.
//!
//! Active candidates are bulk-loaded once and kept complete; terminal stages are
//! counted up front and paged in on demand. A single change feed keeps both current,
//! stage moves are applied optimistically and persisted afterwards, and finished
//! analyses route candidates out of the scoring stage automatically.

pub mod automation;
pub mod cache;
pub mod domain;
pub mod engine;
pub mod loader;
pub mod memory;
pub mod normalizer;
pub mod reconciler;
pub mod router;
pub mod seed;
pub mod stats;
pub mod store;
pub mod transition;

#[cfg(test)]
mod tests;

pub use automation::{
    AutomationTrigger, CandidateObserver, RoutingPolicy, AUTOMATION_REJECTION_REASON,
};
pub use cache::{
    CandidateCache, FetchedPage, LoadState, Location, NotTerminal, PageStatus, SharedCache,
    TerminalPartition, TerminalStageView, TransitionKind,
};
pub use domain::{
    AiAnalysis, Candidate, CandidateId, CandidateNote, CandidateSource, InterviewRecord,
    InterviewStatus, PositionId, Recommendation, ResumeReference, Stage, StageGraph, SubScore,
    UnknownStage,
};
pub use engine::{ActiveSource, EngineSettings, PipelineEngine, StartupReport};
pub use loader::{ActiveLoad, ActiveSetLoader, CountReport, LoadError, TerminalStageAccessor};
pub use memory::InMemoryCandidateStore;
pub use normalizer::{normalize_row, NormalizeError};
pub use reconciler::{ChangeFeedReconciler, ReconcileOutcome};
pub use router::{board_router, StageMoveRequest};
pub use seed::{load_seed_file, parse_seed, SeedError};
pub use stats::BoardStats;
pub use store::{
    CandidateFilter, CandidatePatch, CandidateRow, CandidateStore, ChangeEvent, ChangeFeed,
    StoreError,
};
pub use transition::{
    Compensation, StageTransitionCoordinator, TransitionError, TransitionOrigin,
    TransitionOutcome,
};
