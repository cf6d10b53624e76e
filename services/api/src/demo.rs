use crate::infra::demo_store;
use chrono::Utc;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use talent_board::error::AppError;
use talent_board::workflows::pipeline::{
    load_seed_file, AiAnalysis, BoardStats, CandidateId, CandidateRow, EngineSettings,
    InMemoryCandidateStore, PipelineEngine, Recommendation, Stage,
};

const DEMO_APPLICANT: &str = "cand-demo";

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Analysis score reported for the demo applicant (0-10)
    #[arg(long, default_value_t = 8.2)]
    pub(crate) score: f32,
    /// Delay before a finished analysis routes the applicant, in milliseconds
    #[arg(long, default_value_t = 1500)]
    pub(crate) settle_ms: u64,
    /// Reason recorded when the applicant is rejected at the end of the walk
    #[arg(long, default_value = "culture fit")]
    pub(crate) reason: String,
    /// Seed CSV used when the store cannot be read
    #[arg(long)]
    pub(crate) seed_csv: Option<PathBuf>,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            score: 8.2,
            settle_ms: 1500,
            reason: "culture fit".to_string(),
            seed_csv: None,
        }
    }
}

/// Stage of the demo applicant after each step of the walk.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DemoSummary {
    pub(crate) routed_to: Option<Stage>,
    pub(crate) final_stage: Option<Stage>,
    pub(crate) stats: BoardStats,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let seed = match &args.seed_csv {
        Some(path) => load_seed_file(path)?,
        None => Vec::new(),
    };
    let settings = EngineSettings {
        settle_delay: Duration::from_millis(args.settle_ms),
        seed,
        ..EngineSettings::default()
    };
    let store = Arc::new(demo_store(true));
    let engine = PipelineEngine::new(Arc::clone(&store), settings);

    println!("Candidate board demo");
    let report = engine.start().await;
    println!(
        "- Loaded {} active candidates ({:?})",
        report.active, report.active_source
    );
    render_stats(&engine.stats());

    let summary = walk_board(&engine, &store, &args).await;
    engine.shutdown();
    let summary = summary?;

    match summary.routed_to {
        Some(stage) => println!("- Automation routed the applicant to {}", stage.label()),
        None => println!("- Automation did not route the applicant"),
    }
    if let Some(stage) = summary.final_stage {
        println!("- Applicant finished in {}", stage.label());
    }
    render_stats(&summary.stats);

    Ok(())
}

/// Intake, scoring, automated routing, then a manual rejection.
pub(crate) async fn walk_board(
    engine: &PipelineEngine<InMemoryCandidateStore>,
    store: &InMemoryCandidateStore,
    args: &DemoArgs,
) -> Result<DemoSummary, AppError> {
    let applicant = CandidateId::new(DEMO_APPLICANT);

    store.insert(CandidateRow {
        id: DEMO_APPLICANT.to_string(),
        name: Some("Demo Applicant".to_string()),
        email: Some("demo.applicant@example.com".to_string()),
        source: Some("job_board".to_string()),
        stage: Some(Stage::NewApplication.key().to_string()),
        ..CandidateRow::default()
    })?;
    wait_for_stage(engine, &applicant, |stage| stage == Stage::NewApplication).await;
    println!("\n- Application received for {}", applicant);

    engine.move_candidate(&applicant, Stage::Scoring, None).await?;
    let analysis = AiAnalysis {
        score: args.score,
        sub_scores: Vec::new(),
        recommendation: if args.score >= engine.automation().policy().threshold {
            Recommendation::Hire
        } else {
            Recommendation::NoHire
        },
        reasoning: "Demo rubric evaluation".to_string(),
        analyzed_at: Utc::now(),
    };
    store.complete_analysis(DEMO_APPLICANT, &analysis)?;
    println!("- Analysis finished with score {:.1}", args.score);

    tokio::time::sleep(Duration::from_millis(args.settle_ms) + Duration::from_millis(200)).await;
    let routed_to = wait_for_stage(engine, &applicant, |stage| stage != Stage::Scoring).await;

    if routed_to.is_some_and(|stage| !stage.is_terminal()) {
        engine
            .move_candidate(&applicant, Stage::Rejected, Some(args.reason.clone()))
            .await?;
        println!("- Rejected by reviewer: {}", args.reason);
    }
    let final_stage = wait_for_stage(engine, &applicant, Stage::is_terminal).await;

    Ok(DemoSummary {
        routed_to,
        final_stage,
        stats: engine.stats(),
    })
}

async fn wait_for_stage(
    engine: &PipelineEngine<InMemoryCandidateStore>,
    candidate_id: &CandidateId,
    reached: impl Fn(Stage) -> bool,
) -> Option<Stage> {
    for _ in 0..50 {
        if let Some((_, candidate)) = engine.candidate(candidate_id) {
            if reached(candidate.stage) {
                return Some(candidate.stage);
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    engine
        .candidate(candidate_id)
        .map(|(_, candidate)| candidate.stage)
}

fn render_stats(stats: &BoardStats) {
    println!(
        "Board: {} candidates | {} active | {:.0}% approved",
        stats.total,
        stats.active,
        stats.conversion_rate * 100.0
    );
    for stage in Stage::ordered() {
        println!("  - {:<16} {}", stage.label(), stats.stage_count(stage));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn walk(args: DemoArgs) -> DemoSummary {
        let store = Arc::new(demo_store(true));
        let settings = EngineSettings {
            settle_delay: Duration::from_millis(args.settle_ms),
            ..EngineSettings::default()
        };
        let engine = PipelineEngine::new(Arc::clone(&store), settings);
        engine.start().await;

        let summary = walk_board(&engine, &store, &args)
            .await
            .expect("demo walk succeeds");
        engine.shutdown();
        summary
    }

    #[tokio::test(start_paused = true)]
    async fn passing_applicant_is_reviewed_then_rejected() {
        let summary = walk(DemoArgs::default()).await;

        assert_eq!(summary.routed_to, Some(Stage::Review));
        assert_eq!(summary.final_stage, Some(Stage::Rejected));
        assert_eq!(summary.stats.total, 9);
        assert_eq!(summary.stats.rejected, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_applicant_is_rejected_by_automation() {
        let summary = walk(DemoArgs {
            score: 3.0,
            ..DemoArgs::default()
        })
        .await;

        assert_eq!(summary.routed_to, Some(Stage::Rejected));
        assert_eq!(summary.final_stage, Some(Stage::Rejected));
        assert_eq!(summary.stats.active, 5);
    }
}
