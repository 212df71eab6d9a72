//! Pipeline orchestrator
//!
//! Runs one request through an explicit state machine:
//!
//! BRIEFING → L0 CHECK → L1 CHECK → RESEARCH → STRUCTURING → ASSEMBLY
//!   → REPORTING & ASSETS → L1 STORE → DONE
//!
//! Weak research or a failed research-mode assembly moves to
//! FALLBACK SYNTHESIS, which rejoins at REPORTING & ASSETS. Either cache
//! hit goes straight to DONE. Only a failed fallback, a briefing failure
//! or a configuration error ends in FAILED.

mod stage;

pub use stage::Stage;

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::assembler::{ReportAssembler, SectionBuilder, SynthesisMode};
use crate::assets::{AssetBackend, AssetGenerator};
use crate::briefing;
use crate::cache::semantic::REPORT_ARTIFACT;
use crate::cache::{
    build_kv_store, ArtifactStore, FsArtifactStore, InMemoryVectorIndex, IntentCache, IntentKey,
    KvStore, PutOutcome, SemanticCache, VectorIndex,
};
use crate::config::CatalystConfig;
use crate::context::{CancelFlag, RunContext};
use crate::error::CatalystError;
use crate::model::{Embedder, GenerationModel, ModelBackend};
use crate::models::{
    AssetRef, CacheOutcome, CompletedRun, FailedRun, JobResultReference, Report,
    ResearchVerdict, RunResult, SynthesisPath, TransitionRecord,
};
use crate::reporting::{self, RenderedRun, PROMPTS_FILE};
use crate::research;
use crate::resilience::ResilientInvoker;

/// External collaborators, resolved once at startup.
pub struct Components {
    pub model: Arc<dyn GenerationModel>,
    pub embedder: Arc<dyn Embedder>,
    pub kv: Arc<dyn KvStore>,
    pub index: Arc<dyn VectorIndex>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub assets: Box<dyn AssetGenerator>,
}

impl Components {
    pub fn from_config(config: &CatalystConfig) -> crate::Result<Self> {
        let backend = ModelBackend::from_config(config)?;
        let embedder = Arc::new(backend.embedder());

        Ok(Self {
            model: Arc::new(backend),
            embedder,
            kv: build_kv_store(config.database_url.as_deref()),
            index: Arc::new(InMemoryVectorIndex::new()),
            artifacts: Arc::new(FsArtifactStore::new(config.cache_dir.clone())),
            assets: Box::new(AssetBackend::from_config(config)?),
        })
    }
}

#[derive(Debug, Clone)]
struct RunSettings {
    results_dir: PathBuf,
    /// Zero disables pruning.
    keep_n_results: usize,
    min_research_chars: usize,
    section_concurrency: usize,
}

impl From<&CatalystConfig> for RunSettings {
    fn from(config: &CatalystConfig) -> Self {
        Self {
            results_dir: config.results_dir.clone(),
            keep_n_results: config.keep_n_results,
            min_research_chars: config.min_research_chars,
            section_concurrency: config.section_concurrency,
        }
    }
}

/// One execution: the run context plus stage-to-stage scratch state.
struct Run {
    ctx: RunContext,
    intent_key: Option<IntentKey>,
    raw_research: Option<String>,
    rendered: Option<RenderedRun>,
    results_folder: Option<PathBuf>,
    failure: Option<CatalystError>,
}

impl Run {
    fn new(request: &str) -> Self {
        Self {
            ctx: RunContext::new(request),
            intent_key: None,
            raw_research: None,
            rendered: None,
            results_folder: None,
            failure: None,
        }
    }
}

pub struct PipelineOrchestrator {
    invoker: Arc<ResilientInvoker>,
    intent_cache: IntentCache,
    semantic_cache: SemanticCache,
    assembler: ReportAssembler,
    assets: Box<dyn AssetGenerator>,
    settings: RunSettings,
}

impl PipelineOrchestrator {
    pub fn new(config: &CatalystConfig, components: Components) -> Self {
        let invoker = Arc::new(ResilientInvoker::new(components.model, config.retry.clone()));

        Self {
            intent_cache: IntentCache::new(invoker.clone(), components.kv, config.l0_ttl),
            semantic_cache: SemanticCache::new(
                components.embedder,
                components.index,
                components.artifacts,
                config.l1_distance_threshold,
            ),
            assembler: ReportAssembler::new(invoker.clone(), config.section_concurrency),
            assets: components.assets,
            settings: RunSettings::from(config),
            invoker,
        }
    }

    pub fn from_config(config: &CatalystConfig) -> crate::Result<Self> {
        Ok(Self::new(config, Components::from_config(config)?))
    }

    /// Replace the fixed report section builders.
    pub fn with_section_builders(mut self, builders: Vec<Box<dyn SectionBuilder>>) -> Self {
        self.assembler = ReportAssembler::with_builders(
            self.invoker.clone(),
            builders,
            self.settings.section_concurrency,
        );
        self
    }

    pub fn is_ready(&self) -> bool {
        self.invoker.is_ready()
    }

    pub async fn run_pipeline(&self, raw_request: &str) -> RunResult {
        self.run_pipeline_with_cancel(raw_request, &CancelFlag::new())
            .await
    }

    /// Run one request to completion. Cancellation is only observed
    /// between stages.
    pub async fn run_pipeline_with_cancel(&self, raw_request: &str, cancel: &CancelFlag) -> RunResult {
        let started = Instant::now();
        let mut run = Run::new(raw_request);

        info!(
            run_id = %run.ctx.run_id,
            request = %raw_request,
            "Pipeline: starting run"
        );

        let mut stage = Stage::Briefing;
        while !stage.is_terminal() {
            let entered = Instant::now();

            let next = if cancel.is_cancelled() {
                run.failure = Some(CatalystError::Cancelled(stage.to_string()));
                Stage::Failed
            } else {
                match self.step(stage, &mut run).await {
                    Ok(next) => next,
                    Err(e) => {
                        run.failure = Some(e);
                        Stage::Failed
                    }
                }
            };

            record_transition(&mut run.ctx, stage, next, entered.elapsed());
            stage = next;
        }

        let result = self.finish(run, started).await;
        self.write_outputs(&result).await;
        result
    }

    async fn step(&self, stage: Stage, run: &mut Run) -> crate::Result<Stage> {
        match stage {
            Stage::Briefing => self.briefing(run).await,
            Stage::L0Check => self.l0_check(run).await,
            Stage::L1Check => self.l1_check(run).await,
            Stage::Research => self.research(run).await,
            Stage::Structuring => self.structuring(run).await,
            Stage::Assembly => self.assembly(run).await,
            Stage::FallbackSynthesis => self.fallback_synthesis(run).await,
            Stage::ReportingAndAssets => self.reporting_and_assets(run).await,
            Stage::L1Store => self.l1_store(run).await,
            Stage::Done | Stage::Failed => Ok(stage),
        }
    }

    async fn briefing(&self, run: &mut Run) -> crate::Result<Stage> {
        let brief = briefing::deconstruct(&self.invoker, &run.ctx.request, Utc::now()).await?;
        run.ctx.brief = Some(brief);
        Ok(Stage::L0Check)
    }

    async fn l0_check(&self, run: &mut Run) -> crate::Result<Stage> {
        let Some(key) = self.intent_cache.fingerprint(&run.ctx.request).await else {
            return Ok(Stage::L1Check);
        };
        let hit = self.intent_cache.lookup_with_key(&key).await;
        run.intent_key = Some(key);

        match hit {
            Some(reference) => {
                run.ctx.synthesis = Some(reference.report.metadata.synthesis);
                run.ctx.assets = reference.assets;
                run.ctx.report = Some(reference.report);
                run.ctx.cache = CacheOutcome::IntentHit;
                Ok(Stage::Done)
            }
            None => Ok(Stage::L1Check),
        }
    }

    async fn l1_check(&self, run: &mut Run) -> crate::Result<Stage> {
        let stable = run.ctx.brief()?.stable();

        match self.semantic_cache.find(&stable).await {
            Ok(Some(hit)) => {
                run.ctx.assets = cached_assets(&hit.report, &hit.artifacts);
                run.ctx.synthesis = Some(hit.report.metadata.synthesis);
                run.ctx.report = Some(hit.report);
                run.ctx.cache = CacheOutcome::SemanticHit {
                    distance: hit.distance,
                };
                Ok(Stage::Done)
            }
            Ok(None) => Ok(Stage::Research),
            Err(e) => {
                run.ctx
                    .warn(format!("semantic cache lookup failed, continuing uncached: {}", e));
                Ok(Stage::Research)
            }
        }
    }

    async fn research(&self, run: &mut Run) -> crate::Result<Stage> {
        let brief = run.ctx.brief()?.clone();

        let (enrichment, warnings) = research::enrich(&self.invoker, &brief).await;
        run.ctx.enrichment = enrichment;
        for warning in warnings {
            run.ctx.warn(warning);
        }

        match research::gather(&self.invoker, &brief, &run.ctx.enrichment).await {
            Ok(raw) => {
                run.raw_research = Some(raw);
                Ok(Stage::Structuring)
            }
            Err(e @ CatalystError::Configuration(_)) => Err(e),
            Err(e) => {
                run.ctx
                    .warn(format!("research failed, falling back to knowledge synthesis: {}", e));
                Ok(Stage::FallbackSynthesis)
            }
        }
    }

    async fn structuring(&self, run: &mut Run) -> crate::Result<Stage> {
        let brief = run.ctx.brief()?.clone();
        let raw = run.raw_research.take().unwrap_or_default();

        let (dossier, warnings) = research::structure(&self.invoker, &brief, raw).await;
        for warning in warnings {
            run.ctx.warn(warning);
        }

        let verdict = research::assess(&dossier, self.settings.min_research_chars);
        run.ctx.research = Some(dossier);

        match verdict {
            ResearchVerdict::Sufficient => Ok(Stage::Assembly),
            ResearchVerdict::Weak(reason) => {
                let weak = CatalystError::WeakContent(reason);
                run.ctx
                    .warn(format!("{}; falling back to knowledge synthesis", weak));
                Ok(Stage::FallbackSynthesis)
            }
        }
    }

    async fn assembly(&self, run: &mut Run) -> crate::Result<Stage> {
        match self
            .assembler
            .assemble(&mut run.ctx, SynthesisMode::Research)
            .await
        {
            Ok(report) => {
                run.ctx.report = Some(report);
                run.ctx.synthesis = Some(SynthesisPath::Research);
                Ok(Stage::ReportingAndAssets)
            }
            Err(e @ CatalystError::Configuration(_)) => Err(e),
            Err(e) => {
                run.ctx
                    .warn(format!("research synthesis failed, falling back: {}", e));
                Ok(Stage::FallbackSynthesis)
            }
        }
    }

    async fn fallback_synthesis(&self, run: &mut Run) -> crate::Result<Stage> {
        let report = self
            .assembler
            .assemble(&mut run.ctx, SynthesisMode::Knowledge)
            .await?;
        run.ctx.report = Some(report);
        run.ctx.synthesis = Some(SynthesisPath::Knowledge);
        Ok(Stage::ReportingAndAssets)
    }

    async fn reporting_and_assets(&self, run: &mut Run) -> crate::Result<Stage> {
        let rendered = {
            let report = run.ctx.report.as_ref().ok_or_else(|| {
                CatalystError::Assembly("no report reached reporting".to_string())
            })?;
            reporting::render(
                report,
                self.assets.as_ref(),
                self.settings.section_concurrency,
            )
            .await
        };

        let rendered = match rendered {
            Ok(rendered) => rendered,
            Err(e) => {
                run.ctx.warn(format!("report could not be rendered: {}", e));
                return Ok(Stage::L1Store);
            }
        };
        for warning in &rendered.warnings {
            run.ctx.warn(warning.as_str());
        }

        match reporting::persist(&self.settings.results_dir, run.ctx.run_id, &rendered).await {
            Ok((folder, assets)) => {
                run.ctx.assets = assets;
                run.results_folder = Some(folder);
            }
            Err(e) => run.ctx.warn(format!("run outputs not written: {}", e)),
        }

        run.rendered = Some(rendered);
        Ok(Stage::L1Store)
    }

    async fn l1_store(&self, run: &mut Run) -> crate::Result<Stage> {
        let stable = run.ctx.brief()?.stable();
        let artifacts = run
            .rendered
            .as_ref()
            .map(RenderedRun::artifacts)
            .unwrap_or_default();
        let Some(report) = run.ctx.report.as_ref() else {
            return Ok(Stage::Done);
        };

        match self.semantic_cache.put(&stable, report, &artifacts).await {
            Ok(PutOutcome::Stored) => debug!(run_id = %run.ctx.run_id, "Report stored in L1"),
            Ok(PutOutcome::Duplicate) => {
                debug!(run_id = %run.ctx.run_id, "Equivalent L1 entry exists, nothing stored")
            }
            Err(e) => run
                .ctx
                .warn(format!("semantic cache store skipped: {}", e)),
        }
        Ok(Stage::Done)
    }

    /// Turn the final context into a `RunResult`. Completed runs that did
    /// not come from L0 are written back to it.
    async fn finish(&self, run: Run, started: Instant) -> RunResult {
        let mut ctx = run.ctx;
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let report = match (run.failure, ctx.report.take()) {
            (None, Some(report)) => report,
            (failure, _) => {
                let err = failure.unwrap_or_else(|| {
                    CatalystError::Assembly("pipeline finished without a report".to_string())
                });
                let class = err.class();
                error!(
                    run_id = %ctx.run_id,
                    class = ?class,
                    elapsed_ms = execution_time_ms,
                    "Pipeline failed: {}",
                    err
                );
                return RunResult::Failed(FailedRun {
                    run_id: ctx.run_id,
                    class,
                    message: err.to_string(),
                    trace: ctx.trace,
                    execution_time_ms,
                });
            }
        };

        if !matches!(ctx.cache, CacheOutcome::IntentHit) {
            if let Some(key) = &run.intent_key {
                let reference = JobResultReference {
                    run_id: ctx.run_id,
                    report: report.clone(),
                    assets: ctx.assets.clone(),
                    results_dir: run.results_folder.as_ref().map(|p| p.display().to_string()),
                    completed_at: Utc::now(),
                };
                self.intent_cache.store_with_key(key, &reference).await;
            }
        }

        info!(
            run_id = %ctx.run_id,
            cache = %ctx.cache,
            synthesis = ?ctx.synthesis,
            warnings = ctx.warnings.len(),
            elapsed_ms = execution_time_ms,
            "Pipeline: run completed"
        );

        RunResult::Completed(CompletedRun {
            run_id: ctx.run_id,
            report,
            assets: ctx.assets,
            warnings: ctx.warnings,
            cache: ctx.cache,
            synthesis: ctx.synthesis,
            trace: ctx.trace,
            execution_time_ms,
        })
    }

    async fn write_outputs(&self, result: &RunResult) {
        match reporting::write_summary(&self.settings.results_dir, result).await {
            Ok(path) => debug!(path = %path.display(), "Run summary written"),
            Err(e) => warn!(run_id = %result.run_id(), "Run summary not written: {}", e),
        }

        if self.settings.keep_n_results == 0 {
            return;
        }
        match reporting::prune_results(&self.settings.results_dir, self.settings.keep_n_results).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Pruned old results"),
            Err(e) => warn!("Results pruning failed: {}", e),
        }
    }
}

fn record_transition(ctx: &mut RunContext, from: Stage, to: Stage, elapsed: Duration) {
    let elapsed_ms = elapsed.as_millis() as u64;
    info!(
        run_id = %ctx.run_id,
        stage = %from,
        next = %to,
        elapsed_ms,
        cache = %ctx.cache,
        "Stage transition"
    );
    ctx.trace.push(TransitionRecord {
        from: from.to_string(),
        to: to.to_string(),
        elapsed_ms,
        cache: ctx.cache,
    });
}

/// Asset references for a semantic hit. The report and prompt documents
/// are not assets.
/// Asset references for a semantic hit, labelled by key piece the same way
/// freshly persisted assets are.
fn cached_assets(report: &Report, artifacts: &[(String, String)]) -> Vec<AssetRef> {
    artifacts
        .iter()
        .filter(|(name, _)| name != REPORT_ARTIFACT && name != PROMPTS_FILE)
        .map(|(name, location)| {
            let kind = if name.ends_with(".png") {
                "image"
            } else if name.ends_with(".prompt.txt") {
                "prompt_sheet"
            } else {
                "file"
            };
            AssetRef {
                section: reporting::asset_section(report, name).unwrap_or_else(|| name.clone()),
                kind: kind.to_string(),
                location: location.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{FixedSectionBuilder, SectionInput, SectionOutput};
    use crate::cache::{InMemoryKvStore, InMemoryVectorIndex};
    use crate::error::ErrorClass;
    use crate::model::{HashingEmbedder, ScriptedModel, Task};
    use crate::models::Artifact;
    use crate::reporting::{REPORT_FILE, SUMMARY_FILE};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct Harness {
        orchestrator: PipelineOrchestrator,
        kv: Arc<InMemoryKvStore>,
        index: Arc<InMemoryVectorIndex>,
        config: CatalystConfig,
        _dir: TempDir,
    }

    fn harness(model: ScriptedModel) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = CatalystConfig::offline(dir.path());
        let artifacts = Arc::new(FsArtifactStore::new(config.cache_dir.clone()));
        harness_with(model, artifacts, dir, config)
    }

    fn harness_with(
        model: ScriptedModel,
        artifacts: Arc<dyn ArtifactStore>,
        dir: TempDir,
        config: CatalystConfig,
    ) -> Harness {
        let kv = Arc::new(InMemoryKvStore::new());
        let index = Arc::new(InMemoryVectorIndex::new());
        let components = Components {
            model: Arc::new(model),
            embedder: Arc::new(HashingEmbedder::default()),
            kv: kv.clone(),
            index: index.clone(),
            artifacts,
            assets: Box::new(AssetBackend::PromptSheet),
        };

        Harness {
            orchestrator: PipelineOrchestrator::new(&config, components),
            kv,
            index,
            config,
            _dir: dir,
        }
    }

    fn completed(result: RunResult) -> CompletedRun {
        match result {
            RunResult::Completed(run) => run,
            RunResult::Failed(run) => panic!("run failed: {:?}", run),
        }
    }

    fn failed(result: RunResult) -> FailedRun {
        match result {
            RunResult::Failed(run) => run,
            RunResult::Completed(run) => panic!("run unexpectedly completed: {:?}", run.trace),
        }
    }

    fn path(trace: &[TransitionRecord]) -> Vec<&str> {
        trace.iter().map(|t| t.to.as_str()).collect()
    }

    /// Never stores an L0 key, so repeated requests reach L1.
    fn without_intent(model_overrides: Option<Task>) -> ScriptedModel {
        ScriptedModel::offline_with(move |req, _| match req.task {
            Task::Intent => Some(Ok("{}".to_string())),
            task if Some(task) == model_overrides => {
                Some(Err(CatalystError::PermanentInvocation("down".into())))
            }
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_full_offline_run() {
        let h = harness(ScriptedModel::offline());

        let run = completed(h.orchestrator.run_pipeline("coastal utility for commuters").await);

        assert_eq!(run.cache, CacheOutcome::Miss);
        assert_eq!(run.synthesis, Some(SynthesisPath::Research));
        assert_eq!(run.report.key_pieces.len(), 3);
        assert_eq!(run.assets.len(), 3);
        assert!(run.warnings.is_empty(), "{:?}", run.warnings);
        assert_eq!(
            path(&run.trace),
            vec![
                "l0_check",
                "l1_check",
                "research",
                "structuring",
                "assembly",
                "reporting_and_assets",
                "l1_store",
                "done"
            ]
        );
        assert_eq!(run.trace[0].from, "briefing");

        let folder = h.config.results_dir.join(run.run_id.to_string());
        assert!(folder.join(REPORT_FILE).exists());
        assert!(folder.join(SUMMARY_FILE).exists());
        assert_eq!(h.index.len().await, 1);
        assert_eq!(h.kv.len().await, 1);
    }

    #[tokio::test]
    async fn test_repeated_request_hits_l0() {
        let model = ScriptedModel::offline();
        let h = harness(model.clone());

        let first = completed(h.orchestrator.run_pipeline("gothic pastoral knitwear").await);
        let second = completed(h.orchestrator.run_pipeline("gothic pastoral knitwear").await);

        assert_eq!(second.cache, CacheOutcome::IntentHit);
        assert_eq!(path(&second.trace), vec!["l0_check", "done"]);
        assert_eq!(second.report.overarching_theme, first.report.overarching_theme);
        assert_eq!(second.assets, first.assets);
        assert_eq!(model.calls(Task::Research), 1);
        assert_eq!(model.calls(Task::Brief), 2);
    }

    #[tokio::test]
    async fn test_l0_miss_falls_through_to_l1_hit() {
        let model = without_intent(None);
        let h = harness(model.clone());

        completed(h.orchestrator.run_pipeline("coastal utility").await);
        let second = completed(h.orchestrator.run_pipeline("coastal utility").await);

        match second.cache {
            CacheOutcome::SemanticHit { distance } => assert!(distance < 1e-4),
            other => panic!("expected semantic hit, got {}", other),
        }
        assert_eq!(path(&second.trace), vec!["l0_check", "l1_check", "done"]);
        assert_eq!(second.assets.len(), 3);
        assert!(second.assets.iter().all(|a| a.kind == "prompt_sheet"));
        assert_eq!(model.calls(Task::Research), 1);
        assert_eq!(h.index.len().await, 1);
        assert_eq!(h.kv.len().await, 0);
    }

    #[tokio::test]
    async fn test_weak_research_falls_back_to_knowledge() {
        let model = ScriptedModel::offline_with(|req, _| match req.task {
            Task::Research | Task::Structuring => Some(Ok("thin notes".to_string())),
            _ => None,
        });
        let h = harness(model.clone());

        let run = completed(h.orchestrator.run_pipeline("desert modernism").await);

        assert_eq!(run.synthesis, Some(SynthesisPath::Knowledge));
        assert!(path(&run.trace).contains(&"fallback_synthesis"));
        assert!(!path(&run.trace).contains(&"assembly"));
        assert!(run.warnings.iter().any(|w| w.contains("Weak content")));
        assert_eq!(model.calls(Task::KeyPieceNames), 1);
        // Fallback results are cached like any other success.
        assert_eq!(h.index.len().await, 1);
    }

    #[tokio::test]
    async fn test_research_failure_falls_back() {
        let model = ScriptedModel::offline_with(|req, _| {
            (req.task == Task::Research)
                .then(|| Err(CatalystError::PermanentInvocation("grounding disabled".into())))
        });
        let h = harness(model.clone());

        let run = completed(h.orchestrator.run_pipeline("desert modernism").await);

        assert_eq!(run.synthesis, Some(SynthesisPath::Knowledge));
        assert_eq!(
            &path(&run.trace)[..4],
            &["l0_check", "l1_check", "research", "fallback_synthesis"]
        );
        assert_eq!(model.calls(Task::Structuring), 0);
    }

    /// Required theme builder that only works without research.
    struct KnowledgeOnlyTheme;

    #[async_trait]
    impl SectionBuilder for KnowledgeOnlyTheme {
        fn section(&self) -> String {
            "theme".to_string()
        }

        fn required(&self) -> bool {
            true
        }

        async fn build(&self, _: &ResilientInvoker, input: &SectionInput) -> crate::Result<SectionOutput> {
            match input.mode {
                SynthesisMode::Research => {
                    Err(CatalystError::PermanentInvocation("research theme refused".into()))
                }
                SynthesisMode::Knowledge => Ok(SectionOutput::Theme(format!(
                    "{} from first principles",
                    input.brief.theme
                ))),
            }
        }
    }

    #[tokio::test]
    async fn test_required_section_failure_recovers_through_fallback() {
        let mut builders = FixedSectionBuilder::defaults();
        builders.retain(|b| b.section() != "theme");
        builders.push(Box::new(KnowledgeOnlyTheme));
        let h = harness(ScriptedModel::offline());
        let orchestrator = h.orchestrator.with_section_builders(builders);

        let run = completed(orchestrator.run_pipeline("tidal workwear").await);

        assert_eq!(run.synthesis, Some(SynthesisPath::Knowledge));
        assert!(run.report.overarching_theme.ends_with("from first principles"));
        let stages = path(&run.trace);
        let assembly = stages.iter().position(|s| *s == "assembly").unwrap();
        assert_eq!(stages[assembly + 1], "fallback_synthesis");
        assert!(run.report.validate().is_ok());
    }

    #[tokio::test]
    async fn test_fallback_exhaustion_fails_and_caches_nothing() {
        let model = ScriptedModel::offline_with(|req, _| {
            (req.task == Task::Theme)
                .then(|| Err(CatalystError::PermanentInvocation("refused".into())))
        });
        let h = harness(model);

        let run = failed(h.orchestrator.run_pipeline("tidal workwear").await);

        assert_eq!(run.class, ErrorClass::Synthesis);
        assert_eq!(path(&run.trace).last(), Some(&"failed"));
        assert_eq!(run.trace.last().unwrap().from, "fallback_synthesis");
        assert_eq!(h.index.len().await, 0);
        assert_eq!(h.kv.len().await, 0);
        let summary = h
            .config
            .results_dir
            .join(run.run_id.to_string())
            .join(SUMMARY_FILE);
        assert!(summary.exists());
    }

    #[tokio::test]
    async fn test_unready_backend_fails_as_configuration() {
        let model = ScriptedModel::unavailable();
        let h = harness(model.clone());
        assert!(!h.orchestrator.is_ready());

        let run = failed(h.orchestrator.run_pipeline("anything").await);

        assert_eq!(run.class, ErrorClass::Configuration);
        assert_eq!(path(&run.trace), vec!["failed"]);
        assert_eq!(model.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_is_checked_between_stages() {
        let model = ScriptedModel::offline();
        let h = harness(model.clone());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let run = failed(
            h.orchestrator
                .run_pipeline_with_cancel("coastal utility", &cancel)
                .await,
        );

        assert_eq!(run.class, ErrorClass::Cancelled);
        assert_eq!(model.total_calls(), 0);
        assert_eq!(h.index.len().await, 0);
    }

    #[tokio::test]
    async fn test_blank_theme_fails_before_research() {
        let model = ScriptedModel::offline_with(|req, _| {
            (req.task == Task::Brief).then(|| Ok(r#"{"theme_hint": "  "}"#.to_string()))
        });
        let h = harness(model.clone());

        let run = failed(h.orchestrator.run_pipeline("???").await);

        assert_eq!(run.trace.len(), 1);
        assert_eq!(run.trace[0].from, "briefing");
        assert_eq!(model.calls(Task::Research), 0);
    }

    /// Stages and reads like the filesystem store but never promotes.
    struct NoPromoteStore(FsArtifactStore);

    #[async_trait]
    impl ArtifactStore for NoPromoteStore {
        async fn write_staged(&self, txn: &str, artifacts: &[Artifact]) -> crate::Result<()> {
            self.0.write_staged(txn, artifacts).await
        }

        async fn promote(&self, _txn: &str, _key: &str) -> crate::Result<bool> {
            Err(CatalystError::Storage("disk full".into()))
        }

        async fn discard_staged(&self, txn: &str) -> crate::Result<()> {
            self.0.discard_staged(txn).await
        }

        async fn delete(&self, key: &str) -> crate::Result<()> {
            self.0.delete(key).await
        }

        async fn exists(&self, key: &str, names: &[String]) -> crate::Result<bool> {
            self.0.exists(key, names).await
        }

        async fn read(&self, key: &str, name: &str) -> crate::Result<Vec<u8>> {
            self.0.read(key, name).await
        }

        fn locate(&self, key: &str, name: &str) -> String {
            self.0.locate(key, name)
        }
    }

    #[tokio::test]
    async fn test_l1_store_failure_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let config = CatalystConfig::offline(dir.path());
        let store = Arc::new(NoPromoteStore(FsArtifactStore::new(config.cache_dir.clone())));
        let h = harness_with(ScriptedModel::offline(), store, dir, config);

        let run = completed(h.orchestrator.run_pipeline("coastal utility").await);

        assert!(run
            .warnings
            .iter()
            .any(|w| w.contains("semantic cache store skipped")));
        assert_eq!(h.index.len().await, 0);
        // The completed job still reaches L0.
        assert_eq!(h.kv.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_independent() {
        let h = harness(without_intent(None));

        let (a, b) = tokio::join!(
            h.orchestrator.run_pipeline("coastal utility workwear for ferry crossings"),
            h.orchestrator.run_pipeline("alpine tailoring in heavy boiled wool"),
        );
        let (a, b) = (completed(a), completed(b));

        assert_ne!(a.run_id, b.run_id);
        assert_ne!(a.report.overarching_theme, b.report.overarching_theme);
        assert_eq!(h.index.len().await, 2);
    }

    #[tokio::test]
    async fn test_optional_section_failure_still_completes() {
        let h = harness(without_intent(Some(Task::Accessories)));

        let run = completed(h.orchestrator.run_pipeline("coastal utility").await);

        assert!(run.report.accessories.is_empty());
        assert_eq!(run.warnings.len(), 1);
        assert_eq!(run.synthesis, Some(SynthesisPath::Research));
    }

    #[test]
    fn test_cached_assets_skip_documents() {
        let mut report = crate::models::fixtures::report("Workwear");
        report.key_pieces = vec![
            crate::models::fixtures::key_piece("Coat"),
            crate::models::fixtures::key_piece("Trouser"),
        ];
        let artifacts = vec![
            ("report.json".to_string(), "/c/k/report.json".to_string()),
            ("prompts.json".to_string(), "/c/k/prompts.json".to_string()),
            ("01_coat.png".to_string(), "/c/k/01_coat.png".to_string()),
            ("02_trouser.prompt.txt".to_string(), "/c/k/02_trouser.prompt.txt".to_string()),
            ("notes.txt".to_string(), "/c/k/notes.txt".to_string()),
        ];
        let refs = cached_assets(&report, &artifacts);
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].kind, "image");
        assert_eq!(refs[0].section, "Coat");
        assert_eq!(refs[1].kind, "prompt_sheet");
        assert_eq!(refs[1].section, "Trouser");
        assert_eq!(refs[2].section, "notes.txt");
    }
}
