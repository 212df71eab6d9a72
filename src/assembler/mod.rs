//! Divide-and-conquer report assembly
//!
//! The report is written by many small section builders running on a
//! bounded worker pool instead of one large call. Optional sections may
//! fail and stay empty; a required failure aborts assembly.

mod builders;
mod outline;

pub use builders::{FixedSection, FixedSectionBuilder, KeyPieceBuilder};
pub use outline::{split_research, PieceOutline};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::context::RunContext;
use crate::error::CatalystError;
use crate::models::{
    Brief, Enrichment, KeyPiece, NamedDescription, Report, ReportMetadata, SynthesisPath,
};
use crate::resilience::ResilientInvoker;

/// Where section builders get their material from.
pub type SynthesisMode = SynthesisPath;

#[derive(Debug, Clone)]
pub struct SectionInput {
    pub brief: Brief,
    pub enrichment: Enrichment,
    /// Structured research in research mode, `None` in knowledge mode.
    pub material: Option<String>,
    pub mode: SynthesisMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SectionOutput {
    Theme(String),
    CulturalDrivers(Vec<NamedDescription>),
    InfluentialModels(Vec<NamedDescription>),
    Mood(Vec<String>),
    NarrativeSetting(String),
    Accessories(Vec<NamedDescription>),
    KeyPiece(KeyPiece),
}

#[async_trait]
pub trait SectionBuilder: Send + Sync {
    fn section(&self) -> String;

    fn required(&self) -> bool;

    async fn build(
        &self,
        invoker: &ResilientInvoker,
        input: &SectionInput,
    ) -> crate::Result<SectionOutput>;
}

pub struct ReportAssembler {
    invoker: Arc<ResilientInvoker>,
    builders: Vec<Box<dyn SectionBuilder>>,
    concurrency: usize,
}

#[derive(Default)]
struct Draft {
    theme: Option<String>,
    cultural_drivers: Vec<NamedDescription>,
    influential_models: Vec<NamedDescription>,
    mood: Vec<String>,
    narrative_setting: Option<String>,
    accessories: Vec<NamedDescription>,
    key_pieces: Vec<KeyPiece>,
}

impl Draft {
    fn apply(&mut self, output: SectionOutput) {
        match output {
            SectionOutput::Theme(t) => self.theme = Some(t),
            SectionOutput::CulturalDrivers(v) => self.cultural_drivers = v,
            SectionOutput::InfluentialModels(v) => self.influential_models = v,
            SectionOutput::Mood(v) => self.mood = v,
            SectionOutput::NarrativeSetting(s) => self.narrative_setting = Some(s),
            SectionOutput::Accessories(v) => self.accessories = v,
            SectionOutput::KeyPiece(p) => self.key_pieces.push(p),
        }
    }
}

impl ReportAssembler {
    pub fn new(invoker: Arc<ResilientInvoker>, concurrency: usize) -> Self {
        Self::with_builders(invoker, FixedSectionBuilder::defaults(), concurrency)
    }

    /// Replace the fixed section builders. Key piece builders are always
    /// planned per run.
    pub fn with_builders(
        invoker: Arc<ResilientInvoker>,
        builders: Vec<Box<dyn SectionBuilder>>,
        concurrency: usize,
    ) -> Self {
        Self {
            invoker,
            builders,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn assemble(&self, ctx: &mut RunContext, mode: SynthesisMode) -> crate::Result<Report> {
        let started = Instant::now();
        let brief = ctx.brief()?.clone();

        let material = match mode {
            SynthesisMode::Research => {
                let research = ctx
                    .research
                    .as_ref()
                    .map(|r| r.structured.clone())
                    .filter(|r| !r.trim().is_empty())
                    .ok_or_else(|| {
                        CatalystError::Assembly("no research available for synthesis".to_string())
                    })?;
                Some(research)
            }
            SynthesisMode::Knowledge => None,
        };

        let input = SectionInput {
            brief,
            enrichment: ctx.enrichment.clone(),
            material,
            mode,
        };

        let outlines = self.plan(&input).await?;
        info!(
            run_id = %ctx.run_id,
            mode = %mode,
            pieces = outlines.len(),
            "Assembling report"
        );

        let piece_builders: Vec<Box<dyn SectionBuilder>> = outlines
            .into_iter()
            .map(|o| Box::new(KeyPieceBuilder::new(o)) as Box<dyn SectionBuilder>)
            .collect();
        let planned_pieces = piece_builders.len();

        let all: Vec<&dyn SectionBuilder> = self
            .builders
            .iter()
            .chain(piece_builders.iter())
            .map(|b| b.as_ref())
            .collect();

        let results = self.run_bounded(&all, &input).await;

        let mut draft = Draft::default();
        for (builder, result) in all.iter().zip(results) {
            match result {
                Ok(output) => draft.apply(output),
                Err(e @ CatalystError::Configuration(_)) => return Err(e),
                Err(e) if builder.required() => {
                    return Err(CatalystError::Assembly(format!(
                        "required section '{}' failed: {}",
                        builder.section(),
                        e
                    )));
                }
                Err(e) => ctx.warn(format!("section '{}' left empty: {}", builder.section(), e)),
            }
        }

        if draft.key_pieces.is_empty() {
            return Err(CatalystError::Assembly(format!(
                "none of the {} planned key pieces could be written",
                planned_pieces
            )));
        }

        let theme = draft.theme.filter(|t| !t.is_empty()).ok_or_else(|| {
            CatalystError::Assembly("no overarching theme was produced".to_string())
        })?;

        let report = Report {
            season: input.brief.season.clone(),
            year: input.brief.year,
            region: input.brief.region.clone(),
            target_audience: input.brief.target_audience.clone(),
            overarching_theme: theme,
            cultural_drivers: draft.cultural_drivers,
            influential_models: draft.influential_models,
            mood: draft.mood,
            narrative_setting: draft.narrative_setting,
            accessories: draft.accessories,
            key_pieces: draft.key_pieces,
            metadata: ReportMetadata {
                run_id: ctx.run_id,
                request: ctx.request.clone(),
                synthesis: mode,
                generated_at: Utc::now(),
            },
        };
        report.validate()?;

        debug!(
            run_id = %ctx.run_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Report assembled"
        );
        Ok(report)
    }

    async fn plan(&self, input: &SectionInput) -> crate::Result<Vec<PieceOutline>> {
        let from_research = input
            .material
            .as_deref()
            .map(split_research)
            .unwrap_or_default();
        if !from_research.is_empty() {
            return Ok(from_research);
        }

        let outlines = outline::plan_from_names(
            &self.invoker,
            &input.brief,
            &input.enrichment,
            input.material.as_deref(),
        )
        .await
        .map_err(|e| match e {
            CatalystError::Configuration(_) => e,
            other => CatalystError::Assembly(format!("key piece planning failed: {}", other)),
        })?;

        if outlines.is_empty() {
            return Err(CatalystError::Assembly(
                "key piece planning produced no pieces".to_string(),
            ));
        }
        Ok(outlines)
    }

    /// Run builders on a bounded pool. Results keep the builders' order.
    async fn run_bounded(
        &self,
        builders: &[&dyn SectionBuilder],
        input: &SectionInput,
    ) -> Vec<crate::Result<SectionOutput>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let invoker = self.invoker.as_ref();

        let tasks = builders.iter().map(|builder| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| CatalystError::Assembly(format!("worker pool closed: {}", e)))?;
                builder.build(invoker, input).await
            }
        });

        join_all(tasks).await
    }
}
