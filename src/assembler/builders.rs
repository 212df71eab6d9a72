//! Section builders
//!
//! Each builder makes one narrowly-scoped structured call and returns one
//! part of the report.

use async_trait::async_trait;
use serde::Deserialize;

use super::outline::PieceOutline;
use super::{SectionBuilder, SectionInput, SectionOutput};
use crate::model::Task;
use crate::models::{KeyPiece, NamedDescription};
use crate::prompts;
use crate::resilience::{OutputSchema, ResilientInvoker, StructuredOutput};

impl StructuredOutput for KeyPiece {
    const SCHEMA: OutputSchema = OutputSchema {
        name: "key_piece",
        required: &["key_piece_name", "description"],
        lists: &[
            "inspired_by_designers",
            "fabrics",
            "colors",
            "silhouettes",
            "details_trims",
            "suggested_pairings",
        ],
        numbers: &[],
    };
}

#[derive(Deserialize)]
struct ThemeOutput {
    overarching_theme: String,
}

impl StructuredOutput for ThemeOutput {
    const SCHEMA: OutputSchema = OutputSchema {
        name: "theme",
        required: &["overarching_theme"],
        lists: &[],
        numbers: &[],
    };
}

#[derive(Deserialize)]
struct CulturalDriversOutput {
    cultural_drivers: Vec<NamedDescription>,
}

impl StructuredOutput for CulturalDriversOutput {
    const SCHEMA: OutputSchema = OutputSchema {
        name: "cultural_drivers",
        required: &["cultural_drivers"],
        lists: &["cultural_drivers"],
        numbers: &[],
    };
}

#[derive(Deserialize)]
struct InfluentialModelsOutput {
    influential_models: Vec<NamedDescription>,
}

impl StructuredOutput for InfluentialModelsOutput {
    const SCHEMA: OutputSchema = OutputSchema {
        name: "influential_models",
        required: &["influential_models"],
        lists: &["influential_models"],
        numbers: &[],
    };
}

#[derive(Deserialize)]
struct MoodOutput {
    mood: Vec<String>,
}

impl StructuredOutput for MoodOutput {
    const SCHEMA: OutputSchema = OutputSchema {
        name: "mood",
        required: &["mood"],
        lists: &["mood"],
        numbers: &[],
    };
}

#[derive(Deserialize)]
struct NarrativeSettingOutput {
    narrative_setting: String,
}

impl StructuredOutput for NarrativeSettingOutput {
    const SCHEMA: OutputSchema = OutputSchema {
        name: "narrative_setting",
        required: &["narrative_setting"],
        lists: &[],
        numbers: &[],
    };
}

#[derive(Deserialize)]
struct AccessoriesOutput {
    accessories: Vec<NamedDescription>,
}

impl StructuredOutput for AccessoriesOutput {
    const SCHEMA: OutputSchema = OutputSchema {
        name: "accessories",
        required: &["accessories"],
        lists: &["accessories"],
        numbers: &[],
    };
}

/// The fixed, always-present report sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedSection {
    Theme,
    CulturalDrivers,
    InfluentialModels,
    Mood,
    NarrativeSetting,
    Accessories,
}

impl FixedSection {
    pub const ALL: [FixedSection; 6] = [
        FixedSection::Theme,
        FixedSection::CulturalDrivers,
        FixedSection::InfluentialModels,
        FixedSection::Mood,
        FixedSection::NarrativeSetting,
        FixedSection::Accessories,
    ];

    fn task(self) -> Task {
        match self {
            FixedSection::Theme => Task::Theme,
            FixedSection::CulturalDrivers => Task::CulturalDrivers,
            FixedSection::InfluentialModels => Task::InfluentialModels,
            FixedSection::Mood => Task::Mood,
            FixedSection::NarrativeSetting => Task::NarrativeSetting,
            FixedSection::Accessories => Task::Accessories,
        }
    }

    fn instruction(self) -> (&'static str, &'static str) {
        match self {
            FixedSection::Theme => (
                "Write the overarching theme of the collection as one evocative sentence.",
                r#"{"overarching_theme": "..."}"#,
            ),
            FixedSection::CulturalDrivers => (
                "Identify two to four cultural drivers behind this trend.",
                r#"{"cultural_drivers": [{"name": "...", "description": "..."}]}"#,
            ),
            FixedSection::InfluentialModels => (
                "Name two to four influential designers, muses or archetypes for this trend.",
                r#"{"influential_models": [{"name": "...", "description": "..."}]}"#,
            ),
            FixedSection::Mood => (
                "Give four to six single-word mood descriptors.",
                r#"{"mood": ["..."]}"#,
            ),
            FixedSection::NarrativeSetting => (
                "Describe the narrative setting for a photo shoot in two sentences.",
                r#"{"narrative_setting": "..."}"#,
            ),
            FixedSection::Accessories => (
                "List two to four key accessories.",
                r#"{"accessories": [{"name": "...", "description": "..."}]}"#,
            ),
        }
    }
}

pub struct FixedSectionBuilder {
    section: FixedSection,
}

impl FixedSectionBuilder {
    pub fn new(section: FixedSection) -> Self {
        Self { section }
    }

    /// The default set: theme is required, everything else optional.
    pub fn defaults() -> Vec<Box<dyn SectionBuilder>> {
        FixedSection::ALL
            .into_iter()
            .map(|s| Box::new(FixedSectionBuilder::new(s)) as Box<dyn SectionBuilder>)
            .collect()
    }
}

#[async_trait]
impl SectionBuilder for FixedSectionBuilder {
    fn section(&self) -> String {
        self.section.task().to_string()
    }

    fn required(&self) -> bool {
        self.section == FixedSection::Theme
    }

    async fn build(
        &self,
        invoker: &ResilientInvoker,
        input: &SectionInput,
    ) -> crate::Result<SectionOutput> {
        let (instruction, shape) = self.section.instruction();
        let prompt = prompts::section(
            instruction,
            shape,
            &input.brief,
            &input.enrichment,
            input.material.as_deref(),
        );
        let task = self.section.task();

        Ok(match self.section {
            FixedSection::Theme => {
                let out: ThemeOutput = invoker.invoke_as(task, prompt).await?;
                SectionOutput::Theme(out.overarching_theme.trim().to_string())
            }
            FixedSection::CulturalDrivers => {
                let out: CulturalDriversOutput = invoker.invoke_as(task, prompt).await?;
                SectionOutput::CulturalDrivers(out.cultural_drivers)
            }
            FixedSection::InfluentialModels => {
                let out: InfluentialModelsOutput = invoker.invoke_as(task, prompt).await?;
                SectionOutput::InfluentialModels(out.influential_models)
            }
            FixedSection::Mood => {
                let out: MoodOutput = invoker.invoke_as(task, prompt).await?;
                SectionOutput::Mood(out.mood)
            }
            FixedSection::NarrativeSetting => {
                let out: NarrativeSettingOutput = invoker.invoke_as(task, prompt).await?;
                SectionOutput::NarrativeSetting(out.narrative_setting)
            }
            FixedSection::Accessories => {
                let out: AccessoriesOutput = invoker.invoke_as(task, prompt).await?;
                SectionOutput::Accessories(out.accessories)
            }
        })
    }
}

/// Writes one planned key piece.
pub struct KeyPieceBuilder {
    outline: PieceOutline,
}

impl KeyPieceBuilder {
    pub fn new(outline: PieceOutline) -> Self {
        Self { outline }
    }
}

#[async_trait]
impl SectionBuilder for KeyPieceBuilder {
    fn section(&self) -> String {
        format!("key_piece:{}", self.outline.name)
    }

    fn required(&self) -> bool {
        false
    }

    async fn build(
        &self,
        invoker: &ResilientInvoker,
        input: &SectionInput,
    ) -> crate::Result<SectionOutput> {
        let notes = self
            .outline
            .notes
            .as_deref()
            .or(input.material.as_deref());
        let prompt = prompts::key_piece(&input.brief, &input.enrichment, &self.outline.name, notes);

        let piece: KeyPiece = invoker.invoke_as(Task::KeyPiece, prompt).await?;
        Ok(SectionOutput::KeyPiece(piece))
    }
}
