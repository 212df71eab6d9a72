//! Core data models for the creative pipeline

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{CatalystError, ErrorClass};

//
// ================= Brief =================
//

pub const SPRING_SUMMER: &str = "Spring/Summer";
pub const FALL_WINTER: &str = "Fall/Winter";

/// Structured representation of the user's creative request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Brief {
    pub theme: String,
    pub target_audience: Option<String>,
    pub garment_type: Option<String>,
    pub region: Option<String>,
    pub season: String,
    pub year: i32,
    /// Explicit constraints and key attributes from the request.
    pub constraints: Vec<String>,
    pub brand: Option<String>,
}

/// Raw deconstruction output. Season and year may be the literal `auto`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BriefDraft {
    #[serde(default)]
    pub theme_hint: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub garment_type: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub year: Option<serde_json::Value>,
    #[serde(default)]
    pub key_attributes: Vec<String>,
    #[serde(default)]
    pub brand: Option<String>,
}

impl Brief {
    /// Apply operational defaults to a deconstructed draft.
    pub fn from_draft(draft: BriefDraft, now: DateTime<Utc>) -> crate::Result<Self> {
        let theme = non_empty(draft.theme_hint).ok_or_else(|| {
            CatalystError::Briefing("deconstruction produced no theme".to_string())
        })?;

        let season = match non_empty(draft.season) {
            Some(s) if !s.eq_ignore_ascii_case("auto") => s,
            _ => season_for_month(now.month()).to_string(),
        };

        let year = match draft.year {
            Some(serde_json::Value::Number(n)) => n
                .as_i64()
                .and_then(|y| i32::try_from(y).ok())
                .unwrap_or_else(|| now.year()),
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or_else(|_| now.year()),
            _ => now.year(),
        };

        Ok(Self {
            theme,
            target_audience: non_empty(draft.target_audience),
            garment_type: non_empty(draft.garment_type),
            region: non_empty(draft.region),
            season,
            year,
            constraints: draft
                .key_attributes
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            brand: non_empty(draft.brand),
        })
    }

    /// The load-bearing subset of the brief used for semantic caching.
    pub fn stable(&self) -> StableBrief {
        StableBrief::new(
            &self.theme,
            self.target_audience.as_deref(),
            self.garment_type.as_deref(),
            self.region.as_deref(),
            &self.season,
            self.year,
            &self.constraints,
        )
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

pub fn season_for_month(month: u32) -> &'static str {
    if (4..=9).contains(&month) {
        SPRING_SUMMER
    } else {
        FALL_WINTER
    }
}

/// Normalized stable fields. Field order is fixed and constraints are
/// sorted so that serialization is canonical.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StableBrief {
    pub theme: String,
    pub audience: String,
    pub garment_type: String,
    pub region: String,
    pub season: String,
    pub year: i32,
    pub constraints: Vec<String>,
}

impl StableBrief {
    pub fn new(
        theme: &str,
        audience: Option<&str>,
        garment_type: Option<&str>,
        region: Option<&str>,
        season: &str,
        year: i32,
        constraints: &[String],
    ) -> Self {
        let mut constraints: Vec<String> = constraints
            .iter()
            .map(|c| normalize_text(c))
            .filter(|c| !c.is_empty())
            .collect();
        constraints.sort();
        constraints.dedup();

        Self {
            theme: normalize_text(theme),
            audience: normalize_text(audience.unwrap_or_default()),
            garment_type: normalize_text(garment_type.unwrap_or_default()),
            region: normalize_text(region.unwrap_or_default()),
            season: normalize_text(season),
            year,
            constraints,
        }
    }

    /// Text embedded for nearest-neighbor search.
    pub fn embedding_text(&self) -> String {
        let mut parts = vec![format!("theme: {}", self.theme)];
        if !self.audience.is_empty() {
            parts.push(format!("audience: {}", self.audience));
        }
        if !self.garment_type.is_empty() {
            parts.push(format!("garment: {}", self.garment_type));
        }
        if !self.region.is_empty() {
            parts.push(format!("region: {}", self.region));
        }
        parts.push(format!("season: {} {}", self.season, self.year));
        if !self.constraints.is_empty() {
            parts.push(format!("constraints: {}", self.constraints.join(", ")));
        }
        parts.join(" | ")
    }
}

/// Trim, lowercase and collapse internal whitespace.
pub fn normalize_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

//
// ================= Enrichment & Research =================
//

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Enrichment {
    /// Expanded creative concepts; the mood vector for synthesis.
    pub mood: Vec<String>,
    pub antagonist: Option<String>,
    pub search_keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum ResearchVerdict {
    Sufficient,
    Weak(String),
}

impl ResearchVerdict {
    pub fn is_weak(&self) -> bool {
        matches!(self, ResearchVerdict::Weak(_))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchDossier {
    pub raw: String,
    pub structured: String,
}

//
// ================= Report =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamedDescription {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColorTrend {
    pub name: String,
    #[serde(default)]
    pub pantone_code: Option<String>,
    #[serde(default)]
    pub hex_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FabricTrend {
    pub material: String,
    #[serde(default)]
    pub texture: Option<String>,
    #[serde(default)]
    pub sustainable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyPiece {
    pub key_piece_name: String,
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub inspired_by_designers: Vec<String>,
    #[serde(default)]
    pub wearer_profile: Option<String>,
    #[serde(default)]
    pub fabrics: Vec<FabricTrend>,
    #[serde(default)]
    pub colors: Vec<ColorTrend>,
    #[serde(default)]
    pub silhouettes: Vec<String>,
    #[serde(default)]
    pub details_trims: Vec<String>,
    #[serde(default)]
    pub suggested_pairings: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisPath {
    /// Built from external research.
    Research,
    /// Built from model knowledge only.
    Knowledge,
}

impl fmt::Display for SynthesisPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SynthesisPath::Research => "research",
            SynthesisPath::Knowledge => "knowledge",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportMetadata {
    pub run_id: Uuid,
    pub request: String,
    pub synthesis: SynthesisPath,
    pub generated_at: DateTime<Utc>,
}

/// The final, validated report. Fields without `#[serde(default)]` are
/// required top-level fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub season: String,
    pub year: i32,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    pub overarching_theme: String,
    #[serde(default)]
    pub cultural_drivers: Vec<NamedDescription>,
    #[serde(default)]
    pub influential_models: Vec<NamedDescription>,
    #[serde(default)]
    pub mood: Vec<String>,
    #[serde(default)]
    pub narrative_setting: Option<String>,
    #[serde(default)]
    pub accessories: Vec<NamedDescription>,
    pub key_pieces: Vec<KeyPiece>,
    pub metadata: ReportMetadata,
}

impl Report {
    /// Reject documents with missing or empty required fields.
    pub fn validate(&self) -> crate::Result<()> {
        let mut missing = Vec::new();

        if self.season.trim().is_empty() {
            missing.push("season");
        }
        if self.overarching_theme.trim().is_empty() {
            missing.push("overarching_theme");
        }
        if self.key_pieces.is_empty() {
            missing.push("key_pieces");
        }
        if self
            .key_pieces
            .iter()
            .any(|p| p.key_piece_name.trim().is_empty())
        {
            missing.push("key_pieces[].key_piece_name");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(CatalystError::Assembly(format!(
                "report missing required fields: {}",
                missing.join(", ")
            )))
        }
    }

    /// Parse and validate a stored report document.
    pub fn from_json(value: serde_json::Value) -> crate::Result<Self> {
        let report: Report = serde_json::from_value(value)?;
        report.validate()?;
        Ok(report)
    }
}

//
// ================= Artifacts & Assets =================
//

/// A named blob produced by a run and persisted with its L1 entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetRef {
    /// Report section the asset belongs to (e.g. a key piece name).
    pub section: String,
    pub kind: String,
    pub location: String,
}

//
// ================= Cache & Results =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CacheOutcome {
    Miss,
    IntentHit,
    SemanticHit { distance: f32 },
}

impl CacheOutcome {
    pub fn is_hit(&self) -> bool {
        !matches!(self, CacheOutcome::Miss)
    }
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheOutcome::Miss => write!(f, "miss"),
            CacheOutcome::IntentHit => write!(f, "l0_hit"),
            CacheOutcome::SemanticHit { distance } => write!(f, "l1_hit({:.4})", distance),
        }
    }
}

/// Value stored in the L0 intent cache for a completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResultReference {
    pub run_id: Uuid,
    pub report: Report,
    pub assets: Vec<AssetRef>,
    pub results_dir: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: String,
    pub to: String,
    pub elapsed_ms: u64,
    pub cache: CacheOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedRun {
    pub run_id: Uuid,
    pub report: Report,
    pub assets: Vec<AssetRef>,
    pub warnings: Vec<String>,
    pub cache: CacheOutcome,
    pub synthesis: Option<SynthesisPath>,
    pub trace: Vec<TransitionRecord>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedRun {
    pub run_id: Uuid,
    pub class: ErrorClass,
    pub message: String,
    pub trace: Vec<TransitionRecord>,
    pub execution_time_ms: u64,
}

/// Outcome of one pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunResult {
    Completed(CompletedRun),
    Failed(FailedRun),
}

impl RunResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunResult::Completed(_))
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            RunResult::Completed(run) => run.run_id,
            RunResult::Failed(run) => run.run_id,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn key_piece(name: &str) -> KeyPiece {
        KeyPiece {
            key_piece_name: name.to_string(),
            description: format!("{} in washed cotton", name),
            category: None,
            inspired_by_designers: vec![],
            wearer_profile: None,
            fabrics: vec![],
            colors: vec![],
            silhouettes: vec![],
            details_trims: vec![],
            suggested_pairings: vec![],
        }
    }

    pub fn report(theme: &str) -> Report {
        Report {
            season: FALL_WINTER.to_string(),
            year: 2026,
            region: None,
            target_audience: None,
            overarching_theme: theme.to_string(),
            cultural_drivers: vec![],
            influential_models: vec![],
            mood: vec![],
            narrative_setting: None,
            accessories: vec![],
            key_pieces: vec![key_piece("The Smock")],
            metadata: ReportMetadata {
                run_id: Uuid::new_v4(),
                request: theme.to_string(),
                synthesis: SynthesisPath::Research,
                generated_at: Utc::now(),
            },
        }
    }
}
