//! Prompt templates
//!
//! Every prompt carries labelled lines (`USER REQUEST:`, `THEME:`,
//! `KEY PIECE:`) so that responses can be traced back to their inputs.

use crate::models::{Brief, Enrichment, KeyPiece, Report};

pub const REQUEST_LABEL: &str = "USER REQUEST:";
pub const THEME_LABEL: &str = "THEME:";
pub const KEY_PIECE_LABEL: &str = "KEY PIECE:";

/// Return the text following `label` on the first line that starts with it.
pub fn labelled_value<'a>(prompt: &'a str, label: &str) -> Option<&'a str> {
    prompt
        .lines()
        .find_map(|line| line.trim_start().strip_prefix(label))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn brief_block(brief: &Brief) -> String {
    let mut lines = vec![
        format!("{} {}", THEME_LABEL, brief.theme),
        format!("SEASON: {} {}", brief.season, brief.year),
    ];
    if let Some(audience) = &brief.target_audience {
        lines.push(format!("AUDIENCE: {}", audience));
    }
    if let Some(garment) = &brief.garment_type {
        lines.push(format!("GARMENT TYPE: {}", garment));
    }
    if let Some(region) = &brief.region {
        lines.push(format!("REGION: {}", region));
    }
    if let Some(brand) = &brief.brand {
        lines.push(format!("BRAND: {}", brand));
    }
    if !brief.constraints.is_empty() {
        lines.push(format!("CONSTRAINTS: {}", brief.constraints.join(", ")));
    }
    lines.join("\n")
}

fn enrichment_block(enrichment: &Enrichment) -> String {
    let mut lines = Vec::new();
    if !enrichment.mood.is_empty() {
        lines.push(format!("CREATIVE CONCEPTS: {}", enrichment.mood.join(", ")));
    }
    if let Some(antagonist) = &enrichment.antagonist {
        lines.push(format!("CREATIVE ANTAGONIST: {}", antagonist));
    }
    lines.join("\n")
}

pub fn intent(request: &str) -> String {
    format!(
        r#"Extract the core entities from a fashion trend request.
Return JSON with the keys brand, garment_type, theme, season, year,
target_audience, region (strings or null) and key_attributes (list of strings).
Use null for anything the request does not state. Do not invent values.

{} {}"#,
        REQUEST_LABEL,
        one_line(request)
    )
}

pub fn brief(request: &str) -> String {
    format!(
        r#"Deconstruct the request into a creative brief.
Return JSON with the keys:
- theme_hint: the central creative theme (required)
- target_audience, garment_type, region, brand: string or null
- season: "Spring/Summer", "Fall/Winter" or "auto" if not stated
- year: a four digit year or "auto" if not stated
- key_attributes: list of explicit constraints or attributes

{} {}"#,
        REQUEST_LABEL,
        one_line(request)
    )
}

pub fn concepts(brief: &Brief) -> String {
    format!(
        r#"Expand the brief into three to five evocative creative concepts that
will steer the mood of the collection.
Return JSON: {{"concepts": ["..."]}}

{}"#,
        brief_block(brief)
    )
}

pub fn antagonist(brief: &Brief) -> String {
    format!(
        r#"Name one creative antagonist: an aesthetic the collection should
deliberately push against, with a one sentence rationale.
Return JSON: {{"antagonist": "..."}}

{}"#,
        brief_block(brief)
    )
}

pub fn keywords(brief: &Brief) -> String {
    format!(
        r#"Produce six to ten web search keywords for researching this brief.
Return JSON: {{"search_keywords": ["..."]}}

{}"#,
        brief_block(brief)
    )
}

pub fn research(brief: &Brief, enrichment: &Enrichment) -> String {
    format!(
        r#"Research current runway, street style and cultural signals for the brief.
Write a detailed dossier covering the overarching theme, cultural drivers,
influential designers and models, the mood, a narrative setting, accessories,
and three to five key pieces. Start each key piece on its own line as
"Key Piece N: <name>" followed by fabrics, colors, silhouettes and details.

{}
{}
SEARCH KEYWORDS: {}"#,
        brief_block(brief),
        enrichment_block(enrichment),
        enrichment.search_keywords.join(", ")
    )
}

pub fn structuring(brief: &Brief, raw_research: &str) -> String {
    format!(
        r#"Reorganise the research dossier below into clearly headed sections.
Keep every fact; drop chatter. Keep each key piece under its own
"Key Piece N: <name>" line.

{}

RESEARCH:
{}"#,
        brief_block(brief),
        raw_research
    )
}

/// Instructions for one fixed report section. `material` is either the
/// structured research or empty for knowledge-only synthesis.
pub fn section(
    instruction: &str,
    shape: &str,
    brief: &Brief,
    enrichment: &Enrichment,
    material: Option<&str>,
) -> String {
    let grounding = match material {
        Some(m) => format!("Base your answer on this research:\n{}", m),
        None => "No research is available. Use your own expert knowledge of \
                 current fashion."
            .to_string(),
    };
    format!(
        "{}\nReturn JSON: {}\n\n{}\n{}\n\n{}",
        instruction,
        shape,
        brief_block(brief),
        enrichment_block(enrichment),
        grounding
    )
}

pub fn key_piece_names(brief: &Brief, enrichment: &Enrichment) -> String {
    format!(
        r#"Propose three to five key pieces for this collection.
Return JSON: {{"key_pieces": ["<piece name>", "..."]}}

{}
{}"#,
        brief_block(brief),
        enrichment_block(enrichment)
    )
}

pub fn key_piece(
    brief: &Brief,
    enrichment: &Enrichment,
    name: &str,
    material: Option<&str>,
) -> String {
    let grounding = match material {
        Some(m) => format!("Research notes for this piece:\n{}", m),
        None => "Use your own expert knowledge of current fashion.".to_string(),
    };
    format!(
        r#"Describe one key piece of the collection in detail.
Return JSON with key_piece_name, description, category, inspired_by_designers (list),
wearer_profile, fabrics (list of {{material, texture, sustainable}}),
colors (list of {{name, pantone_code, hex_value}}), silhouettes (list),
details_trims (list) and suggested_pairings (list).

{} {}
{}
{}

{}"#,
        KEY_PIECE_LABEL,
        name,
        brief_block(brief),
        enrichment_block(enrichment),
        grounding
    )
}

/// Follow-up sent after a response failed schema validation.
pub fn correction(original: &str, schema: &str, error: &str) -> String {
    format!(
        r#"{}

Your previous answer could not be used: {}.
Answer again with a single JSON document that matches the {} format exactly."#,
        original, error, schema
    )
}

/// Follow-up for an enrichment call that came back empty.
pub fn self_correction(original: &str) -> String {
    format!(
        "{}\n\nYour previous answer was empty. Provide a complete, non-empty answer.",
        original
    )
}

/// Art-directed image prompt for one key piece.
pub fn image(report: &Report, piece: &KeyPiece) -> String {
    let colors: Vec<&str> = piece.colors.iter().map(|c| c.name.as_str()).collect();
    let fabrics: Vec<&str> = piece.fabrics.iter().map(|f| f.material.as_str()).collect();
    let setting = report
        .narrative_setting
        .as_deref()
        .unwrap_or("a minimal studio with soft directional light");

    format!(
        "Editorial fashion photograph for a {} {} collection themed \"{}\". \
         Hero garment: {}. {} Fabrics: {}. Colors: {}. Silhouette: {}. \
         Setting: {}. Full-length shot, natural skin texture, 35mm film look.",
        report.season,
        report.year,
        report.overarching_theme,
        piece.key_piece_name,
        piece.description,
        or_unspecified(&fabrics),
        or_unspecified(&colors),
        or_unspecified(&piece.silhouettes.iter().map(String::as_str).collect::<Vec<_>>()),
        setting
    )
}

fn or_unspecified(values: &[&str]) -> String {
    if values.is_empty() {
        "designer's choice".to_string()
    } else {
        values.join(", ")
    }
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
