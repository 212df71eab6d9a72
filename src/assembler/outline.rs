//! Key piece planning

use serde::Deserialize;
use std::collections::HashSet;

use crate::model::Task;
use crate::models::{Brief, Enrichment};
use crate::prompts;
use crate::resilience::{OutputSchema, ResilientInvoker, StructuredOutput};

const MAX_PIECES: usize = 6;

/// One key piece to be written by its own builder.
#[derive(Debug, Clone, PartialEq)]
pub struct PieceOutline {
    pub name: String,
    /// Research notes scoped to this piece, when research is available.
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PieceNames {
    key_pieces: Vec<String>,
}

impl StructuredOutput for PieceNames {
    const SCHEMA: OutputSchema = OutputSchema {
        name: "key_piece_names",
        required: &["key_pieces"],
        lists: &["key_pieces"],
        numbers: &[],
    };
}

/// Split research at `Key Piece N: <name>` lines. Text before the first
/// heading is not part of any piece.
pub fn split_research(research: &str) -> Vec<PieceOutline> {
    let mut outlines: Vec<PieceOutline> = Vec::new();
    let mut notes: Vec<&str> = Vec::new();

    for line in research.lines() {
        if let Some(name) = heading_name(line, outlines.len() + 1) {
            attach_notes(&mut outlines, &mut notes);
            outlines.push(PieceOutline { name, notes: None });
        } else if !outlines.is_empty() {
            notes.push(line);
        }
    }
    attach_notes(&mut outlines, &mut notes);

    outlines.truncate(MAX_PIECES);
    outlines
}

fn attach_notes(outlines: &mut [PieceOutline], notes: &mut Vec<&str>) {
    if let Some(last) = outlines.last_mut() {
        let text = notes.join("\n").trim().to_string();
        last.notes = (!text.is_empty()).then_some(text);
    }
    notes.clear();
}

fn heading_name(line: &str, ordinal: usize) -> Option<String> {
    const PREFIX: &str = "key piece";

    let stripped = line
        .trim()
        .trim_start_matches(|c: char| matches!(c, '#' | '*' | '-' | ' '));
    if !stripped
        .get(..PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(PREFIX))
    {
        return None;
    }

    let digits = stripped[PREFIX.len()..].trim_start();
    if !digits.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    let name = digits
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .trim_start_matches(|c: char| matches!(c, ':' | '-' | '.' | ')' | ' '))
        .trim_end_matches(|c: char| matches!(c, '*' | '#' | ' '))
        .trim();

    Some(if name.is_empty() {
        format!("Key Piece {}", ordinal)
    } else {
        name.to_string()
    })
}

/// Ask the model for piece names. Used when there is no research to split.
pub async fn plan_from_names(
    invoker: &ResilientInvoker,
    brief: &Brief,
    enrichment: &Enrichment,
    notes: Option<&str>,
) -> crate::Result<Vec<PieceOutline>> {
    let names: PieceNames = invoker
        .invoke_as(Task::KeyPieceNames, prompts::key_piece_names(brief, enrichment))
        .await?;

    Ok(outlines_from_names(names.key_pieces, notes))
}

/// Trimmed, case-insensitively unique names in their original order.
fn outlines_from_names(names: Vec<String>, notes: Option<&str>) -> Vec<PieceOutline> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty() && seen.insert(n.to_lowercase()))
        .take(MAX_PIECES)
        .map(|name| PieceOutline {
            name,
            notes: notes.map(str::to_string),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_research_by_headings() {
        let research = "Intro text\n\
                        ## Key Piece 1: The Field Coat\n\
                        Gabardine, stone.\n\
                        More notes.\n\
                        **Key Piece 2 - The Pleated Trouser**\n\
                        Wool-linen.\n\
                        key piece 3:\n\
                        Undyed merino.";
        let outlines = split_research(research);
        assert_eq!(outlines.len(), 3);
        assert_eq!(outlines[0].name, "The Field Coat");
        assert_eq!(
            outlines[0].notes.as_deref(),
            Some("Gabardine, stone.\nMore notes.")
        );
        assert_eq!(outlines[1].name, "The Pleated Trouser");
        assert_eq!(outlines[2].name, "Key Piece 3");
        assert_eq!(outlines[2].notes.as_deref(), Some("Undyed merino."));
    }

    #[test]
    fn test_planned_names_are_unique() {
        let names = ["The Cape", "Field Coat", " the cape ", "", "FIELD COAT", "Smock"]
            .iter()
            .map(|n| n.to_string())
            .collect();
        let outlines = outlines_from_names(names, Some("notes"));
        let planned: Vec<&str> = outlines.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(planned, vec!["The Cape", "Field Coat", "Smock"]);
        assert_eq!(outlines[0].notes.as_deref(), Some("notes"));
    }

    #[test]
    fn test_prose_mentions_are_not_headings() {
        assert!(split_research("The key pieces are coats.\nKey piece of advice").is_empty());
    }
}
