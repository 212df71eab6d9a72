//! Scripted generation backend for development & testing

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{GenerationModel, GenerationRequest, Task};
use crate::error::CatalystError;
use crate::prompts::{labelled_value, KEY_PIECE_LABEL, REQUEST_LABEL, THEME_LABEL};

type Responder = dyn Fn(&GenerationRequest, u32) -> crate::Result<String> + Send + Sync;

/// Answers each request through a closure. The closure also receives how
/// many earlier calls were made for the same task, which makes
/// "fail the first N attempts" scripts easy to write.
#[derive(Clone)]
pub struct ScriptedModel {
    name: String,
    ready: bool,
    responder: Arc<Responder>,
    calls: Arc<Mutex<HashMap<Task, u32>>>,
}

impl ScriptedModel {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&GenerationRequest, u32) -> crate::Result<String> + Send + Sync + 'static,
    {
        Self {
            name: "scripted".to_string(),
            ready: true,
            responder: Arc::new(responder),
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Canned, schema-valid answers for every task.
    pub fn offline() -> Self {
        let mut model = Self::new(|request, _| Ok(offline_response(request)));
        model.name = "offline".to_string();
        model
    }

    /// Offline answers, except for the tasks handled by `overrides`.
    /// Returning `None` from the override falls through to the offline answer.
    pub fn offline_with<F>(overrides: F) -> Self
    where
        F: Fn(&GenerationRequest, u32) -> Option<crate::Result<String>> + Send + Sync + 'static,
    {
        Self::new(move |request, n| {
            overrides(request, n).unwrap_or_else(|| Ok(offline_response(request)))
        })
    }

    /// A backend that is never ready.
    pub fn unavailable() -> Self {
        let mut model = Self::new(|_, _| {
            Err(CatalystError::PermanentInvocation(
                "unavailable backend was called".to_string(),
            ))
        });
        model.ready = false;
        model
    }

    /// Number of calls made for `task` so far.
    pub fn calls(&self, task: Task) -> u32 {
        self.calls
            .lock()
            .map(|calls| calls.get(&task).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl GenerationModel for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_ready(&self) -> crate::Result<()> {
        if self.ready {
            Ok(())
        } else {
            Err(CatalystError::Configuration(format!(
                "generation backend '{}' is not available",
                self.name
            )))
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> crate::Result<String> {
        let previous = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|_| CatalystError::Storage("call counter poisoned".to_string()))?;
            let entry = calls.entry(request.task).or_insert(0);
            let previous = *entry;
            *entry += 1;
            previous
        };
        (self.responder)(request, previous)
    }
}

fn offline_response(request: &GenerationRequest) -> String {
    let prompt = request.prompt.as_str();
    let subject = labelled_value(prompt, REQUEST_LABEL)
        .or_else(|| labelled_value(prompt, THEME_LABEL))
        .unwrap_or("modern utility");

    let value = match request.task {
        Task::Intent => json!({
            "brand": null,
            "garment_type": null,
            "theme": subject.to_lowercase(),
            "season": null,
            "year": null,
            "target_audience": null,
            "region": null,
            "key_attributes": [],
        }),
        Task::Brief => json!({
            "theme_hint": subject,
            "target_audience": "design-literate urban professionals",
            "garment_type": null,
            "region": null,
            "season": "auto",
            "year": "auto",
            "key_attributes": [],
            "brand": null,
        }),
        Task::Concepts => json!({
            "concepts": ["tactile minimalism", "archival craft", "quiet utility"],
        }),
        Task::Antagonist => json!({
            "antagonist": "logo-heavy fast fashion: loud, disposable and trend-chasing",
        }),
        Task::Keywords => json!({
            "search_keywords": [
                format!("{} runway", subject),
                format!("{} street style", subject),
                "textile innovation".to_string(),
            ],
        }),
        Task::Research | Task::Structuring => {
            return offline_dossier(subject);
        }
        Task::Theme => json!({
            "overarching_theme": format!("{}: considered design for an uncertain decade", subject),
        }),
        Task::CulturalDrivers => json!({
            "cultural_drivers": [
                {"name": "Slow living", "description": "A turn towards durable, repairable wardrobes."},
                {"name": "Outdoor urbanism", "description": "City dressing borrows from trail gear."},
            ],
        }),
        Task::InfluentialModels => json!({
            "influential_models": [
                {"name": "The Quiet Archivist", "description": "Collects vintage workwear and wears it with tailoring."},
            ],
        }),
        Task::Mood => json!({
            "mood": ["muted", "tactile", "calm", "purposeful"],
        }),
        Task::NarrativeSetting => json!({
            "narrative_setting": "An empty coastal ferry terminal at dawn, salt on the windows.",
        }),
        Task::Accessories => json!({
            "accessories": [
                {"name": "Waxed canvas tote", "description": "Oversized, unlined, with leather handles."},
            ],
        }),
        Task::KeyPieceNames => json!({
            "key_pieces": ["The Field Coat", "The Pleated Trouser", "The Ribbed Knit"],
        }),
        Task::KeyPiece => {
            let name = labelled_value(prompt, KEY_PIECE_LABEL).unwrap_or("The Field Coat");
            json!({
                "key_piece_name": name,
                "description": format!("{} reworked in a restrained, functional register.", name),
                "category": "core",
                "inspired_by_designers": ["Margaret Howell", "Jil Sander"],
                "wearer_profile": "Commutes by bike, values pieces that last a decade.",
                "fabrics": [
                    {"material": "organic cotton gabardine", "texture": "dry hand", "sustainable": true},
                ],
                "colors": [
                    {"name": "Stone", "pantone_code": "14-1112 TCX", "hex_value": "#C8BBA7"},
                    {"name": "Ink", "pantone_code": "19-4010 TCX", "hex_value": "#2B2F36"},
                ],
                "silhouettes": ["relaxed", "straight"],
                "details_trims": ["horn buttons", "bellows pockets"],
                "suggested_pairings": ["ribbed knit", "leather derby"],
            })
        }
    };

    value.to_string()
}

fn offline_dossier(subject: &str) -> String {
    format!(
        "Overarching theme: {subject} reframed through durability and restraint.\n\
         Cultural drivers: slow living, repair culture and outdoor urbanism shape demand.\n\
         Influential designers: Margaret Howell, Jil Sander and a wave of small Japanese workwear labels.\n\
         Mood: muted, tactile, calm.\n\
         Narrative setting: a coastal ferry terminal at dawn.\n\
         Accessories: waxed canvas totes, leather derbies, enamel pins.\n\
         Key Piece 1: The Field Coat\n\
         Organic cotton gabardine, stone and ink colorways, relaxed A-line, bellows pockets.\n\
         Key Piece 2: The Pleated Trouser\n\
         Wool-linen blend, double forward pleats, wide straight leg, cropped at the ankle.\n\
         Key Piece 3: The Ribbed Knit\n\
         Undyed merino, chunky rib, boxy fit, saddle shoulder, worn over shirting.\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(task: Task, prompt: &str) -> GenerationRequest {
        GenerationRequest {
            task,
            prompt: prompt.to_string(),
            json_output: true,
        }
    }

    #[tokio::test]
    async fn test_offline_brief_uses_request_text() {
        let model = ScriptedModel::offline();
        let text = model
            .generate(&request(Task::Brief, "USER REQUEST: gorpcore for commuters"))
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["theme_hint"], "gorpcore for commuters");
        assert_eq!(model.calls(Task::Brief), 1);
    }

    #[tokio::test]
    async fn test_offline_dossier_is_long_enough_and_split_by_piece() {
        let model = ScriptedModel::offline();
        let text = model
            .generate(&request(Task::Research, "THEME: coastal utility"))
            .await
            .unwrap();
        assert!(text.len() > 400);
        assert_eq!(text.matches("Key Piece ").count(), 3);
    }

    #[tokio::test]
    async fn test_call_counter_passed_to_responder() {
        let model = ScriptedModel::new(|_, n| Ok(n.to_string()));
        let req = request(Task::Theme, "");
        assert_eq!(model.generate(&req).await.unwrap(), "0");
        assert_eq!(model.generate(&req).await.unwrap(), "1");
        assert_eq!(model.total_calls(), 2);
    }

    #[test]
    fn test_unavailable_fails_readiness() {
        let model = ScriptedModel::unavailable();
        assert!(matches!(
            model.check_ready(),
            Err(CatalystError::Configuration(_))
        ));
    }
}
