//! Generation and embedding backends
//!
//! The pipeline talks to language models through two narrow traits.
//! `GenerationModel` turns a prompt into raw text; `Embedder` turns text
//! into a vector. Neither retries: resilience lives in `ResilientInvoker`.

mod embedding;
mod gemini;
mod scripted;

pub use embedding::{EmbeddingBackend, HashingEmbedder};
pub use gemini::GeminiClient;
pub use scripted::ScriptedModel;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{CatalystConfig, ModelProvider};
use crate::error::CatalystError;

/// Every call site in the pipeline that reaches a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Intent,
    Brief,
    Concepts,
    Antagonist,
    Keywords,
    Research,
    Structuring,
    Theme,
    CulturalDrivers,
    InfluentialModels,
    Mood,
    NarrativeSetting,
    Accessories,
    KeyPieceNames,
    KeyPiece,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Task::Intent => "intent",
            Task::Brief => "brief",
            Task::Concepts => "concepts",
            Task::Antagonist => "antagonist",
            Task::Keywords => "keywords",
            Task::Research => "research",
            Task::Structuring => "structuring",
            Task::Theme => "theme",
            Task::CulturalDrivers => "cultural_drivers",
            Task::InfluentialModels => "influential_models",
            Task::Mood => "mood",
            Task::NarrativeSetting => "narrative_setting",
            Task::Accessories => "accessories",
            Task::KeyPieceNames => "key_piece_names",
            Task::KeyPiece => "key_piece",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub task: Task,
    pub prompt: String,
    /// Ask the backend for a JSON response body.
    pub json_output: bool,
}

#[async_trait]
pub trait GenerationModel: Send + Sync {
    fn name(&self) -> &str;

    /// Fails with `Configuration` when the backend can never serve a call.
    fn check_ready(&self) -> crate::Result<()>;

    async fn generate(&self, request: &GenerationRequest) -> crate::Result<String>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> crate::Result<Vec<f32>>;
}

/// Generation backend chosen once at startup.
#[derive(Clone)]
pub enum ModelBackend {
    Gemini(GeminiClient),
    Scripted(ScriptedModel),
}

impl ModelBackend {
    pub fn from_config(config: &CatalystConfig) -> crate::Result<Self> {
        match config.model_provider {
            ModelProvider::Gemini => {
                let api_key = config.gemini_api_key.clone().ok_or_else(|| {
                    CatalystError::Configuration("GEMINI_API_KEY not configured".to_string())
                })?;
                Ok(ModelBackend::Gemini(GeminiClient::new(
                    api_key,
                    &config.gemini_model,
                    &config.embedding_model,
                )?))
            }
            ModelProvider::Offline => Ok(ModelBackend::Scripted(ScriptedModel::offline())),
        }
    }

    /// Embedding backend that pairs with this generation backend.
    pub fn embedder(&self) -> EmbeddingBackend {
        match self {
            ModelBackend::Gemini(client) => EmbeddingBackend::Gemini(client.clone()),
            ModelBackend::Scripted(_) => EmbeddingBackend::Hashing(HashingEmbedder::default()),
        }
    }
}

#[async_trait]
impl GenerationModel for ModelBackend {
    fn name(&self) -> &str {
        match self {
            ModelBackend::Gemini(m) => m.name(),
            ModelBackend::Scripted(m) => m.name(),
        }
    }

    fn check_ready(&self) -> crate::Result<()> {
        match self {
            ModelBackend::Gemini(m) => m.check_ready(),
            ModelBackend::Scripted(m) => m.check_ready(),
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> crate::Result<String> {
        match self {
            ModelBackend::Gemini(m) => m.generate(request).await,
            ModelBackend::Scripted(m) => m.generate(request).await,
        }
    }
}
