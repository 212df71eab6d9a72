//! Visual asset generation for key pieces

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::{AssetMode, CatalystConfig, ImageModel};
use crate::error::{CatalystError, TransientKind};
use crate::models::Artifact;

const IMAGES_URL: &str = "https://api.openai.com/v1/images/generations";

/// Art-directed prompt for one key piece.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImagePrompt {
    pub key_piece_name: String,
    /// File stem for anything generated from this prompt.
    pub slug: String,
    pub prompt: String,
}

#[async_trait]
pub trait AssetGenerator: Send + Sync {
    fn kind(&self) -> &'static str;

    /// `Ok(None)` when the backend produces nothing for this prompt.
    async fn generate(&self, prompt: &ImagePrompt) -> crate::Result<Option<Artifact>>;
}

pub struct OpenAiImageClient {
    client: Client,
    api_key: String,
    model: ImageModel,
}

impl OpenAiImageClient {
    pub fn new(api_key: String, model: ImageModel) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(180))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| {
                CatalystError::Configuration(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            api_key,
            model,
        })
    }

    async fn download(&self, url: &str) -> crate::Result<Vec<u8>> {
        let response = self.client.get(url).send().await.map_err(|e| {
            CatalystError::transient(TransientKind::Network, format!("image download failed: {}", e))
        })?;
        if !response.status().is_success() {
            return Err(CatalystError::PermanentInvocation(format!(
                "image download returned {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await.map_err(|e| {
            CatalystError::transient(TransientKind::Network, format!("image download failed: {}", e))
        })?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
    b64_json: Option<String>,
}

#[async_trait]
impl AssetGenerator for OpenAiImageClient {
    fn kind(&self) -> &'static str {
        "image"
    }

    async fn generate(&self, prompt: &ImagePrompt) -> crate::Result<Option<Artifact>> {
        let body = ImageRequest {
            model: self.model.api_name(),
            prompt: &prompt.prompt,
            n: 1,
            size: "1024x1024",
        };

        debug!(piece = %prompt.key_piece_name, model = self.model.api_name(), "Requesting image");

        let response = self
            .client
            .post(IMAGES_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CatalystError::transient(TransientKind::Network, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(status = %status, "Image API error response: {}", text);
            return Err(CatalystError::PermanentInvocation(format!(
                "image API error {}: {}",
                status, text
            )));
        }

        let parsed: ImageResponse = response.json().await.map_err(|e| {
            CatalystError::PermanentInvocation(format!("image response unreadable: {}", e))
        })?;
        let image = parsed.data.into_iter().next().ok_or_else(|| {
            CatalystError::PermanentInvocation("image API returned no data".to_string())
        })?;

        let bytes = match (image.b64_json, image.url) {
            (Some(b64), _) => STANDARD
                .decode(b64.as_bytes())
                .map_err(|e| CatalystError::PermanentInvocation(format!("bad image payload: {}", e)))?,
            (None, Some(url)) => self.download(&url).await?,
            (None, None) => {
                return Err(CatalystError::PermanentInvocation(
                    "image API returned neither url nor payload".to_string(),
                ))
            }
        };

        Ok(Some(Artifact::new(format!("{}.png", prompt.slug), bytes)))
    }
}

/// Asset backend chosen once at startup.
pub enum AssetBackend {
    Disabled,
    /// One plain-text prompt sheet per piece; no external calls.
    PromptSheet,
    OpenAiImages(OpenAiImageClient),
}

impl AssetBackend {
    pub fn from_config(config: &CatalystConfig) -> crate::Result<Self> {
        let backend = match &config.asset_mode {
            AssetMode::Disabled => AssetBackend::Disabled,
            AssetMode::PromptSheet => AssetBackend::PromptSheet,
            AssetMode::OpenAiImages(model) => match &config.image_api_key {
                Some(key) => AssetBackend::OpenAiImages(OpenAiImageClient::new(key.clone(), *model)?),
                None => {
                    info!("No image API key configured; writing prompt sheets instead");
                    AssetBackend::PromptSheet
                }
            },
        };
        Ok(backend)
    }
}

#[async_trait]
impl AssetGenerator for AssetBackend {
    fn kind(&self) -> &'static str {
        match self {
            AssetBackend::Disabled => "none",
            AssetBackend::PromptSheet => "prompt_sheet",
            AssetBackend::OpenAiImages(client) => client.kind(),
        }
    }

    async fn generate(&self, prompt: &ImagePrompt) -> crate::Result<Option<Artifact>> {
        match self {
            AssetBackend::Disabled => Ok(None),
            AssetBackend::PromptSheet => Ok(Some(Artifact::new(
                format!("{}.prompt.txt", prompt.slug),
                format!("{}\n\n{}\n", prompt.key_piece_name, prompt.prompt).into_bytes(),
            ))),
            AssetBackend::OpenAiImages(client) => client.generate(prompt).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt() -> ImagePrompt {
        ImagePrompt {
            key_piece_name: "The Field Coat".to_string(),
            slug: "01_the_field_coat".to_string(),
            prompt: "Editorial photograph".to_string(),
        }
    }

    #[tokio::test]
    async fn test_prompt_sheet_backend() {
        let artifact = AssetBackend::PromptSheet
            .generate(&prompt())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(artifact.name, "01_the_field_coat.prompt.txt");
        assert!(String::from_utf8(artifact.bytes).unwrap().contains("Editorial"));
    }

    #[tokio::test]
    async fn test_disabled_backend_produces_nothing() {
        assert!(AssetBackend::Disabled.generate(&prompt()).await.unwrap().is_none());
    }

    #[test]
    fn test_missing_key_downgrades_to_prompt_sheet() {
        let config = CatalystConfig::default();
        assert!(matches!(
            AssetBackend::from_config(&config).unwrap(),
            AssetBackend::PromptSheet
        ));
    }

    #[test]
    fn test_image_request_serialization() {
        let body = ImageRequest {
            model: ImageModel::GptImage1.api_name(),
            prompt: "p",
            n: 1,
            size: "1024x1024",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-image-1");
    }
}
