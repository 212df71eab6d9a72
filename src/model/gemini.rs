//! Gemini API client
//!
//! Uses a long-lived reqwest::Client for connection pooling.
//! HTTP failures are classified into transient and permanent errors here;
//! retrying them is the invoker's job.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::{Embedder, GenerationModel, GenerationRequest, Task};
use crate::error::{CatalystError, TransientKind};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const API_KEY_HEADER: &str = "x-goog-api-key";

const SYSTEM_PROMPT: &str = r#"You are a senior creative director and fashion trend analyst.

Guidelines:
- Ground every statement in the brief and the material you are given
- Be specific: name fabrics, colors, silhouettes and designers
- Keep the voice editorial and concise
- When asked for JSON, return only the JSON document"#;

/// Reusable Gemini client (connection-pooled)
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    embedding_model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: &str, embedding_model: &str) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| {
                CatalystError::Configuration(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            api_key,
            model: model.to_string(),
            embedding_model: embedding_model.to_string(),
        })
    }

    fn url(&self, model: &str, method: &str) -> String {
        format!("{}/{}:{}", BASE_URL, model, method)
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &B,
    ) -> crate::Result<R> {
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, "Gemini API error response: {}", error_text);
            return Err(classify_status(status, &error_text));
        }

        response.json().await.map_err(|e| {
            CatalystError::transient(
                TransientKind::ServerError,
                format!("Gemini response could not be decoded: {}", e),
            )
        })
    }
}

#[async_trait]
impl GenerationModel for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    fn check_ready(&self) -> crate::Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(CatalystError::Configuration(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }
        Ok(())
    }

    async fn generate(&self, request: &GenerationRequest) -> crate::Result<String> {
        let body = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: request.prompt.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: temperature_for(request.task),
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 8192,
                response_mime_type: request
                    .json_output
                    .then(|| "application/json".to_string()),
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: SYSTEM_PROMPT.to_string(),
                }],
            },
            // Web research is grounded with Google Search.
            tools: (request.task == Task::Research).then(|| {
                vec![Tool {
                    google_search: serde_json::json!({}),
                }]
            }),
        };

        debug!(task = %request.task, model = %self.model, "Calling Gemini API");

        let url = self.url(&self.model, "generateContent");
        let response: GeminiResponse = self.post(&url, &body).await?;

        let text = response
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            let reason = response
                .candidates
                .first()
                .and_then(|c| c.finish_reason.clone())
                .unwrap_or_else(|| "no candidates".to_string());
            if reason == "SAFETY" {
                return Err(CatalystError::PermanentInvocation(
                    "Gemini blocked the response for safety".to_string(),
                ));
            }
            return Err(CatalystError::transient(
                TransientKind::ServerError,
                format!("empty response from Gemini ({})", reason),
            ));
        }

        Ok(text)
    }
}

#[async_trait]
impl Embedder for GeminiClient {
    async fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
        self.check_ready()?;

        let body = EmbedRequest {
            model: format!("models/{}", self.embedding_model),
            content: Content {
                parts: vec![Part {
                    text: text.to_string(),
                }],
            },
        };

        let url = self.url(&self.embedding_model, "embedContent");
        let response: EmbedResponse = self.post(&url, &body).await?;

        if response.embedding.values.is_empty() {
            return Err(CatalystError::transient(
                TransientKind::ServerError,
                "empty embedding from Gemini",
            ));
        }
        Ok(response.embedding.values)
    }
}

fn temperature_for(task: Task) -> f32 {
    match task {
        Task::Intent | Task::Brief | Task::Structuring | Task::KeyPieceNames => 0.1,
        Task::Concepts | Task::Antagonist | Task::Mood | Task::NarrativeSetting => 0.8,
        _ => 0.4,
    }
}

/// Messages never carry the request URL.
fn classify_send_error(e: reqwest::Error) -> CatalystError {
    let timeout = e.is_timeout();
    let message = format!("Gemini API request failed: {}", e.without_url());
    error!("{}", message);
    if timeout {
        CatalystError::transient(TransientKind::Timeout, message)
    } else {
        CatalystError::transient(TransientKind::Network, message)
    }
}

fn classify_status(status: StatusCode, body: &str) -> CatalystError {
    let message = format!("Gemini API error {}: {}", status, body);
    match status.as_u16() {
        429 => CatalystError::transient(TransientKind::RateLimited, message),
        408 => CatalystError::transient(TransientKind::Timeout, message),
        500..=599 => CatalystError::transient(TransientKind::ServerError, message),
        _ => CatalystError::PermanentInvocation(message),
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Tool {
    google_search: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: Content,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: "Describe the theme".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
                response_mime_type: Some("application/json".to_string()),
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: SYSTEM_PROMPT.to_string(),
                }],
            },
            tools: None,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("Describe the theme"));
        assert!(json.contains("application/json"));
        assert!(!json.contains("google_search"));
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "").transient_kind(),
            Some(TransientKind::RateLimited)
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, "").transient_kind(),
            Some(TransientKind::ServerError)
        );
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key"),
            CatalystError::PermanentInvocation(_)
        ));
    }

    #[test]
    fn test_empty_key_not_ready() {
        let client = GeminiClient::new(String::new(), "gemini-2.5-flash", "embedding-001").unwrap();
        assert!(matches!(
            client.check_ready(),
            Err(CatalystError::Configuration(_))
        ));
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"{\"a\":1}"}]},"finishReason":"STOP"}]}"#;
        let response: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.candidates[0].finish_reason.as_deref(), Some("STOP"));
        assert_eq!(response.candidates[0].content.parts[0].text, "{\"a\":1}");
    }

    #[test]
    fn test_url_does_not_carry_key() {
        let client = GeminiClient::new("secret-key".into(), "gemini-2.5-flash", "embedding-001").unwrap();
        let url = client.url(&client.model, "generateContent");
        assert!(url.ends_with("gemini-2.5-flash:generateContent"));
        assert!(!url.contains("secret-key"));
    }

    #[tokio::test]
    async fn test_send_errors_omit_request_url() {
        let client = GeminiClient::new("secret-key".into(), "gemini-2.5-flash", "embedding-001").unwrap();
        let err = client
            .post::<_, serde_json::Value>(
                "http://127.0.0.1:1/models/m:generateContent?key=secret-key",
                &serde_json::json!({}),
            )
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert!(!err.to_string().contains("secret-key"));
        assert!(!err.to_string().contains("127.0.0.1"));
    }
}
