//! Runtime configuration
//!
//! Everything is read from the environment, after loading `.env` if one is
//! present. Missing values fall back to defaults; malformed values are a
//! configuration error.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CatalystError, TransientKind};
use crate::resilience::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelProvider {
    Gemini,
    /// Canned, schema-valid responses. No network access.
    Offline,
}

impl FromStr for ModelProvider {
    type Err = CatalystError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(ModelProvider::Gemini),
            "offline" | "mock" => Ok(ModelProvider::Offline),
            other => Err(CatalystError::Configuration(format!(
                "unknown model provider '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageModel {
    DallE3,
    GptImage1,
}

impl ImageModel {
    pub fn api_name(&self) -> &'static str {
        match self {
            ImageModel::DallE3 => "dall-e-3",
            ImageModel::GptImage1 => "gpt-image-1",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetMode {
    Disabled,
    /// Writes the generated image prompts without calling an image API.
    PromptSheet,
    OpenAiImages(ImageModel),
}

#[derive(Debug, Clone)]
pub struct CatalystConfig {
    pub model_provider: ModelProvider,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub embedding_model: String,

    pub retry: RetryPolicy,

    pub l1_distance_threshold: f32,
    pub l0_ttl: Duration,
    pub database_url: Option<String>,
    pub cache_dir: PathBuf,

    pub results_dir: PathBuf,
    pub keep_n_results: usize,

    pub section_concurrency: usize,
    pub min_research_chars: usize,

    pub asset_mode: AssetMode,
    pub image_api_key: Option<String>,

    pub api_port: u16,
}

impl Default for CatalystConfig {
    fn default() -> Self {
        Self {
            model_provider: ModelProvider::Gemini,
            gemini_api_key: None,
            gemini_model: "gemini-2.5-flash".to_string(),
            embedding_model: "embedding-001".to_string(),
            retry: RetryPolicy::default(),
            l1_distance_threshold: 0.10,
            l0_ttl: Duration::from_secs(86_400),
            database_url: None,
            cache_dir: PathBuf::from("./catalyst_cache"),
            results_dir: PathBuf::from("./results"),
            keep_n_results: 10,
            section_concurrency: 4,
            min_research_chars: 400,
            asset_mode: AssetMode::OpenAiImages(ImageModel::DallE3),
            image_api_key: None,
            api_port: 8080,
        }
    }
}

impl CatalystConfig {
    /// Offline configuration rooted in `dir`. Used by tests and demos.
    pub fn offline(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            model_provider: ModelProvider::Offline,
            cache_dir: dir.join("cache"),
            results_dir: dir.join("results"),
            asset_mode: AssetMode::PromptSheet,
            retry: RetryPolicy {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: Duration::ZERO,
                ..RetryPolicy::default()
            },
            ..Self::default()
        }
    }

    pub fn from_env() -> crate::Result<Self> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let model_provider = match var("CATALYST_MODEL_PROVIDER") {
            Some(v) => v.parse()?,
            None => defaults.model_provider,
        };

        let retry = RetryPolicy {
            max_attempts: parse_or("CATALYST_RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            base_delay: Duration::from_millis(parse_or(
                "CATALYST_RETRY_BASE_DELAY_MS",
                defaults.retry.base_delay.as_millis() as u64,
            )?),
            max_delay: Duration::from_millis(parse_or(
                "CATALYST_RETRY_MAX_DELAY_MS",
                defaults.retry.max_delay.as_millis() as u64,
            )?),
            jitter: Duration::from_millis(parse_or(
                "CATALYST_RETRY_JITTER_MS",
                defaults.retry.jitter.as_millis() as u64,
            )?),
            call_timeout: Duration::from_secs(parse_or(
                "CATALYST_CALL_TIMEOUT_SECS",
                defaults.retry.call_timeout.as_secs(),
            )?),
            retryable: vec![
                TransientKind::RateLimited,
                TransientKind::Timeout,
                TransientKind::ServerError,
                TransientKind::Network,
            ],
        };
        if retry.max_attempts == 0 {
            return Err(CatalystError::Configuration(
                "CATALYST_RETRY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let l1_distance_threshold: f32 =
            parse_or("CATALYST_L1_DISTANCE_THRESHOLD", defaults.l1_distance_threshold)?;
        if !(0.0..=2.0).contains(&l1_distance_threshold) {
            return Err(CatalystError::Configuration(format!(
                "CATALYST_L1_DISTANCE_THRESHOLD out of range: {}",
                l1_distance_threshold
            )));
        }

        let section_concurrency: usize =
            parse_or("CATALYST_SECTION_CONCURRENCY", defaults.section_concurrency)?;

        let asset_mode = if parse_bool("ENABLE_IMAGE_GENERATION", true)? {
            match var("IMAGE_GENERATION_MODEL").as_deref() {
                None | Some("dall-e-3") => AssetMode::OpenAiImages(ImageModel::DallE3),
                Some("gpt-image-1") => AssetMode::OpenAiImages(ImageModel::GptImage1),
                Some("prompt-sheet") => AssetMode::PromptSheet,
                Some(other) => {
                    return Err(CatalystError::Configuration(format!(
                        "unknown IMAGE_GENERATION_MODEL '{}'",
                        other
                    )))
                }
            }
        } else {
            AssetMode::Disabled
        };

        let api_port: u16 = match var("PORT").or_else(|| var("API_PORT")) {
            Some(v) => v.parse().map_err(|_| {
                CatalystError::Configuration(format!("invalid port '{}'", v))
            })?,
            None => defaults.api_port,
        };

        Ok(Self {
            model_provider,
            gemini_api_key: var("GEMINI_API_KEY"),
            gemini_model: var("GEMINI_MODEL_NAME").unwrap_or(defaults.gemini_model),
            embedding_model: var("GEMINI_EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            retry,
            l1_distance_threshold,
            l0_ttl: Duration::from_secs(parse_or(
                "CATALYST_L0_TTL_SECS",
                defaults.l0_ttl.as_secs(),
            )?),
            database_url: var("POSTGRES_URL").or_else(|| var("DATABASE_URL")),
            cache_dir: var("CATALYST_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            results_dir: var("CATALYST_RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.results_dir),
            keep_n_results: parse_or("CATALYST_KEEP_N_RESULTS", defaults.keep_n_results)?,
            section_concurrency: section_concurrency.max(1),
            min_research_chars: parse_or("CATALYST_MIN_RESEARCH_CHARS", defaults.min_research_chars)?,
            asset_mode,
            image_api_key: var("DALLE_API_KEY").or_else(|| var("OPENAI_API_KEY")),
            api_port,
        })
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: FromStr>(name: &str, default: T) -> crate::Result<T> {
    match var(name) {
        Some(v) => v.trim().parse().map_err(|_| {
            CatalystError::Configuration(format!("invalid value for {}: '{}'", name, v))
        }),
        None => Ok(default),
    }
}

fn parse_bool(name: &str, default: bool) -> crate::Result<bool> {
    match var(name).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(CatalystError::Configuration(format!(
            "invalid boolean for {}: '{}'",
            name, v
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!("Gemini".parse::<ModelProvider>().unwrap(), ModelProvider::Gemini);
        assert_eq!("offline".parse::<ModelProvider>().unwrap(), ModelProvider::Offline);
        assert!("claude".parse::<ModelProvider>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = CatalystConfig::default();
        assert_eq!(config.l1_distance_threshold, 0.10);
        assert_eq!(config.keep_n_results, 10);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.asset_mode, AssetMode::OpenAiImages(ImageModel::DallE3));
    }

    #[test]
    fn test_offline_config_uses_fast_retries() {
        let config = CatalystConfig::offline("/tmp/catalyst");
        assert_eq!(config.model_provider, ModelProvider::Offline);
        assert!(config.retry.base_delay < Duration::from_millis(10));
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/catalyst/cache"));
    }
}
