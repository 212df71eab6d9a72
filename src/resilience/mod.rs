//! Resilient invocation of generation backends
//!
//! Wraps every model call with a per-call timeout, retry with exponential
//! backoff and jitter for transient failures, output sanitisation and schema
//! validation with a single corrective follow-up.

mod sanitize;

pub use sanitize::sanitize;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{CatalystError, TransientKind};
use crate::model::{GenerationModel, GenerationRequest, Task};
use crate::prompts;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
    pub call_timeout: Duration,
    pub retryable: Vec<TransientKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_millis(1000),
            call_timeout: Duration::from_secs(120),
            retryable: vec![
                TransientKind::RateLimited,
                TransientKind::Timeout,
                TransientKind::ServerError,
                TransientKind::Network,
            ],
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let exponential = self
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };

        exponential + jitter
    }

    fn is_retryable(&self, kind: TransientKind) -> bool {
        self.retryable.contains(&kind)
    }
}

/// Shape a structured response must have.
#[derive(Debug, Clone, Copy)]
pub struct OutputSchema {
    pub name: &'static str,
    /// Keys that must be present, non-null and non-empty.
    pub required: &'static [&'static str],
    /// Keys that hold lists. Scalars are wrapped and nulls dropped.
    pub lists: &'static [&'static str],
    /// Keys that hold numbers. Numeric strings are coerced.
    pub numbers: &'static [&'static str],
}

impl OutputSchema {
    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        let object = value
            .as_object()
            .ok_or_else(|| "expected a JSON object".to_string())?;

        for key in self.required {
            match object.get(*key) {
                None | Some(Value::Null) => return Err(format!("missing required field '{}'", key)),
                Some(Value::String(s)) if s.trim().is_empty() => {
                    return Err(format!("required field '{}' is empty", key))
                }
                Some(Value::Array(a)) if a.is_empty() => {
                    return Err(format!("required field '{}' is empty", key))
                }
                _ => {}
            }
        }

        for key in self.lists {
            if let Some(v) = object.get(*key) {
                if !v.is_array() {
                    return Err(format!("field '{}' must be a list", key));
                }
            }
        }

        Ok(())
    }
}

/// A type that can be produced by a structured invocation.
pub trait StructuredOutput: DeserializeOwned {
    const SCHEMA: OutputSchema;
}

#[derive(Debug, Clone)]
pub struct PromptSpec {
    pub task: Task,
    pub prompt: String,
}

impl PromptSpec {
    pub fn new(task: Task, prompt: impl Into<String>) -> Self {
        Self {
            task,
            prompt: prompt.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Structured(Value),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub payload: Payload,
    /// Backend calls made, including retries and the corrective follow-up.
    pub attempts: u32,
}

pub struct ResilientInvoker {
    model: Arc<dyn GenerationModel>,
    policy: RetryPolicy,
    not_ready: Option<String>,
}

impl ResilientInvoker {
    /// Readiness is checked once here; an unready backend makes every later
    /// call fail fast with a configuration error.
    pub fn new(model: Arc<dyn GenerationModel>, policy: RetryPolicy) -> Self {
        let not_ready = model.check_ready().err().map(|e| e.to_string());
        if let Some(reason) = &not_ready {
            warn!(backend = model.name(), "Generation backend not ready: {}", reason);
        }
        Self {
            model,
            policy,
            not_ready,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn is_ready(&self) -> bool {
        self.not_ready.is_none()
    }

    pub async fn invoke(
        &self,
        spec: &PromptSpec,
        schema: Option<&OutputSchema>,
    ) -> crate::Result<Invocation> {
        if let Some(reason) = &self.not_ready {
            return Err(CatalystError::Configuration(reason.clone()));
        }

        let request = GenerationRequest {
            task: spec.task,
            prompt: spec.prompt.clone(),
            json_output: schema.is_some(),
        };
        let (raw, attempts) = self.call_with_retry(&request).await?;

        let Some(schema) = schema else {
            return Ok(Invocation {
                payload: Payload::Text(raw),
                attempts,
            });
        };

        let error = match sanitize_and_validate(&raw, schema) {
            Ok(value) => {
                return Ok(Invocation {
                    payload: Payload::Structured(value),
                    attempts,
                })
            }
            Err(error) => error,
        };

        warn!(
            task = %spec.task,
            schema = schema.name,
            "Response failed validation, sending corrective follow-up: {}",
            error
        );

        let corrective = GenerationRequest {
            prompt: prompts::correction(&spec.prompt, schema.name, &error),
            ..request
        };
        let (raw, more) = self.call_with_retry(&corrective).await?;

        match sanitize_and_validate(&raw, schema) {
            Ok(value) => Ok(Invocation {
                payload: Payload::Structured(value),
                attempts: attempts + more,
            }),
            Err(error) => Err(CatalystError::schema(schema.name, error)),
        }
    }

    pub async fn invoke_as<T: StructuredOutput>(&self, task: Task, prompt: String) -> crate::Result<T> {
        let invocation = self.invoke(&PromptSpec::new(task, prompt), Some(&T::SCHEMA)).await?;
        match invocation.payload {
            Payload::Structured(value) => serde_json::from_value(value)
                .map_err(|e| CatalystError::schema(T::SCHEMA.name, e.to_string())),
            Payload::Text(_) => Err(CatalystError::schema(
                T::SCHEMA.name,
                "expected a structured payload",
            )),
        }
    }

    pub async fn invoke_text(&self, task: Task, prompt: String) -> crate::Result<String> {
        let invocation = self.invoke(&PromptSpec::new(task, prompt), None).await?;
        match invocation.payload {
            Payload::Text(text) => Ok(text),
            Payload::Structured(value) => Ok(value.to_string()),
        }
    }

    async fn call_with_retry(&self, request: &GenerationRequest) -> crate::Result<(String, u32)> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(task = %request.task, attempt, "Invoking {}", self.model.name());

            let result =
                match tokio::time::timeout(self.policy.call_timeout, self.model.generate(request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(CatalystError::transient(
                        TransientKind::Timeout,
                        format!("call exceeded {:?}", self.policy.call_timeout),
                    )),
                };

            let error = match result {
                Ok(text) => return Ok((text, attempt)),
                Err(error) => error,
            };

            let Some(kind) = error.transient_kind() else {
                return Err(error);
            };

            if !self.policy.is_retryable(kind) {
                return Err(CatalystError::PermanentInvocation(format!(
                    "{} failed with non-retryable {}: {}",
                    request.task, kind, error
                )));
            }

            if attempt >= max_attempts {
                return Err(CatalystError::PermanentInvocation(format!(
                    "{} failed after {} attempts: {}",
                    request.task, attempt, error
                )));
            }

            let delay = self.policy.backoff(attempt);
            warn!(
                task = %request.task,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Transient failure ({}), retrying",
                kind
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn sanitize_and_validate(raw: &str, schema: &OutputSchema) -> std::result::Result<Value, String> {
    let value = sanitize(raw, schema)?;
    schema.validate(&value)?;
    Ok(value)
}
