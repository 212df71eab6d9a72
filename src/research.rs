//! Creative enrichment and web research

use serde::Deserialize;
use tracing::{info, warn};

use crate::model::Task;
use crate::models::{Brief, Enrichment, ResearchDossier, ResearchVerdict};
use crate::prompts;
use crate::resilience::{OutputSchema, ResilientInvoker, StructuredOutput};

#[derive(Debug, Deserialize)]
struct Concepts {
    #[serde(default)]
    concepts: Vec<String>,
}

impl StructuredOutput for Concepts {
    const SCHEMA: OutputSchema = OutputSchema {
        name: "concepts",
        required: &[],
        lists: &["concepts"],
        numbers: &[],
    };
}

#[derive(Debug, Deserialize)]
struct Antagonist {
    #[serde(default)]
    antagonist: Option<String>,
}

impl StructuredOutput for Antagonist {
    const SCHEMA: OutputSchema = OutputSchema {
        name: "antagonist",
        required: &[],
        lists: &[],
        numbers: &[],
    };
}

#[derive(Debug, Deserialize)]
struct Keywords {
    #[serde(default)]
    search_keywords: Vec<String>,
}

impl StructuredOutput for Keywords {
    const SCHEMA: OutputSchema = OutputSchema {
        name: "keywords",
        required: &[],
        lists: &["search_keywords"],
        numbers: &[],
    };
}

/// Calls `invoke` once and, when `is_empty` says the answer is unusable,
/// once more with a self-correction prompt.
async fn with_self_correction<T, F>(
    invoker: &ResilientInvoker,
    task: Task,
    prompt: String,
    is_empty: F,
) -> crate::Result<T>
where
    T: StructuredOutput,
    F: Fn(&T) -> bool,
{
    let first: T = invoker.invoke_as(task, prompt.clone()).await?;
    if !is_empty(&first) {
        return Ok(first);
    }
    warn!(task = %task, "Empty enrichment output, self-correcting once");
    invoker
        .invoke_as(task, prompts::self_correction(&prompt))
        .await
}

/// Concepts, antagonist and search keywords, produced concurrently.
/// Failures leave the field at its default and are reported as warnings.
pub async fn enrich(invoker: &ResilientInvoker, brief: &Brief) -> (Enrichment, Vec<String>) {
    let (concepts, antagonist, keywords) = tokio::join!(
        with_self_correction(invoker, Task::Concepts, prompts::concepts(brief), |c: &Concepts| {
            c.concepts.iter().all(|s| s.trim().is_empty())
        }),
        with_self_correction(
            invoker,
            Task::Antagonist,
            prompts::antagonist(brief),
            |a: &Antagonist| a.antagonist.as_deref().map_or(true, |s| s.trim().is_empty())
        ),
        with_self_correction(invoker, Task::Keywords, prompts::keywords(brief), |k: &Keywords| {
            k.search_keywords.iter().all(|s| s.trim().is_empty())
        }),
    );

    let mut enrichment = Enrichment::default();
    let mut warnings = Vec::new();

    match concepts {
        Ok(c) => enrichment.mood = clean_list(c.concepts),
        Err(e) => warnings.push(format!("creative concepts unavailable: {}", e)),
    }
    match antagonist {
        Ok(a) => {
            enrichment.antagonist = a
                .antagonist
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        }
        Err(e) => warnings.push(format!("creative antagonist unavailable: {}", e)),
    }
    match keywords {
        Ok(k) => enrichment.search_keywords = clean_list(k.search_keywords),
        Err(e) => warnings.push(format!("search keywords unavailable: {}", e)),
    }

    if enrichment.search_keywords.is_empty() {
        enrichment.search_keywords = vec![brief.theme.clone()];
    }

    info!(
        concepts = enrichment.mood.len(),
        keywords = enrichment.search_keywords.len(),
        antagonist = enrichment.antagonist.is_some(),
        "Enrichment complete"
    );
    (enrichment, warnings)
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Web research for the brief. An empty answer is returned as-is and left
/// for `assess` to judge.
pub async fn gather(
    invoker: &ResilientInvoker,
    brief: &Brief,
    enrichment: &Enrichment,
) -> crate::Result<String> {
    let raw = invoker
        .invoke_text(Task::Research, prompts::research(brief, enrichment))
        .await?;
    info!(chars = raw.chars().count(), "Research gathered");
    Ok(raw)
}

/// Reorganise raw research into per-piece notes. A structuring failure
/// keeps the raw research and is reported as a warning.
pub async fn structure(
    invoker: &ResilientInvoker,
    brief: &Brief,
    raw: String,
) -> (ResearchDossier, Vec<String>) {
    let mut warnings = Vec::new();
    let structured = if raw.trim().is_empty() {
        String::new()
    } else {
        match invoker
            .invoke_text(Task::Structuring, prompts::structuring(brief, &raw))
            .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warnings.push("structuring returned nothing; using raw research".to_string());
                raw.clone()
            }
            Err(e) => {
                warnings.push(format!("structuring failed; using raw research: {}", e));
                raw.clone()
            }
        }
    };

    (ResearchDossier { raw, structured }, warnings)
}

/// Research is weak when the structured text is shorter than `min_chars`.
pub fn assess(dossier: &ResearchDossier, min_chars: usize) -> ResearchVerdict {
    let len = dossier.structured.trim().chars().count();
    if len < min_chars {
        ResearchVerdict::Weak(format!(
            "research has {} characters, below the minimum of {}",
            len, min_chars
        ))
    } else {
        ResearchVerdict::Sufficient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalystError;
    use crate::model::ScriptedModel;
    use crate::resilience::RetryPolicy;
    use std::sync::Arc;
    use std::time::Duration;

    fn brief() -> Brief {
        Brief {
            theme: "Desert modernism".to_string(),
            target_audience: None,
            garment_type: None,
            region: None,
            season: "Spring/Summer".to_string(),
            year: 2027,
            constraints: vec![],
            brand: None,
        }
    }

    fn invoker(model: ScriptedModel) -> ResilientInvoker {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        ResilientInvoker::new(Arc::new(model), policy)
    }

    #[tokio::test]
    async fn test_enrichment_self_corrects_empty_concepts() {
        let model = ScriptedModel::offline_with(|req, n| match (req.task, n) {
            (Task::Concepts, 0) => Some(Ok(r#"{"concepts": []}"#.to_string())),
            _ => None,
        });
        let (enrichment, warnings) = enrich(&invoker(model.clone()), &brief()).await;
        assert!(!enrichment.mood.is_empty());
        assert!(warnings.is_empty());
        assert_eq!(model.calls(Task::Concepts), 2);
    }

    #[tokio::test]
    async fn test_enrichment_failure_is_warning() {
        let model = ScriptedModel::offline_with(|req, _| match req.task {
            Task::Antagonist => Some(Err(CatalystError::PermanentInvocation("blocked".into()))),
            _ => None,
        });
        let (enrichment, warnings) = enrich(&invoker(model), &brief()).await;
        assert!(enrichment.antagonist.is_none());
        assert_eq!(warnings.len(), 1);
        assert!(!enrichment.mood.is_empty());
    }

    #[tokio::test]
    async fn test_structuring_failure_keeps_raw() {
        let model = ScriptedModel::offline_with(|req, _| match req.task {
            Task::Structuring => Some(Err(CatalystError::PermanentInvocation("down".into()))),
            _ => None,
        });
        let invoker = invoker(model);
        let raw = gather(&invoker, &brief(), &Enrichment::default())
            .await
            .unwrap();
        let (dossier, warnings) = structure(&invoker, &brief(), raw).await;
        assert_eq!(dossier.raw, dossier.structured);
        assert_eq!(warnings.len(), 1);
        assert_eq!(assess(&dossier, 400), ResearchVerdict::Sufficient);
    }

    #[test]
    fn test_short_research_is_weak() {
        let dossier = ResearchDossier {
            raw: "tiny".into(),
            structured: "tiny".into(),
        };
        assert!(assess(&dossier, 400).is_weak());
        assert!(!assess(&dossier, 4).is_weak());
    }
}
