//! Request deconstruction

use chrono::{DateTime, Utc};
use tracing::info;

use crate::model::Task;
use crate::models::{Brief, BriefDraft};
use crate::prompts;
use crate::resilience::{OutputSchema, ResilientInvoker, StructuredOutput};

impl StructuredOutput for BriefDraft {
    const SCHEMA: OutputSchema = OutputSchema {
        name: "brief",
        required: &["theme_hint"],
        lists: &["key_attributes"],
        numbers: &[],
    };
}

/// Turn the raw request into a brief with operational defaults applied.
pub async fn deconstruct(
    invoker: &ResilientInvoker,
    request: &str,
    now: DateTime<Utc>,
) -> crate::Result<Brief> {
    let draft: BriefDraft = invoker.invoke_as(Task::Brief, prompts::brief(request)).await?;
    let brief = Brief::from_draft(draft, now)?;

    info!(
        theme = %brief.theme,
        season = %brief.season,
        year = brief.year,
        "Brief established"
    );
    Ok(brief)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalystError;
    use crate::model::ScriptedModel;
    use crate::resilience::RetryPolicy;
    use chrono::TimeZone;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_deconstruct_applies_defaults() {
        let model = ScriptedModel::new(|_, _| {
            Ok(r#"{"theme_hint": "Neo-romantic tailoring", "season": "auto", "year": "auto",
                  "key_attributes": "velvet"}"#
                .to_string())
        });
        let invoker = ResilientInvoker::new(Arc::new(model), RetryPolicy::default());
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 0, 0, 0).unwrap();

        let brief = deconstruct(&invoker, "romantic tailoring please", now)
            .await
            .unwrap();
        assert_eq!(brief.theme, "Neo-romantic tailoring");
        assert_eq!(brief.season, "Fall/Winter");
        assert_eq!(brief.year, 2026);
        assert_eq!(brief.constraints, vec!["velvet"]);
    }

    #[tokio::test]
    async fn test_missing_theme_fails() {
        let model = ScriptedModel::new(|_, _| Ok(r#"{"theme_hint": null}"#.to_string()));
        let invoker = ResilientInvoker::new(Arc::new(model), RetryPolicy::default());
        let err = deconstruct(&invoker, "?", Utc::now()).await.unwrap_err();
        assert!(matches!(err, CatalystError::SchemaValidation { .. }));
    }
}
