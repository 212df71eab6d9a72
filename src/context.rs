//! Per-run state carried between pipeline stages

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    AssetRef, Brief, CacheOutcome, Enrichment, Report, ResearchDossier, SynthesisPath,
    TransitionRecord,
};

/// Shared cancellation signal. Checked by the orchestrator between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub request: String,
    pub started_at: DateTime<Utc>,

    pub brief: Option<Brief>,
    pub enrichment: Enrichment,
    pub research: Option<ResearchDossier>,

    pub report: Option<Report>,
    pub synthesis: Option<SynthesisPath>,
    pub assets: Vec<AssetRef>,

    /// Non-fatal problems accumulated over the run.
    pub warnings: Vec<String>,
    pub cache: CacheOutcome,
    pub trace: Vec<TransitionRecord>,
}

impl RunContext {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            request: request.into(),
            started_at: Utc::now(),
            brief: None,
            enrichment: Enrichment::default(),
            research: None,
            report: None,
            synthesis: None,
            assets: Vec::new(),
            warnings: Vec::new(),
            cache: CacheOutcome::Miss,
            trace: Vec::new(),
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(run_id = %self.run_id, "{}", message);
        self.warnings.push(message);
    }

    pub fn brief(&self) -> crate::Result<&Brief> {
        self.brief.as_ref().ok_or_else(|| {
            crate::error::CatalystError::Briefing("brief has not been established".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_warnings_accumulate() {
        let mut ctx = RunContext::new("a request");
        ctx.warn("first");
        ctx.warn("second");
        assert_eq!(ctx.warnings, vec!["first", "second"]);
        assert!(ctx.brief().is_err());
    }
}
