use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline states. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Briefing,
    L0Check,
    L1Check,
    Research,
    Structuring,
    Assembly,
    FallbackSynthesis,
    ReportingAndAssets,
    L1Store,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Briefing => "briefing",
            Stage::L0Check => "l0_check",
            Stage::L1Check => "l1_check",
            Stage::Research => "research",
            Stage::Structuring => "structuring",
            Stage::Assembly => "assembly",
            Stage::FallbackSynthesis => "fallback_synthesis",
            Stage::ReportingAndAssets => "reporting_and_assets",
            Stage::L1Store => "l1_store",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_stages() {
        assert!(Stage::Done.is_terminal());
        assert!(Stage::Failed.is_terminal());
        assert!(!Stage::FallbackSynthesis.is_terminal());
        assert_eq!(Stage::ReportingAndAssets.to_string(), "reporting_and_assets");
    }
}
