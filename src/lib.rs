//! Creative Catalyst
//!
//! The control layer of a creative-generation pipeline that turns a short
//! fashion brief into a validated, multi-section trend report plus visual
//! assets:
//! - Resilient model invocation with retry, timeouts and output repair
//! - Two-tier result cache (L0 intent fingerprint, L1 semantic neighbors)
//! - Divide-and-conquer report assembly on a bounded worker pool
//! - A state-machine orchestrator with a knowledge-only fallback path
//!
//! PIPELINE:
//! BRIEF → L0 → L1 → RESEARCH → STRUCTURE → ASSEMBLE (→ FALLBACK) → REPORT → L1 STORE → DONE

pub mod api;
pub mod assembler;
pub mod assets;
pub mod briefing;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod reporting;
pub mod research;
pub mod resilience;

pub use error::Result;

// Re-export common types
pub use config::CatalystConfig;
pub use context::CancelFlag;
pub use models::*;
pub use orchestrator::{Components, PipelineOrchestrator, Stage};
