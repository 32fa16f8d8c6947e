//! The analysis orchestration pipeline.
//!
//! Drives the end-to-end flow per ticker: data-source fan-out with
//! per-stage degradation, content-addressed per-category LLM scoring,
//! deterministic weighted synthesis, and progress streaming, with
//! idempotent append-only persistence through the store.

pub mod engine;
pub mod prompts;
pub mod validate;

#[cfg(test)]
mod tests;

pub use engine::{content_hash, AnalysisEngine, AuxSources};
pub use validate::validate_signal_result;
