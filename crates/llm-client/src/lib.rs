//! Reasoning-provider backends.
//!
//! Three interchangeable CLI wrappers (`claude`, `codex`, `opencode`)
//! behind the [`ReasoningProvider`] trait, selected by a factory keyed on
//! a configuration string. All of them share a two-stage response decode:
//! first unwrap a line-delimited streaming-event envelope if present, then
//! apply the JSON → fenced-JSON → narrative fallback chain. Both stages are
//! pure functions over text, independent of any subprocess.

pub mod claude;
pub mod codex;
pub mod decode;
pub mod opencode;
mod process;

pub use claude::ClaudeCli;
pub use codex::CodexCli;
pub use opencode::OpencodeCli;

use signal_core::{ReasoningProvider, SignalError};

/// Create a reasoning provider by backend name.
pub fn create_provider(backend: &str) -> Result<Box<dyn ReasoningProvider>, SignalError> {
    match backend {
        "claude" => Ok(Box::new(ClaudeCli::new())),
        "codex" => Ok(Box::new(CodexCli::new(None))),
        "opencode" => Ok(Box::new(OpencodeCli::new(None))),
        other => Err(SignalError::InvalidData(format!(
            "STOCK_SELECTOR_LLM must be 'codex', 'claude', or 'opencode', got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_accepts_known_backends() {
        assert!(create_provider("claude").is_ok());
        assert!(create_provider("codex").is_ok());
        assert!(create_provider("opencode").is_ok());
    }

    #[test]
    fn factory_rejects_unknown_backend() {
        let err = create_provider("gpt").err().unwrap();
        assert!(err.to_string().contains("STOCK_SELECTOR_LLM"));
    }
}
