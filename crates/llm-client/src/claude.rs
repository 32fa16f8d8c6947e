use async_trait::async_trait;
use serde_json::{json, Value};
use signal_core::ReasoningProvider;

use crate::decode::parse_response;
use crate::process::run_cli;

/// Wrapper around the Claude Code CLI.
#[derive(Default)]
pub struct ClaudeCli;

impl ClaudeCli {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReasoningProvider for ClaudeCli {
    async fn analyze(&self, prompt: &str) -> Value {
        let args = vec!["--print".to_string(), "-p".to_string(), prompt.to_string()];
        match run_cli("claude", &args, None).await {
            Ok(out) if out.success => parse_response(out.stdout.trim()),
            Ok(out) => {
                tracing::error!("Claude CLI error: {}", out.stderr);
                json!({ "error": out.stderr })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!("Claude CLI not found. Is it installed?");
                json!({ "error": "Claude CLI not found" })
            }
            Err(e) => {
                tracing::error!("Claude CLI exception: {}", e);
                json!({ "error": e.to_string() })
            }
        }
    }
}
