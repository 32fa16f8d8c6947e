use async_trait::async_trait;
use serde_json::{json, Value};
use signal_core::ReasoningProvider;

use crate::decode::{decode_stream_output, extract_codex_stream_text};
use crate::process::{run_cli, split_template};

const DEFAULT_CMD: &str = "codex exec --json {prompt}";

/// Wrapper around the Codex CLI.
pub struct CodexCli {
    /// Command template. A `{prompt}` token is substituted as a single
    /// argument; without one the prompt is passed via stdin.
    cmd_template: String,
}

impl CodexCli {
    pub fn new(cmd_template: Option<String>) -> Self {
        let cmd_template = cmd_template
            .or_else(|| std::env::var("CODEX_CMD").ok())
            .unwrap_or_else(|| DEFAULT_CMD.to_string());
        Self { cmd_template }
    }
}

fn resolve_codex_bin() -> String {
    std::env::var("CODEX_BIN").unwrap_or_else(|_| "codex".to_string())
}

#[async_trait]
impl ReasoningProvider for CodexCli {
    async fn analyze(&self, prompt: &str) -> Value {
        let (mut args, stdin_data) = split_template(&self.cmd_template, prompt);
        if args.is_empty() {
            return json!({ "error": "CODEX_CMD resolved to an empty command" });
        }

        let program = if args[0] == "codex" {
            resolve_codex_bin()
        } else {
            args[0].clone()
        };
        args.remove(0);

        match run_cli(&program, &args, stdin_data.as_deref()).await {
            Ok(out) if out.success => decode_stream_output(
                out.stdout.trim(),
                extract_codex_stream_text,
                "Codex JSON stream did not contain valid JSON in agent message",
            ),
            Ok(out) => {
                tracing::error!(
                    "Codex CLI error: stderr={:?} stdout={:?}",
                    out.stderr,
                    out.stdout.chars().take(500).collect::<String>()
                );
                let message = if out.stderr.is_empty() {
                    out.stdout
                } else {
                    out.stderr
                };
                json!({ "error": message })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!("Codex CLI not found. Is it installed?");
                json!({ "error": "Codex CLI not found" })
            }
            Err(e) => {
                tracing::error!("Codex CLI exception: {}", e);
                json!({ "error": e.to_string() })
            }
        }
    }
}
