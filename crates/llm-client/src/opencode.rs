use async_trait::async_trait;
use serde_json::{json, Value};
use signal_core::ReasoningProvider;

use crate::decode::{decode_stream_output, extract_opencode_stream_text};
use crate::process::{run_cli, split_template};

const DEFAULT_CMD: &str = "opencode run {prompt} --format json";

/// Wrapper around the Opencode CLI.
pub struct OpencodeCli {
    cmd_template: String,
}

impl OpencodeCli {
    pub fn new(cmd_template: Option<String>) -> Self {
        Self {
            cmd_template: cmd_template.unwrap_or_else(|| DEFAULT_CMD.to_string()),
        }
    }
}

fn resolve_opencode_bin() -> String {
    std::env::var("OPENCODE_BIN").unwrap_or_else(|_| "opencode".to_string())
}

#[async_trait]
impl ReasoningProvider for OpencodeCli {
    async fn analyze(&self, prompt: &str) -> Value {
        let (mut args, stdin_data) = split_template(&self.cmd_template, prompt);
        if args.is_empty() {
            return json!({ "error": "Opencode command resolved to an empty command" });
        }

        let program = if args[0] == "opencode" {
            resolve_opencode_bin()
        } else {
            args[0].clone()
        };
        args.remove(0);

        match run_cli(&program, &args, stdin_data.as_deref()).await {
            Ok(out) if out.success => decode_stream_output(
                out.stdout.trim(),
                extract_opencode_stream_text,
                "Opencode JSON stream did not contain valid JSON in text message",
            ),
            Ok(out) => {
                tracing::error!(
                    "Opencode CLI error: stderr={:?} stdout={:?}",
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
                tracing::error!("Opencode CLI not found. Is it installed?");
                json!({ "error": "Opencode CLI not found" })
            }
            Err(e) => {
                tracing::error!("Opencode CLI exception: {}", e);
                json!({ "error": e.to_string() })
            }
        }
    }
}
