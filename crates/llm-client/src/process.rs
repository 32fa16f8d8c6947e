//! Subprocess plumbing shared by the CLI wrappers.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub(crate) struct CliOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run a CLI to completion, optionally feeding the prompt on stdin.
pub(crate) async fn run_cli(
    program: &str,
    args: &[String],
    stdin_data: Option<&str>,
) -> std::io::Result<CliOutput> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn()?;

    if let Some(data) = stdin_data {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(data.as_bytes()).await?;
        }
    }

    let output = child.wait_with_output().await?;
    Ok(CliOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Split a command template into argv. A `{prompt}` token is replaced with
/// the prompt as a single argument; without one the prompt goes to stdin.
/// Returns `(args, stdin_data)`.
pub(crate) fn split_template(template: &str, prompt: &str) -> (Vec<String>, Option<String>) {
    let mut args: Vec<String> = template.split_whitespace().map(String::from).collect();
    let mut stdin_data = Some(prompt.to_string());
    for arg in &mut args {
        if arg == "{prompt}" {
            *arg = prompt.to_string();
            stdin_data = None;
        }
    }
    (args, stdin_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_substitutes_prompt_token() {
        let (args, stdin) = split_template("codex exec --json {prompt}", "hello world");
        assert_eq!(args, vec!["codex", "exec", "--json", "hello world"]);
        assert!(stdin.is_none());
    }

    #[test]
    fn template_without_token_uses_stdin() {
        let (args, stdin) = split_template("codex exec --json", "hello");
        assert_eq!(args, vec!["codex", "exec", "--json"]);
        assert_eq!(stdin.as_deref(), Some("hello"));
    }
}
