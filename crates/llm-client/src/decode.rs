//! Shared response decoding, pure functions over text.

use serde_json::{json, Value};

/// Extract a JSON object from raw CLI output, handling markdown code
/// blocks. Non-JSON output is wrapped as a narrative with a `parse_error`
/// flag rather than rejected.
pub fn parse_response(text: &str) -> Value {
    if let Some(obj) = try_parse_object(text) {
        return obj;
    }

    if let Some(inner) = extract_fenced(text, "```json") {
        if let Some(obj) = try_parse_object(&inner) {
            return obj;
        }
    }

    if let Some(inner) = extract_fenced(text, "```") {
        if let Some(obj) = try_parse_object(&inner) {
            return obj;
        }
    }

    json!({ "narrative": text, "parse_error": true })
}

fn try_parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Content between an opening fence marker and the next closing ```.
fn extract_fenced(text: &str, marker: &str) -> Option<String> {
    let start = text.find(marker)? + marker.len();
    let end = text[start..].find("```")? + start;
    Some(text[start..end].trim().to_string())
}

/// Unwrap the codex `--json` event stream: line-delimited JSON events where
/// the final payload lives in `item.completed` events carrying an
/// `agent_message` item. Returns `(text, was_stream)`; non-stream input
/// passes through untouched.
pub fn extract_codex_stream_text(text: &str) -> (String, bool) {
    const EVENT_TYPES: [&str; 4] = [
        "thread.started",
        "turn.started",
        "item.completed",
        "turn.completed",
    ];

    let mut last_agent_text: Option<String> = None;
    let mut is_stream = false;

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let Ok(payload) = serde_json::from_str::<Value>(line) else {
            continue;
        };

        let event_type = payload.get("type").and_then(Value::as_str).unwrap_or("");
        if EVENT_TYPES.contains(&event_type) {
            is_stream = true;
        }

        if event_type == "item.completed" {
            let item = payload.get("item").cloned().unwrap_or(Value::Null);
            if item.get("type").and_then(Value::as_str) == Some("agent_message") {
                if let Some(t) = item.get("text").and_then(Value::as_str) {
                    last_agent_text = Some(t.to_string());
                }
            }
        }
    }

    if is_stream {
        (
            last_agent_text.map(|t| t.trim().to_string()).unwrap_or_default(),
            true,
        )
    } else {
        (text.to_string(), false)
    }
}

/// Unwrap the opencode `--format json` event stream: the final payload is
/// the text of the last `text` event's `part`. Returns `(text, was_stream)`.
pub fn extract_opencode_stream_text(text: &str) -> (String, bool) {
    const EVENT_TYPES: [&str; 3] = ["step_start", "text", "step_finish"];

    let mut last_text: Option<String> = None;
    let mut is_stream = false;

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let Ok(payload) = serde_json::from_str::<Value>(line) else {
            continue;
        };

        let event_type = payload.get("type").and_then(Value::as_str).unwrap_or("");
        if EVENT_TYPES.contains(&event_type) {
            is_stream = true;
        }

        if event_type == "text" {
            if let Some(t) = payload
                .get("part")
                .and_then(|p| p.get("text"))
                .and_then(Value::as_str)
            {
                last_text = Some(t.to_string());
            }
        }
    }

    if is_stream {
        (
            last_text.map(|t| t.trim().to_string()).unwrap_or_default(),
            true,
        )
    } else {
        (text.to_string(), false)
    }
}

/// Decode a stream-capable CLI's stdout: unwrap the envelope when present
/// (strict JSON expected inside), otherwise fall through to the shared
/// parse chain.
pub fn decode_stream_output(
    text: &str,
    extract: fn(&str) -> (String, bool),
    stream_error: &str,
) -> Value {
    let (stream_text, stream_used) = extract(text);
    if stream_used {
        return match serde_json::from_str::<Value>(&stream_text) {
            Ok(value @ Value::Object(_)) => value,
            _ => json!({
                "error": stream_error,
                "raw_text": stream_text,
                "parse_error": true,
            }),
        };
    }
    parse_response(&stream_text)
}
