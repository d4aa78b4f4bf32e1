//! Central resolution table for wrapped references.
//!
//! Consulted by value preparation and by branch transforms. Misses never
//! abort the inference: a missing file, prompt or tool materializes as an
//! error string inside the resolved value so a downstream step can
//! surface a well-formed diagnostic.

use serde_json::Value;
use tracing::warn;

use super::{format_special, Wrapped, WrapperKind};
use crate::tools::{coerce_string, Body};

/// Resolve one parsed wrapper into its referenced content.
///
/// Unknown kinds (and the typeless form) return the inner content
/// unchanged; registering a new kind here automatically makes it
/// available as a branch transform.
pub async fn resolve_wrapped(body: &Body, wrapped: &Wrapped) -> Value {
    let content = wrapped.content.as_str();
    match &wrapped.kind {
        Some(WrapperKind::FileLocation) => Value::String(read_file(body, content).await),
        Some(WrapperKind::FileLocationList) => {
            let mut resolved = Vec::new();
            for path in list_paths(content) {
                resolved.push(Value::String(read_file(body, &path).await));
            }
            Value::Array(resolved)
        }
        Some(WrapperKind::Prompt) => {
            let text = read_file(body, content).await;
            Value::String(format_special("prompt_template", &text))
        }
        Some(WrapperKind::PromptLocation) => {
            let template = read_prompt(body, content).await;
            Value::String(format_special("prompt_template", &template))
        }
        Some(WrapperKind::ScriptLocation | WrapperKind::GeneratedScriptPath) => {
            Value::String(format_special("script_location", content))
        }
        Some(WrapperKind::SavePath) => Value::String(format_special("save_path", content)),
        Some(WrapperKind::SaveDir) => Value::String(format_special("save_dir", content)),
        Some(WrapperKind::MemorizedParameter) => Value::String(read_memorized(body, content).await),
        Some(WrapperKind::Normal | WrapperKind::Other(_)) | None => {
            Value::String(content.to_string())
        }
    }
}

/// Resolve a leaf value: wrapped strings go through the table, everything
/// else passes through unchanged.
pub async fn resolve_leaf(body: &Body, value: &Value) -> Value {
    if let Value::String(text) = value {
        if let Some(wrapped) = super::parse(text) {
            return resolve_wrapped(body, &wrapped).await;
        }
    }
    value.clone()
}

async fn read_file(body: &Body, path: &str) -> String {
    let Some(fs) = body.file_system.as_ref() else {
        warn!(path, "file_location resolution without a file_system tool");
        return format!("[error: file_system tool unavailable, cannot read '{path}']");
    };
    match fs.read(path).await {
        Ok(payload) => {
            if payload.get("status").and_then(Value::as_str) == Some("success") {
                payload
                    .get("content")
                    .map_or_else(String::new, coerce_string)
            } else {
                let message = payload
                    .get("message")
                    .map_or_else(|| "unknown error".to_string(), coerce_string);
                format!("[error reading '{path}': {message}]")
            }
        }
        Err(err) => format!("[error reading '{path}': {err}]"),
    }
}

async fn read_prompt(body: &Body, name: &str) -> String {
    let Some(prompts) = body.prompt_tool.as_ref() else {
        warn!(prompt = name, "prompt_location resolution without a prompt tool");
        return format!("[error: prompt tool unavailable, cannot load '{name}']");
    };
    match prompts.read(name).await {
        Ok(prompt) => prompt.template,
        Err(err) => format!("[error loading prompt '{name}': {err}]"),
    }
}

async fn read_memorized(body: &Body, name: &str) -> String {
    let Some(fs) = body.file_system.as_ref() else {
        warn!(name, "memorized_parameter resolution without a file_system tool");
        return format!("[error: file_system tool unavailable, cannot read memorized '{name}']");
    };
    match fs.read_memorized_value(name).await {
        Ok(payload) => {
            if payload.get("status").and_then(Value::as_str) == Some("success") {
                payload
                    .get("content")
                    .map_or_else(String::new, coerce_string)
            } else {
                let message = payload
                    .get("message")
                    .map_or_else(|| "unknown error".to_string(), coerce_string);
                format!("[error reading memorized '{name}': {message}]")
            }
        }
        Err(err) => format!("[error reading memorized '{name}': {err}]"),
    }
}

/// Paths of a `file_location_list` payload: a JSON array when it parses,
/// otherwise one path per non-empty line.
fn list_paths(content: &str) -> Vec<String> {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(content) {
        return items.iter().map(coerce_string).collect();
    }
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
