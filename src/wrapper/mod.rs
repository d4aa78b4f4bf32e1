//! Wrapper codec for typed references on the wire.
//!
//! Every typed reference crossing an inference boundary is a string of the
//! form `%{type}id(content)` (or `%id(content)` when typeless). This module
//! is the single source of truth for that encoding; no other component may
//! build or pick apart wrapper strings by hand.

pub mod resolve;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

static WRAPPER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^%(?:\{([a-zA-Z0-9_]+)\})?([a-zA-Z0-9]*)\((.*)\)$")
        .expect("wrapper pattern is valid")
});

static SPECIAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\{%\{([a-zA-Z0-9_]+)\}: (.*)\}$").expect("special pattern is valid")
});

/// Recognized wrapper kinds. The taxonomy is open: unknown type strings
/// still parse and round-trip through `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WrapperKind {
    FileLocation,
    FileLocationList,
    ScriptLocation,
    GeneratedScriptPath,
    PromptLocation,
    Prompt,
    SavePath,
    SaveDir,
    MemorizedParameter,
    Normal,
    Other(String),
}

impl WrapperKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::FileLocation => "file_location",
            Self::FileLocationList => "file_location_list",
            Self::ScriptLocation => "script_location",
            Self::GeneratedScriptPath => "generated_script_path",
            Self::PromptLocation => "prompt_location",
            Self::Prompt => "prompt",
            Self::SavePath => "save_path",
            Self::SaveDir => "save_dir",
            Self::MemorizedParameter => "memorized_parameter",
            Self::Normal => "normal",
            Self::Other(name) => name,
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "file_location" => Self::FileLocation,
            "file_location_list" => Self::FileLocationList,
            "script_location" => Self::ScriptLocation,
            "generated_script_path" => Self::GeneratedScriptPath,
            "prompt_location" => Self::PromptLocation,
            "prompt" => Self::Prompt,
            "save_path" => Self::SavePath,
            "save_dir" => Self::SaveDir,
            "memorized_parameter" => Self::MemorizedParameter,
            "normal" => Self::Normal,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for WrapperKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed form of a wrapped reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wrapped {
    pub kind: Option<WrapperKind>,
    pub id: String,
    pub content: String,
}

/// Render the canonical wrapped string with a fresh short id
#[must_use]
pub fn wrap(content: &str, kind: Option<&WrapperKind>) -> String {
    let id = short_id();
    match kind {
        Some(kind) => format!("%{{{}}}{}({})", kind.as_str(), id, content),
        None => format!("%{id}({content})"),
    }
}

/// Strict parse of the two wrapper forms; `None` for anything else
#[must_use]
pub fn parse(value: &str) -> Option<Wrapped> {
    let caps = WRAPPER_RE.captures(value)?;
    Some(Wrapped {
        kind: caps.get(1).map(|m| WrapperKind::from_name(m.as_str())),
        id: caps.get(2).map_or_else(String::new, |m| m.as_str().to_string()),
        content: caps.get(3).map_or_else(String::new, |m| m.as_str().to_string()),
    })
}

/// Fast check without allocating the parsed form
#[must_use]
pub fn is_wrapped(value: &str) -> bool {
    value.starts_with('%') && value.ends_with(')') && WRAPPER_RE.is_match(value)
}

/// Strip the wrapper, or return the input unchanged when it is not wrapped
#[must_use]
pub fn extract_inner(value: &str) -> String {
    match parse(value) {
        Some(wrapped) => wrapped.content,
        None => value.to_string(),
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_string()
}

/// Routing keys for special instructional values.
///
/// A special instructional value is the private encoding `{%{key}: payload}`
/// used during value preparation to route a resolved payload to a named
/// input-dict key instead of a positional `input_N` slot.
pub const SPECIAL_KEYS: &[&str] = &[
    "prompt_template",
    "save_dir",
    "save_path",
    "script_location",
    "prompt_location",
];

/// Render a special instructional value
#[must_use]
pub fn format_special(key: &str, payload: &str) -> String {
    format!("{{%{{{key}}}: {payload}}}")
}

/// Parse a special instructional value into `(key, payload)`; only the
/// recognized routing keys match.
#[must_use]
pub fn parse_special(value: &str) -> Option<(String, String)> {
    let caps = SPECIAL_RE.captures(value)?;
    let key = caps.get(1)?.as_str();
    if !SPECIAL_KEYS.contains(&key) {
        return None;
    }
    Some((key.to_string(), caps.get(2)?.as_str().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_known_kinds() {
        let kinds = [
            WrapperKind::FileLocation,
            WrapperKind::FileLocationList,
            WrapperKind::ScriptLocation,
            WrapperKind::GeneratedScriptPath,
            WrapperKind::PromptLocation,
            WrapperKind::Prompt,
            WrapperKind::SavePath,
            WrapperKind::SaveDir,
            WrapperKind::MemorizedParameter,
            WrapperKind::Normal,
        ];
        for kind in kinds {
            let wrapped = wrap("some content", Some(&kind));
            let parsed = parse(&wrapped).expect("wrapped value parses");
            assert_eq!(parsed.kind, Some(kind));
            assert_eq!(parsed.content, "some content");
        }
    }

    #[test]
    fn test_typeless_round_trip() {
        let wrapped = wrap("payload", None);
        let parsed = parse(&wrapped).expect("typeless wrapper parses");
        assert_eq!(parsed.kind, None);
        assert_eq!(parsed.content, "payload");
    }

    #[test]
    fn test_unknown_type_still_parses() {
        let parsed = parse("%{custom_kind}ab12(data)").expect("open taxonomy");
        assert_eq!(
            parsed.kind,
            Some(WrapperKind::Other("custom_kind".to_string()))
        );
        assert_eq!(parsed.id, "ab12");
        assert_eq!(parsed.content, "data");
    }

    #[test]
    fn test_content_spans_to_final_paren() {
        let parsed = parse("%{normal}x1(a(b)c)").expect("nested parens parse");
        assert_eq!(parsed.content, "a(b)c");
    }

    #[test]
    fn test_multiline_content() {
        let wrapped = wrap("line one\nline two", Some(&WrapperKind::Normal));
        let parsed = parse(&wrapped).expect("multiline content parses");
        assert_eq!(parsed.content, "line one\nline two");
    }

    #[test]
    fn test_unwrapped_strings_rejected() {
        assert!(parse("plain text").is_none());
        assert!(parse("%missing_paren").is_none());
        assert!(!is_wrapped("plain text"));
        assert!(!is_wrapped("{%{save_dir}: out}"));
    }

    #[test]
    fn test_extract_inner_passthrough() {
        assert_eq!(extract_inner("not wrapped"), "not wrapped");
        let wrapped = wrap("inner", Some(&WrapperKind::FileLocation));
        assert_eq!(extract_inner(&wrapped), "inner");
    }

    #[test]
    fn test_special_value_round_trip() {
        let special = format_special("save_dir", "out/dir");
        assert_eq!(special, "{%{save_dir}: out/dir}");
        let (key, payload) = parse_special(&special).expect("special parses");
        assert_eq!(key, "save_dir");
        assert_eq!(payload, "out/dir");
    }

    #[test]
    fn test_special_rejects_unknown_keys() {
        assert!(parse_special("{%{unknown_key}: x}").is_none());
        assert!(parse_special("not special").is_none());
    }
}
