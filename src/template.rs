//! Template substitution.
//!
//! Plain substitution accepts `$name` and `${name}` placeholders and
//! leaves unknown placeholders intact. Smart substitution additionally
//! bundles every `input_N` variable the template does not name into one
//! combined string of `<file_i …>` blocks, so paradigms stay decoupled
//! from the exact arity of their auxiliary inputs.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};
use crate::tools::coerce_string;

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(?:\$|\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("placeholder pattern is valid")
});

static INPUT_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^input_([0-9]+)$").expect("input key pattern is valid"));

/// Placeholder names a template references, in order of appearance
#[must_use]
pub fn placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .filter_map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

/// Substitute `$name` / `${name}` placeholders from `vars`.
///
/// Unknown placeholders are left intact; `$$` renders a literal `$`.
/// Non-string values substitute as their compact JSON form.
#[must_use]
pub fn safe_substitute(template: &str, vars: &Map<String, Value>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures<'_>| {
            let name = caps.get(1).or_else(|| caps.get(2));
            match name {
                Some(name) => match vars.get(name.as_str()) {
                    Some(value) => coerce_string(value),
                    None => caps.get(0).map_or(String::new(), |m| m.as_str().to_string()),
                },
                // the `$$` escape
                None => "$".to_string(),
            }
        })
        .to_string()
}

/// Outcome of a smart substitution
#[derive(Debug, Clone)]
pub struct SmartSubstitution {
    /// The substituted template
    pub text: String,
    /// The combined string bound under the combine-target key
    pub combined: String,
    /// `input_N` keys the template named itself
    pub used: Vec<String>,
    /// `input_N` keys bundled into `combined`, ascending by N
    pub bundled: Vec<String>,
}

/// Substitute a template while auto-bundling unused `input_N` variables.
///
/// The template text is taken from `vars[template_key]` and removed from
/// the substitution pool. Every `input_N` variable the template does not
/// name is rendered as one `<file_i …>` block (numbered sequentially,
/// ordered by ascending N) and the concatenation is bound under
/// `combine_key` before the final substitution pass.
pub fn smart_substitute(
    template_key: &str,
    combine_key: &str,
    vars: &Map<String, Value>,
) -> EngineResult<SmartSubstitution> {
    let template = vars
        .get(template_key)
        .map(coerce_string)
        .ok_or_else(|| EngineError::TemplateFailed {
            reason: format!("no template under key '{template_key}'"),
        })?;

    let mut pool = vars.clone();
    pool.remove(template_key);

    let named: Vec<String> = placeholders(&template);
    let mut unused: Vec<(u64, String)> = pool
        .keys()
        .filter_map(|key| {
            let caps = INPUT_KEY_RE.captures(key)?;
            let n: u64 = caps.get(1)?.as_str().parse().ok()?;
            if named.iter().any(|p| p == key) {
                None
            } else {
                Some((n, key.clone()))
            }
        })
        .collect();
    unused.sort_by_key(|(n, _)| *n);

    let mut blocks = Vec::with_capacity(unused.len());
    for (i, (_, key)) in unused.iter().enumerate() {
        let value = &pool[key];
        blocks.push(render_block(i + 1, value));
    }
    let combined = blocks.join("\n");
    pool.insert(combine_key.to_string(), Value::String(combined.clone()));

    let used: Vec<String> = named
        .into_iter()
        .filter(|p| INPUT_KEY_RE.is_match(p))
        .collect();
    Ok(SmartSubstitution {
        text: safe_substitute(&template, &pool),
        combined,
        used,
        bundled: unused.into_iter().map(|(_, key)| key).collect(),
    })
}

/// Content-bearing dict keys that become a block's inner text
const CONTENT_KEYS: &[&str] = &["content", "data", "text", "body"];

fn render_block(index: usize, value: &Value) -> String {
    match value {
        Value::Object(fields) => {
            let content_key = CONTENT_KEYS.iter().find(|k| fields.contains_key(**k));
            let mut attrs = String::new();
            for (key, field) in fields {
                if content_key.is_some_and(|ck| *ck == key.as_str()) {
                    continue;
                }
                attrs.push_str(&format!(
                    " {}=\"{}\"",
                    key,
                    coerce_string(field).replace('"', "&quot;")
                ));
            }
            match content_key {
                Some(ck) => format!(
                    "<file_{index}{attrs}>\n{}\n</file_{index}>",
                    coerce_string(&fields[*ck])
                ),
                None => format!("<file_{index}{attrs} />"),
            }
        }
        other => format!("<file_{index}>\n{}\n</file_{index}>", coerce_string(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(entries: &[(&str, Value)]) -> Map<String, Value> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_safe_substitute_both_forms() {
        let pool = vars(&[("name", json!("Ada")), ("n", json!(2))]);
        assert_eq!(
            safe_substitute("Hello $name, take ${n}", &pool),
            "Hello Ada, take 2"
        );
    }

    #[test]
    fn test_safe_substitute_leaves_unknown_intact() {
        let pool = vars(&[("known", json!("x"))]);
        assert_eq!(
            safe_substitute("$known and $unknown", &pool),
            "x and $unknown"
        );
    }

    #[test]
    fn test_dollar_escape() {
        let pool = Map::new();
        assert_eq!(safe_substitute("cost: $$5", &pool), "cost: $5");
    }

    #[test]
    fn test_smart_substitute_bundles_unused_inputs() {
        let pool = vars(&[
            ("prompt_template", json!("Primary: $input_1\n$input_files")),
            ("input_1", json!("first")),
            ("input_2", json!({"path": "b.md", "content": "World"})),
        ]);
        let out = smart_substitute("prompt_template", "input_files", &pool).unwrap();
        assert_eq!(out.bundled, vec!["input_2"]);
        assert_eq!(out.combined, "<file_1 path=\"b.md\">\nWorld\n</file_1>");
        assert_eq!(
            out.text,
            "Primary: first\n<file_1 path=\"b.md\">\nWorld\n</file_1>"
        );
    }

    #[test]
    fn test_bundle_order_is_ascending_n() {
        let pool = vars(&[
            ("prompt_template", json!("$input_files")),
            ("input_10", json!("ten")),
            ("input_2", json!("two")),
        ]);
        let out = smart_substitute("prompt_template", "input_files", &pool).unwrap();
        assert_eq!(out.bundled, vec!["input_2", "input_10"]);
        assert_eq!(
            out.combined,
            "<file_1>\ntwo\n</file_1>\n<file_2>\nten\n</file_2>"
        );
    }

    #[test]
    fn test_attribute_only_block_self_closes() {
        let pool = vars(&[
            ("prompt_template", json!("$input_files")),
            ("input_1", json!({"path": "a.md", "tag": "note"})),
        ]);
        let out = smart_substitute("prompt_template", "input_files", &pool).unwrap();
        assert_eq!(out.combined, "<file_1 path=\"a.md\" tag=\"note\" />");
    }

    #[test]
    fn test_used_inputs_are_not_bundled() {
        let pool = vars(&[
            ("prompt_template", json!("A: $input_1 B: $input_2")),
            ("input_1", json!("one")),
            ("input_2", json!("two")),
        ]);
        let out = smart_substitute("prompt_template", "input_files", &pool).unwrap();
        assert!(out.bundled.is_empty());
        assert_eq!(out.combined, "");
        assert_eq!(out.text, "A: one B: two");
    }

    #[test]
    fn test_missing_template_key_fails() {
        let pool = vars(&[("input_1", json!("x"))]);
        assert!(smart_substitute("prompt_template", "input_files", &pool).is_err());
    }

    #[test]
    fn test_dict_in_used_placeholder_substitutes_json_form() {
        let pool = vars(&[
            ("prompt_template", json!("Primary: $input_1")),
            ("input_1", json!({"path": "a.md", "content": "Hello"})),
        ]);
        let out = smart_substitute("prompt_template", "input_files", &pool).unwrap();
        assert_eq!(out.text, r#"Primary: {"content":"Hello","path":"a.md"}"#);
    }
}
