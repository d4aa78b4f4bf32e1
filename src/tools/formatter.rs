//! Formatter affordances.
//!
//! These are the built-in capabilities paradigms compose around the
//! external tools: extracting structured output from model text, drilling
//! into dicts, wrapping results as typed output references, and building
//! the substitution callables used to assemble prompts.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::{coerce_string, BoundFn, CallArgs, Slot};
use crate::error::{EngineError, EngineResult};
use crate::template;
use crate::wrapper::{self, WrapperKind};

static FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[a-zA-Z0-9_]*\n?(.*?)\n?```").expect("fence pattern is valid")
});

/// Bind a formatter affordance by name.
///
/// Factory-style affordances (`create_*`) consume the step's resolved
/// params; the rest ignore them and read everything from call arguments.
pub fn bind(affordance_name: &str, params: &Map<String, Value>) -> EngineResult<Slot> {
    match affordance_name {
        "parse" => Ok(Slot::Callable(parse_fn())),
        "get" => Ok(Slot::Callable(get_fn())),
        "wrap" => Ok(Slot::Callable(wrap_fn())),
        "wrap_list" => Ok(Slot::Callable(wrap_list_fn())),
        "clean_code" => Ok(Slot::Callable(clean_code_fn())),
        "collect_script_inputs" => Ok(Slot::Callable(collect_script_inputs_fn())),
        "create_substitute_function" => Ok(Slot::Callable(substitute_fn(params))),
        "create_smart_substitute_function" => Ok(Slot::Callable(smart_substitute_fn(params))),
        "create_template_function" => Ok(Slot::Callable(template_fn(params)?)),
        other => Err(EngineError::AffordanceNotFound {
            tool: "formatter_tool".to_string(),
            affordance: other.to_string(),
        }),
    }
}

/// Extract structured JSON from model output, accepting fenced code
/// blocks and bare JSON.
pub fn parse_structured(text: &str) -> EngineResult<Value> {
    let candidate = FENCE_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map_or(text.trim(), |m| m.as_str().trim());
    serde_json::from_str(candidate).map_err(|e| EngineError::ToolExecutionFailed {
        tool: "formatter_tool.parse".to_string(),
        reason: format!("output is not parseable JSON: {e}"),
    })
}

/// Strip a code fence (and language tag) from generated code
#[must_use]
pub fn clean_code(text: &str) -> String {
    FENCE_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map_or_else(|| text.trim().to_string(), |m| m.as_str().to_string())
}

fn parse_fn() -> BoundFn {
    BoundFn::new("formatter_tool.parse", |args| {
        Box::pin(async move {
            let text = args.require_str("formatter_tool.parse", "text")?;
            parse_structured(&text)
        })
    })
}

/// Key lookup into the positional value. Without a `key` argument the
/// value passes through unchanged; a missing key on a dict yields null,
/// which propagates.
fn get_fn() -> BoundFn {
    BoundFn::new("formatter_tool.get", |args| {
        Box::pin(async move {
            let source = args.require("formatter_tool.get", "source")?.clone();
            let Some(key) = args.named.get("key").map(coerce_string) else {
                return Ok(source);
            };
            match &source {
                Value::Object(fields) => Ok(fields.get(&key).cloned().unwrap_or(Value::Null)),
                Value::Array(items) => {
                    let index: usize =
                        key.parse().map_err(|_| EngineError::ToolExecutionFailed {
                            tool: "formatter_tool.get".to_string(),
                            reason: format!("non-numeric index '{key}' into a list"),
                        })?;
                    Ok(items.get(index).cloned().unwrap_or(Value::Null))
                }
                _ => Ok(Value::Null),
            }
        })
    })
}

fn wrap_fn() -> BoundFn {
    BoundFn::new("formatter_tool.wrap", |args| {
        Box::pin(async move {
            let content = args.require("formatter_tool.wrap", "content")?;
            let kind = args
                .named
                .get("kind")
                .map_or(WrapperKind::Normal, |k| WrapperKind::from_name(&coerce_string(k)));
            Ok(Value::String(wrapper::wrap(
                &coerce_string(content),
                Some(&kind),
            )))
        })
    })
}

fn wrap_list_fn() -> BoundFn {
    BoundFn::new("formatter_tool.wrap_list", |args| {
        Box::pin(async move {
            let content = args.require("formatter_tool.wrap_list", "content")?;
            let kind = args
                .named
                .get("kind")
                .map_or(WrapperKind::Normal, |k| WrapperKind::from_name(&coerce_string(k)));
            let items = match content {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            Ok(Value::Array(
                items
                    .iter()
                    .map(|item| Value::String(wrapper::wrap(&coerce_string(item), Some(&kind))))
                    .collect(),
            ))
        })
    })
}

fn clean_code_fn() -> BoundFn {
    BoundFn::new("formatter_tool.clean_code", |args| {
        Box::pin(async move {
            let text = args.require_str("formatter_tool.clean_code", "text")?;
            Ok(Value::String(clean_code(&text)))
        })
    })
}

/// Gather the `input_N` entries of the runtime input dict into one
/// positional-parameter list, ascending by N.
fn collect_script_inputs_fn() -> BoundFn {
    BoundFn::new("formatter_tool.collect_script_inputs", |args| {
        Box::pin(async move {
            let vars = args.require("formatter_tool.collect_script_inputs", "vars")?;
            let Value::Object(fields) = vars else {
                return Err(EngineError::ToolExecutionFailed {
                    tool: "formatter_tool.collect_script_inputs".to_string(),
                    reason: "expected the input dict".to_string(),
                });
            };
            let mut numbered: Vec<(u64, Value)> = fields
                .iter()
                .filter_map(|(key, value)| {
                    let n: u64 = key.strip_prefix("input_")?.parse().ok()?;
                    Some((n, value.clone()))
                })
                .collect();
            numbered.sort_by_key(|(n, _)| *n);
            Ok(Value::Array(numbered.into_iter().map(|(_, v)| v).collect()))
        })
    })
}

/// Plain substitution callable. A fixed template may be supplied at
/// binding time; otherwise the template is read from the input dict's
/// `prompt_template` key per call.
fn substitute_fn(params: &Map<String, Value>) -> BoundFn {
    let fixed_template = params.get("template").map(coerce_string);
    BoundFn::new("formatter_tool.substitute", move |args| {
        let fixed_template = fixed_template.clone();
        Box::pin(async move {
            let vars = expect_vars(&args, "formatter_tool.substitute")?;
            let template = match fixed_template {
                Some(t) => t,
                None => vars
                    .get("prompt_template")
                    .map(coerce_string)
                    .ok_or_else(|| EngineError::TemplateFailed {
                        reason: "no template under key 'prompt_template'".to_string(),
                    })?,
            };
            Ok(Value::String(template::safe_substitute(&template, &vars)))
        })
    })
}

/// Smart substitution callable bundling unused `input_N` variables
fn smart_substitute_fn(params: &Map<String, Value>) -> BoundFn {
    let template_key = params
        .get("template_key")
        .map_or_else(|| "prompt_template".to_string(), coerce_string);
    let combine_key = params
        .get("combine_key")
        .map_or_else(|| "input_files".to_string(), coerce_string);
    BoundFn::new("formatter_tool.smart_substitute", move |args| {
        let template_key = template_key.clone();
        let combine_key = combine_key.clone();
        Box::pin(async move {
            let vars = expect_vars(&args, "formatter_tool.smart_substitute")?;
            let out = template::smart_substitute(&template_key, &combine_key, &vars)?;
            Ok(Value::String(out.text))
        })
    })
}

/// Callable returning a fixed template, typically the function concept's
/// instruction text resolved at binding time.
fn template_fn(params: &Map<String, Value>) -> EngineResult<BoundFn> {
    let template = params
        .get("template")
        .map(coerce_string)
        .ok_or_else(|| EngineError::StepBindingFailed {
            step: "create_template_function".to_string(),
            reason: "missing 'template' param".to_string(),
        })?;
    Ok(BoundFn::new("formatter_tool.template", move |_args| {
        let template = template.clone();
        Box::pin(async move { Ok(Value::String(template)) })
    }))
}

fn expect_vars(args: &CallArgs, tool: &str) -> EngineResult<Map<String, Value>> {
    match args.positional_or("vars") {
        Some(Value::Object(fields)) => Ok(fields.clone()),
        _ => Err(EngineError::ToolExecutionFailed {
            tool: tool.to_string(),
            reason: "expected the input dict".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_parse_fenced_json() {
        let text = "```json\n{\"thinking\":\"...\",\"answer\":\"forty-two\"}\n```";
        let parsed = parse_structured(text).unwrap();
        assert_eq!(parsed["answer"], json!("forty-two"));
    }

    #[tokio::test]
    async fn test_parse_bare_json() {
        let parsed = parse_structured("  {\"a\": 1} ").unwrap();
        assert_eq!(parsed, json!({"a": 1}));
    }

    #[test]
    fn test_clean_code_strips_fence_and_language() {
        let text = "```python\ndef main(x):\n    return x*2\n```";
        assert_eq!(clean_code(text), "def main(x):\n    return x*2");
    }

    #[tokio::test]
    async fn test_get_missing_key_yields_null() {
        let Slot::Callable(get) = bind("get", &Map::new()).unwrap() else {
            panic!("get binds to a callable");
        };
        let mut args = CallArgs::positional(json!({"a": 1}));
        args.named.insert("key".to_string(), json!("missing"));
        assert_eq!(get.call(args).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_get_without_key_is_identity() {
        let Slot::Callable(get) = bind("get", &Map::new()).unwrap() else {
            panic!("get binds to a callable");
        };
        let args = CallArgs::positional(json!({"a": 1}));
        assert_eq!(get.call(args).await.unwrap(), json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_wrap_produces_typed_reference() {
        let Slot::Callable(wrap) = bind("wrap", &Map::new()).unwrap() else {
            panic!("wrap binds to a callable");
        };
        let mut args = CallArgs::positional(json!("out.txt"));
        args.named.insert("kind".to_string(), json!("file_location"));
        let out = wrap.call(args).await.unwrap();
        let parsed = wrapper::parse(out.as_str().unwrap()).unwrap();
        assert_eq!(parsed.kind, Some(WrapperKind::FileLocation));
        assert_eq!(parsed.content, "out.txt");
    }

    #[tokio::test]
    async fn test_wrap_list_wraps_each_element() {
        let Slot::Callable(wrap_list) = bind("wrap_list", &Map::new()).unwrap() else {
            panic!("wrap_list binds to a callable");
        };
        let mut args = CallArgs::positional(json!(["a.md", "b.md"]));
        args.named.insert("kind".to_string(), json!("file_location"));
        let out = wrap_list.call(args).await.unwrap();
        let Value::Array(items) = out else {
            panic!("wrap_list returns a list");
        };
        assert_eq!(items.len(), 2);
        for (item, expected) in items.iter().zip(["a.md", "b.md"]) {
            let parsed = wrapper::parse(item.as_str().unwrap()).unwrap();
            assert_eq!(parsed.kind, Some(WrapperKind::FileLocation));
            assert_eq!(parsed.content, expected);
        }
    }

    #[tokio::test]
    async fn test_collect_script_inputs_orders_by_n() {
        let Slot::Callable(collect) = bind("collect_script_inputs", &Map::new()).unwrap() else {
            panic!("collect binds to a callable");
        };
        let args = CallArgs::positional(json!({
            "input_2": "second", "input_1": 21, "save_path": "ignored"
        }));
        assert_eq!(collect.call(args).await.unwrap(), json!([21, "second"]));
    }

    #[tokio::test]
    async fn test_smart_substitute_callable() {
        let Slot::Callable(substitute) =
            bind("create_smart_substitute_function", &Map::new()).unwrap()
        else {
            panic!("factory produces a callable");
        };
        let args = CallArgs::positional(json!({
            "prompt_template": "Answer: $input_1",
            "input_1": "42"
        }));
        assert_eq!(
            substitute.call(args).await.unwrap(),
            json!("Answer: 42")
        );
    }

    #[tokio::test]
    async fn test_substitute_callable_with_fixed_template() {
        let mut params = Map::new();
        params.insert("template".to_string(), json!("Say $input_1 twice"));
        let Slot::Callable(substitute) = bind("create_substitute_function", &params).unwrap()
        else {
            panic!("factory produces a callable");
        };
        let args = CallArgs::positional(json!({"input_1": "hello"}));
        assert_eq!(
            substitute.call(args).await.unwrap(),
            json!("Say hello twice")
        );
    }

    #[tokio::test]
    async fn test_template_function_returns_fixed_text() {
        let mut params = Map::new();
        params.insert("template".to_string(), json!("write main(x)"));
        let Slot::Callable(template) = bind("create_template_function", &params).unwrap() else {
            panic!("factory produces a callable");
        };
        assert_eq!(
            template.call(CallArgs::default()).await.unwrap(),
            json!("write main(x)")
        );
    }

    #[test]
    fn test_unknown_affordance_rejected() {
        assert!(bind("nonexistent", &Map::new()).is_err());
    }
}
