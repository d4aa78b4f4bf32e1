//! Function binding: turn the blueprint's env and sequence specs into a
//! scope of named callables and the single composed function actuation
//! will invoke.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{InferenceState, States};
use crate::compose::compose;
use crate::error::{EngineError, EngineResult};
use crate::paradigm::{as_meta_sentinel, COMPOSE_AFFORDANCE};
use crate::tools::{bind_affordance, Body, Slot};

/// Bind declared tools and execute the sequence steps in index order.
///
/// # Errors
///
/// A declared tool with no live instance, an unknown affordance, or a
/// step whose params fail to resolve are all fatal.
pub fn bind_functions(body: &Body, states: &mut States) -> EngineResult<()> {
    // every declared tool must have a live instance before any step runs
    let mut affordance_tools: HashMap<String, String> = HashMap::new();
    for tool in &states.env_spec.tools {
        if !body.has_tool(&tool.tool_name) {
            return Err(EngineError::ToolNotFound {
                tool: tool.tool_name.clone(),
            });
        }
        for affordance in &tool.affordances {
            if let Some(previous) = affordance_tools.insert(
                affordance.affordance_name.clone(),
                tool.tool_name.clone(),
            ) {
                warn!(
                    affordance = %affordance.affordance_name,
                    previous = %previous,
                    tool = %tool.tool_name,
                    "affordance redeclared, later tool wins"
                );
            }
        }
    }

    let mut steps: Vec<_> = states.sequence_spec.steps.clone();
    steps.sort_by_key(|s| s.step_index);

    let mut last_result_key: Option<String> = None;
    for step in &steps {
        let slot = if step.affordance == COMPOSE_AFFORDANCE {
            // the plan's function sentinels reference scope callables and
            // must survive untouched, so no meta resolution happens here
            let plan = step.parse_plan()?;
            let return_key = step.return_key()?;
            Slot::Callable(compose(plan, return_key, states.scope.clone()))
        } else {
            let tool_name = affordance_tools.get(&step.affordance).ok_or_else(|| {
                EngineError::AffordanceNotFound {
                    tool: "env_spec".to_string(),
                    affordance: step.affordance.clone(),
                }
            })?;
            let params = resolve_meta_params(body, states, &step.params)?;
            bind_affordance(body, tool_name, &step.affordance, &params)?
        };
        debug!(step = %step.result_key, affordance = %step.affordance, "step bound");
        states.scope.insert(step.result_key.clone(), slot);
        last_result_key = Some(step.result_key.clone());
    }

    // the final step is the composition step; its callable is the
    // actuation entry point
    let composed_key = last_result_key.ok_or_else(|| EngineError::StepBindingFailed {
        step: "sequence_spec".to_string(),
        reason: "blueprint declares no steps".to_string(),
    })?;
    match states.scope.get(&composed_key) {
        Some(Slot::Callable(function)) => {
            states.composed = Some(function.clone());
        }
        _ => {
            return Err(EngineError::StepBindingFailed {
                step: composed_key,
                reason: "final step did not produce a callable".to_string(),
            })
        }
    }
    states.advance(InferenceState::MfpDone)
}

/// Resolve `MetaValue` sentinels inside step params against engine state
fn resolve_meta_params(
    body: &Body,
    states: &States,
    params: &Map<String, Value>,
) -> EngineResult<Map<String, Value>> {
    let mut resolved = Map::new();
    for (key, value) in params {
        resolved.insert(key.clone(), resolve_meta_value(body, states, value)?);
    }
    Ok(resolved)
}

fn resolve_meta_value(body: &Body, states: &States, value: &Value) -> EngineResult<Value> {
    if let Some(key) = as_meta_sentinel(value) {
        return states.resolve_meta(body, key);
    }
    match value {
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| resolve_meta_value(body, states, item))
                .collect::<EngineResult<Vec<_>>>()?,
        )),
        Value::Object(fields) => {
            let mut out = Map::new();
            for (key, field) in fields {
                out.insert(key.clone(), resolve_meta_value(body, states, field)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paradigm::Paradigm;
    use crate::sequence::Concept;
    use crate::testing::QueuedUserInput;
    use serde_json::json;
    use std::sync::Arc;

    fn states_for(paradigm_json: Value) -> States {
        let paradigm =
            Paradigm::from_json("test", &paradigm_json.to_string()).expect("valid blueprint");
        let mut states = States::new();
        states.env_spec = paradigm.env_spec;
        states.sequence_spec = paradigm.sequence_spec;
        states.function_concept = Concept::new("write main(x) doubling its input");
        states.advance(InferenceState::IwiDone).unwrap();
        states
    }

    fn ask_user_blueprint() -> Value {
        json!({
            "metadata": {"description": "ask the user"},
            "env_spec": {"tools": [
                {"tool_name": "user_input",
                 "affordances": [{"affordance_name": "create_input_function"}]},
                {"tool_name": "formatter_tool",
                 "affordances": [{"affordance_name": "wrap"}]},
                {"tool_name": "composition_tool",
                 "affordances": [{"affordance_name": "compose"}]}
            ]},
            "sequence_spec": {"steps": [
                {"step_index": 1, "affordance": "create_input_function",
                 "params": {}, "result_key": "ask_user"},
                {"step_index": 2, "affordance": "wrap",
                 "params": {}, "result_key": "wrap_output"},
                {"step_index": 3, "affordance": "compose",
                 "params": {
                    "plan": [
                        {"output_key": "answer",
                         "function": {"__type__": "MetaValue", "key": "ask_user"},
                         "params": {"__positional__": "__initial_input__"}},
                        {"output_key": "wrapped",
                         "function": {"__type__": "MetaValue", "key": "wrap_output"},
                         "params": {"__positional__": "answer"},
                         "literal_params": {"kind": "normal"}}
                    ],
                    "return_key": "wrapped"
                 },
                 "result_key": "main"}
            ]}
        })
    }

    #[test]
    fn test_missing_tool_is_fatal() {
        let body = Body::new("/tmp");
        let mut states = states_for(ask_user_blueprint());
        let err = bind_functions(&body, &mut states).unwrap_err();
        assert!(matches!(err, EngineError::ToolNotFound { .. }));
    }

    #[test]
    fn test_binding_produces_composed_callable() {
        let body =
            Body::new("/tmp").with_user_input(Arc::new(QueuedUserInput::new(vec![json!("Ada")])));
        let mut states = states_for(ask_user_blueprint());
        bind_functions(&body, &mut states).unwrap();
        assert!(states.composed.is_some());
        assert!(states.scope.contains_key("ask_user"));
        assert!(states.scope.contains_key("wrap_output"));
        assert_eq!(states.state(), InferenceState::MfpDone);
    }

    #[test]
    fn test_meta_params_resolve_against_state() {
        let body = Body::new("/agent/base");
        let states = states_for(ask_user_blueprint());
        let mut params = Map::new();
        params.insert(
            "template".to_string(),
            json!({"__type__": "MetaValue", "key": "states.function.concept.name"}),
        );
        params.insert(
            "dir".to_string(),
            json!({"__type__": "MetaValue", "key": "states.body.base_dir"}),
        );
        let resolved = resolve_meta_params(&body, &states, &params).unwrap();
        assert_eq!(
            resolved["template"],
            json!("write main(x) doubling its input")
        );
        assert_eq!(resolved["dir"], json!("/agent/base"));
    }

    #[test]
    fn test_unknown_meta_key_is_fatal() {
        let body = Body::new("/tmp");
        let states = states_for(ask_user_blueprint());
        let mut params = Map::new();
        params.insert(
            "x".to_string(),
            json!({"__type__": "MetaValue", "key": "states.unknown"}),
        );
        assert!(resolve_meta_params(&body, &states, &params).is_err());
    }
}
