//! Composition planner: compiles a declarative plan into one callable.
//!
//! The compiled function owns a snapshot of the binding scope. Each call
//! starts a fresh environment keyed `__initial_input__`, executes the
//! nodes strictly in declared order, and returns the value bound under
//! the plan's `return_key`. A node gated by a false condition is skipped
//! without binding its `output_key`; later nodes referencing it observe
//! null. Two nodes may share an `output_key` under mutually exclusive
//! conditions to model branching.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::paradigm::{Condition, ConditionOp, Param, PlanNode, INITIAL_INPUT, POSITIONAL};
use crate::tools::{BoundFn, CallArgs, Slot};

/// Compile a plan into a single callable over the runtime input dict.
///
/// The scope snapshot must already contain every callable the plan's
/// `function` references name; blueprint validation guarantees this for
/// plans that come from a paradigm.
#[must_use]
pub fn compose(
    plan: Vec<PlanNode>,
    return_key: String,
    scope: HashMap<String, Slot>,
) -> BoundFn {
    let plan = Arc::new(plan);
    let scope = Arc::new(scope);
    BoundFn::new("composition_tool.composed", move |args| {
        let plan = Arc::clone(&plan);
        let scope = Arc::clone(&scope);
        let return_key = return_key.clone();
        Box::pin(async move {
            let vars = match args.positional_or("vars") {
                Some(Value::Object(fields)) => fields.clone(),
                Some(other) => {
                    let mut fields = Map::new();
                    fields.insert("input_1".to_string(), other.clone());
                    fields
                }
                None => Map::new(),
            };
            run_plan(&plan, &return_key, &scope, vars).await
        })
    })
}

async fn run_plan(
    plan: &[PlanNode],
    return_key: &str,
    scope: &HashMap<String, Slot>,
    vars: Map<String, Value>,
) -> EngineResult<Value> {
    let initial = Value::Object(vars);
    let mut env: Map<String, Value> = Map::new();
    env.insert(INITIAL_INPUT.to_string(), initial.clone());

    for node in plan {
        if let Some(condition) = &node.condition {
            if !condition_holds(condition, &env) {
                debug!(node = %node.output_key, key = %condition.key, "plan node skipped");
                continue;
            }
        }

        let mut call_args = CallArgs::default();
        for (param_key, param) in &node.params {
            let resolved = resolve_param(param, &initial, &env, scope)?;
            if param_key == POSITIONAL {
                call_args.positional = Some(resolved);
            } else {
                call_args.named.insert(param_key.clone(), resolved);
            }
        }
        for (key, value) in &node.literal_params {
            call_args.named.insert(key.clone(), value.clone());
        }

        let function = match scope.get(&node.function.key) {
            Some(Slot::Callable(f)) => f.clone(),
            Some(Slot::Value(_)) => {
                return Err(EngineError::NodeExecutionFailed {
                    node: node.output_key.clone(),
                    reason: format!("'{}' is bound to a value, not a callable", node.function.key),
                })
            }
            None => {
                return Err(EngineError::ScopeNameUnknown {
                    name: node.function.key.clone(),
                })
            }
        };

        debug!(node = %node.output_key, function = %function.name(), "plan node executing");
        let result = function
            .call(call_args)
            .await
            .map_err(|e| EngineError::node_failure(&node.output_key, &e))?;
        env.insert(node.output_key.clone(), result);
    }

    env.get(return_key)
        .cloned()
        .ok_or_else(|| EngineError::NodeExecutionFailed {
            node: return_key.to_string(),
            reason: "return key was never bound".to_string(),
        })
}

fn resolve_param(
    param: &Param,
    initial: &Value,
    env: &Map<String, Value>,
    scope: &HashMap<String, Slot>,
) -> EngineResult<Value> {
    match param {
        Param::InitialInput => Ok(initial.clone()),
        // absent names resolve to null so skipped branches propagate absence
        Param::Ref(name) => Ok(env.get(name).cloned().unwrap_or(Value::Null)),
        Param::Meta(key) => match scope.get(key) {
            Some(Slot::Value(value)) => Ok(value.clone()),
            _ => Err(EngineError::MetaKeyUnknown { key: key.clone() }),
        },
        Param::Literal(value) => Ok(value.clone()),
    }
}

fn condition_holds(condition: &Condition, env: &Map<String, Value>) -> bool {
    let flag = env.get(&condition.key).unwrap_or(&Value::Null);
    match condition.operator {
        ConditionOp::IsTrue => is_truthy(flag),
        ConditionOp::IsFalse => !is_truthy(flag),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paradigm::MetaValue;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn callable<F>(name: &str, f: F) -> Slot
    where
        F: Fn(CallArgs) -> EngineResult<Value> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Slot::Callable(BoundFn::new(name, move |args| {
            let f = Arc::clone(&f);
            Box::pin(async move { f(args) })
        }))
    }

    fn test_scope() -> HashMap<String, Slot> {
        let mut scope = HashMap::new();
        scope.insert(
            "double".to_string(),
            callable("double", |args| {
                let n = args
                    .positional
                    .as_ref()
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                Ok(json!(n * 2))
            }),
        );
        scope.insert(
            "is_even".to_string(),
            callable("is_even", |args| {
                let n = args
                    .positional
                    .as_ref()
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                Ok(json!(n % 2 == 0))
            }),
        );
        scope.insert(
            "tag".to_string(),
            callable("tag", |args| {
                let label = args
                    .named
                    .get("label")
                    .and_then(Value::as_str)
                    .unwrap_or("none");
                Ok(json!(format!(
                    "{label}:{}",
                    args.positional.as_ref().map_or(Value::Null, Clone::clone)
                )))
            }),
        );
        scope.insert(
            "first_input".to_string(),
            callable("first_input", |args| {
                Ok(args
                    .positional
                    .as_ref()
                    .and_then(|v| v.get("input_1"))
                    .cloned()
                    .unwrap_or(Value::Null))
            }),
        );
        scope
    }

    fn node(output_key: &str, function: &str) -> PlanNode {
        PlanNode {
            output_key: output_key.to_string(),
            function: MetaValue {
                key: function.to_string(),
            },
            params: BTreeMap::new(),
            literal_params: Map::new(),
            condition: None,
        }
    }

    fn positional(mut n: PlanNode, param: Param) -> PlanNode {
        n.params.insert(POSITIONAL.to_string(), param);
        n
    }

    #[tokio::test]
    async fn test_nodes_run_in_declared_order() {
        let plan = vec![
            positional(node("x", "first_input"), Param::InitialInput),
            positional(node("doubled", "double"), Param::Ref("x".to_string())),
            positional(node("quadrupled", "double"), Param::Ref("doubled".to_string())),
        ];
        let f = compose(plan, "quadrupled".to_string(), test_scope());
        let out = f
            .call(CallArgs::positional(json!({"input_1": 3})))
            .await
            .unwrap();
        assert_eq!(out, json!(12));
    }

    #[tokio::test]
    async fn test_conditional_mutual_exclusion() {
        for (input, expected) in [(4, "even:4"), (5, "odd:5")] {
            let mut even = positional(node("label", "tag"), Param::Ref("x".to_string()));
            even.literal_params.insert("label".to_string(), json!("even"));
            even.condition = Some(Condition {
                key: "even_flag".to_string(),
                operator: ConditionOp::IsTrue,
            });
            let mut odd = positional(node("label", "tag"), Param::Ref("x".to_string()));
            odd.literal_params.insert("label".to_string(), json!("odd"));
            odd.condition = Some(Condition {
                key: "even_flag".to_string(),
                operator: ConditionOp::IsFalse,
            });
            let plan = vec![
                positional(node("x", "first_input"), Param::InitialInput),
                positional(node("even_flag", "is_even"), Param::Ref("x".to_string())),
                even,
                odd,
            ];
            let f = compose(plan, "label".to_string(), test_scope());
            let out = f
                .call(CallArgs::positional(json!({"input_1": input})))
                .await
                .unwrap();
            assert_eq!(out, json!(expected));
        }
    }

    #[tokio::test]
    async fn test_skipped_node_output_observes_absence() {
        let mut gated = positional(node("gated", "double"), Param::Ref("x".to_string()));
        gated.condition = Some(Condition {
            key: "x".to_string(),
            operator: ConditionOp::IsFalse,
        });
        let plan = vec![
            positional(node("x", "first_input"), Param::InitialInput),
            gated,
            positional(node("after", "double"), Param::Ref("gated".to_string())),
        ];
        let f = compose(plan, "after".to_string(), test_scope());
        // x = 3 is truthy, so the gated node is skipped and "gated" is null
        let out = f
            .call(CallArgs::positional(json!({"input_1": 3})))
            .await
            .unwrap();
        assert_eq!(out, json!(0));
    }

    #[tokio::test]
    async fn test_unknown_function_fails() {
        let plan = vec![positional(node("out", "never_bound"), Param::InitialInput)];
        let f = compose(plan, "out".to_string(), test_scope());
        let err = f
            .call(CallArgs::positional(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ScopeNameUnknown { .. }));
    }

    #[tokio::test]
    async fn test_literal_params_pass_untouched() {
        let mut tagged = positional(node("out", "tag"), Param::Ref("x".to_string()));
        tagged
            .literal_params
            .insert("label".to_string(), json!("lit"));
        let plan = vec![
            positional(node("x", "first_input"), Param::InitialInput),
            tagged,
        ];
        let f = compose(plan, "out".to_string(), test_scope());
        let out = f
            .call(CallArgs::positional(json!({"input_1": 7})))
            .await
            .unwrap();
        assert_eq!(out, json!("lit:7"));
    }
}
