//! Paradigm blueprints: the declarative JSON format an inference executes.
//!
//! A paradigm declares which tool affordances it needs (`env_spec`), the
//! ordered steps that bind them into named callables (`sequence_spec`),
//! and a composition plan compiled into the single function the actuation
//! step invokes. Free-form code never appears in a blueprint: affordances
//! are referenced by `(tool_name, affordance_name)` and runtime values by
//! tagged sentinels.

pub mod registry;

use std::collections::{BTreeMap, HashSet};

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};

/// Sentinel literal recognized inside plan-node params
pub const INITIAL_INPUT: &str = "__initial_input__";

/// Param key that routes its value as the sole positional argument
pub const POSITIONAL: &str = "__positional__";

/// Affordance name of the composition step
pub const COMPOSE_AFFORDANCE: &str = "compose";

/// Complete parsed blueprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paradigm {
    #[serde(default)]
    pub metadata: ParadigmMetadata,
    pub env_spec: EnvSpec,
    pub sequence_spec: SequenceSpec,
}

/// Human-readable description plus the input contract.
///
/// Vertical inputs are compile-time values drawn from the function concept
/// while callables are bound; horizontal inputs are runtime keys of the
/// initial input dictionary. Keys unrecognized at this layer are preserved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParadigmMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: ParadigmInputs,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParadigmInputs {
    #[serde(default)]
    pub vertical: BTreeMap<String, Value>,
    #[serde(default)]
    pub horizontal: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvSpec {
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub tool_name: String,
    #[serde(default)]
    pub affordances: Vec<AffordanceSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffordanceSpec {
    pub affordance_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceSpec {
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

/// One binding step. `params` may contain `MetaValue` sentinels resolved
/// against engine state when the step runs; everything else is literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub step_index: u32,
    pub affordance: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub result_key: String,
}

/// Reference to a runtime-resolved value: `{"__type__":"MetaValue","key":…}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaValue {
    pub key: String,
}

impl Serialize for MetaValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut obj = Map::new();
        obj.insert("__type__".to_string(), Value::String("MetaValue".to_string()));
        obj.insert("key".to_string(), Value::String(self.key.clone()));
        Value::Object(obj).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MetaValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match as_meta_sentinel(&value) {
            Some(key) => Ok(Self {
                key: key.to_string(),
            }),
            None => match value {
                // bare strings are accepted as a shorthand
                Value::String(key) => Ok(Self { key }),
                other => Err(D::Error::custom(format!(
                    "expected MetaValue sentinel, got {other}"
                ))),
            },
        }
    }
}

/// Detect the `MetaValue` sentinel inside an arbitrary JSON value
#[must_use]
pub fn as_meta_sentinel(value: &Value) -> Option<&str> {
    let obj = value.as_object()?;
    if obj.get("__type__")?.as_str()? != "MetaValue" {
        return None;
    }
    obj.get("key")?.as_str()
}

/// A plan-node parameter: the initial-input sentinel, the name of an
/// earlier output, a meta reference, or a literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    InitialInput,
    Ref(String),
    Meta(String),
    Literal(Value),
}

impl Serialize for Param {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::InitialInput => serializer.serialize_str(INITIAL_INPUT),
            Self::Ref(name) => serializer.serialize_str(name),
            Self::Meta(key) => MetaValue { key: key.clone() }.serialize(serializer),
            Self::Literal(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Param {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if let Some(key) = as_meta_sentinel(&value) {
            return Ok(Self::Meta(key.to_string()));
        }
        match value {
            Value::String(s) if s == INITIAL_INPUT => Ok(Self::InitialInput),
            Value::String(s) => Ok(Self::Ref(s)),
            other => Ok(Self::Literal(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    IsTrue,
    IsFalse,
}

/// Presence/absence gate over a previously computed boolean
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub key: String,
    pub operator: ConditionOp,
}

/// One node of a composition plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    pub output_key: String,
    pub function: MetaValue,
    #[serde(default)]
    pub params: BTreeMap<String, Param>,
    #[serde(default)]
    pub literal_params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl Paradigm {
    /// Parse a blueprint from its JSON text
    pub fn from_json(name: &str, text: &str) -> EngineResult<Self> {
        let paradigm: Self =
            serde_json::from_str(text).map_err(|e| EngineError::ParadigmMalformed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        paradigm.validate(name)?;
        Ok(paradigm)
    }

    /// Structural validation performed once at load time.
    ///
    /// Checks that step indices bind each `result_key` before any plan
    /// references it, and that every plan is a DAG by construction: a
    /// single forward pass rejects references to not-yet-computed outputs.
    pub fn validate(&self, name: &str) -> EngineResult<()> {
        let mut result_keys: HashSet<&str> = HashSet::new();
        let mut steps: Vec<&StepSpec> = self.sequence_spec.steps.iter().collect();
        steps.sort_by_key(|s| s.step_index);
        for step in steps {
            if step.affordance == COMPOSE_AFFORDANCE {
                let plan = step.parse_plan().map_err(|e| EngineError::ParadigmMalformed {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
                validate_plan(&plan, &result_keys)?;
            }
            result_keys.insert(step.result_key.as_str());
        }
        Ok(())
    }

    /// Names of the vertical (compile-time) input keys
    #[must_use]
    pub fn vertical_keys(&self) -> Vec<&str> {
        self.metadata.inputs.vertical.keys().map(String::as_str).collect()
    }

    /// Names of the horizontal (runtime) input keys
    #[must_use]
    pub fn horizontal_keys(&self) -> Vec<&str> {
        self.metadata.inputs.horizontal.keys().map(String::as_str).collect()
    }
}

impl StepSpec {
    /// Extract and parse the composition plan carried by a compose step
    pub fn parse_plan(&self) -> EngineResult<Vec<PlanNode>> {
        let raw = self
            .params
            .get("plan")
            .ok_or_else(|| EngineError::StepBindingFailed {
                step: self.result_key.clone(),
                reason: "compose step missing 'plan' param".to_string(),
            })?;
        serde_json::from_value(raw.clone()).map_err(|e| EngineError::StepBindingFailed {
            step: self.result_key.clone(),
            reason: format!("plan does not parse: {e}"),
        })
    }

    /// The `return_key` a compose step extracts from its plan outputs
    pub fn return_key(&self) -> EngineResult<String> {
        self.params
            .get("return_key")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| EngineError::StepBindingFailed {
                step: self.result_key.clone(),
                reason: "compose step missing 'return_key' param".to_string(),
            })
    }
}

/// Forward-pass DAG validation over a composition plan.
///
/// Each node may reference `__initial_input__`, the `output_key` of an
/// earlier node (duplicates allowed for conditional overwrite), or a
/// callable bound under one of `scope_keys`.
pub fn validate_plan(plan: &[PlanNode], scope_keys: &HashSet<&str>) -> EngineResult<()> {
    let mut produced: HashSet<&str> = HashSet::new();
    for node in plan {
        if !scope_keys.contains(node.function.key.as_str()) {
            return Err(EngineError::PlanInvalid {
                node: node.output_key.clone(),
                reason: format!("function '{}' is not a bound callable", node.function.key),
            });
        }
        for (param_key, param) in &node.params {
            if let Param::Ref(name) = param {
                if !produced.contains(name.as_str()) {
                    return Err(EngineError::PlanInvalid {
                        node: node.output_key.clone(),
                        reason: format!(
                            "param '{param_key}' references '{name}' before it is computed"
                        ),
                    });
                }
            }
        }
        if let Some(condition) = &node.condition {
            if !produced.contains(condition.key.as_str()) {
                return Err(EngineError::PlanInvalid {
                    node: node.output_key.clone(),
                    reason: format!(
                        "condition references '{}' before it is computed",
                        condition.key
                    ),
                });
            }
        }
        produced.insert(node.output_key.as_str());
    }
    Ok(())
}
