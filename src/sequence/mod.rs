//! The per-inference execution sequence.
//!
//! One inference fills one concept: interpretation loads the blueprint
//! and seeds state, function binding compiles the callable, value
//! perception prepares the input dicts, actuation runs the callable over
//! every input combination. Binding and value perception are independent
//! and may run in either order after interpretation.

pub mod actuation;
pub mod binding;
pub mod interpretation;
pub mod values;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::paradigm::registry::ParadigmRegistry;
use crate::paradigm::{EnvSpec, SequenceSpec};
use crate::reference::Reference;
use crate::tools::{Body, BoundFn, Slot};

/// Step keys under which pipeline outputs are recorded
pub const STEP_IWI: &str = "IWI";
pub const STEP_MFP: &str = "MFP";
pub const STEP_MVP: &str = "MVP";
pub const STEP_TVA: &str = "TVA";

/// A named slot that may hold data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub name: String,
    pub reference: Reference,
}

impl Concept {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reference: Reference::empty(),
        }
    }

    #[must_use]
    pub fn with_reference(name: impl Into<String>, reference: Reference) -> Self {
        Self {
            name: name.into(),
            reference,
        }
    }
}

/// Per-input-slot instruction for extracting and transforming a value
/// from a source concept
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Selector {
    pub source_concept: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub unpack: bool,
    #[serde(default)]
    pub unpack_before_selection: bool,
    #[serde(default)]
    pub strip_wrapper: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_wrapper: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<BTreeMap<String, String>>,
}

/// How one inference should run: the paradigm plus value wiring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkingInterpretation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paradigm: Option<String>,
    #[serde(default)]
    pub value_order: BTreeMap<String, usize>,
    #[serde(default)]
    pub value_selectors: BTreeMap<String, Selector>,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    #[serde(default)]
    pub create_axis_on_list_output: bool,
}

impl WorkingInterpretation {
    #[must_use]
    pub fn for_paradigm(name: impl Into<String>) -> Self {
        Self {
            paradigm: Some(name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        let index = self.value_order.len();
        self.value_order.entry(key.clone()).or_insert(index);
        self.values.insert(key, value);
        self
    }

    #[must_use]
    pub fn with_selector(mut self, key: impl Into<String>, selector: Selector) -> Self {
        let key = key.into();
        let index = self.value_order.len();
        self.value_order.entry(key.clone()).or_insert(index);
        self.value_selectors.insert(key, selector);
        self
    }
}

/// One unit of "fill concept X using function Y over value concepts Vs"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inference {
    pub id: Uuid,
    pub concept_to_infer: Concept,
    pub function_concept: Concept,
    pub value_concepts: Vec<Concept>,
    pub working_interpretation: WorkingInterpretation,
    pub created_at: DateTime<Utc>,
}

impl Inference {
    #[must_use]
    pub fn new(
        concept_to_infer: Concept,
        function_concept: Concept,
        value_concepts: Vec<Concept>,
        working_interpretation: WorkingInterpretation,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            concept_to_infer,
            function_concept,
            value_concepts,
            working_interpretation,
            created_at: Utc::now(),
        }
    }
}

/// Progress of one inference through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InferenceState {
    Init,
    IwiDone,
    MfpDone,
    MvpDone,
    TvaDone,
    Complete,
    Failed,
}

impl InferenceState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::IwiDone => "IWI_DONE",
            Self::MfpDone => "MFP_DONE",
            Self::MvpDone => "MVP_DONE",
            Self::TvaDone => "TVA_DONE",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }
}

/// A seed record holding one concept's reference during value perception
#[derive(Debug, Clone)]
pub struct ValueRecord {
    pub concept: String,
    pub reference: Reference,
    pub used: bool,
}

impl ValueRecord {
    #[must_use]
    pub fn new(concept: impl Into<String>, reference: Reference) -> Self {
        Self {
            concept: concept.into(),
            reference,
            used: false,
        }
    }
}

/// Mutable state owned by one running inference. Never shared across
/// inferences; seed records are not mutated past interpretation except
/// for the used marker.
pub struct States {
    pub paradigm_name: String,
    pub env_spec: EnvSpec,
    pub sequence_spec: SequenceSpec,
    pub value_order: Vec<(String, usize)>,
    pub value_selectors: BTreeMap<String, Selector>,
    pub values: Vec<ValueRecord>,
    pub inference: BTreeMap<String, Reference>,
    pub scope: HashMap<String, Slot>,
    pub composed: Option<BoundFn>,
    pub function_concept: Concept,
    pub create_axis_on_list_output: bool,
    state: InferenceState,
    mfp_done: bool,
    mvp_done: bool,
}

impl Default for States {
    fn default() -> Self {
        Self::new()
    }
}

impl States {
    #[must_use]
    pub fn new() -> Self {
        Self {
            paradigm_name: String::new(),
            env_spec: EnvSpec { tools: Vec::new() },
            sequence_spec: SequenceSpec { steps: Vec::new() },
            value_order: Vec::new(),
            value_selectors: BTreeMap::new(),
            values: Vec::new(),
            inference: BTreeMap::new(),
            scope: HashMap::new(),
            composed: None,
            function_concept: Concept::new(""),
            create_axis_on_list_output: false,
            state: InferenceState::Init,
            mfp_done: false,
            mvp_done: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> InferenceState {
        self.state
    }

    /// Resolve a meta key against engine state. These are the lookup
    /// targets blueprint `MetaValue` sentinels may name at binding time.
    pub fn resolve_meta(&self, body: &Body, key: &str) -> EngineResult<Value> {
        match key {
            "states.function.concept.name" => {
                Ok(Value::String(self.function_concept.name.clone()))
            }
            "states.body.base_dir" => Ok(Value::String(body.base_dir.display().to_string())),
            "states.paradigm.name" => Ok(Value::String(self.paradigm_name.clone())),
            other => Err(EngineError::MetaKeyUnknown {
                key: other.to_string(),
            }),
        }
    }

    pub(crate) fn advance(&mut self, to: InferenceState) -> EngineResult<()> {
        let allowed = match to {
            InferenceState::IwiDone => self.state == InferenceState::Init,
            InferenceState::MfpDone => {
                !self.mfp_done
                    && matches!(
                        self.state,
                        InferenceState::IwiDone | InferenceState::MvpDone
                    )
            }
            InferenceState::MvpDone => {
                !self.mvp_done
                    && matches!(
                        self.state,
                        InferenceState::IwiDone | InferenceState::MfpDone
                    )
            }
            InferenceState::TvaDone => self.mfp_done && self.mvp_done,
            InferenceState::Complete => self.state == InferenceState::TvaDone,
            InferenceState::Failed => {
                !matches!(self.state, InferenceState::Complete | InferenceState::Failed)
            }
            InferenceState::Init => false,
        };
        if !allowed {
            return Err(EngineError::InvalidStateTransition {
                from: self.state.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        match to {
            InferenceState::MfpDone => self.mfp_done = true,
            InferenceState::MvpDone => self.mvp_done = true,
            _ => {}
        }
        self.state = to;
        Ok(())
    }
}

/// Engine façade: the body, the paradigm registry and the engine
/// configuration, driving the full sequence for one inference at a time.
pub struct Engine {
    body: Body,
    registry: Arc<ParadigmRegistry>,
    config: EngineConfig,
}

impl Engine {
    #[must_use]
    pub fn new(body: Body, registry: Arc<ParadigmRegistry>, config: EngineConfig) -> Self {
        Self {
            body,
            registry,
            config,
        }
    }

    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ParadigmRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the full sequence for one inference and return the actuation
    /// output: a reference whose leaves are wrapped typed strings.
    ///
    /// # Errors
    ///
    /// Any configuration, binding or execution failure is fatal; the
    /// target concept's reference is left untouched.
    pub async fn run_inference(&self, inference: &Inference) -> EngineResult<Reference> {
        let mut states = States::new();
        match self.drive(inference, &mut states).await {
            Ok(output) => {
                states.advance(InferenceState::Complete)?;
                info!(
                    inference = %inference.id,
                    paradigm = %states.paradigm_name,
                    leaves = output.leaf_count(),
                    "inference complete"
                );
                Ok(output)
            }
            Err(err) => {
                let _ = states.advance(InferenceState::Failed);
                error!(
                    inference = %inference.id,
                    paradigm = %states.paradigm_name,
                    error = %err,
                    "inference failed"
                );
                Err(err)
            }
        }
    }

    async fn drive(&self, inference: &Inference, states: &mut States) -> EngineResult<Reference> {
        interpretation::interpret(&self.registry, inference, states).await?;
        binding::bind_functions(&self.body, states)?;
        values::perceive_values(&self.body, states).await?;
        actuation::actuate(states, &self.config.execution).await?;
        states
            .inference
            .get(STEP_TVA)
            .cloned()
            .ok_or_else(|| EngineError::ToolExecutionFailed {
                tool: "actuation".to_string(),
                reason: "no actuation output recorded".to_string(),
            })
    }
}
