//! Actuation: invoke the composed function once per prepared input dict.
//!
//! Combinations run sequentially in row-major order and the result
//! tensor mirrors the input tensor. A list-valued result either stays a
//! leaf or, when the working interpretation asks for it, becomes a new
//! axis. The configured combination limit is checked before the first
//! call so a runaway cross-product never starts executing.

use serde_json::Value;
use tracing::debug;

use super::{InferenceState, States, STEP_MVP, STEP_TVA};
use crate::config::ExecutionConfig;
use crate::error::{EngineError, EngineResult};
use crate::reference::Reference;
use crate::tools::CallArgs;

/// Run the composed function over every input combination.
///
/// # Errors
///
/// A combination count above `execution.max_combinations` is fatal, as
/// is any per-combination failure.
pub async fn actuate(states: &mut States, execution: &ExecutionConfig) -> EngineResult<()> {
    let composed = states
        .composed
        .clone()
        .ok_or_else(|| EngineError::StepBindingFailed {
            step: STEP_TVA.to_string(),
            reason: "no composed function bound".to_string(),
        })?;
    let inputs = states
        .inference
        .get(STEP_MVP)
        .cloned()
        .ok_or_else(|| EngineError::StepBindingFailed {
            step: STEP_TVA.to_string(),
            reason: "no prepared input values".to_string(),
        })?;

    let combinations = inputs.leaf_count();
    if combinations > execution.max_combinations {
        return Err(EngineError::CombinationLimitExceeded {
            combinations,
            limit: execution.max_combinations,
        });
    }

    let mut results = Vec::with_capacity(combinations);
    for (index, combination) in inputs.leaves().into_iter().enumerate() {
        debug!(combination = index, "actuating");
        let result = composed.call(CallArgs::positional(combination.clone())).await?;
        results.push(materialize_result(result, states.create_axis_on_list_output));
    }

    let output = inputs.with_leaves_replaced(&mut results.into_iter())?;
    states.inference.insert(STEP_TVA.to_string(), output);
    states.advance(InferenceState::TvaDone)
}

fn materialize_result(result: Value, create_axis: bool) -> Reference {
    match result {
        Value::Array(items) if create_axis => {
            Reference::Items(items.into_iter().map(Reference::Leaf).collect())
        }
        other => Reference::Leaf(other),
    }
}
