//! Interpretation: parse the working interpretation, load the paradigm
//! and seed engine state for the downstream steps.

use std::sync::Arc;

use tracing::debug;

use super::{
    Inference, InferenceState, Reference, States, ValueRecord, STEP_IWI, STEP_MFP, STEP_MVP,
    STEP_TVA,
};
use crate::error::{EngineError, EngineResult};
use crate::paradigm::registry::ParadigmRegistry;

/// Populate state from one inference's working interpretation.
///
/// # Errors
///
/// A missing `paradigm` key is fatal, as is an unknown or malformed
/// paradigm name.
pub async fn interpret(
    registry: &Arc<ParadigmRegistry>,
    inference: &Inference,
    states: &mut States,
) -> EngineResult<()> {
    let interpretation = &inference.working_interpretation;
    let paradigm_name = interpretation.paradigm.as_deref().ok_or_else(|| {
        EngineError::WorkingInterpretationInvalid {
            reason: "missing required 'paradigm' key".to_string(),
        }
    })?;

    let paradigm = registry.load(paradigm_name).await?;
    states.paradigm_name = paradigm_name.to_string();
    states.env_spec = paradigm.env_spec.clone();
    states.sequence_spec = paradigm.sequence_spec.clone();
    states.function_concept = inference.function_concept.clone();
    states.create_axis_on_list_output = interpretation.create_axis_on_list_output;

    let mut order: Vec<(String, usize)> = interpretation
        .value_order
        .iter()
        .map(|(key, index)| (key.clone(), *index))
        .collect();
    order.sort_by_key(|(_, index)| *index);
    states.value_order = order;
    states.value_selectors = interpretation.value_selectors.clone();

    // seed records: value concepts first, then explicit seeds, each a
    // single-element reference
    states.values = inference
        .value_concepts
        .iter()
        .map(|concept| ValueRecord::new(concept.name.clone(), concept.reference.clone()))
        .collect();
    for (key, value) in &interpretation.values {
        states
            .values
            .push(ValueRecord::new(key.clone(), Reference::single(value.clone())));
    }

    // placeholder records for each step's output slot
    for step in [STEP_IWI, STEP_MFP, STEP_MVP, STEP_TVA] {
        states
            .inference
            .entry(step.to_string())
            .or_insert_with(Reference::empty);
    }

    debug!(
        paradigm = %states.paradigm_name,
        entries = states.value_order.len(),
        seeds = states.values.len(),
        "interpretation complete"
    );
    states.advance(InferenceState::IwiDone)
}
