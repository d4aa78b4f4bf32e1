use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Custom error types for the paradigm engine
///
/// One unified enum covers every subsystem so callers match on a single
/// type. Variants carry the failing paradigm, step, tool or key so errors
/// stay actionable when they bubble up from deep inside an inference.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum EngineError {
    /// Configuration errors (surfaced at interpretation time)
    #[error("Paradigm not found: {name}")]
    ParadigmNotFound { name: String },

    #[error("Paradigm '{name}' is malformed: {reason}")]
    ParadigmMalformed { name: String, reason: String },

    #[error("Working interpretation invalid: {reason}")]
    WorkingInterpretationInvalid { reason: String },

    #[error("Composition plan invalid at node '{node}': {reason}")]
    PlanInvalid { node: String, reason: String },

    /// Binding errors (surfaced while binding tools and affordances)
    #[error("Tool not found on body: {tool}")]
    ToolNotFound { tool: String },

    #[error("Affordance not found: {tool}.{affordance}")]
    AffordanceNotFound { tool: String, affordance: String },

    #[error("Step '{step}' binding failed: {reason}")]
    StepBindingFailed { step: String, reason: String },

    #[error("Unknown meta key: {key}")]
    MetaKeyUnknown { key: String },

    #[error("Name not bound in scope: {name}")]
    ScopeNameUnknown { name: String },

    /// Execution errors (fatal for the inference)
    #[error("Plan node '{node}' failed: {reason}")]
    NodeExecutionFailed { node: String, reason: String },

    #[error("Tool execution failed: {tool}, reason: {reason}")]
    ToolExecutionFailed { tool: String, reason: String },

    #[error("Input combinations exceed limit: {combinations} > {limit}")]
    CombinationLimitExceeded { combinations: usize, limit: usize },

    #[error("Invalid inference state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Template substitution failed: {reason}")]
    TemplateFailed { reason: String },

    #[error("Configuration error: {reason}")]
    ConfigurationError { reason: String },

    /// Wrapped lower-level failures
    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("I/O error: {path}, reason: {reason}")]
    Io { path: String, reason: String },
}

impl EngineError {
    /// Shorthand for node failures that wrap an inner error
    #[must_use]
    pub fn node_failure(node: &str, source: &EngineError) -> Self {
        Self::NodeExecutionFailed {
            node: node.to_string(),
            reason: source.to_string(),
        }
    }

    /// Shorthand for I/O failures tagged with the offending path
    #[must_use]
    pub fn io(path: &str, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
