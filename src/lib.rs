//! # Paradigm Engine
//!
//! The core orchestration engine of a declarative, composable agent
//! framework. An agent's behavior is a partially-ordered graph of
//! *inferences* over *concepts*; each inference is driven by a
//! *paradigm*, a JSON blueprint declaring which tool affordances it
//! needs and in what compositional order they run.
//!
//! ## Architecture Overview
//!
//! One inference executes a fixed five-step sequence:
//!
//! - [`sequence::interpretation`]: load the paradigm, seed state
//! - [`sequence::binding`]: bind affordances, compile the composed function
//! - [`sequence::values`]: select, transform and resolve input values
//! - [`sequence::actuation`]: run the function over every input combination
//!
//! with the [`wrapper`] codec carrying typed references across
//! boundaries, the [`paradigm`] registry loading blueprints, and the
//! [`compose`] planner turning declarative plans into callables.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use paradigm_engine::{Body, Concept, Engine, EngineConfig, Inference, WorkingInterpretation};
//! use paradigm_engine::paradigm::registry::ParadigmRegistry;
//!
//! # async fn run() -> Result<(), paradigm_engine::EngineError> {
//! let body = Body::new("/agent/workspace");
//! let registry = Arc::new(ParadigmRegistry::from_dir("paradigms"));
//! let engine = Engine::new(body, registry, EngineConfig::default());
//!
//! let inference = Inference::new(
//!     Concept::new("user.name"),
//!     Concept::new("learn the user's name"),
//!     vec![],
//!     WorkingInterpretation::for_paradigm("ask_user")
//!         .with_value("question", "What is your name?".into()),
//! );
//! let output = engine.run_inference(&inference).await?;
//! # Ok(())
//! # }
//! ```

/// Composition planner compiling plans into callables
pub mod compose;
/// Engine configuration
pub mod config;
/// Unified error types
pub mod error;
/// Paradigm blueprints and their registry
pub mod paradigm;
/// Tree-shaped value containers
pub mod reference;
/// The per-inference execution sequence
pub mod sequence;
/// Template substitution, plain and smart
pub mod template;
/// Tracing initialization
pub mod telemetry;
/// In-memory tool implementations for tests and examples
pub mod testing;
/// Tool contracts and the agent body
pub mod tools;
/// Wrapper codec and resolution table
pub mod wrapper;

/// End-to-end tests for the inference sequence
#[cfg(test)]
pub mod tests;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use paradigm::Paradigm;
pub use reference::{cross_product, element_action, Reference};
pub use sequence::{
    Concept, Engine, Inference, InferenceState, Selector, States, WorkingInterpretation,
};
pub use tools::Body;
pub use wrapper::{Wrapped, WrapperKind};
