//! In-memory tool implementations for tests and examples.
//!
//! Downstream crates can use these to exercise paradigms without a real
//! model, filesystem or user. Each implementation honors the same
//! contracts the production tools do, including the
//! `{status, content|message}` payload shapes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{EngineError, EngineResult};
use crate::paradigm::registry::{manifest_entry, ParadigmRegistry, ParadigmSource};
use crate::paradigm::Paradigm;
use crate::tools::{
    FileSystem, InteractionRequest, LanguageModel, PromptStore, PromptTemplate, ScriptInterpreter,
    UserInput,
};

/// Language model returning queued responses in order
pub struct ScriptedLanguageModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLanguageModel {
    #[must_use]
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts the model has been asked so far
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt log lock").clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLanguageModel {
    async fn generate(&self, prompt: &str, _system_message: Option<&str>) -> EngineResult<String> {
        self.prompts
            .lock()
            .expect("prompt log lock")
            .push(prompt.to_string());
        self.responses
            .lock()
            .expect("response queue lock")
            .pop_front()
            .ok_or_else(|| EngineError::ToolExecutionFailed {
                tool: "llm".to_string(),
                reason: "no scripted response left".to_string(),
            })
    }
}

/// Filesystem over an in-memory path map plus a memorized-value store
#[derive(Default)]
pub struct MemoryFileSystem {
    files: Mutex<HashMap<String, String>>,
    memorized: Mutex<HashMap<String, String>>,
}

impl MemoryFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_file(&self, path: &str, content: &str) {
        self.files
            .lock()
            .expect("file map lock")
            .insert(path.to_string(), content.to_string());
    }

    #[must_use]
    pub fn file_content(&self, path: &str) -> Option<String> {
        self.files.lock().expect("file map lock").get(path).cloned()
    }

    pub fn memorize(&self, name: &str, content: &str) {
        self.memorized
            .lock()
            .expect("memorized map lock")
            .insert(name.to_string(), content.to_string());
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn read(&self, path: &str) -> EngineResult<Value> {
        Ok(match self.file_content(path) {
            Some(content) => json!({"status": "success", "content": content}),
            None => json!({"status": "error", "message": format!("file not found: {path}")}),
        })
    }

    async fn save(&self, content: &str, location: &str) -> EngineResult<Value> {
        self.put_file(location, content);
        Ok(json!({
            "status": "success",
            "location": location,
            "message": format!("saved {} bytes", content.len())
        }))
    }

    async fn save_from_dict(&self, content: &Value, directory: &str) -> EngineResult<Value> {
        let Value::Object(entries) = content else {
            return Ok(json!({
                "status": "error",
                "message": "save_from_dict expects an object of name -> content"
            }));
        };
        let mut saved_locations = Vec::with_capacity(entries.len());
        for (name, file_content) in entries {
            let location = format!("{}/{}", directory.trim_end_matches('/'), name);
            self.put_file(&location, &crate::tools::coerce_string(file_content));
            saved_locations.push(Value::String(location));
        }
        Ok(json!({
            "status": "success",
            "saved_locations": saved_locations,
            "message": format!("saved {} files", saved_locations.len())
        }))
    }

    async fn exists(&self, path: &str) -> EngineResult<bool> {
        Ok(self.files.lock().expect("file map lock").contains_key(path))
    }

    async fn read_memorized_value(&self, name: &str) -> EngineResult<Value> {
        Ok(
            match self
                .memorized
                .lock()
                .expect("memorized map lock")
                .get(name)
                .cloned()
            {
                Some(content) => json!({"status": "success", "content": content}),
                None => {
                    json!({"status": "error", "message": format!("no memorized value: {name}")})
                }
            },
        )
    }
}

/// User-input tool answering from a queue and recording each question
pub struct QueuedUserInput {
    answers: Mutex<VecDeque<Value>>,
    questions: Mutex<Vec<String>>,
}

impl QueuedUserInput {
    #[must_use]
    pub fn new(answers: Vec<Value>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            questions: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn asked(&self) -> Vec<String> {
        self.questions.lock().expect("question log lock").clone()
    }
}

#[async_trait]
impl UserInput for QueuedUserInput {
    async fn request(&self, interaction: InteractionRequest) -> EngineResult<Value> {
        self.questions
            .lock()
            .expect("question log lock")
            .push(interaction.prompt);
        self.answers
            .lock()
            .expect("answer queue lock")
            .pop_front()
            .ok_or_else(|| EngineError::ToolExecutionFailed {
                tool: "user_input".to_string(),
                reason: "no queued answer left".to_string(),
            })
    }
}

/// Prompt store over a fixed name -> template map
pub struct StaticPromptStore {
    prompts: HashMap<String, String>,
}

impl StaticPromptStore {
    #[must_use]
    pub fn new(prompts: &[(&str, &str)]) -> Self {
        Self {
            prompts: prompts
                .iter()
                .map(|(name, template)| ((*name).to_string(), (*template).to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl PromptStore for StaticPromptStore {
    async fn read(&self, name: &str) -> EngineResult<PromptTemplate> {
        self.prompts
            .get(name)
            .map(|template| PromptTemplate {
                name: name.to_string(),
                template: template.clone(),
            })
            .ok_or_else(|| EngineError::ToolExecutionFailed {
                tool: "prompt_tool".to_string(),
                reason: format!("prompt not found: {name}"),
            })
    }
}

type InterpreterCallback =
    dyn Fn(&str, &Value, &str) -> EngineResult<Value> + Send + Sync + 'static;

/// Script interpreter delegating to a test-supplied callback
pub struct CallbackInterpreter {
    callback: Box<InterpreterCallback>,
}

impl CallbackInterpreter {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str, &Value, &str) -> EngineResult<Value> + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl ScriptInterpreter for CallbackInterpreter {
    async fn function_execute(
        &self,
        script_code: &str,
        function_params: &Value,
        function_name: &str,
    ) -> EngineResult<Value> {
        (self.callback)(script_code, function_params, function_name)
    }
}

/// In-memory paradigm source over pre-parsed blueprints
pub struct StaticSource {
    paradigms: HashMap<String, Paradigm>,
}

impl StaticSource {
    #[must_use]
    pub fn new(paradigms: HashMap<String, Paradigm>) -> Self {
        Self { paradigms }
    }
}

#[async_trait]
impl ParadigmSource for StaticSource {
    async fn load(&self, name: &str) -> EngineResult<Paradigm> {
        self.paradigms
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::ParadigmNotFound {
                name: name.to_string(),
            })
    }

    async fn list_manifest(&self) -> EngineResult<String> {
        let mut names: Vec<&String> = self.paradigms.keys().collect();
        names.sort();
        Ok(names
            .iter()
            .map(|name| manifest_entry(name, &self.paradigms[*name]))
            .collect())
    }
}

/// Registry over blueprints given as JSON values, parsed eagerly so
/// malformed fixtures fail the test that builds them.
#[must_use]
pub fn static_registry(paradigms: &[(&str, Value)]) -> Arc<ParadigmRegistry> {
    let parsed = paradigms
        .iter()
        .map(|(name, value)| {
            let paradigm = Paradigm::from_json(name, &value.to_string())
                .unwrap_or_else(|e| panic!("fixture blueprint '{name}': {e}"));
            ((*name).to_string(), paradigm)
        })
        .collect();
    Arc::new(ParadigmRegistry::new(Arc::new(StaticSource::new(parsed))))
}
