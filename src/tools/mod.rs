//! Tool contracts and the agent body.
//!
//! The body is an explicit environment struct holding typed handles for
//! every capability an inference may bind: language model, filesystem,
//! script interpreter, prompt store, user interaction and the paradigm
//! source. The formatter and composition capabilities are built in and
//! need no handle. Affordances are bound through a named factory
//! registry; blueprints reference `(tool_name, affordance_name)` pairs
//! and never carry code.

pub mod formatter;
pub mod user_input;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use crate::error::{EngineError, EngineResult};
use crate::paradigm::registry::ParadigmSource;

/// Language model capability
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str, system_message: Option<&str>) -> EngineResult<String>;
}

/// Filesystem capability. Operations report outcomes as
/// `{status, content|location|message}` payloads so callers can surface
/// misses as data rather than failures.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read(&self, path: &str) -> EngineResult<Value>;
    async fn save(&self, content: &str, location: &str) -> EngineResult<Value>;
    async fn save_from_dict(&self, content: &Value, directory: &str) -> EngineResult<Value>;
    async fn exists(&self, path: &str) -> EngineResult<bool>;
    async fn read_memorized_value(&self, name: &str) -> EngineResult<Value>;
}

/// Script execution capability. Implementations may inject a body
/// reference of their own so executed scripts can re-enter the tool layer.
#[async_trait]
pub trait ScriptInterpreter: Send + Sync {
    async fn function_execute(
        &self,
        script_code: &str,
        function_params: &Value,
        function_name: &str,
    ) -> EngineResult<Value>;
}

/// A named prompt with its template text
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub name: String,
    pub template: String,
}

/// Prompt store capability
#[async_trait]
pub trait PromptStore: Send + Sync {
    async fn read(&self, name: &str) -> EngineResult<PromptTemplate>;
}

/// One user-interaction request
#[derive(Debug, Clone)]
pub struct InteractionRequest {
    pub interaction_type: String,
    pub prompt: String,
}

/// User interaction capability
#[async_trait]
pub trait UserInput: Send + Sync {
    async fn request(&self, interaction: InteractionRequest) -> EngineResult<Value>;
}

/// Arguments passed to a bound callable: named params merged from the
/// plan node's resolved `params` and `literal_params`, plus an optional
/// positional value (the `__positional__` param).
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub named: Map<String, Value>,
    pub positional: Option<Value>,
}

impl CallArgs {
    #[must_use]
    pub fn positional(value: Value) -> Self {
        Self {
            named: Map::new(),
            positional: Some(value),
        }
    }

    /// The positional argument, falling back to a named key
    #[must_use]
    pub fn positional_or(&self, key: &str) -> Option<&Value> {
        self.positional.as_ref().or_else(|| self.named.get(key))
    }

    pub fn require(&self, tool: &str, key: &str) -> EngineResult<&Value> {
        self.positional_or(key)
            .ok_or_else(|| EngineError::ToolExecutionFailed {
                tool: tool.to_string(),
                reason: format!("missing argument '{key}'"),
            })
    }

    pub fn require_str(&self, tool: &str, key: &str) -> EngineResult<String> {
        Ok(coerce_string(self.require(tool, key)?))
    }
}

/// String form of an argument: strings pass through, everything else is
/// rendered as compact JSON.
#[must_use]
pub fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

type BoundFnInner = dyn Fn(CallArgs) -> BoxFuture<'static, EngineResult<Value>> + Send + Sync;

/// A named async callable produced by an affordance factory or by the
/// composition planner. Lives for the duration of one inference.
#[derive(Clone)]
pub struct BoundFn {
    name: Arc<str>,
    inner: Arc<BoundFnInner>,
}

impl BoundFn {
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: Fn(CallArgs) -> BoxFuture<'static, EngineResult<Value>> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            inner: Arc::new(f),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, args: CallArgs) -> EngineResult<Value> {
        (self.inner)(args).await
    }
}

impl std::fmt::Debug for BoundFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundFn").field("name", &self.name).finish()
    }
}

/// A value bound in the function-binding scope: plain data or a callable
#[derive(Debug, Clone)]
pub enum Slot {
    Value(Value),
    Callable(BoundFn),
}

/// The agent body: live tool instances for one inference.
///
/// Handles are optional; binding a declared tool that is absent fails at
/// binding time, while value resolution degrades to error strings.
#[derive(Clone, Default)]
pub struct Body {
    pub base_dir: PathBuf,
    pub llm: Option<Arc<dyn LanguageModel>>,
    pub file_system: Option<Arc<dyn FileSystem>>,
    pub python_interpreter: Option<Arc<dyn ScriptInterpreter>>,
    pub prompt_tool: Option<Arc<dyn PromptStore>>,
    pub user_input: Option<Arc<dyn UserInput>>,
    pub paradigm_tool: Option<Arc<dyn ParadigmSource>>,
}

impl Body {
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_llm(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }

    #[must_use]
    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.file_system = Some(fs);
        self
    }

    #[must_use]
    pub fn with_python_interpreter(mut self, interpreter: Arc<dyn ScriptInterpreter>) -> Self {
        self.python_interpreter = Some(interpreter);
        self
    }

    #[must_use]
    pub fn with_prompt_tool(mut self, prompts: Arc<dyn PromptStore>) -> Self {
        self.prompt_tool = Some(prompts);
        self
    }

    #[must_use]
    pub fn with_user_input(mut self, user_input: Arc<dyn UserInput>) -> Self {
        self.user_input = Some(user_input);
        self
    }

    #[must_use]
    pub fn with_paradigm_tool(mut self, source: Arc<dyn ParadigmSource>) -> Self {
        self.paradigm_tool = Some(source);
        self
    }

    /// Whether a declared tool name has a live instance on this body
    #[must_use]
    pub fn has_tool(&self, tool_name: &str) -> bool {
        match tool_name {
            "formatter_tool" | "composition_tool" => true,
            "llm" => self.llm.is_some(),
            "file_system" => self.file_system.is_some(),
            "python_interpreter" => self.python_interpreter.is_some(),
            "prompt_tool" => self.prompt_tool.is_some(),
            "user_input" => self.user_input.is_some(),
            "paradigm_tool" => self.paradigm_tool.is_some(),
            _ => false,
        }
    }

    fn require_llm(&self) -> EngineResult<Arc<dyn LanguageModel>> {
        self.llm.clone().ok_or_else(|| EngineError::ToolNotFound {
            tool: "llm".to_string(),
        })
    }

    pub(crate) fn require_file_system(&self) -> EngineResult<Arc<dyn FileSystem>> {
        self.file_system
            .clone()
            .ok_or_else(|| EngineError::ToolNotFound {
                tool: "file_system".to_string(),
            })
    }

    fn require_interpreter(&self) -> EngineResult<Arc<dyn ScriptInterpreter>> {
        self.python_interpreter
            .clone()
            .ok_or_else(|| EngineError::ToolNotFound {
                tool: "python_interpreter".to_string(),
            })
    }
}

/// Bind a declared affordance to a scope slot.
///
/// `params` are the step's already-resolved params; factory-style
/// affordances consume them, direct affordances ignore them.
///
/// # Errors
///
/// `ToolNotFound` when the tool has no live instance, `AffordanceNotFound`
/// for names the tool does not expose. The composition affordance is bound
/// by the function-binding step itself, never here.
pub fn bind_affordance(
    body: &Body,
    tool_name: &str,
    affordance_name: &str,
    params: &Map<String, Value>,
) -> EngineResult<Slot> {
    match tool_name {
        "llm" => bind_llm(body, affordance_name),
        "file_system" => bind_file_system(body, affordance_name),
        "python_interpreter" => bind_interpreter(body, affordance_name),
        "formatter_tool" => formatter::bind(affordance_name, params),
        "user_input" => user_input::bind(body, affordance_name, params),
        "prompt_tool" => bind_prompt_tool(body, affordance_name),
        "paradigm_tool" => bind_paradigm_tool(body, affordance_name),
        other => Err(EngineError::ToolNotFound {
            tool: other.to_string(),
        }),
    }
}

fn bind_llm(body: &Body, affordance_name: &str) -> EngineResult<Slot> {
    let llm = body.require_llm()?;
    match affordance_name {
        "generate" => Ok(Slot::Callable(BoundFn::new("llm.generate", move |args| {
            let llm = Arc::clone(&llm);
            Box::pin(async move {
                let prompt = args.require_str("llm.generate", "prompt")?;
                let system = args.named.get("system_message").map(coerce_string);
                let output = llm.generate(&prompt, system.as_deref()).await?;
                Ok(Value::String(output))
            })
        }))),
        other => Err(EngineError::AffordanceNotFound {
            tool: "llm".to_string(),
            affordance: other.to_string(),
        }),
    }
}

fn bind_file_system(body: &Body, affordance_name: &str) -> EngineResult<Slot> {
    let fs = body.require_file_system()?;
    match affordance_name {
        "read" => Ok(Slot::Callable(BoundFn::new("file_system.read", move |args| {
            let fs = Arc::clone(&fs);
            Box::pin(async move {
                let path = args.require_str("file_system.read", "path")?;
                fs.read(&path).await
            })
        }))),
        "save" => Ok(Slot::Callable(BoundFn::new("file_system.save", move |args| {
            let fs = Arc::clone(&fs);
            Box::pin(async move {
                let content = args.require_str("file_system.save", "content")?;
                let location = match args.named.get("location") {
                    Some(v) => coerce_string(v),
                    None => args.require_str("file_system.save", "location")?,
                };
                fs.save(&content, &location).await
            })
        }))),
        "save_from_dict" => Ok(Slot::Callable(BoundFn::new(
            "file_system.save_from_dict",
            move |args| {
                let fs = Arc::clone(&fs);
                Box::pin(async move {
                    let content = args.require("file_system.save_from_dict", "content")?.clone();
                    let directory = args
                        .named
                        .get("directory")
                        .map(coerce_string)
                        .ok_or_else(|| EngineError::ToolExecutionFailed {
                            tool: "file_system.save_from_dict".to_string(),
                            reason: "missing argument 'directory'".to_string(),
                        })?;
                    fs.save_from_dict(&content, &directory).await
                })
            },
        ))),
        "exists" => Ok(Slot::Callable(BoundFn::new(
            "file_system.exists",
            move |args| {
                let fs = Arc::clone(&fs);
                Box::pin(async move {
                    let path = args.require_str("file_system.exists", "path")?;
                    Ok(Value::Bool(fs.exists(&path).await?))
                })
            },
        ))),
        "read_memorized_value" => Ok(Slot::Callable(BoundFn::new(
            "file_system.read_memorized_value",
            move |args| {
                let fs = Arc::clone(&fs);
                Box::pin(async move {
                    let name = args.require_str("file_system.read_memorized_value", "name")?;
                    fs.read_memorized_value(&name).await
                })
            },
        ))),
        other => Err(EngineError::AffordanceNotFound {
            tool: "file_system".to_string(),
            affordance: other.to_string(),
        }),
    }
}

fn bind_interpreter(body: &Body, affordance_name: &str) -> EngineResult<Slot> {
    let interpreter = body.require_interpreter()?;
    match affordance_name {
        "function_execute" => Ok(Slot::Callable(BoundFn::new(
            "python_interpreter.function_execute",
            move |args| {
                let interpreter = Arc::clone(&interpreter);
                Box::pin(async move {
                    let tool = "python_interpreter.function_execute";
                    let script_code = args
                        .named
                        .get("script_code")
                        .map(coerce_string)
                        .ok_or_else(|| EngineError::ToolExecutionFailed {
                            tool: tool.to_string(),
                            reason: "missing argument 'script_code'".to_string(),
                        })?;
                    let function_params = args
                        .named
                        .get("function_params")
                        .cloned()
                        .unwrap_or(Value::Array(Vec::new()));
                    let function_name = args
                        .named
                        .get("function_name")
                        .map(coerce_string)
                        .unwrap_or_else(|| "main".to_string());
                    interpreter
                        .function_execute(&script_code, &function_params, &function_name)
                        .await
                })
            },
        ))),
        other => Err(EngineError::AffordanceNotFound {
            tool: "python_interpreter".to_string(),
            affordance: other.to_string(),
        }),
    }
}

fn bind_prompt_tool(body: &Body, affordance_name: &str) -> EngineResult<Slot> {
    let prompts = body
        .prompt_tool
        .clone()
        .ok_or_else(|| EngineError::ToolNotFound {
            tool: "prompt_tool".to_string(),
        })?;
    match affordance_name {
        "read" => Ok(Slot::Callable(BoundFn::new("prompt_tool.read", move |args| {
            let prompts = Arc::clone(&prompts);
            Box::pin(async move {
                let name = args.require_str("prompt_tool.read", "name")?;
                let prompt = prompts.read(&name).await?;
                Ok(json!({"name": prompt.name, "template": prompt.template}))
            })
        }))),
        other => Err(EngineError::AffordanceNotFound {
            tool: "prompt_tool".to_string(),
            affordance: other.to_string(),
        }),
    }
}

fn bind_paradigm_tool(body: &Body, affordance_name: &str) -> EngineResult<Slot> {
    let source = body
        .paradigm_tool
        .clone()
        .ok_or_else(|| EngineError::ToolNotFound {
            tool: "paradigm_tool".to_string(),
        })?;
    match affordance_name {
        "load" => Ok(Slot::Callable(BoundFn::new("paradigm_tool.load", move |args| {
            let source = Arc::clone(&source);
            Box::pin(async move {
                let name = args.require_str("paradigm_tool.load", "name")?;
                let paradigm = source.load(&name).await?;
                Ok(serde_json::to_value(paradigm)?)
            })
        }))),
        "list_manifest" => Ok(Slot::Callable(BoundFn::new(
            "paradigm_tool.list_manifest",
            move |_args| {
                let source = Arc::clone(&source);
                Box::pin(async move { Ok(Value::String(source.list_manifest().await?)) })
            },
        ))),
        other => Err(EngineError::AffordanceNotFound {
            tool: "paradigm_tool".to_string(),
            affordance: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryFileSystem, ScriptedLanguageModel};

    #[tokio::test]
    async fn test_missing_tool_is_fatal_at_binding() {
        let body = Body::new("/tmp");
        let err = bind_affordance(&body, "llm", "generate", &Map::new()).unwrap_err();
        assert!(matches!(err, EngineError::ToolNotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_affordance_is_fatal() {
        let body = Body::new("/tmp").with_llm(Arc::new(ScriptedLanguageModel::new(vec![])));
        let err = bind_affordance(&body, "llm", "nonexistent", &Map::new()).unwrap_err();
        assert!(matches!(err, EngineError::AffordanceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_generate_binding_invokes_model() {
        let body = Body::new("/tmp")
            .with_llm(Arc::new(ScriptedLanguageModel::new(vec!["hello".to_string()])));
        let Slot::Callable(generate) =
            bind_affordance(&body, "llm", "generate", &Map::new()).unwrap()
        else {
            panic!("generate binds to a callable");
        };
        let out = generate
            .call(CallArgs::positional(Value::String("hi".to_string())))
            .await
            .unwrap();
        assert_eq!(out, Value::String("hello".to_string()));
    }

    #[tokio::test]
    async fn test_save_from_dict_binding_saves_each_entry() {
        let fs = Arc::new(MemoryFileSystem::new());
        let body = Body::new("/tmp").with_file_system(Arc::clone(&fs) as _);
        let Slot::Callable(save) =
            bind_affordance(&body, "file_system", "save_from_dict", &Map::new()).unwrap()
        else {
            panic!("save_from_dict binds to a callable");
        };
        let mut args = CallArgs::positional(json!({"a.txt": "alpha", "b.txt": "beta"}));
        args.named.insert("directory".to_string(), json!("out"));
        let payload = save.call(args).await.unwrap();
        assert_eq!(payload["status"], json!("success"));
        assert_eq!(fs.file_content("out/a.txt").as_deref(), Some("alpha"));
        assert_eq!(fs.file_content("out/b.txt").as_deref(), Some("beta"));
    }

    #[tokio::test]
    async fn test_paradigm_tool_manifest_binding() {
        use crate::tests::test_utils::ask_user_blueprint;
        let paradigm = crate::paradigm::Paradigm::from_json(
            "ask_user",
            &ask_user_blueprint().to_string(),
        )
        .unwrap();
        let source = Arc::new(crate::testing::StaticSource::new(
            [("ask_user".to_string(), paradigm)].into_iter().collect(),
        ));
        let body = Body::new("/tmp").with_paradigm_tool(source);
        let Slot::Callable(manifest) =
            bind_affordance(&body, "paradigm_tool", "list_manifest", &Map::new()).unwrap()
        else {
            panic!("list_manifest binds to a callable");
        };
        let out = manifest.call(CallArgs::default()).await.unwrap();
        assert!(out.as_str().unwrap().contains("- ask_user: "));

        let Slot::Callable(load) =
            bind_affordance(&body, "paradigm_tool", "load", &Map::new()).unwrap()
        else {
            panic!("load binds to a callable");
        };
        let loaded = load
            .call(CallArgs::positional(Value::String("ask_user".to_string())))
            .await
            .unwrap();
        assert!(loaded.get("sequence_spec").is_some());
    }

    #[tokio::test]
    async fn test_exists_binding_reports_bool() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.put_file("present.txt", "content");
        let body = Body::new("/tmp").with_file_system(fs);
        let Slot::Callable(exists) =
            bind_affordance(&body, "file_system", "exists", &Map::new()).unwrap()
        else {
            panic!("exists binds to a callable");
        };
        let out = exists
            .call(CallArgs::positional(Value::String("present.txt".to_string())))
            .await
            .unwrap();
        assert_eq!(out, Value::Bool(true));
    }
}
