//! User-interaction affordances.
//!
//! Each factory produces a callable that renders its question from the
//! runtime input dict and forwards one `InteractionRequest` to the body's
//! user-input tool.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::{coerce_string, Body, BoundFn, CallArgs, InteractionRequest, Slot, UserInput};
use crate::error::{EngineError, EngineResult};

pub fn bind(body: &Body, affordance_name: &str, params: &Map<String, Value>) -> EngineResult<Slot> {
    let user_input = body
        .user_input
        .clone()
        .ok_or_else(|| EngineError::ToolNotFound {
            tool: "user_input".to_string(),
        })?;
    match affordance_name {
        "create_input_function" => Ok(Slot::Callable(interaction_fn(
            user_input,
            "input".to_string(),
        ))),
        "create_interaction" => {
            let interaction_type = params
                .get("interaction_type")
                .map(coerce_string)
                .ok_or_else(|| EngineError::StepBindingFailed {
                    step: "create_interaction".to_string(),
                    reason: "missing 'interaction_type' param".to_string(),
                })?;
            Ok(Slot::Callable(interaction_fn(user_input, interaction_type)))
        }
        "create_text_editor_function" => Ok(Slot::Callable(interaction_fn(
            user_input,
            "text_editor".to_string(),
        ))),
        other => Err(EngineError::AffordanceNotFound {
            tool: "user_input".to_string(),
            affordance: other.to_string(),
        }),
    }
}

fn interaction_fn(user_input: Arc<dyn UserInput>, interaction_type: String) -> BoundFn {
    BoundFn::new("user_input.interaction", move |args| {
        let user_input = Arc::clone(&user_input);
        let interaction_type = interaction_type.clone();
        Box::pin(async move {
            let prompt = question_text(&args);
            user_input
                .request(InteractionRequest {
                    interaction_type,
                    prompt,
                })
                .await
        })
    })
}

/// The question shown to the user: the first positional input of the
/// runtime dict, or the argument's own string form.
fn question_text(args: &CallArgs) -> String {
    match args.positional_or("prompt") {
        Some(Value::Object(fields)) => fields
            .get("input_1")
            .or_else(|| fields.get("prompt"))
            .map(coerce_string)
            .unwrap_or_default(),
        Some(other) => coerce_string(other),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::QueuedUserInput;
    use serde_json::json;

    #[tokio::test]
    async fn test_input_function_asks_first_input() {
        let user = Arc::new(QueuedUserInput::new(vec![json!("Ada")]));
        let body = Body::new("/tmp").with_user_input(Arc::clone(&user) as Arc<dyn UserInput>);
        let Slot::Callable(ask) = bind(&body, "create_input_function", &Map::new()).unwrap()
        else {
            panic!("factory produces a callable");
        };
        let answer = ask
            .call(CallArgs::positional(
                json!({"input_1": "What is your name?"}),
            ))
            .await
            .unwrap();
        assert_eq!(answer, json!("Ada"));
        assert_eq!(user.asked(), vec!["What is your name?".to_string()]);
    }

    #[tokio::test]
    async fn test_text_editor_function_forwards_initial_text() {
        let user = Arc::new(QueuedUserInput::new(vec![json!("edited")]));
        let body = Body::new("/tmp").with_user_input(Arc::clone(&user) as Arc<dyn UserInput>);
        let Slot::Callable(edit) =
            bind(&body, "create_text_editor_function", &Map::new()).unwrap()
        else {
            panic!("factory produces a callable");
        };
        let out = edit
            .call(CallArgs::positional(json!({"input_1": "draft text"})))
            .await
            .unwrap();
        assert_eq!(out, json!("edited"));
        assert_eq!(user.asked(), vec!["draft text".to_string()]);
    }

    #[tokio::test]
    async fn test_create_interaction_requires_type() {
        let user = Arc::new(QueuedUserInput::new(vec![]));
        let body = Body::new("/tmp").with_user_input(user);
        assert!(bind(&body, "create_interaction", &Map::new()).is_err());
    }
}
