// Action Dispatcher - routes an action-type tag to its category handler
//
// Concrete domain actions (send an email, create a task, ...) live in the
// surrounding application; the engine only sees them through the uniform
// ActionHandler contract. Flow-control actions are never dispatched here -
// the executor interprets them.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::actions::{ActionCategory, ActionOutcome, ActionType};
use crate::error::EngineResult;
use crate::models::Actor;

/// Context passed to every action handler invocation.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub execution_id: Uuid,
    pub rule_id: Uuid,
    pub subject_id: Option<Uuid>,
    pub actor: Option<Actor>,
    pub payload: Value,
}

/// Uniform contract every action category handler satisfies.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(
        &self,
        action_type: ActionType,
        config: &Value,
        ctx: &ActionContext,
    ) -> EngineResult<ActionOutcome>;
}

/// Routes action types to registered category handlers.
#[derive(Default)]
pub struct ActionDispatcher {
    handlers: HashMap<ActionCategory, Arc<dyn ActionHandler>>,
}

impl ActionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, category: ActionCategory, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(category, handler);
    }

    pub fn with_handler(mut self, category: ActionCategory, handler: Arc<dyn ActionHandler>) -> Self {
        self.register(category, handler);
        self
    }

    /// Dispatch a single action. Never panics and never propagates handler
    /// errors: a missing handler or a handler `Err` becomes a failed
    /// outcome so the executor treats both identically to a returned
    /// failure.
    pub async fn dispatch(
        &self,
        action_type: ActionType,
        config: &Value,
        ctx: &ActionContext,
    ) -> ActionOutcome {
        let category = action_type.category();
        if category == ActionCategory::FlowControl {
            return ActionOutcome::failure(format!(
                "{action_type:?} is a flow-control action and must be interpreted by the executor"
            ));
        }

        let Some(handler) = self.handlers.get(&category) else {
            return ActionOutcome::failure(format!(
                "no handler registered for category {category:?} (action {action_type:?})"
            ));
        };

        match handler.execute(action_type, config, ctx).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(action = ?action_type, %err, "action handler raised");
                ActionOutcome::failure(err.to_string())
            }
        }
    }
}

/// Default handler for the webhook category: POST/GET/PUT the configured
/// payload to an external URL.
pub struct WebhookCallHandler {
    client: reqwest::Client,
}

impl WebhookCallHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WebhookCallHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionHandler for WebhookCallHandler {
    async fn execute(
        &self,
        _action_type: ActionType,
        config: &Value,
        _ctx: &ActionContext,
    ) -> EngineResult<ActionOutcome> {
        let Some(url) = config.get("url").and_then(Value::as_str) else {
            return Ok(ActionOutcome::failure("call_webhook config missing 'url'"));
        };
        let method = config
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("POST");
        let payload = config.get("payload").cloned().unwrap_or(Value::Null);

        let request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url).json(&payload),
            "PUT" => self.client.put(url).json(&payload),
            other => {
                return Ok(ActionOutcome::failure(format!(
                    "unsupported HTTP method '{other}'"
                )))
            }
        };

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let success = response.status().is_success();
                Ok(ActionOutcome {
                    success,
                    message: format!("{method} {url} -> {status}"),
                    data: Some(serde_json::json!({ "status_code": status })),
                })
            }
            Err(err) => Ok(ActionOutcome::failure(format!(
                "webhook call to {url} failed: {err}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl ActionHandler for EchoHandler {
        async fn execute(
            &self,
            action_type: ActionType,
            _config: &Value,
            _ctx: &ActionContext,
        ) -> EngineResult<ActionOutcome> {
            Ok(ActionOutcome::success(format!("{action_type:?} ok"), None))
        }
    }

    fn ctx() -> ActionContext {
        ActionContext {
            execution_id: Uuid::new_v4(),
            rule_id: Uuid::new_v4(),
            subject_id: None,
            actor: None,
            payload: Value::Null,
        }
    }

    #[tokio::test]
    async fn unregistered_category_fails_without_panicking() {
        let dispatcher = ActionDispatcher::new();
        let outcome = dispatcher
            .dispatch(ActionType::SendEmail, &Value::Null, &ctx())
            .await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("no handler registered"));
    }

    #[tokio::test]
    async fn flow_control_is_rejected_by_the_dispatcher() {
        let dispatcher = ActionDispatcher::new()
            .with_handler(ActionCategory::FlowControl, Arc::new(EchoHandler));
        let outcome = dispatcher
            .dispatch(ActionType::Branch, &Value::Null, &ctx())
            .await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn registered_handler_receives_the_call() {
        let dispatcher =
            ActionDispatcher::new().with_handler(ActionCategory::Task, Arc::new(EchoHandler));
        let outcome = dispatcher
            .dispatch(ActionType::CreateTask, &Value::Null, &ctx())
            .await;
        assert!(outcome.success);
    }
}
