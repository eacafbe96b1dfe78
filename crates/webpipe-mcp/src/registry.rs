//! Tool Registry & Dispatcher: a declarative table of tool descriptors
//! dispatching named calls to handlers, with input validation up front.

use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use webpipe_core::{Error, Result};

use crate::state::AppState;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
pub type Handler = Arc<dyn Fn(Arc<AppState>, Value) -> HandlerFuture + Send + Sync>;

#[derive(Clone, serde::Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

struct ToolEntry {
    descriptor: ToolDescriptor,
    required: Vec<String>,
    handler: Handler,
}

/// Declarative tool table. Registration rejects duplicate names.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        required: &[&str],
        handler: Handler,
    ) -> Result<()> {
        let name = name.into();
        if self.tools.contains_key(&name) {
            return Err(Error::Generic(format!("duplicate tool registration: {name}")));
        }
        let descriptor = ToolDescriptor { name: name.clone(), description: description.into(), input_schema };
        let entry = ToolEntry { descriptor, required: required.iter().map(|s| s.to_string()).collect(), handler };
        self.tools.insert(name, entry);
        Ok(())
    }

    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|e| e.descriptor.clone()).collect()
    }

    fn missing_required(args: &Value, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|key| match args.get(key.as_str()) {
                None => true,
                Some(Value::Null) => true,
                Some(Value::String(s)) => s.is_empty(),
                _ => false,
            })
            .cloned()
            .collect()
    }

    /// Looks up `name`, validates required inputs are present and
    /// non-empty/non-null, then invokes the handler. The value returned on
    /// success is the tool's raw JSON result (callers wrap it into the
    /// MCP content envelope).
    pub async fn call(&self, state: Arc<AppState>, name: &str, args: Value) -> Result<Value> {
        let entry = self.tools.get(name).ok_or_else(|| Error::UnknownTool(name.to_string()))?;
        let args = if args.is_null() { Value::Object(Default::default()) } else { args };
        let missing = Self::missing_required(&args, &entry.required);
        if !missing.is_empty() {
            return Err(Error::BadInput(format!("missing required fields: {}", missing.join(", "))));
        }
        (entry.handler)(state, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_handler() -> Handler {
        Arc::new(|_state, _args| Box::pin(async { Ok(json!({"ok": true})) }))
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register("a", "desc", json!({}), &[], noop_handler()).is_ok());
        assert!(registry.register("a", "desc", json!({}), &[], noop_handler()).is_err());
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let registry = ToolRegistry::new();
        let state = Arc::new(AppState::new());
        let err = registry.call(state, "nope", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::UnknownTool(_)));
    }

    #[tokio::test]
    async fn missing_required_field_is_bad_input() {
        let mut registry = ToolRegistry::new();
        registry.register("a", "desc", json!({}), &["query"], noop_handler()).unwrap();
        let state = Arc::new(AppState::new());
        let err = registry.call(state, "a", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::BadInput(_)));
    }

    #[tokio::test]
    async fn empty_string_required_field_is_bad_input() {
        let mut registry = ToolRegistry::new();
        registry.register("a", "desc", json!({}), &["query"], noop_handler()).unwrap();
        let state = Arc::new(AppState::new());
        let err = registry.call(state, "a", json!({"query": ""})).await.unwrap_err();
        assert!(matches!(err, Error::BadInput(_)));
    }

    #[tokio::test]
    async fn present_required_field_dispatches() {
        let mut registry = ToolRegistry::new();
        registry.register("a", "desc", json!({}), &["query"], noop_handler()).unwrap();
        let state = Arc::new(AppState::new());
        let result = registry.call(state, "a", json!({"query": "x"})).await.unwrap();
        assert_eq!(result, json!({"ok": true}));
    }
}
