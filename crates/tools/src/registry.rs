//! Tool registry: name → definition map with validated, isolated execution.
//!
//! The registry is built once at startup and read concurrently thereafter.
//! Every call produces exactly one [`ToolExecutionResult`]: unknown names,
//! schema violations, handler errors, panics and timeouts all become
//! `success: false` results instead of propagating.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use repolens_core::error::ToolError;
use repolens_core::tool::{SchemaDialect, ToolCall, ToolDefinition, ToolExecutionResult};
use tracing::{debug, warn};

/// A registry of available tools.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names are unique; a second registration is rejected.
    pub fn register(&mut self, definition: ToolDefinition) -> Result<(), ToolError> {
        if self.tools.contains_key(&definition.name) {
            return Err(ToolError::Duplicate(definition.name));
        }
        debug!(tool = %definition.name, "Registered tool");
        self.tools.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// All definitions, sorted by name.
    pub fn definitions(&self) -> Vec<&ToolDefinition> {
        let mut defs: Vec<&ToolDefinition> = self.tools.values().collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Tool schemas rendered for a provider's dialect, sorted by name.
    pub fn schemas_for(&self, dialect: SchemaDialect) -> Vec<serde_json::Value> {
        self.definitions()
            .into_iter()
            .map(|def| def.schema(dialect))
            .collect()
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute one tool call. Never fails: every problem is reported in the
    /// returned result.
    pub async fn execute(&self, call: &ToolCall, timeout: Duration) -> ToolExecutionResult {
        let started = Instant::now();
        let elapsed_ms = |started: Instant| started.elapsed().as_millis() as u64;

        let Some(definition) = self.tools.get(&call.function_name) else {
            warn!(tool = %call.function_name, call_id = %call.id, "Model requested unknown tool");
            let err = ToolError::NotFound(call.function_name.clone());
            return ToolExecutionResult::failed(call, err.to_string(), elapsed_ms(started));
        };

        if let Err(err) = definition.parameters.validate(&call.arguments) {
            debug!(tool = %call.function_name, call_id = %call.id, error = %err, "Tool arguments rejected");
            return ToolExecutionResult::failed(call, err.to_string(), elapsed_ms(started));
        }

        let handler = definition.handler.clone();
        let invocation = AssertUnwindSafe(handler.call(call.arguments.clone())).catch_unwind();

        let outcome = match tokio::time::timeout(timeout, invocation).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(panic)) => Err(ToolError::ExecutionFailed {
                tool_name: call.function_name.clone(),
                reason: format!("handler panicked: {}", panic_message(panic.as_ref())),
            }),
            Err(_) => Err(ToolError::Timeout {
                tool_name: call.function_name.clone(),
                timeout_secs: timeout.as_secs(),
            }),
        };

        let duration_ms = elapsed_ms(started);
        match outcome {
            Ok(value) => {
                debug!(tool = %call.function_name, call_id = %call.id, duration_ms, "Tool succeeded");
                ToolExecutionResult::ok(call, value, duration_ms)
            }
            Err(err) => {
                warn!(tool = %call.function_name, call_id = %call.id, error = %err, "Tool failed");
                ToolExecutionResult::failed(call, err.to_string(), duration_ms)
            }
        }
    }

    /// Execute all calls of one turn concurrently, returning results in call order.
    pub async fn execute_all(&self, calls: &[ToolCall], timeout: Duration) -> Vec<ToolExecutionResult> {
        futures::future::join_all(calls.iter().map(|call| self.execute(call, timeout))).await
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repolens_core::tool::{ParamKind, ParameterSchema};
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn echo() -> ToolDefinition {
        ToolDefinition::from_fn(
            "echo",
            "Echoes back the input",
            ParameterSchema::new().required("text", ParamKind::String, "Text to echo"),
            |args| async move { Ok(args["text"].clone()) },
        )
    }

    fn explode(message: &str) -> Result<serde_json::Value, ToolError> {
        panic!("{message}")
    }

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            function_name: name.into(),
            arguments,
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(echo()).unwrap();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(echo()).unwrap();
        let err = registry.register(echo()).unwrap_err();
        assert!(matches!(err, ToolError::Duplicate(name) if name == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn schemas_follow_dialect() {
        let mut registry = ToolRegistry::new();
        registry.register(echo()).unwrap();

        let openai = registry.schemas_for(SchemaDialect::OpenAi);
        assert_eq!(openai[0]["function"]["name"], "echo");

        let anthropic = registry.schemas_for(SchemaDialect::Anthropic);
        assert_eq!(anthropic[0]["name"], "echo");
        assert!(anthropic[0].get("input_schema").is_some());
    }

    #[tokio::test]
    async fn execute_success() {
        let mut registry = ToolRegistry::new();
        registry.register(echo()).unwrap();

        let result = registry.execute(&call("c1", "echo", json!({"text": "hi"})), TIMEOUT).await;
        assert!(result.success);
        assert_eq!(result.tool_call_id, "c1");
        assert_eq!(result.result, Some(json!("hi")));
    }

    #[tokio::test]
    async fn unknown_tool_is_error_result() {
        let registry = ToolRegistry::new();
        let result = registry.execute(&call("c1", "missing", json!({})), TIMEOUT).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Tool not found: missing"));
    }

    #[tokio::test]
    async fn validation_failure_skips_handler() {
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolDefinition::from_fn(
                "strict",
                "Panics if invoked",
                ParameterSchema::new().required("n", ParamKind::Integer, "A number"),
                |_| async move { explode("handler must not run") },
            ))
            .unwrap();

        let result = registry.execute(&call("c1", "strict", json!({"n": "seven"})), TIMEOUT).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("must be of type integer"));
    }

    #[tokio::test]
    async fn handler_panic_is_isolated() {
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolDefinition::from_fn(
                "boom",
                "Always panics",
                ParameterSchema::new(),
                |_| async move { explode("kaboom") },
            ))
            .unwrap();

        let result = registry.execute(&call("c1", "boom", json!({})), TIMEOUT).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("kaboom"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out_without_blocking_siblings() {
        let mut registry = ToolRegistry::new();
        registry.register(echo()).unwrap();
        registry
            .register(ToolDefinition::from_fn(
                "hang",
                "Never finishes in time",
                ParameterSchema::new(),
                |_| async move {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(json!(null))
                },
            ))
            .unwrap();

        let calls = vec![
            call("a", "hang", json!({})),
            call("b", "echo", json!({"text": "fast"})),
        ];
        let results = registry.execute_all(&calls, Duration::from_secs(2)).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool_call_id, "a");
        assert!(!results[0].success);
        assert!(results[0].error.as_ref().unwrap().contains("timed out"));
        assert!(results[1].success);
    }

    #[tokio::test]
    async fn one_failure_does_not_affect_others() {
        let mut registry = ToolRegistry::new();
        registry.register(echo()).unwrap();
        registry
            .register(ToolDefinition::from_fn(
                "fail",
                "Always errors",
                ParameterSchema::new(),
                |_| async move {
                    Err(ToolError::ExecutionFailed {
                        tool_name: "fail".into(),
                        reason: "disk on fire".into(),
                    })
                },
            ))
            .unwrap();

        let calls = vec![
            call("1", "echo", json!({"text": "one"})),
            call("2", "fail", json!({})),
            call("3", "echo", json!({"text": "three"})),
        ];
        let results = registry.execute_all(&calls, TIMEOUT).await;

        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[1].error.as_ref().unwrap().contains("disk on fire"));
        assert!(results[2].success);
        assert_eq!(results[2].result, Some(json!("three")));
    }
}
