//! Tool types: the contract between the engine and registered tools.
//!
//! A tool is a named, described, schema-checked async function the model may
//! ask the engine to run. The engine only sees the [`ToolHandler`] trait; the
//! tool bodies (document, feedback, analysis, repository mutation) live
//! outside the engine and are registered at startup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use crate::error::ToolError;

/// A request from the model to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Unique call ID within one provider turn
    pub id: String,

    /// Name of the tool to execute
    pub function_name: String,

    /// Provider-supplied arguments; validated against the tool schema before use
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// The outcome of one tool call. Exactly one is produced per issued call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionResult {
    /// The call ID this result is for
    pub tool_call_id: String,

    /// Name of the tool that was invoked
    pub function_name: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// Handler output on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Error description on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock execution time
    #[serde(default)]
    pub duration_ms: u64,
}

impl ToolExecutionResult {
    pub fn ok(call: &ToolCall, result: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            function_name: call.function_name.clone(),
            success: true,
            result: Some(result),
            error: None,
            duration_ms,
        }
    }

    pub fn failed(call: &ToolCall, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            function_name: call.function_name.clone(),
            success: false,
            result: None,
            error: Some(error.into()),
            duration_ms,
        }
    }

    /// Text fed back to the model as the `tool` message content.
    pub fn to_message_content(&self) -> String {
        match (&self.result, &self.error) {
            (Some(serde_json::Value::String(s)), _) if self.success => s.clone(),
            (Some(value), _) if self.success => value.to_string(),
            (_, Some(err)) => format!("Error: {err}"),
            _ => String::new(),
        }
    }
}

/// JSON type of a single tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Whether a JSON value is of this kind.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
                }
                _ => false,
            },
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// One named parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
}

/// Typed parameter schema of a tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub params: Vec<ParameterSpec>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required parameter.
    pub fn required(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.params.push(ParameterSpec {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
        });
        self
    }

    /// Add an optional parameter.
    pub fn optional(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.params.push(ParameterSpec {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
        });
        self
    }

    /// Render as a JSON Schema object.
    pub fn to_json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        for p in &self.params {
            properties.insert(
                p.name.clone(),
                serde_json::json!({ "type": p.kind.as_str(), "description": p.description }),
            );
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check provider-supplied arguments: must be an object, every required
    /// parameter present and non-null, every declared parameter of the right type.
    /// Undeclared keys are tolerated.
    pub fn validate(&self, arguments: &serde_json::Value) -> Result<(), ToolError> {
        let obj = arguments.as_object().ok_or_else(|| {
            ToolError::InvalidArguments(format!(
                "expected a JSON object, got {}",
                json_type_name(arguments)
            ))
        })?;

        for p in &self.params {
            match obj.get(&p.name) {
                None | Some(serde_json::Value::Null) if p.required => {
                    return Err(ToolError::InvalidArguments(format!(
                        "missing required parameter '{}'",
                        p.name
                    )));
                }
                None | Some(serde_json::Value::Null) => {}
                Some(value) if !p.kind.matches(value) => {
                    return Err(ToolError::InvalidArguments(format!(
                        "parameter '{}' must be of type {}, got {}",
                        p.name,
                        p.kind.as_str(),
                        json_type_name(value)
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Wire shape in which a provider expects tool schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaDialect {
    /// `{"type":"function","function":{name, description, parameters}}`
    #[default]
    OpenAi,
    /// `{name, description, input_schema}`
    Anthropic,
}

/// The executable half of a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with already-validated arguments.
    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send + 'static,
{
    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        (self.0)(arguments).await
    }
}

/// A registered tool: schema plus handler. Lives for the process lifetime.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ParameterSchema,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler,
        }
    }

    /// Build a definition from an async closure.
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ParameterSchema,
        f: F,
    ) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send + 'static,
    {
        Self::new(name, description, parameters, Arc::new(FnHandler(f)))
    }

    /// Render this tool's schema in a provider dialect.
    pub fn schema(&self, dialect: SchemaDialect) -> serde_json::Value {
        let parameters = self.parameters.to_json_schema();
        match dialect {
            SchemaDialect::OpenAi => serde_json::json!({
                "type": "function",
                "function": {
                    "name": self.name,
                    "description": self.description,
                    "parameters": parameters,
                }
            }),
            SchemaDialect::Anthropic => serde_json::json!({
                "name": self.name,
                "description": self.description,
                "input_schema": parameters,
            }),
        }
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}
