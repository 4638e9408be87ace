//! Public request, response and stream-event shapes.

use repolens_core::document::RepositoryContext;
use repolens_core::message::Message;
use repolens_core::provider::{ToolChoice, Usage};
use repolens_core::tool::{ToolCall, ToolExecutionResult};
use serde::{Deserialize, Serialize};

use crate::error::ErrorBody;

/// Per-request generation options. Unset fields fall back to engine settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Override for the history token budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_token_budget: Option<usize>,
}

/// A query against the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub prompt: String,

    #[serde(default)]
    pub conversation_history: Vec<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_context: Option<RepositoryContext>,

    #[serde(default)]
    pub enable_tools: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Provider name; the router's default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default)]
    pub options: QueryOptions,

    #[serde(default)]
    pub disable_cache: bool,
}

impl QueryRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.conversation_history = history;
        self
    }

    pub fn with_repository(mut self, ctx: RepositoryContext) -> Self {
        self.repository_context = Some(ctx);
        self
    }

    pub fn with_tools(mut self) -> Self {
        self.enable_tools = true;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.disable_cache = true;
        self
    }

    /// Whether tool schemas are sent to the provider.
    pub fn tools_active(&self) -> bool {
        self.enable_tools && self.tool_choice != Some(ToolChoice::None)
    }
}

/// The final answer to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub content: String,
    pub model: String,
    pub provider: String,

    /// Summed over every provider round of the request
    pub usage: Usage,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_execution_results: Vec<ToolExecutionResult>,

    pub cached: bool,

    /// Provider rounds taken
    #[serde(default)]
    pub iterations: u32,

    /// The tool loop was cut off; `content` is the best partial answer
    #[serde(default)]
    pub iteration_limit_reached: bool,
}

/// Events emitted by a streaming query.
///
/// - `text`: partial answer text
/// - `tool_call`: a tool is about to run
/// - `tool_result`: a tool finished
/// - `done`: terminal success event
/// - `error`: terminal failure event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Text {
        text: String,
    },

    ToolCall {
        call: ToolCall,
    },

    ToolResult {
        result: ToolExecutionResult,
    },

    Done {
        usage: Usage,
        cached: bool,
        #[serde(rename = "iterationLimitReached")]
        iteration_limit_reached: bool,
    },

    Error(ErrorBody),
}

impl StreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
            Self::Error(_) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_deserializes_camel_case() {
        let json = r#"{
            "prompt": "What does this file do?",
            "conversationHistory": [{"role": "user", "content": "hi"}],
            "repositoryContext": {"owner": "acme", "repo": "docs", "path": "README.md", "ref": "main"},
            "enableTools": true,
            "toolChoice": "auto",
            "provider": "openai",
            "options": {"temperature": 0.2, "maxTokens": 512},
            "disableCache": true
        }"#;
        let req: QueryRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.conversation_history.len(), 1);
        assert_eq!(req.repository_context.unwrap().git_ref.as_deref(), Some("main"));
        assert_eq!(req.tool_choice, Some(ToolChoice::Auto));
        assert_eq!(req.options.max_tokens, Some(512));
        assert!(req.disable_cache);
    }

    #[test]
    fn tool_choice_none_disables_tools() {
        let req = QueryRequest::new("x").with_tools().with_tool_choice(ToolChoice::None);
        assert!(!req.tools_active());
        assert!(QueryRequest::new("x").with_tools().tools_active());
        assert!(!QueryRequest::new("x").tools_active());
    }

    #[test]
    fn stream_event_serialization() {
        let json = serde_json::to_value(StreamEvent::Text { text: "Hel".into() }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "text", "text": "Hel"}));

        let done = StreamEvent::Done {
            usage: Usage::new(10, 5),
            cached: false,
            iteration_limit_reached: true,
        };
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["usage"]["totalTokens"], 15);
        assert_eq!(json["iterationLimitReached"], true);
        assert!(done.is_terminal());

        let err = StreamEvent::Error(ErrorBody {
            kind: "provider".into(),
            message: "boom".into(),
        });
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, serde_json::json!({"type": "error", "kind": "provider", "message": "boom"}));
        assert_eq!(err.event_type(), "error");
    }
}
