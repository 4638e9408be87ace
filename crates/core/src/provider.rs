//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and get a reply
//! back, either as a complete reply or as a stream of chunks.
//!
//! Replies are deliberately "raw": tool-call arguments are the unparsed JSON
//! text the model produced. Normalizing them into [`crate::tool::ToolCall`]s
//! is the engine's job, so every provider gets identical treatment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::SchemaDialect;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o", "anthropic/claude-sonnet-4")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tool schemas, already rendered in the provider's dialect
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<serde_json::Value>,

    /// How the model may use the tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.7
}

/// Constraint on whether/which tool the model calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// The model decides
    Auto,
    /// The model must not call tools
    None,
    /// The model must call at least one tool
    Required,
    /// The model must call this specific tool
    Function(String),
}

/// A tool call exactly as the provider reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawToolCall {
    /// Provider-assigned ID (some backends omit it)
    #[serde(default)]
    pub id: Option<String>,

    /// Name of the function the model wants to run
    pub name: String,

    /// Arguments as JSON text (may be empty or malformed)
    #[serde(default)]
    pub arguments: String,
}

/// A complete (non-streaming) reply from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderReply {
    /// Generated text (may be empty when only tool calls were produced)
    pub content: String,

    /// Tool calls the model wants executed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<RawToolCall>,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Why generation stopped, if reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    /// Add another round's usage to this one.
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// A fragment of a streamed tool call. Fragments sharing an `index` belong to
/// the same call; `arguments` pieces are concatenated in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Partial tool call deltas
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_fragments: Vec<ToolCallFragment>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn done(usage: Option<Usage>) -> Self {
        Self {
            done: true,
            usage,
            ..Self::default()
        }
    }
}

/// The receiving half of a provider stream. Dropping it tells the producer
/// to stop: its next send fails and it releases the underlying connection.
pub type ProviderStream = tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>;

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The engine calls `complete()` or
/// `stream()` without knowing which provider is being used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "openrouter").
    fn name(&self) -> &str;

    /// The wire shape this provider expects tool schemas in.
    fn schema_dialect(&self) -> SchemaDialect {
        SchemaDialect::OpenAi
    }

    /// Send a request and get a complete reply.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderReply, ProviderError>;

    /// Send a request and get a stream of reply chunks.
    ///
    /// Default implementation calls `complete()` and replays the reply as a
    /// text chunk, one fragment per tool call, and a final done chunk.
    async fn stream(&self, request: ProviderRequest) -> Result<ProviderStream, ProviderError> {
        let reply = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(2);
        let fragments = reply
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(i, tc)| ToolCallFragment {
                index: i as u32,
                id: tc.id,
                name: Some(tc.name),
                arguments: Some(tc.arguments),
            })
            .collect();
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(reply.content),
                tool_call_fragments: fragments,
                done: false,
                usage: None,
            }))
            .await;
        let _ = tx.send(Ok(StreamChunk::done(reply.usage))).await;
        Ok(rx)
    }

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider;

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderReply, ProviderError> {
            Ok(ProviderReply {
                content: "Hello".into(),
                tool_calls: vec![RawToolCall {
                    id: Some("call_1".into()),
                    name: "calculate".into(),
                    arguments: r#"{"expression":"1+1"}"#.into(),
                }],
                usage: Some(Usage::new(3, 2)),
                model: "fixed-model".into(),
                finish_reason: None,
            })
        }
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "fixed-model".into(),
            messages: vec![Message::user("hi")],
            temperature: default_temperature(),
            max_tokens: None,
            tools: vec![],
            tool_choice: None,
            stream: true,
        }
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.accumulate(&Usage::new(10, 5));
        total.accumulate(&Usage::new(7, 3));
        assert_eq!(total, Usage::new(17, 8));
        assert_eq!(total.total_tokens, 25);
    }

    #[test]
    fn usage_saturates_instead_of_overflowing() {
        let huge = Usage::new(u32::MAX, 10);
        assert_eq!(huge.total_tokens, u32::MAX);

        let mut total = Usage::new(u32::MAX - 1, 0);
        total.accumulate(&Usage::new(5, 5));
        assert_eq!(total.prompt_tokens, u32::MAX);
        assert_eq!(total.completion_tokens, 5);
        assert_eq!(total.total_tokens, u32::MAX);
    }

    #[test]
    fn tool_choice_serialization() {
        assert_eq!(serde_json::to_string(&ToolChoice::Auto).unwrap(), r#""auto""#);
        let forced: ToolChoice = serde_json::from_str(r#"{"function":"calculate"}"#).unwrap();
        assert_eq!(forced, ToolChoice::Function("calculate".into()));
    }

    #[tokio::test]
    async fn default_stream_replays_complete() {
        let mut rx = FixedProvider.stream(request()).await.unwrap();

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.content.as_deref(), Some("Hello"));
        assert_eq!(first.tool_call_fragments.len(), 1);
        assert_eq!(first.tool_call_fragments[0].name.as_deref(), Some("calculate"));

        let last = rx.recv().await.unwrap().unwrap();
        assert!(last.done);
        assert_eq!(last.usage, Some(Usage::new(3, 2)));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn default_dialect_is_openai() {
        assert_eq!(FixedProvider.schema_dialect(), SchemaDialect::OpenAi);
    }
}
