//! Shared helpers for engine scenario tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use repolens_core::document::DocumentSource;
use repolens_core::error::{DocumentError, ProviderError, ToolError};
use repolens_core::message::Message;
use repolens_core::provider::{
    Provider, ProviderReply, ProviderRequest, ProviderStream, RawToolCall, StreamChunk, Usage,
};
use repolens_core::tool::{ParameterSchema, ToolDefinition};
use repolens_engine::{CacheStore, EngineSettings, QueryOrchestrator, SystemPromptBuilder};
use repolens_providers::{ProviderRouter, RetryPolicy};
use repolens_tools::ToolRegistry;
use tokio_util::sync::CancellationToken;

pub const PROVIDER: &str = "mock";
pub const MODEL: &str = "mock-model";

/// Returns scripted replies in order and records every request it receives.
pub struct SequentialMockProvider {
    replies: Mutex<VecDeque<ProviderReply>>,
    requests: Mutex<Vec<ProviderRequest>>,
    calls: AtomicUsize,
}

impl SequentialMockProvider {
    pub fn new(replies: Vec<ProviderReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderReply, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        self.replies.lock().unwrap().pop_front().ok_or_else(|| {
            ProviderError::InvalidRequest(format!("no scripted reply for call #{n}"))
        })
    }
}

/// Requests another tool call on every turn, forever.
pub struct AlwaysToolCallProvider {
    calls: AtomicUsize,
}

impl AlwaysToolCallProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for AlwaysToolCallProvider {
    fn name(&self) -> &str {
        "always_tool_call"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderReply, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(tool_call_reply(
            &format!("Still working (step {n})"),
            vec![raw_call(Some("call_loop"), "calculate", r#"{"expression":"1+1"}"#)],
        ))
    }
}

/// Answers normally but cancels `token` while doing so, as if the caller
/// gave up just as the final round came back.
pub struct CancellingProvider {
    pub token: CancellationToken,
}

#[async_trait]
impl Provider for CancellingProvider {
    fn name(&self) -> &str {
        "cancelling"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderReply, ProviderError> {
        self.token.cancel();
        Ok(text_reply("too late"))
    }
}

/// Streams `chunks` one every `interval`. Records how many were delivered
/// and whether the producer noticed the consumer going away.
pub struct SlowStreamProvider {
    chunks: Vec<String>,
    interval: Duration,
    delivered: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl SlowStreamProvider {
    pub fn new(chunks: usize, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            chunks: (0..chunks).map(|i| format!("chunk{i} ")).collect(),
            interval,
            delivered: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for SlowStreamProvider {
    fn name(&self) -> &str {
        "slow_stream"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderReply, ProviderError> {
        Ok(text_reply(&self.chunks.concat()))
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ProviderStream, ProviderError> {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let chunks = self.chunks.clone();
        let interval = self.interval;
        let delivered = Arc::clone(&self.delivered);
        let released = Arc::clone(&self.released);

        tokio::spawn(async move {
            for chunk in chunks {
                tokio::time::sleep(interval).await;
                if tx.send(Ok(StreamChunk::text(chunk))).await.is_err() {
                    released.store(true, Ordering::SeqCst);
                    return;
                }
                delivered.fetch_add(1, Ordering::SeqCst);
            }
            let _ = tx.send(Ok(StreamChunk::done(Some(Usage::new(10, 5))))).await;
        });

        Ok(rx)
    }
}

/// Serves one fixed document for any path.
pub struct StaticSource(pub String);

#[async_trait]
impl DocumentSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn get_file_content(
        &self,
        _owner: &str,
        _repo: &str,
        _path: &str,
        _git_ref: Option<&str>,
    ) -> Result<String, DocumentError> {
        Ok(self.0.clone())
    }
}

pub fn text_reply(text: &str) -> ProviderReply {
    ProviderReply {
        content: text.into(),
        tool_calls: vec![],
        usage: Some(Usage::new(10, 5)),
        model: MODEL.into(),
        finish_reason: Some("stop".into()),
    }
}

pub fn tool_call_reply(text: &str, calls: Vec<RawToolCall>) -> ProviderReply {
    ProviderReply {
        content: text.into(),
        tool_calls: calls,
        usage: Some(Usage::new(10, 5)),
        model: MODEL.into(),
        finish_reason: Some("tool_calls".into()),
    }
}

pub fn raw_call(id: Option<&str>, name: &str, arguments: &str) -> RawToolCall {
    RawToolCall {
        id: id.map(String::from),
        name: name.into(),
        arguments: arguments.into(),
    }
}

fn explode(message: &str) -> Result<serde_json::Value, ToolError> {
    panic!("{message}")
}

/// A tool whose handler always panics.
pub fn exploding_tool() -> ToolDefinition {
    ToolDefinition::from_fn("explode", "Always fails", ParameterSchema::new(), |_| async move {
        explode("detonated")
    })
}

/// Built-in tools plus [`exploding_tool`].
pub fn registry() -> ToolRegistry {
    let source = Arc::new(StaticSource("# Guide\nRun the installer.".into()));
    let mut registry = repolens_tools::default_registry(source, 8000).unwrap();
    registry.register(exploding_tool()).unwrap();
    registry
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        tool_timeout: Duration::from_secs(5),
        ..EngineSettings::default()
    }
}

pub fn orchestrator(provider: Arc<dyn Provider>) -> QueryOrchestrator {
    orchestrator_with(provider, settings())
}

pub fn orchestrator_with(provider: Arc<dyn Provider>, settings: EngineSettings) -> QueryOrchestrator {
    let mut router = ProviderRouter::new(PROVIDER, MODEL);
    router.register(PROVIDER, provider);

    let source = Arc::new(StaticSource("# Guide\nRun the installer.".into()));
    QueryOrchestrator::new(
        Arc::new(router),
        Arc::new(registry()),
        Arc::new(CacheStore::default()),
    )
    .with_prompt_builder(SystemPromptBuilder::new().with_document_source(source))
    .with_settings(settings)
    .with_retry_policy(RetryPolicy::no_retry())
}

/// ~200 estimated tokens per message (4 overhead + 784 bytes / 4).
pub fn long_conversation(turns: usize) -> Vec<Message> {
    (0..turns)
        .map(|i| {
            let content = format!("{i:04}").repeat(196);
            if i % 2 == 0 {
                Message::user(content)
            } else {
                Message::assistant(content)
            }
        })
        .collect()
}
