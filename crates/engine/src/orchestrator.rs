//! Query orchestrator: the per-request state machine.
//!
//! ```text
//! Init → CacheCheck ─hit──────────────────────────────────→ Return
//!            │ miss
//!            ▼
//!      PromptAssembly → ProviderCall ⇄ ToolExecution → FollowupPromptAssembly
//!                            │ no tool calls / limit
//!                            ▼
//!                      ResponseBuild → CacheStore → Return
//! ```
//!
//! The tool loop is an explicit counter: at most `max_tool_iterations` tool
//! rounds run, so the provider is called at most `max_tool_iterations + 1`
//! times. Hitting the bound is not an error; the response carries the best
//! partial content and `iteration_limit_reached`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use repolens_config::AppConfig;
use repolens_core::document::RepositoryContext;
use repolens_core::message::Message;
use repolens_core::provider::{Provider, ProviderRequest, RawToolCall, ToolChoice, Usage};
use repolens_providers::retry::{RetryPolicy, call_with_retry};
use repolens_providers::router::ProviderRouter;
use repolens_tools::ToolRegistry;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assembler::ResponseAssembler;
use crate::cache::{CacheStore, fingerprint};
use crate::error::QueryError;
use crate::history::HistoryOptimizer;
use crate::prompt::SystemPromptBuilder;
use crate::stream::{QueryStream, StreamCoordinator, emit};
use crate::types::{QueryOptions, QueryRequest, QueryResponse, StreamEvent};

/// Buffered events between the request task and a slow stream consumer.
const STREAM_BUFFER: usize = 64;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Tool rounds allowed per request
    pub max_tool_iterations: u32,
    pub history_token_budget: usize,
    /// Per provider attempt
    pub provider_timeout: Duration,
    /// Maximum silence between streamed chunks
    pub stream_idle_timeout: Duration,
    /// Per tool execution
    pub tool_timeout: Duration,
    pub default_temperature: f32,
    pub default_max_tokens: Option<u32>,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_tool_iterations: 5,
            history_token_budget: 4000,
            provider_timeout: Duration::from_secs(30),
            stream_idle_timeout: Duration::from_secs(30),
            tool_timeout: Duration::from_secs(30),
            default_temperature: 0.7,
            default_max_tokens: None,
            cache_enabled: true,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

impl From<&AppConfig> for EngineSettings {
    fn from(config: &AppConfig) -> Self {
        let engine = &config.engine;
        Self {
            max_tool_iterations: engine.max_tool_iterations.max(1),
            history_token_budget: engine.history_token_budget,
            provider_timeout: Duration::from_secs(engine.provider_timeout_secs),
            stream_idle_timeout: Duration::from_secs(engine.stream_idle_timeout_secs),
            tool_timeout: Duration::from_secs(engine.tool_timeout_secs),
            default_temperature: engine.default_temperature,
            default_max_tokens: engine.default_max_tokens,
            cache_enabled: config.cache.enabled,
            cache_ttl: Duration::from_secs(config.cache.ttl_secs),
        }
    }
}

/// Request lifecycle states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Init,
    CacheCheck,
    PromptAssembly,
    ProviderCall { iteration: u32 },
    ToolExecution { iteration: u32, calls: usize },
    FollowupPromptAssembly,
    ResponseBuild,
    CacheStore,
    Return,
}

/// Everything that feeds the cache key besides provider, model, prompt and history.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheKeyOptions<'a> {
    options: &'a QueryOptions,
    enable_tools: bool,
    tool_choice: Option<&'a ToolChoice>,
    repository_context: Option<&'a RepositoryContext>,
}

/// One provider round, however it was delivered.
struct ProviderTurn {
    content: String,
    tool_calls: Vec<RawToolCall>,
    usage: Option<Usage>,
    model: Option<String>,
}

/// Drives a query from request to response.
///
/// Shared state is limited to the cache and the (read-only) tool registry,
/// so one orchestrator serves any number of concurrent requests.
pub struct QueryOrchestrator {
    providers: Arc<ProviderRouter>,
    tools: Arc<ToolRegistry>,
    cache: Arc<CacheStore>,
    prompt_builder: SystemPromptBuilder,
    history: HistoryOptimizer,
    settings: EngineSettings,
    retry: RetryPolicy,
}

impl QueryOrchestrator {
    pub fn new(providers: Arc<ProviderRouter>, tools: Arc<ToolRegistry>, cache: Arc<CacheStore>) -> Self {
        let settings = EngineSettings::default();
        Self {
            providers,
            tools,
            cache,
            prompt_builder: SystemPromptBuilder::new(),
            history: HistoryOptimizer::new(settings.history_token_budget),
            settings,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_prompt_builder(mut self, builder: SystemPromptBuilder) -> Self {
        self.prompt_builder = builder;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.history = HistoryOptimizer::new(settings.history_token_budget);
        self.settings = settings;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run a query to completion.
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse, QueryError> {
        self.query_with_cancel(request, CancellationToken::new()).await
    }

    /// Run a query that stops with [`QueryError::Cancelled`] once `cancel`
    /// fires. In-flight provider and tool calls are dropped and nothing is cached.
    pub async fn query_with_cancel(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<QueryResponse, QueryError> {
        self.run(&request, None, &cancel).await
    }

    /// Run a query on a background task and stream its events.
    ///
    /// The stream ends with exactly one `done` or `error` event unless the
    /// consumer cancels or drops it first, in which case the request is
    /// cancelled and nothing more is emitted.
    pub fn stream_query(self: &Arc<Self>, request: QueryRequest) -> QueryStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let cancel = CancellationToken::new();
        let stream = QueryStream::new(rx, cancel.clone());

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let terminal = match this.run(&request, Some(&tx), &cancel).await {
                Ok(response) => StreamEvent::Done {
                    usage: response.usage,
                    cached: response.cached,
                    iteration_limit_reached: response.iteration_limit_reached,
                },
                Err(QueryError::Cancelled) => {
                    debug!("Streaming query cancelled");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, kind = e.kind(), "Streaming query failed");
                    StreamEvent::Error(e.body())
                }
            };
            let _ = emit(&tx, &cancel, terminal).await;
        });

        stream
    }

    async fn run(
        &self,
        request: &QueryRequest,
        sink: Option<&mpsc::Sender<StreamEvent>>,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse, QueryError> {
        let request_id = uuid::Uuid::new_v4();
        transition(&request_id, QueryState::Init);

        if request.prompt.trim().is_empty() {
            return Err(QueryError::InvalidRequest("prompt is empty".into()));
        }
        if let Some(t) = request.options.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(QueryError::InvalidRequest(format!(
                "temperature {t} is outside [0, 2]"
            )));
        }

        let (provider_name, provider, model) = self
            .providers
            .resolve(request.provider.as_deref(), request.model.as_deref())?;

        transition(&request_id, QueryState::CacheCheck);
        let cache_key = self.cache_key(request, &provider_name, &model);
        if let Some(key) = &cache_key {
            if let Some(mut hit) = self.cache.get(key) {
                debug!(%request_id, cache_key = %key, "Cache hit");
                hit.cached = true;
                if let Some(sink) = sink
                    && !hit.content.is_empty()
                {
                    emit(sink, cancel, StreamEvent::Text { text: hit.content.clone() }).await?;
                }
                transition(&request_id, QueryState::Return);
                return Ok(hit);
            }
            debug!(%request_id, cache_key = %key, "Cache miss");
        }

        transition(&request_id, QueryState::PromptAssembly);
        let tool_defs = if request.tools_active() {
            self.tools.definitions()
        } else {
            Vec::new()
        };
        let system = cancellable(
            cancel,
            self.prompt_builder.build(
                request.repository_context.as_ref(),
                &request.conversation_history,
                &tool_defs,
            ),
        )
        .await??;
        let history = self
            .history
            .optimize(&request.conversation_history, request.options.history_token_budget);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(system);
        messages.extend(history);
        messages.push(Message::user(request.prompt.clone()));

        let schemas = if request.tools_active() {
            self.tools.schemas_for(provider.schema_dialect())
        } else {
            Vec::new()
        };
        let tool_choice = if schemas.is_empty() {
            None
        } else {
            request.tool_choice.clone()
        };

        let mut assembler = ResponseAssembler::new(&provider_name, &model);
        let mut tool_rounds = 0u32;
        let mut limit_reached = false;

        loop {
            let iteration = assembler.iterations() + 1;
            transition(&request_id, QueryState::ProviderCall { iteration });

            let provider_request = ProviderRequest {
                model: model.clone(),
                messages: messages.clone(),
                temperature: request
                    .options
                    .temperature
                    .unwrap_or(self.settings.default_temperature),
                max_tokens: request.options.max_tokens.or(self.settings.default_max_tokens),
                tools: schemas.clone(),
                tool_choice: round_tool_choice(tool_choice.as_ref(), tool_rounds),
                stream: sink.is_some(),
            };

            let turn = self
                .call_provider(&provider_name, &provider, provider_request, sink, cancel)
                .await?;
            assembler.record_turn(&turn.content, turn.usage, turn.model.as_deref());

            if turn.tool_calls.is_empty() {
                break;
            }

            if tool_rounds >= self.settings.max_tool_iterations {
                warn!(
                    %request_id,
                    provider = %provider_name,
                    iteration,
                    max_tool_iterations = self.settings.max_tool_iterations,
                    pending_calls = turn.tool_calls.len(),
                    "Tool iteration limit reached, returning partial response"
                );
                limit_reached = true;
                break;
            }
            tool_rounds += 1;

            let calls = assembler.normalize_tool_calls(turn.tool_calls);
            transition(
                &request_id,
                QueryState::ToolExecution {
                    iteration: tool_rounds,
                    calls: calls.len(),
                },
            );
            messages.push(Message::assistant_with_tools(turn.content, calls.clone()));

            if let Some(sink) = sink {
                for call in &calls {
                    emit(sink, cancel, StreamEvent::ToolCall { call: call.clone() }).await?;
                }
            }

            let results =
                cancellable(cancel, self.tools.execute_all(&calls, self.settings.tool_timeout)).await?;

            for result in &results {
                if !result.success {
                    warn!(
                        %request_id,
                        tool = %result.function_name,
                        error = result.error.as_deref().unwrap_or_default(),
                        "Tool call failed"
                    );
                }
                if let Some(sink) = sink {
                    emit(sink, cancel, StreamEvent::ToolResult { result: result.clone() }).await?;
                }
                messages.push(Message::tool_result(
                    result.tool_call_id.clone(),
                    result.to_message_content(),
                ));
            }
            assembler.record_results(results);

            transition(&request_id, QueryState::FollowupPromptAssembly);
        }

        if cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }

        transition(&request_id, QueryState::ResponseBuild);
        let response = assembler.finish(limit_reached);

        if let Some(key) = cache_key {
            transition(&request_id, QueryState::CacheStore);
            if response.iteration_limit_reached {
                debug!(%request_id, "Partial response not cached");
            } else {
                self.cache.set(key, response.clone(), self.settings.cache_ttl);
            }
        }

        info!(
            %request_id,
            provider = %response.provider,
            model = %response.model,
            iterations = response.iterations,
            tool_calls = response.tool_calls.len(),
            total_tokens = response.usage.total_tokens,
            "Query completed"
        );
        transition(&request_id, QueryState::Return);
        Ok(response)
    }

    /// Fingerprint the request, or `None` when caching does not apply.
    fn cache_key(&self, request: &QueryRequest, provider: &str, model: &str) -> Option<String> {
        if !self.settings.cache_enabled || request.disable_cache {
            return None;
        }
        let options = CacheKeyOptions {
            options: &request.options,
            enable_tools: request.enable_tools,
            tool_choice: request.tool_choice.as_ref(),
            repository_context: request.repository_context.as_ref(),
        };
        match fingerprint(
            provider,
            model,
            &request.prompt,
            &request.conversation_history,
            &options,
        ) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "Cache fingerprint failed, treating as miss");
                None
            }
        }
    }

    /// One provider round. Opening the call is retried on transient errors;
    /// a stream that fails midway is not.
    async fn call_provider(
        &self,
        name: &str,
        provider: &Arc<dyn Provider>,
        request: ProviderRequest,
        sink: Option<&mpsc::Sender<StreamEvent>>,
        cancel: &CancellationToken,
    ) -> Result<ProviderTurn, QueryError> {
        let timeout = self.settings.provider_timeout;

        let Some(sink) = sink else {
            let reply = cancellable(
                cancel,
                call_with_retry(&self.retry, timeout, name, || provider.complete(request.clone())),
            )
            .await??;
            return Ok(ProviderTurn {
                content: reply.content,
                tool_calls: reply.tool_calls,
                usage: reply.usage,
                model: Some(reply.model),
            });
        };

        let upstream = cancellable(
            cancel,
            call_with_retry(&self.retry, timeout, name, || provider.stream(request.clone())),
        )
        .await??;
        let turn = StreamCoordinator::new(self.settings.stream_idle_timeout)
            .drive(upstream, sink, cancel)
            .await?;
        Ok(ProviderTurn {
            content: turn.content,
            tool_calls: turn.tool_calls,
            usage: turn.usage,
            model: None,
        })
    }
}

impl std::fmt::Debug for QueryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOrchestrator")
            .field("providers", &self.providers.list())
            .field("tools", &self.tools.names())
            .field("cache", &self.cache)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn transition(request_id: &uuid::Uuid, state: QueryState) {
    debug!(%request_id, ?state, "Query state");
}

/// Forcing choices apply to the first round only; follow-ups fall back to
/// `Auto` so the model can answer after seeing the tool results.
fn round_tool_choice(choice: Option<&ToolChoice>, tool_rounds: u32) -> Option<ToolChoice> {
    match choice {
        Some(ToolChoice::Required | ToolChoice::Function(_)) if tool_rounds > 0 => {
            Some(ToolChoice::Auto)
        }
        other => other.cloned(),
    }
}

/// Await `fut` unless `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, QueryError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(QueryError::Cancelled),
        value = fut => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_from_config() {
        let mut config = AppConfig::default();
        config.engine.max_tool_iterations = 0;
        config.engine.tool_timeout_secs = 7;
        config.cache.enabled = false;
        config.cache.ttl_secs = 60;

        let settings = EngineSettings::from(&config);
        assert_eq!(settings.max_tool_iterations, 1);
        assert_eq!(settings.tool_timeout, Duration::from_secs(7));
        assert!(!settings.cache_enabled);
        assert_eq!(settings.cache_ttl, Duration::from_secs(60));
    }

    #[test]
    fn forced_tool_choice_only_on_first_round() {
        let required = ToolChoice::Required;
        assert_eq!(round_tool_choice(Some(&required), 0), Some(ToolChoice::Required));
        assert_eq!(round_tool_choice(Some(&required), 1), Some(ToolChoice::Auto));

        let named = ToolChoice::Function("calculate".into());
        assert_eq!(round_tool_choice(Some(&named), 0), Some(named.clone()));
        assert_eq!(round_tool_choice(Some(&named), 2), Some(ToolChoice::Auto));

        assert_eq!(round_tool_choice(Some(&ToolChoice::Auto), 3), Some(ToolChoice::Auto));
        assert_eq!(round_tool_choice(None, 1), None);
    }

    #[tokio::test]
    async fn cancellable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = cancellable(&cancel, async { 1 }).await;
        assert!(matches!(result, Err(QueryError::Cancelled)));

        let result = cancellable(&CancellationToken::new(), async { 1 }).await;
        assert_eq!(result.unwrap(), 1);
    }
}
