//! `repolens ask`: Single question, blocking or streamed.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Args;
use futures::StreamExt;
use repolens_config::AppConfig;
use repolens_core::document::{DocumentSource, RepositoryContext};
use repolens_core::message::Message;
use repolens_engine::{
    CacheStore, EngineSettings, QueryOptions, QueryOrchestrator, QueryRequest, QueryResponse,
    StreamEvent, SweeperHandle, SystemPromptBuilder,
};
use repolens_git::GitHubClient;
use repolens_providers::{RetryPolicy, build_from_config};

#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question
    pub prompt: String,

    /// Repository owner of the document to discuss
    #[arg(long, requires_all = ["repo", "path"])]
    pub owner: Option<String>,

    /// Repository name
    #[arg(long, requires_all = ["owner", "path"])]
    pub repo: Option<String>,

    /// File path inside the repository
    #[arg(long, requires_all = ["owner", "repo"])]
    pub path: Option<String>,

    /// Branch, tag or commit (defaults to the configured ref)
    #[arg(long = "ref")]
    pub git_ref: Option<String>,

    /// Provider to use instead of the configured default
    #[arg(long)]
    pub provider: Option<String>,

    /// Model to use instead of the provider's default
    #[arg(long)]
    pub model: Option<String>,

    /// Do not offer tools to the model
    #[arg(long)]
    pub no_tools: bool,

    /// Bypass the response cache
    #[arg(long)]
    pub no_cache: bool,

    /// Stream the answer as it is generated
    #[arg(long)]
    pub stream: bool,

    /// JSON file with earlier conversation messages
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Print the full response as JSON
    #[arg(long, conflicts_with = "stream")]
    pub json: bool,
}

pub async fn run(args: AskArgs) -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;

    let provider = args.provider.as_deref().unwrap_or(&config.default_provider);
    if config.api_key_for(provider).is_none() {
        eprintln!();
        eprintln!("  ERROR: No API key configured for '{provider}'!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    REPOLENS_API_KEY, OPENAI_API_KEY or OPENROUTER_API_KEY");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        bail!("No API key found. See above for setup instructions.");
    }

    let history = match &args.history {
        Some(path) => load_history(path)?,
        None => Vec::new(),
    };
    let request = build_request(&args, history, &config);
    let engine = build_engine(&config)?;

    if args.stream {
        stream_answer(engine.orchestrator.clone(), request).await
    } else {
        let response = engine.orchestrator.query(request).await?;
        print_response(&response, args.json)
    }
}

/// A wired orchestrator plus the cache sweeper that lives as long as it.
struct Engine {
    orchestrator: Arc<QueryOrchestrator>,
    _sweeper: Option<SweeperHandle>,
}

/// Wire config → providers, tools, document source → engine.
fn build_engine(config: &AppConfig) -> anyhow::Result<Engine> {
    let router = build_from_config(config);
    let source: Arc<dyn DocumentSource> = Arc::new(GitHubClient::from_config(&config.git));
    let tools = repolens_tools::default_registry(source.clone(), config.engine.max_document_chars)
        .context("Failed to register built-in tools")?;
    let cache = Arc::new(CacheStore::new(Duration::from_secs(config.cache.ttl_secs)));
    let sweeper = config
        .cache
        .enabled
        .then(|| cache.spawn_sweeper(Duration::from_secs(config.cache.sweep_interval_secs)));

    let prompt_builder = SystemPromptBuilder::new()
        .with_document_source(source)
        .with_max_document_chars(config.engine.max_document_chars);

    let orchestrator = QueryOrchestrator::new(Arc::new(router), Arc::new(tools), cache)
        .with_prompt_builder(prompt_builder)
        .with_settings(EngineSettings::from(config))
        .with_retry_policy(RetryPolicy::from(&config.retry));

    Ok(Engine {
        orchestrator: Arc::new(orchestrator),
        _sweeper: sweeper,
    })
}

fn build_request(args: &AskArgs, history: Vec<Message>, config: &AppConfig) -> QueryRequest {
    let mut request = QueryRequest::new(args.prompt.clone())
        .with_history(history)
        .with_options(QueryOptions {
            temperature: args.temperature,
            ..QueryOptions::default()
        });

    if let (Some(owner), Some(repo), Some(path)) = (&args.owner, &args.repo, &args.path) {
        let git_ref = args.git_ref.clone().unwrap_or_else(|| config.git.default_ref.clone());
        request = request.with_repository(RepositoryContext::new(owner, repo, path).with_ref(git_ref));
    }
    if !args.no_tools {
        request = request.with_tools();
    }
    if args.no_cache {
        request = request.without_cache();
    }
    if let Some(provider) = &args.provider {
        request = request.with_provider(provider);
    }
    if let Some(model) = &args.model {
        request = request.with_model(model);
    }
    request
}

fn load_history(path: &Path) -> anyhow::Result<Vec<Message>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("History file {} is not a JSON message list", path.display()))
}

fn print_response(response: &QueryResponse, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    println!("{}", response.content);
    for result in &response.tool_execution_results {
        let status = if result.success { "ok" } else { "failed" };
        eprintln!("  [tool] {} ({status}, {}ms)", result.function_name, result.duration_ms);
    }
    if response.iteration_limit_reached {
        eprintln!("  [warn] tool iteration limit reached; answer may be incomplete");
    }
    eprintln!(
        "  {} · {} · {} tokens{}",
        response.provider,
        response.model,
        response.usage.total_tokens,
        if response.cached { " · cached" } else { "" }
    );
    Ok(())
}

async fn stream_answer(engine: Arc<QueryOrchestrator>, request: QueryRequest) -> anyhow::Result<()> {
    let mut events = engine.stream_query(request);
    let mut stdout = std::io::stdout();

    loop {
        let event = tokio::select! {
            event = events.next() => event,
            _ = tokio::signal::ctrl_c() => {
                events.cancel();
                eprintln!();
                eprintln!("  [cancelled]");
                return Ok(());
            }
        };
        let Some(event) = event else {
            return Ok(());
        };

        match event {
            StreamEvent::Text { text } => {
                print!("{text}");
                stdout.flush()?;
            }
            StreamEvent::ToolCall { call } => {
                eprintln!();
                eprintln!("  [tool] {}({})", call.function_name, call.arguments);
            }
            StreamEvent::ToolResult { result } => {
                let outcome = if result.success {
                    result.result.map(|v| v.to_string()).unwrap_or_default()
                } else {
                    format!("error: {}", result.error.unwrap_or_default())
                };
                eprintln!("  [tool] {} → {outcome}", result.function_name);
            }
            StreamEvent::Done { usage, cached, iteration_limit_reached } => {
                println!();
                if iteration_limit_reached {
                    eprintln!("  [warn] tool iteration limit reached; answer may be incomplete");
                }
                eprintln!(
                    "  {} tokens{}",
                    usage.total_tokens,
                    if cached { " · cached" } else { "" }
                );
                return Ok(());
            }
            StreamEvent::Error(body) => {
                println!();
                bail!("{} error: {}", body.kind, body.message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: AskArgs,
    }

    fn parse(argv: &[&str]) -> AskArgs {
        let mut full = vec!["ask"];
        full.extend_from_slice(argv);
        Wrapper::try_parse_from(full).unwrap().args
    }

    #[test]
    fn request_from_flags() {
        let args = parse(&[
            "Explain the setup", "--owner", "acme", "--repo", "docs", "--path", "guide/setup.md",
            "--no-cache", "--model", "gpt-4o",
        ]);
        let request = build_request(&args, vec![], &AppConfig::default());

        let ctx = request.repository_context.as_ref().unwrap();
        assert_eq!(ctx.path, "guide/setup.md");
        assert_eq!(ctx.git_ref.as_deref(), Some("main"));
        assert!(request.enable_tools);
        assert!(request.disable_cache);
        assert_eq!(request.model.as_deref(), Some("gpt-4o"));
        assert!(request.provider.is_none());
    }

    #[test]
    fn partial_repository_flags_are_rejected() {
        let result = Wrapper::try_parse_from(["ask", "q", "--owner", "acme"]);
        assert!(result.is_err());
    }

    #[test]
    fn no_tools_flag() {
        let request = build_request(&parse(&["q", "--no-tools"]), vec![], &AppConfig::default());
        assert!(!request.enable_tools);
        assert!(request.repository_context.is_none());
    }

    #[tokio::test]
    async fn engine_runs_cache_sweeper_when_enabled() {
        let config = AppConfig::default();
        let engine = build_engine(&config).unwrap();
        let sweeper = engine._sweeper.as_ref().expect("sweeper should be running");
        assert!(!sweeper.is_finished());
        assert!(engine.orchestrator.cache().is_empty());

        let mut config = AppConfig::default();
        config.cache.enabled = false;
        assert!(build_engine(&config).unwrap()._sweeper.is_none());
    }

    #[test]
    fn history_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("history.json");
        std::fs::write(
            &file,
            r#"[{"role":"user","content":"hi"},{"role":"assistant","content":"hello"}]"#,
        )
        .unwrap();

        let history = load_history(&file).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "hello");

        std::fs::write(&file, "not json").unwrap();
        assert!(load_history(&file).is_err());
    }
}
