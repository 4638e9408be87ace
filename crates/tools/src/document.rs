//! `read_document` tool: fetch a file from a Git host.
//!
//! Lets the model pull in documents beyond the one the conversation was
//! opened on. Content is truncated to a character limit so one large file
//! cannot crowd out the rest of the context.

use std::sync::Arc;

use async_trait::async_trait;
use repolens_core::document::{DocumentSource, RepositoryContext};
use repolens_core::error::ToolError;
use repolens_core::tool::{ParamKind, ParameterSchema, ToolDefinition, ToolHandler};
use tracing::debug;

pub const NAME: &str = "read_document";

const DEFAULT_MAX_CHARS: usize = 8000;

pub struct ReadDocumentTool {
    source: Arc<dyn DocumentSource>,
    max_chars: usize,
}

impl ReadDocumentTool {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self {
            source,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    /// Wrap this handler in a registrable definition.
    pub fn into_definition(self) -> ToolDefinition {
        ToolDefinition::new(
            NAME,
            "Read a file from a Git repository. Returns the file content (possibly truncated).",
            ParameterSchema::new()
                .required("owner", ParamKind::String, "Repository owner or organization")
                .required("repo", ParamKind::String, "Repository name")
                .required("path", ParamKind::String, "File path within the repository")
                .optional("ref", ParamKind::String, "Branch, tag or commit (default branch if omitted)"),
            Arc::new(self),
        )
    }
}

fn string_arg(arguments: &serde_json::Value, key: &str) -> String {
    arguments[key].as_str().unwrap_or_default().to_string()
}

#[async_trait]
impl ToolHandler for ReadDocumentTool {
    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let mut ctx = RepositoryContext::new(
            string_arg(&arguments, "owner"),
            string_arg(&arguments, "repo"),
            string_arg(&arguments, "path"),
        );
        if let Some(r) = arguments["ref"].as_str() {
            ctx = ctx.with_ref(r);
        }
        ctx.validate().map_err(ToolError::InvalidArguments)?;

        debug!(document = %ctx, source = self.source.name(), "Reading document for tool call");
        let content = self
            .source
            .get_file_content(&ctx.owner, &ctx.repo, &ctx.path, ctx.git_ref.as_deref())
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: NAME.into(),
                reason: e.to_string(),
            })?;

        let total_chars = content.chars().count();
        let truncated = total_chars > self.max_chars;
        let content = if truncated {
            content.chars().take(self.max_chars).collect()
        } else {
            content
        };

        Ok(serde_json::json!({
            "path": ctx.path,
            "content": content,
            "truncated": truncated,
            "totalChars": total_chars,
        }))
    }
}
