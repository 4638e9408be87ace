//! System prompt assembly.
//!
//! The system message is built from:
//! 1. Base behavioral instructions (always)
//! 2. Tool-usage guidance (when tools are sent to the provider)
//! 3. The repository document (on an initial request with a repository context)
//!
//! Document fetch failures degrade into a note inside the prompt; only a
//! malformed repository context aborts the request.

use std::sync::Arc;

use repolens_core::document::{DocumentSource, RepositoryContext};
use repolens_core::message::{Message, Role};
use repolens_core::tool::ToolDefinition;
use tracing::{debug, warn};

use crate::error::PromptAssemblyError;

pub const DEFAULT_INSTRUCTIONS: &str = "You are RepoLens, an assistant that helps people understand documents \
stored in Git repositories. Answer accurately and concisely, quote the document when it helps, \
and say so plainly when the answer is not in the material you were given.";

const DEFAULT_MAX_DOCUMENT_CHARS: usize = 8000;

pub struct SystemPromptBuilder {
    source: Option<Arc<dyn DocumentSource>>,
    instructions: String,
    max_document_chars: usize,
}

impl SystemPromptBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            instructions: DEFAULT_INSTRUCTIONS.into(),
            max_document_chars: DEFAULT_MAX_DOCUMENT_CHARS,
        }
    }

    /// Where repository documents are fetched from.
    pub fn with_document_source(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_max_document_chars(mut self, max: usize) -> Self {
        self.max_document_chars = max;
        self
    }

    /// Build the system message for a request.
    ///
    /// `tools` are the definitions being sent to the provider; empty when
    /// tools are disabled for this request.
    pub async fn build(
        &self,
        repository: Option<&RepositoryContext>,
        history: &[Message],
        tools: &[&ToolDefinition],
    ) -> Result<Message, PromptAssemblyError> {
        let mut prompt = self.instructions.clone();

        if !tools.is_empty() {
            prompt.push_str(&tool_guidance(tools));
        }

        if let Some(ctx) = repository {
            ctx.validate()
                .map_err(PromptAssemblyError::InvalidRepositoryContext)?;

            if is_initial_request(ctx, history) {
                prompt.push_str(&self.document_section(ctx).await);
            } else {
                debug!(document = %ctx, "Document already in conversation, skipping fetch");
                prompt.push_str(&format!(
                    "\n\n## Repository document\nThe conversation concerns `{ctx}`. \
                     Its content was provided earlier in this conversation."
                ));
            }
        }

        Ok(Message::system(prompt))
    }

    async fn document_section(&self, ctx: &RepositoryContext) -> String {
        let header = format!(
            "\n\n## Repository document\nRepository: {}/{}\nPath: {}\nRef: {}\n",
            ctx.owner,
            ctx.repo,
            ctx.path,
            ctx.git_ref.as_deref().unwrap_or("default branch"),
        );

        let Some(source) = &self.source else {
            warn!(document = %ctx, "No document source configured");
            return format!("{header}\n{}", unavailable_note("no document source is configured"));
        };

        match source
            .get_file_content(&ctx.owner, &ctx.repo, &ctx.path, ctx.git_ref.as_deref())
            .await
        {
            Ok(content) => {
                let (text, truncated) = truncate_chars(&content, self.max_document_chars);
                debug!(
                    document = %ctx,
                    chars = content.chars().count(),
                    truncated,
                    "Embedding document in system prompt"
                );
                let mut section = format!("{header}\n<document>\n{text}");
                if truncated {
                    section.push_str(&format!(
                        "\n[... document truncated at {} characters ...]",
                        self.max_document_chars
                    ));
                }
                section.push_str("\n</document>");
                section
            }
            Err(e) => {
                warn!(document = %ctx, error = %e, "Document fetch failed, continuing without it");
                format!("{header}\n{}", unavailable_note(&e.to_string()))
            }
        }
    }
}

impl Default for SystemPromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn unavailable_note(reason: &str) -> String {
    format!(
        "The document could not be loaded ({reason}). Answer from the conversation alone \
         and tell the user the document was unavailable."
    )
}

fn tool_guidance(tools: &[&ToolDefinition]) -> String {
    let mut guidance = String::from(
        "\n\n## Tools\nYou can call the tools below. Call a tool when it gives a more reliable \
         answer than reasoning alone (arithmetic, reading other files). You may call several \
         tools at once. After tool results arrive, answer the user directly.\n",
    );
    for tool in tools {
        guidance.push_str(&format!("- `{}`: {}\n", tool.name, tool.description));
    }
    guidance
}

/// Heuristic: a request is "initial" for a document unless some earlier
/// assistant turn already mentions its path or file name. Best effort only;
/// an assistant turn that merely names the file counts as having seen it.
pub fn is_initial_request(ctx: &RepositoryContext, history: &[Message]) -> bool {
    let file_name = ctx.file_name();
    !history.iter().any(|m| {
        m.role == Role::Assistant
            && (m.content.contains(ctx.path.as_str())
                || (!file_name.is_empty() && m.content.contains(file_name)))
    })
}

/// First `max_chars` characters of `text`, and whether anything was cut.
fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}
