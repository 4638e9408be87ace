//! Tool registry and built-in tools for RepoLens.
//!
//! The registry holds tool schemas and handlers and executes calls with
//! argument validation and failure isolation. Two tools ship built in:
//! `calculate` (arithmetic) and `read_document` (fetch a file from a Git host).

pub mod calculator;
pub mod document;
pub mod registry;

use std::sync::Arc;

use repolens_core::document::DocumentSource;
use repolens_core::error::ToolError;

pub use document::ReadDocumentTool;
pub use registry::ToolRegistry;

/// Create a registry with all built-in tools.
pub fn default_registry(
    source: Arc<dyn DocumentSource>,
    max_document_chars: usize,
) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    registry.register(calculator::definition())?;
    registry.register(
        ReadDocumentTool::new(source)
            .with_max_chars(max_document_chars)
            .into_definition(),
    )?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use repolens_core::error::DocumentError;

    struct NoSource;

    #[async_trait]
    impl DocumentSource for NoSource {
        fn name(&self) -> &str {
            "none"
        }

        async fn get_file_content(
            &self,
            owner: &str,
            repo: &str,
            path: &str,
            _git_ref: Option<&str>,
        ) -> Result<String, DocumentError> {
            Err(DocumentError::NotFound {
                owner: owner.into(),
                repo: repo.into(),
                path: path.into(),
            })
        }
    }

    #[test]
    fn default_registry_has_builtins() {
        let registry = default_registry(Arc::new(NoSource), 1000).unwrap();
        assert_eq!(registry.names(), vec!["calculate", "read_document"]);
    }
}
