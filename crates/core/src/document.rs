//! Document source trait: the abstraction over Git hosting services.
//!
//! The engine only needs one capability from a Git host: fetch the text of a
//! file at a given ref. Implementations live in `repolens-git`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DocumentError;

/// Identifies the repository document a conversation is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryContext {
    pub owner: String,
    pub repo: String,
    pub path: String,
    /// Branch, tag or commit. `None` means the source's default ref.
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

impl RepositoryContext {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            path: path.into(),
            git_ref: None,
        }
    }

    pub fn with_ref(mut self, git_ref: impl Into<String>) -> Self {
        self.git_ref = Some(git_ref.into());
        self
    }

    /// Check that the context names a fetchable file.
    ///
    /// Returns a human-readable reason when it does not.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [("owner", &self.owner), ("repo", &self.repo), ("path", &self.path)] {
            if value.trim().is_empty() {
                return Err(format!("repository context field '{field}' is empty"));
            }
        }
        for (field, value) in [("owner", &self.owner), ("repo", &self.repo)] {
            if value.contains('/') || value.chars().any(char::is_whitespace) {
                return Err(format!("repository context field '{field}' is malformed: {value:?}"));
            }
        }
        if self.path.split('/').any(|segment| segment == "..") {
            return Err(format!("document path escapes the repository: {:?}", self.path));
        }
        Ok(())
    }

    /// Last path segment, e.g. `intro.md` for `guide/intro.md`.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

impl std::fmt::Display for RepositoryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.owner, self.repo, self.path)?;
        if let Some(r) = &self.git_ref {
            write!(f, "@{r}")?;
        }
        Ok(())
    }
}

/// Fetches document content from a Git host.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// A human-readable name for this source (e.g., "github").
    fn name(&self) -> &str;

    /// Fetch the text content of `path` in `owner/repo` at `git_ref`.
    async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<String, DocumentError>;
}
