//! Git hosting document sources for RepoLens.
//!
//! [`GitHubClient`] fetches raw file content through the GitHub contents API.
//! It implements `repolens_core::DocumentSource`, which is all the engine
//! needs from a Git host.

use async_trait::async_trait;
use repolens_core::document::DocumentSource;
use repolens_core::error::DocumentError;
use tracing::{debug, warn};

const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";
const USER_AGENT: &str = concat!("repolens/", env!("CARGO_PKG_VERSION"));

/// GitHub REST API document source.
pub struct GitHubClient {
    api_url: String,
    token: Option<String>,
    default_ref: String,
    client: reqwest::Client,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let api_url: String = api_url.into();

        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            default_ref: "main".into(),
            client,
        }
    }

    /// Ref used when a caller does not name one.
    pub fn with_default_ref(mut self, git_ref: impl Into<String>) -> Self {
        self.default_ref = git_ref.into();
        self
    }

    pub fn from_config(config: &repolens_config::GitConfig) -> Self {
        Self::new(&config.api_url, config.token.clone()).with_default_ref(&config.default_ref)
    }

    /// Build `{api}/repos/{owner}/{repo}/contents/{path}?ref={ref}` with every
    /// segment percent-encoded.
    fn contents_url(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<reqwest::Url, DocumentError> {
        let mut url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| DocumentError::Service(format!("invalid API URL '{}': {e}", self.api_url)))?;

        url.path_segments_mut()
            .map_err(|_| DocumentError::Service(format!("API URL '{}' cannot be a base", self.api_url)))?
            .pop_if_empty()
            .extend(["repos", owner, repo, "contents"])
            .extend(path.split('/').filter(|s| !s.is_empty()));

        url.query_pairs_mut()
            .append_pair("ref", git_ref.unwrap_or(&self.default_ref));

        Ok(url)
    }
}

#[async_trait]
impl DocumentSource for GitHubClient {
    fn name(&self) -> &str {
        "github"
    }

    async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<String, DocumentError> {
        let url = self.contents_url(owner, repo, path, git_ref)?;
        debug!(owner, repo, path, url = %url, "Fetching document");

        let mut request = self.client.get(url).header("Accept", RAW_MEDIA_TYPE);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| DocumentError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            200 => response
                .text()
                .await
                .map_err(|e| DocumentError::Network(e.to_string())),
            404 => Err(DocumentError::NotFound {
                owner: owner.into(),
                repo: repo.into(),
                path: path.into(),
            }),
            401 | 403 => {
                let body = response.text().await.unwrap_or_default();
                warn!(owner, repo, status, "GitHub denied access");
                Err(DocumentError::AccessDenied {
                    owner: owner.into(),
                    repo: repo.into(),
                    reason: body,
                })
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                warn!(owner, repo, status, body = %body, "GitHub returned error");
                Err(DocumentError::Service(format!("HTTP {status}: {body}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contents_url_layout() {
        let client = GitHubClient::new("https://api.github.com/", None);
        let url = client
            .contents_url("acme", "handbook", "docs/intro.md", Some("v2"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/acme/handbook/contents/docs/intro.md?ref=v2"
        );
    }

    #[test]
    fn contents_url_uses_default_ref() {
        let client = GitHubClient::new("https://api.github.com", None).with_default_ref("develop");
        let url = client.contents_url("acme", "handbook", "README.md", None).unwrap();
        assert!(url.as_str().ends_with("README.md?ref=develop"));
    }

    #[test]
    fn contents_url_encodes_segments() {
        let client = GitHubClient::new("https://ghe.example.com/api/v3", None);
        let url = client
            .contents_url("acme", "handbook", "release notes/v1 #2.md", None)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://ghe.example.com/api/v3/repos/acme/handbook/contents/release%20notes/v1%20%232.md?ref=main"
        );
    }

    #[test]
    fn invalid_api_url_is_service_error() {
        let client = GitHubClient::new("not a url", None);
        let err = client.contents_url("a", "b", "c", None).unwrap_err();
        assert!(matches!(err, DocumentError::Service(_)));
    }

    #[test]
    fn from_config_picks_up_token_and_ref() {
        let config = repolens_config::GitConfig {
            token: Some("ghp_test".into()),
            default_ref: "trunk".into(),
            ..Default::default()
        };
        let client = GitHubClient::from_config(&config);
        assert_eq!(client.token.as_deref(), Some("ghp_test"));
        assert_eq!(client.default_ref, "trunk");
        assert_eq!(client.name(), "github");
    }

    #[test]
    fn empty_token_is_ignored() {
        let client = GitHubClient::new("https://api.github.com", Some(String::new()));
        assert!(client.token.is_none());
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let client = GitHubClient::new("http://127.0.0.1:9", None);
        let err = client
            .get_file_content("acme", "handbook", "README.md", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Network(_)));
    }
}
