//! Hosted tools: file search and web search.
//!
//! The runtime does not own a retrieval index or a search backend. Hosted
//! tools forward to providers reached through [`RetrievalProvider`] and
//! [`WebSearchProvider`]; handles are shared read-only through
//! [`HostedProviders`].

use std::fmt;
use std::sync::Arc;

use agent_relay_derive::tool_args;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::ToolError;

/// A passage returned by a retrieval provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub corpus_id: String,
    /// Source document (file name or id)
    pub source: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSearchResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub hits: Vec<WebHit>,
}

/// Failure reported by a hosted provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider rejected request: {0}")]
    Rejected(String),
}

impl From<ProviderError> for ToolError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Unavailable(m) => ToolError::provider_unavailable(m),
            ProviderError::Rejected(m) => ToolError::provider_rejected(m),
        }
    }
}

/// Search over a pre-provisioned document corpus.
#[async_trait]
pub trait RetrievalProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        corpus_id: &str,
        max_results: usize,
    ) -> Result<Vec<Passage>, ProviderError>;
}

/// Search over the public web.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<WebSearchResult, ProviderError>;
}

/// Provider handles available to hosted tools.
#[derive(Clone, Default)]
pub struct HostedProviders {
    retrieval: Option<Arc<dyn RetrievalProvider>>,
    web_search: Option<Arc<dyn WebSearchProvider>>,
}

impl fmt::Debug for HostedProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostedProviders")
            .field("retrieval", &self.retrieval.is_some())
            .field("web_search", &self.web_search.is_some())
            .finish()
    }
}

impl HostedProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retrieval(mut self, provider: Arc<dyn RetrievalProvider>) -> Self {
        self.retrieval = Some(provider);
        self
    }

    pub fn with_web_search(mut self, provider: Arc<dyn WebSearchProvider>) -> Self {
        self.web_search = Some(provider);
        self
    }
}

/// Arguments shared by both hosted tools.
#[tool_args]
pub struct SearchArgs {
    /// What to search for
    pub query: String,
}

/// Kind of hosted tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostedTool {
    FileSearch {
        corpus_ids: Vec<String>,
        max_results: usize,
    },
    WebSearch,
}

impl HostedTool {
    pub fn name(&self) -> &'static str {
        match self {
            HostedTool::FileSearch { .. } => "file_search",
            HostedTool::WebSearch => "web_search",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            HostedTool::FileSearch { .. } => {
                "Search the attached document corpora and return the most relevant passages."
            }
            HostedTool::WebSearch => "Search the web and return relevant results.",
        }
    }

    pub(crate) async fn call(
        &self,
        arguments: Value,
        providers: &HostedProviders,
    ) -> Result<Value, ToolError> {
        let args: SearchArgs = serde_json::from_value(arguments)?;
        match self {
            HostedTool::FileSearch {
                corpus_ids,
                max_results,
            } => {
                let provider = providers.retrieval.as_ref().ok_or_else(|| {
                    ToolError::provider_unavailable("no retrieval provider configured")
                })?;
                let searches = corpus_ids
                    .iter()
                    .map(|corpus| provider.search(&args.query, corpus, *max_results));
                // join_all keeps corpus order
                let mut passages = Vec::new();
                for result in futures::future::join_all(searches).await {
                    passages.extend(result?);
                }
                passages.truncate(*max_results);
                Ok(serde_json::json!({ "results": passages }))
            }
            HostedTool::WebSearch => {
                let provider = providers.web_search.as_ref().ok_or_else(|| {
                    ToolError::provider_unavailable("no web search provider configured")
                })?;
                let result = provider.search(&args.query).await?;
                Ok(serde_json::to_value(result)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct FixedCorpus;

    #[async_trait]
    impl RetrievalProvider for FixedCorpus {
        async fn search(
            &self,
            query: &str,
            corpus_id: &str,
            max_results: usize,
        ) -> Result<Vec<Passage>, ProviderError> {
            if corpus_id == "closed" {
                return Err(ProviderError::Rejected("corpus closed".into()));
            }
            Ok((0..max_results)
                .map(|i| Passage {
                    corpus_id: corpus_id.to_string(),
                    source: format!("doc-{i}"),
                    text: format!("{query} #{i}"),
                    score: None,
                })
                .collect())
        }
    }

    fn providers() -> HostedProviders {
        HostedProviders::new().with_retrieval(Arc::new(FixedCorpus))
    }

    #[tokio::test]
    async fn test_file_search_merges_and_truncates() {
        let tool = HostedTool::FileSearch {
            corpus_ids: vec!["a".into(), "b".into()],
            max_results: 3,
        };
        let out = tool
            .call(json!({"query": "warp core"}), &providers())
            .await
            .unwrap();
        let results = out["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        let corpora: Vec<&str> = results
            .iter()
            .map(|p| p["corpus_id"].as_str().unwrap())
            .collect();
        assert_eq!(corpora, vec!["a", "a", "a"]);
    }

    #[tokio::test]
    async fn test_provider_rejection_maps_to_tool_error() {
        let tool = HostedTool::FileSearch {
            corpus_ids: vec!["closed".into()],
            max_results: 3,
        };
        let err = tool.call(json!({"query": "x"}), &providers()).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::ProviderRejected);
    }

    #[tokio::test]
    async fn test_missing_provider_is_unavailable() {
        let err = HostedTool::WebSearch
            .call(json!({"query": "x"}), &HostedProviders::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::ProviderUnavailable);
    }

    #[tokio::test]
    async fn test_bad_arguments() {
        let err = HostedTool::WebSearch
            .call(json!({"q": "x"}), &HostedProviders::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArguments);
    }
}
