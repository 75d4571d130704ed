//! OpenAI-backed hosted tool providers.
//!
//! [`OpenAIHostedProvider`] serves `file_search` from OpenAI vector stores and
//! `web_search` through the Responses API `web_search_preview` tool. Corpus ids
//! may be vector store ids (`vs_...`) or vector store names; names are looked
//! up once through the vector store listing and cached.
//!
//! The listing goes through `async-openai`. Vector store search and the
//! Responses API are plain REST calls over `reqwest` against the same base URL
//! and key.

use std::collections::HashMap;
use std::sync::Arc;

use async_openai::{config::OpenAIConfig, error::OpenAIError, Client};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::hosted::{
    HostedProviders, Passage, ProviderError, RetrievalProvider, WebHit, WebSearchProvider,
    WebSearchResult,
};
use crate::config::RuntimeConfig;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const VECTOR_STORE_PREFIX: &str = "vs_";
const LIST_PAGE_SIZE: &str = "50";

/// Retrieval and web search against the OpenAI platform.
#[derive(Clone)]
pub struct OpenAIHostedProvider {
    client: Client<OpenAIConfig>,
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    search_model: String,
    corpus_ids: Arc<RwLock<HashMap<String, String>>>,
}

impl OpenAIHostedProvider {
    /// Build from the runtime's credential, base URL and default model.
    ///
    /// Without a credential the key falls back to `OPENAI_API_KEY`.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let api_key = config
            .credential
            .as_ref()
            .map(|c| c.expose().to_string())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty());
        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let mut openai = OpenAIConfig::new().with_api_base(&api_base);
        if let Some(key) = &api_key {
            openai = openai.with_api_key(key);
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("agent-relay/", env!("CARGO_PKG_VERSION")))
            .timeout(config.tool_timeout)
            .build()
            .unwrap_or_default();

        Self {
            client: Client::with_config(openai),
            http,
            api_base,
            api_key,
            search_model: config.model.clone(),
            corpus_ids: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Model used for web search requests; defaults to the runtime model.
    pub fn with_search_model(mut self, model: impl Into<String>) -> Self {
        self.search_model = model.into();
        self
    }

    /// Both hosted providers backed by this client.
    pub fn into_providers(self) -> HostedProviders {
        let shared = Arc::new(self);
        HostedProviders::new()
            .with_retrieval(shared.clone())
            .with_web_search(shared)
    }

    fn key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Unavailable("no OpenAI credential configured".into()))
    }

    /// Find the id of the vector store called `name`, paging through the
    /// listing until it turns up.
    pub async fn vector_store_id_by_name(&self, name: &str) -> Result<String, ProviderError> {
        self.key()?;
        let mut after: Option<String> = None;
        loop {
            let mut query = vec![("limit", LIST_PAGE_SIZE.to_string())];
            if let Some(cursor) = &after {
                query.push(("after", cursor.clone()));
            }
            let page = self
                .client
                .vector_stores()
                .list(&query)
                .await
                .map_err(listing_error)?;

            if let Some(store) = page
                .data
                .iter()
                .find(|s| s.name.as_deref() == Some(name))
            {
                debug!(name, id = %store.id, "resolved vector store");
                return Ok(store.id.clone());
            }
            match (page.has_more, page.last_id) {
                (true, Some(last)) => after = Some(last),
                _ => break,
            }
        }
        Err(ProviderError::Rejected(format!(
            "no vector store named '{}'",
            name
        )))
    }

    async fn corpus_id(&self, corpus: &str) -> Result<String, ProviderError> {
        if corpus.starts_with(VECTOR_STORE_PREFIX) {
            return Ok(corpus.to_string());
        }
        if let Some(id) = self.corpus_ids.read().await.get(corpus) {
            return Ok(id.clone());
        }
        let id = self.vector_store_id_by_name(corpus).await?;
        self.corpus_ids
            .write()
            .await
            .insert(corpus.to_string(), id.clone());
        Ok(id)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let key = self.key()?;
        let url = format!("{}/{}", self.api_base, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%status, url = %url, "hosted provider request failed");
            return Err(status_error(status, &text));
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("malformed response: {}", e)))
    }
}

#[async_trait]
impl RetrievalProvider for OpenAIHostedProvider {
    async fn search(
        &self,
        query: &str,
        corpus_id: &str,
        max_results: usize,
    ) -> Result<Vec<Passage>, ProviderError> {
        let store = self.corpus_id(corpus_id).await?;
        let body = json!({ "query": query, "max_num_results": max_results });
        let page = self
            .post(&format!("vector_stores/{}/search", store), &body)
            .await?;
        let mut passages = parse_search_page(corpus_id, page)?;
        passages.truncate(max_results);
        Ok(passages)
    }
}

#[async_trait]
impl WebSearchProvider for OpenAIHostedProvider {
    async fn search(&self, query: &str) -> Result<WebSearchResult, ProviderError> {
        let body = json!({
            "model": self.search_model,
            "input": query,
            "tools": [{ "type": "web_search_preview" }],
        });
        let reply = self.post("responses", &body).await?;
        parse_web_reply(reply)
    }
}

fn listing_error(e: OpenAIError) -> ProviderError {
    match e {
        OpenAIError::ApiError(api) => ProviderError::Rejected(api.message),
        other => ProviderError::Unavailable(other.to_string()),
    }
}

/// Client errors are the caller's fault; throttling and server errors are not.
fn status_error(status: StatusCode, body: &str) -> ProviderError {
    let message = format!("{}: {}", status, body);
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        ProviderError::Rejected(message)
    } else {
        ProviderError::Unavailable(message)
    }
}

#[derive(Deserialize)]
struct SearchPage {
    data: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    file_id: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    content: Vec<SearchContent>,
}

#[derive(Deserialize)]
struct SearchContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

fn parse_search_page(corpus_id: &str, page: Value) -> Result<Vec<Passage>, ProviderError> {
    let page: SearchPage = serde_json::from_value(page)
        .map_err(|e| ProviderError::Unavailable(format!("malformed search page: {}", e)))?;
    Ok(page
        .data
        .into_iter()
        .map(|hit| {
            let text = hit
                .content
                .iter()
                .filter(|c| c.kind == "text")
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            Passage {
                corpus_id: corpus_id.to_string(),
                source: hit.filename.unwrap_or(hit.file_id),
                text,
                score: hit.score,
            }
        })
        .collect())
}

#[derive(Deserialize)]
struct ResponsesReply {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    Message {
        #[serde(default)]
        content: Vec<OutputContent>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputContent {
    OutputText {
        text: String,
        #[serde(default)]
        annotations: Vec<Annotation>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Annotation {
    UrlCitation {
        url: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        start_index: Option<usize>,
        #[serde(default)]
        end_index: Option<usize>,
    },
    #[serde(other)]
    Other,
}

fn parse_web_reply(reply: Value) -> Result<WebSearchResult, ProviderError> {
    let reply: ResponsesReply = serde_json::from_value(reply)
        .map_err(|e| ProviderError::Unavailable(format!("malformed web search reply: {}", e)))?;

    let mut answer = String::new();
    let mut hits: Vec<WebHit> = Vec::new();
    for item in reply.output {
        let OutputItem::Message { content } = item else {
            continue;
        };
        for part in content {
            let OutputContent::OutputText { text, annotations } = part else {
                continue;
            };
            for annotation in annotations {
                let Annotation::UrlCitation {
                    url,
                    title,
                    start_index,
                    end_index,
                } = annotation
                else {
                    continue;
                };
                if hits.iter().any(|h| h.url == url) {
                    continue;
                }
                let snippet = match (start_index, end_index) {
                    (Some(start), Some(end)) => cited_span(&text, start, end),
                    _ => String::new(),
                };
                hits.push(WebHit {
                    title,
                    url,
                    snippet,
                });
            }
            if !answer.is_empty() {
                answer.push('\n');
            }
            answer.push_str(&text);
        }
    }

    Ok(WebSearchResult {
        answer: (!answer.is_empty()).then_some(answer),
        hits,
    })
}

/// Citation indices count characters, not bytes.
fn cited_span(text: &str, start: usize, end: usize) -> String {
    text.chars()
        .skip(start)
        .take(end.saturating_sub(start))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigBuilder, Credential};
    use pretty_assertions::assert_eq;

    fn provider(credential: Option<&str>) -> OpenAIHostedProvider {
        let mut config = ConfigBuilder::new().model("gpt-4o-mini").build().unwrap();
        config.credential = credential.map(Credential::new);
        config.api_base = Some("http://127.0.0.1:9/v1/".into());
        let mut provider = OpenAIHostedProvider::from_config(&config);
        // keep the environment key out of the credential tests
        if credential.is_none() {
            provider.api_key = None;
        }
        provider
    }

    #[test]
    fn test_parse_search_page() {
        let page = json!({
            "object": "vector_store.search_results.page",
            "data": [
                {
                    "file_id": "file-1",
                    "filename": "data_lines.txt",
                    "score": 0.92,
                    "content": [
                        {"type": "text", "text": "I am fully functional."},
                        {"type": "text", "text": "Programmed in multiple techniques."}
                    ]
                },
                {"file_id": "file-2", "content": [{"type": "text", "text": "Spot."}]}
            ],
            "has_more": false
        });

        let passages = parse_search_page("Data Lines Vector Store", page).unwrap();

        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].source, "data_lines.txt");
        assert_eq!(
            passages[0].text,
            "I am fully functional.\nProgrammed in multiple techniques."
        );
        assert_eq!(passages[0].score, Some(0.92));
        assert_eq!(passages[1].source, "file-2");
        assert_eq!(passages[1].score, None);
        assert!(passages
            .iter()
            .all(|p| p.corpus_id == "Data Lines Vector Store"));
    }

    #[test]
    fn test_parse_search_page_rejects_garbage() {
        let err = parse_search_page("vs_1", json!({"results": []})).unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[test]
    fn test_parse_web_reply_collects_citations() {
        let reply = json!({
            "id": "resp_1",
            "output": [
                {"type": "web_search_call", "id": "ws_1", "status": "completed"},
                {
                    "type": "message",
                    "role": "assistant",
                    "content": [{
                        "type": "output_text",
                        "text": "Stardate 41153.7 marks the launch.",
                        "annotations": [
                            {"type": "url_citation", "url": "https://memory-alpha.fandom.com/wiki/Stardate",
                             "title": "Stardate", "start_index": 0, "end_index": 16},
                            {"type": "url_citation", "url": "https://memory-alpha.fandom.com/wiki/Stardate",
                             "title": "Stardate (again)", "start_index": 0, "end_index": 4}
                        ]
                    }]
                }
            ]
        });

        let result = parse_web_reply(reply).unwrap();

        assert_eq!(
            result.answer.as_deref(),
            Some("Stardate 41153.7 marks the launch.")
        );
        assert_eq!(
            result.hits,
            vec![WebHit {
                title: "Stardate".into(),
                url: "https://memory-alpha.fandom.com/wiki/Stardate".into(),
                snippet: "Stardate 41153.7".into(),
            }]
        );
    }

    #[test]
    fn test_parse_web_reply_without_message() {
        let reply = json!({"output": [{"type": "web_search_call", "status": "failed"}]});
        assert_eq!(parse_web_reply(reply).unwrap(), WebSearchResult::default());
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "no such store"),
            ProviderError::Rejected(_)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            ProviderError::Unavailable(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, ""),
            ProviderError::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_vector_store_ids_skip_lookup() {
        let provider = provider(None);
        assert_eq!(provider.corpus_id("vs_enterprise").await.unwrap(), "vs_enterprise");
    }

    #[tokio::test]
    async fn test_cached_names_skip_lookup() {
        let provider = provider(Some("sk-test"));
        provider
            .corpus_ids
            .write()
            .await
            .insert("Data Lines Vector Store".into(), "vs_42".into());
        assert_eq!(
            provider.corpus_id("Data Lines Vector Store").await.unwrap(),
            "vs_42"
        );
    }

    #[tokio::test]
    async fn test_missing_credential_is_unavailable() {
        let provider = provider(None);

        let lookup = provider.vector_store_id_by_name("Data Lines Vector Store").await;
        assert!(matches!(lookup, Err(ProviderError::Unavailable(_))));

        let web = WebSearchProvider::search(&provider, "stardate").await;
        assert!(matches!(web, Err(ProviderError::Unavailable(_))));
    }

    #[test]
    fn test_base_url_is_normalized() {
        assert_eq!(provider(None).api_base, "http://127.0.0.1:9/v1");
    }

    #[test]
    fn test_cited_span_counts_chars() {
        assert_eq!(cited_span("Ωmega warp", 0, 5), "Ωmega");
        assert_eq!(cited_span("short", 3, 99), "rt");
    }
}
