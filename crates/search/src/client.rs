use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use tracelens_core::config::{IndexConfig, SearchConfig, SearchFlavor};
use tracelens_core::{Config, SearchBackend, SearchError};

/// Query-DSL client over HTTP. Each [`SearchBackend`] method posts to
/// `{url}/{index}/_search` against its configured index pattern.
#[derive(Debug, Clone)]
pub struct OpenSearchClient {
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    flavor: SearchFlavor,
    timeout_ms: u64,
    indices: IndexConfig,
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

impl OpenSearchClient {
    pub fn new(search: &SearchConfig, indices: &IndexConfig) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(search.timeout_ms))
            .build()
            .map_err(|e| SearchError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: search.url.trim_end_matches('/').to_string(),
            username: search.username.clone(),
            password: search.password.clone(),
            flavor: search.flavor,
            timeout_ms: search.timeout_ms,
            indices: indices.clone(),
            client,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, SearchError> {
        Self::new(&config.search, &config.indices)
    }

    pub fn flavor(&self) -> SearchFlavor {
        self.flavor
    }

    pub fn search_url(&self, index: &str) -> String {
        format!("{}/{}/_search", self.base_url, index.trim_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> SearchError {
        if e.is_timeout() {
            SearchError::Timeout(self.timeout_ms)
        } else {
            SearchError::Http(e.to_string())
        }
    }

    async fn read(&self, response: reqwest::Response) -> Result<Value, SearchError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            warn!(%status, body = %truncate(&body, 512), "search backend returned non-2xx status");
            return Err(SearchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| SearchError::Decode(e.to_string()))
    }

    /// POST `body` to `index`'s `_search` endpoint.
    pub async fn search(&self, index: &str, body: &Value) -> Result<Value, SearchError> {
        let url = self.search_url(index);
        let request = self.authorize(self.client.post(&url).json(body));
        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let value = self.read(response).await?;
        debug!(
            index,
            took_ms = value.get("took").and_then(serde_json::Value::as_u64).unwrap_or(0),
            "search completed"
        );
        Ok(value)
    }

    /// GET the cluster root and check the reported distribution against the
    /// configured flavor. A mismatch is logged, not rejected.
    pub async fn ping(&self) -> Result<Value, SearchError> {
        let request = self.authorize(self.client.get(&self.base_url));
        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let info = self.read(response).await?;

        let detected = detect_flavor(&info);
        if detected != self.flavor {
            warn!(
                configured = %self.flavor,
                detected = %detected,
                "search backend flavor differs from configuration"
            );
        }
        Ok(info)
    }
}

/// OpenSearch reports `version.distribution = "opensearch"`; Elasticsearch
/// omits it.
pub fn detect_flavor(info: &Value) -> SearchFlavor {
    match info.pointer("/version/distribution").and_then(Value::as_str) {
        Some(d) if d.eq_ignore_ascii_case("opensearch") => SearchFlavor::OpenSearch,
        _ => SearchFlavor::Elasticsearch,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait::async_trait]
impl SearchBackend for OpenSearchClient {
    async fn search_metrics(&self, body: &Value) -> Result<Value, SearchError> {
        self.search(&self.indices.metrics, body).await
    }

    async fn search_traces(&self, body: &Value) -> Result<Value, SearchError> {
        self.search(&self.indices.traces, body).await
    }

    async fn query_logs(&self, body: &Value) -> Result<Value, SearchError> {
        self.search(&self.indices.logs, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(url: &str) -> OpenSearchClient {
        let search = SearchConfig {
            url: url.to_string(),
            timeout_ms: 250,
            ..SearchConfig::default()
        };
        OpenSearchClient::new(&search, &IndexConfig::default()).unwrap()
    }

    #[test]
    fn search_url_joins_cleanly() {
        let c = client("http://localhost:9200/");
        assert_eq!(c.search_url("metrics-*"), "http://localhost:9200/metrics-*/_search");
        assert_eq!(c.search_url("/logs-*/"), "http://localhost:9200/logs-*/_search");
    }

    #[test]
    fn flavor_from_cluster_info() {
        let os = json!({"version": {"distribution": "opensearch", "number": "2.11.0"}});
        let es = json!({"version": {"number": "8.12.0"}});
        assert_eq!(detect_flavor(&os), SearchFlavor::OpenSearch);
        assert_eq!(detect_flavor(&es), SearchFlavor::Elasticsearch);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[tokio::test]
    async fn unreachable_backend_is_an_http_error() {
        // port 9 (discard) on localhost is expected to refuse connections
        let c = client("http://127.0.0.1:9");
        let err = c.search_metrics(&json!({"size": 0})).await.unwrap_err();
        assert!(matches!(err, SearchError::Http(_) | SearchError::Timeout(_)));
    }
}
