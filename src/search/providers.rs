//! Search provider implementations: deterministic mock and HTTP.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Allowlist, SearchProvider, SearchResult};

/// Deterministic provider for local development and tests.
///
/// Pattern-matches known merchant markers in the query and returns the canned
/// alerts, still subject to allowlist filtering.
pub struct MockSearchProvider {
    allowlist: Allowlist,
}

/// Canned alert corpus keyed by merchant marker.
const MOCK_ALERTS: &[(&str, &[(&str, &str)])] = &[
    (
        "M-FRAUD",
        &[
            (
                "https://example.com/alerts/fraud-ring-2025",
                "Alerta de fraude reciente: red de fraude detectada operando con comercios \
                 similares. Múltiples reportes de transacciones no autorizadas.",
            ),
            (
                "https://owasp.org/security-alert-2025-001",
                "Aviso de seguridad: Endpoints de comercios comprometidos detectados en la \
                 región de América Latina.",
            ),
        ],
    ),
    (
        "M-SUSPICIOUS",
        &[(
            "https://mitre.org/cve/2025/merchant-fraud",
            "CVE-2025-XXXX: Vulnerabilidad en sistemas de pago que permite transacciones \
             fraudulentas.",
        )],
    ),
];

impl MockSearchProvider {
    #[must_use]
    pub fn new(allowlist: Allowlist) -> Self {
        Self { allowlist }
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, query: &str, max_results: usize) -> Vec<SearchResult> {
        let query_upper = query.to_uppercase();
        let mut results = Vec::new();
        for (marker, alerts) in MOCK_ALERTS {
            if query_upper.contains(marker) {
                for (url, summary) in *alerts {
                    if self.allowlist.is_allowed(url) {
                        results.push(SearchResult {
                            url: (*url).to_string(),
                            summary: (*summary).to_string(),
                        });
                    }
                }
            }
        }
        results.truncate(max_results);
        debug!(query, hits = results.len(), "mock search completed");
        results
    }
}

/// HTTP provider with bearer-token auth for production search APIs.
pub struct HttpSearchProvider {
    allowlist: Allowlist,
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(serde::Deserialize)]
struct HttpSearchBody {
    #[serde(default)]
    results: Vec<HttpSearchItem>,
}

#[derive(serde::Deserialize)]
struct HttpSearchItem {
    #[serde(default)]
    url: String,
    #[serde(default)]
    snippet: String,
}

impl HttpSearchProvider {
    pub fn new(
        allowlist: Allowlist,
        endpoint: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            allowlist,
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, reqwest::Error> {
        let mut request = self.client.get(&self.endpoint).query(&[
            ("q", query.to_string()),
            // Over-fetch so allowlist filtering can still fill the cap.
            ("limit", (max_results * 2).to_string()),
        ]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let body: HttpSearchBody = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let mut results = Vec::new();
        for item in body.results {
            if self.allowlist.is_allowed(&item.url) {
                results.push(SearchResult {
                    url: item.url,
                    summary: item.snippet,
                });
            }
        }
        results.truncate(max_results);
        Ok(results)
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str, max_results: usize) -> Vec<SearchResult> {
        match self.fetch(query, max_results).await {
            Ok(results) => results,
            Err(err) => {
                warn!(query, error = %err, "search provider failed; returning no results");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowlist() -> Allowlist {
        Allowlist::new(["example.com", "owasp.org", "mitre.org"])
    }

    #[tokio::test]
    async fn fraud_marker_returns_both_canned_alerts() {
        let provider = MockSearchProvider::new(allowlist());
        let results = provider.search("fraud alert M-FRAUD-77 PE", 3).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].url.contains("example.com"));
        assert!(results[1].url.contains("owasp.org"));
    }

    #[tokio::test]
    async fn clean_merchant_returns_nothing() {
        let provider = MockSearchProvider::new(allowlist());
        assert!(provider.search("fraud alert M-100 PE", 3).await.is_empty());
    }

    #[tokio::test]
    async fn allowlist_still_filters_the_canned_corpus() {
        let provider = MockSearchProvider::new(Allowlist::new(["mitre.org"]));
        let results = provider.search("fraud alert M-FRAUD M-SUSPICIOUS", 3).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].url.contains("mitre.org"));
    }

    #[tokio::test]
    async fn marker_match_is_case_insensitive_on_the_query() {
        let provider = MockSearchProvider::new(allowlist());
        let results = provider.search("fraud alert m-suspicious pe", 3).await;
        assert_eq!(results.len(), 1);
    }
}
