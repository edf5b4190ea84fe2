//! Governed external search: allowlist-filtered, count-bounded, non-failing.

pub mod allowlist;
pub mod providers;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use allowlist::Allowlist;
pub use providers::{HttpSearchProvider, MockSearchProvider};

/// One external search hit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub summary: String,
}

/// Pluggable search backend.
///
/// Providers must not fail: any transport or provider error yields an empty
/// result list. Allowlist filtering happens inside the provider, before the
/// governed cap is applied.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Vec<SearchResult>;
}

/// Search service enforcing the governed result cap.
#[derive(Clone)]
pub struct GovernedSearch {
    provider: Arc<dyn SearchProvider>,
    max_results: usize,
}

impl GovernedSearch {
    #[must_use]
    pub fn new(provider: Arc<dyn SearchProvider>, max_results: usize) -> Self {
        Self {
            provider,
            max_results,
        }
    }

    /// Execute a governed search; at most `max_results` allowed results.
    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        let mut results = self.provider.search(query, self.max_results).await;
        results.truncate(self.max_results);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider(Vec<SearchResult>);

    #[async_trait]
    impl SearchProvider for FixedProvider {
        async fn search(&self, _query: &str, _max_results: usize) -> Vec<SearchResult> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn cap_applies_even_when_the_provider_over_returns() {
        let hits: Vec<SearchResult> = (0..5)
            .map(|i| SearchResult {
                url: format!("https://example.com/{i}"),
                summary: format!("alerta {i}"),
            })
            .collect();
        let service = GovernedSearch::new(Arc::new(FixedProvider(hits)), 3);
        assert_eq!(service.search("fraud alert M-1 PE").await.len(), 3);
    }
}
