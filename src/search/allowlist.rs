//! Domain allowlist for governed web search.

use std::collections::BTreeSet;
use tracing::debug;
use url::Url;

/// Set of host suffixes permitted to appear in external citations.
///
/// A URL passes when its host, stripped of any port, equals an allowlisted
/// domain or is a sub-domain of one. Anything unparseable is rejected.
#[derive(Clone, Debug)]
pub struct Allowlist {
    domains: BTreeSet<String>,
}

impl Allowlist {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains: BTreeSet<String> = domains
            .into_iter()
            .map(|d| d.as_ref().trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        debug!(count = domains.len(), "initialized search allowlist");
        Self { domains }
    }

    #[must_use]
    pub fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        // `host_str` never includes the port, but strip defensively for
        // hosts arriving through odd providers.
        let host = host.split(':').next().unwrap_or(host).to_lowercase();
        if self.domains.contains(&host) {
            return true;
        }
        self.domains
            .iter()
            .any(|allowed| host.ends_with(&format!(".{allowed}")))
    }

    /// Keep only allowed URLs, preserving order.
    #[must_use]
    pub fn filter<'a>(&self, urls: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        urls.into_iter().filter(|u| self.is_allowed(u)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowlist() -> Allowlist {
        Allowlist::new(["example.com", "owasp.org", "mitre.org"])
    }

    #[test]
    fn exact_and_subdomain_hosts_pass() {
        let list = allowlist();
        assert!(list.is_allowed("https://example.com/alerts/1"));
        assert!(list.is_allowed("https://alerts.example.com/x"));
        assert!(list.is_allowed("https://www.owasp.org/advisory"));
    }

    #[test]
    fn lookalike_and_foreign_hosts_fail() {
        let list = allowlist();
        assert!(!list.is_allowed("https://notexample.com/x"));
        assert!(!list.is_allowed("https://example.com.evil.io/x"));
        assert!(!list.is_allowed("https://phishing.io/example.com"));
    }

    #[test]
    fn ports_and_case_are_normalized() {
        let list = allowlist();
        assert!(list.is_allowed("https://EXAMPLE.com:8443/alert"));
        assert!(list.is_allowed("http://mitre.org:80/cve"));
    }

    #[test]
    fn garbage_urls_are_rejected() {
        let list = allowlist();
        assert!(!list.is_allowed("not a url"));
        assert!(!list.is_allowed(""));
    }

    #[test]
    fn filter_preserves_order() {
        let list = allowlist();
        let urls = [
            "https://example.com/a",
            "https://evil.io/b",
            "https://mitre.org/c",
        ];
        assert_eq!(
            list.filter(urls),
            vec!["https://example.com/a", "https://mitre.org/c"]
        );
    }
}
