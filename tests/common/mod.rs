//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;

use fraudgraph::audit::InMemoryAuditSink;
use fraudgraph::domain::{ConsolidatedView, CustomerBehavior, FraudPolicy, Transaction, UsualHours};
use fraudgraph::hitl::InMemoryHitlStore;
use fraudgraph::llm::ReasoningModel;
use fraudgraph::pipeline::EngineDeps;
use fraudgraph::retrieval::{HashEmbedder, InMemoryPolicyIndex, PolicyIndex, ingest};
use fraudgraph::search::{Allowlist, GovernedSearch, MockSearchProvider};

pub const DEFAULT_ALLOWLIST: [&str; 3] = ["example.com", "owasp.org", "mitre.org"];

/// Builder for consolidated views with sane defaults: an in-pattern
/// transaction at 10:00 for a customer usually active 08–20 in PE on D-1.
pub struct ViewBuilder {
    view: ConsolidatedView,
}

impl ViewBuilder {
    pub fn new(transaction_id: &str) -> Self {
        Self {
            view: ConsolidatedView {
                transaction_id: transaction_id.to_string(),
                customer_id: "C-001".into(),
                amount: 500.0,
                currency: "PEN".into(),
                country: "PE".into(),
                channel: "web".into(),
                device_id: "D-1".into(),
                timestamp: "2025-03-01T10:00:00Z".into(),
                merchant_id: "M-100".into(),
                usual_amount_avg: 500.0,
                usual_hours: UsualHours { start: 8, end: 20 },
                usual_countries: vec!["PE".into()],
                usual_devices: vec!["D-1".into()],
            },
        }
    }

    pub fn amount(mut self, amount: f64) -> Self {
        self.view.amount = amount;
        self
    }

    pub fn timestamp(mut self, timestamp: &str) -> Self {
        self.view.timestamp = timestamp.to_string();
        self
    }

    pub fn country(mut self, country: &str) -> Self {
        self.view.country = country.to_string();
        self
    }

    pub fn device(mut self, device_id: &str) -> Self {
        self.view.device_id = device_id.to_string();
        self
    }

    pub fn merchant(mut self, merchant_id: &str) -> Self {
        self.view.merchant_id = merchant_id.to_string();
        self
    }

    pub fn build(self) -> ConsolidatedView {
        self.view
    }
}

/// Handles on the in-memory backends behind an [`EngineDeps`].
pub struct TestDeps {
    pub deps: EngineDeps,
    pub audit: Arc<InMemoryAuditSink>,
    pub hitl: Arc<InMemoryHitlStore>,
    pub index: Arc<InMemoryPolicyIndex>,
}

pub fn test_deps() -> TestDeps {
    let audit = Arc::new(InMemoryAuditSink::new());
    let hitl = Arc::new(InMemoryHitlStore::new());
    let index = Arc::new(InMemoryPolicyIndex::new(Arc::new(HashEmbedder::default())));
    let search = GovernedSearch::new(
        Arc::new(MockSearchProvider::new(Allowlist::new(DEFAULT_ALLOWLIST))),
        3,
    );
    let deps = EngineDeps::new(index.clone(), search, audit.clone(), hitl.clone());
    TestDeps {
        deps,
        audit,
        hitl,
        index,
    }
}

pub fn with_model(mut test_deps: TestDeps, model: Arc<dyn ReasoningModel>) -> TestDeps {
    test_deps.deps = test_deps.deps.with_model(model);
    test_deps
}

pub async fn seed_policies(index: &dyn PolicyIndex, rules: &[(&str, &str, &str)]) {
    let policies: Vec<FraudPolicy> = rules
        .iter()
        .map(|(policy_id, version, rule)| FraudPolicy {
            policy_id: (*policy_id).to_string(),
            version: (*version).to_string(),
            rule: (*rule).to_string(),
        })
        .collect();
    ingest::index_policies(&policies, index).await.unwrap();
}

pub fn sample_transaction(transaction_id: &str) -> Transaction {
    Transaction {
        transaction_id: transaction_id.to_string(),
        customer_id: "C-001".into(),
        amount: 500.0,
        currency: "PEN".into(),
        country: "PE".into(),
        channel: "web".into(),
        device_id: "D-1".into(),
        timestamp: "2025-03-01T10:00:00Z".into(),
        merchant_id: "M-100".into(),
    }
}

pub fn sample_profile() -> CustomerBehavior {
    CustomerBehavior {
        customer_id: "C-001".into(),
        usual_amount_avg: 500.0,
        usual_hours: "08-20".into(),
        usual_countries: vec!["PE".into()],
        usual_devices: vec!["D-1".into()],
    }
}
