//! End-to-end demo: seed the policy index, evaluate three transactions of
//! increasing suspicion, then resolve the escalated case the way a human
//! reviewer would.
//!
//! Run with `cargo run --example decision_flow`.

use std::sync::Arc;

use miette::{IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

use fraudgraph::audit::InMemoryAuditSink;
use fraudgraph::domain::{ConsolidatedView, FraudPolicy, UsualHours};
use fraudgraph::hitl::{HitlStore, InMemoryHitlStore, Resolution};
use fraudgraph::pipeline::{DecisionEngine, EngineDeps, apply_resolution};
use fraudgraph::retrieval::{HashEmbedder, InMemoryPolicyIndex, ingest};
use fraudgraph::search::{Allowlist, GovernedSearch, MockSearchProvider};
use fraudgraph::state::Decision;
use fraudgraph::storage::{InMemoryTransactionStore, TransactionStore};

fn view(transaction_id: &str, amount: f64, timestamp: &str, device: &str, merchant: &str) -> ConsolidatedView {
    ConsolidatedView {
        transaction_id: transaction_id.to_string(),
        customer_id: "C-001".into(),
        amount,
        currency: "PEN".into(),
        country: "PE".into(),
        channel: "web".into(),
        device_id: device.to_string(),
        timestamp: timestamp.to_string(),
        merchant_id: merchant.to_string(),
        usual_amount_avg: 500.0,
        usual_hours: UsualHours { start: 8, end: 20 },
        usual_countries: vec!["PE".into()],
        usual_devices: vec!["D-1".into()],
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let audit = Arc::new(InMemoryAuditSink::new());
    let hitl = Arc::new(InMemoryHitlStore::new());
    let index = Arc::new(InMemoryPolicyIndex::new(Arc::new(HashEmbedder::default())));
    let search = GovernedSearch::new(
        Arc::new(MockSearchProvider::new(Allowlist::new([
            "example.com",
            "owasp.org",
            "mitre.org",
        ]))),
        3,
    );

    let policies = vec![
        FraudPolicy {
            policy_id: "POL-001".into(),
            version: "v3".into(),
            rule: "Monto mayor a 3x el promedio fuera del horario habitual → CHALLENGE".into(),
        },
        FraudPolicy {
            policy_id: "POL-002".into(),
            version: "v3".into(),
            rule: "Alerta externa con monto elevado → BLOCK".into(),
        },
        FraudPolicy {
            policy_id: "POL-003".into(),
            version: "v3".into(),
            rule: "País y dispositivo desconocidos simultáneamente → ESCALATE_TO_HUMAN".into(),
        },
    ];
    let indexed = ingest::index_policies(&policies, index.as_ref())
        .await
        .into_diagnostic()?;
    println!("indexed {indexed} policies\n");

    let engine = DecisionEngine::new(EngineDeps::new(
        index,
        search,
        audit.clone(),
        hitl.clone(),
    ));
    let store = InMemoryTransactionStore::new();

    let runs = [
        view("T-001", 480.0, "2025-03-01T11:05:00Z", "D-1", "M-100"),
        view("T-002", 2100.0, "2025-03-01T03:15:00Z", "D-1", "M-100"),
        view("T-003", 3100.0, "2025-03-02T02:40:00Z", "D-9", "M-FRAUD-7"),
    ];
    for run in runs {
        let transaction_id = run.transaction_id.clone();
        let response = engine.run_decision(run).await.into_diagnostic()?;
        println!(
            "{transaction_id}: {} (riesgo {:.2}) — {}",
            response.decision, response.confidence, response.explanation_customer
        );
        store
            .save_decision(&transaction_id, &response)
            .await
            .into_diagnostic()?;
    }

    for case in hitl.list_open().await.into_diagnostic()? {
        println!("\nopen case {} on {} ({})", case.case_id, case.transaction_id, case.reason);
        let resolved = apply_resolution(
            hitl.as_ref(),
            audit.as_ref(),
            &store,
            &case.case_id,
            Resolution {
                decision: Decision::Block,
                notes: "confirmado con el cliente: no reconoce la operación".into(),
            },
        )
        .await
        .into_diagnostic()?;
        println!(
            "resolved as {} at {}",
            resolved.resolution.as_ref().map(|r| r.decision).unwrap_or(Decision::Block),
            resolved.resolved_at.map(|t| t.to_rfc3339()).unwrap_or_default()
        );
    }

    Ok(())
}
