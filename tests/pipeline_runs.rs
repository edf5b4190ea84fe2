//! End-to-end pipeline runs: the seed scenarios plus the audit-trail and
//! error-escalation invariants.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use fraudgraph::audit::AuditSink;
use fraudgraph::hitl::HitlStore;
use fraudgraph::llm::ScriptedModel;
use fraudgraph::pipeline::DecisionEngine;
use fraudgraph::retrieval::{PolicyDocument, PolicyIndex, RetrievalError};
use fraudgraph::state::{Decision, Signal};

use common::{ViewBuilder, seed_policies, test_deps, with_model};

#[tokio::test]
async fn scenario_normal_transaction_approves() {
    let deps = test_deps();
    let engine = DecisionEngine::new(deps.deps.clone());
    let response = engine
        .run_decision(ViewBuilder::new("T-NORMAL").build())
        .await
        .unwrap();

    assert_eq!(response.decision, Decision::Approve);
    assert!(response.signals.is_empty());
    assert_eq!(response.confidence, 0.0);
    assert!(!response.hitl.required);
    assert!(deps.hitl.list_open().await.unwrap().is_empty());
}

#[tokio::test]
async fn scenario_quadruple_amount_alone_still_approves() {
    let deps = test_deps();
    let engine = DecisionEngine::new(deps.deps.clone());
    let response = engine
        .run_decision(ViewBuilder::new("T-4X").amount(2000.0).build())
        .await
        .unwrap();

    assert_eq!(response.signals, vec![Signal::AmountOutOfRange]);
    assert_eq!(response.decision, Decision::Approve);
    assert!(response.confidence < 0.45);
}

#[tokio::test]
async fn scenario_amount_plus_hours_challenges() {
    let deps = test_deps();
    let engine = DecisionEngine::new(deps.deps.clone());
    let response = engine
        .run_decision(
            ViewBuilder::new("T-4X-NIGHT")
                .amount(2000.0)
                .timestamp("2025-03-01T03:15:00Z")
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.signals,
        vec![Signal::AmountOutOfRange, Signal::UnusualHour]
    );
    assert_eq!(response.decision, Decision::Challenge);
}

#[tokio::test]
async fn scenario_external_alert_with_high_amount_blocks() {
    let deps = test_deps();
    let engine = DecisionEngine::new(deps.deps.clone());
    let response = engine
        .run_decision(
            ViewBuilder::new("T-BLOCK")
                .amount(3000.0)
                .timestamp("2025-03-01T03:15:00Z")
                .device("D-9")
                .merchant("M-FRAUD-01")
                .build(),
        )
        .await
        .unwrap();

    assert!(response.signals.contains(&Signal::ExternalAlert));
    assert!(!response.citations_external.is_empty());
    assert_eq!(response.decision, Decision::Block);
    assert!(response.confidence >= 0.75);
    assert!(!response.hitl.required);
}

#[tokio::test]
async fn scenario_escalate_hint_with_new_country_and_device() {
    let deps = test_deps();
    seed_policies(
        deps.index.as_ref(),
        &[(
            "POL-ESC",
            "v1",
            "País y dispositivo desconocidos simultáneamente → ESCALATE_TO_HUMAN",
        )],
    )
    .await;
    let engine = DecisionEngine::new(deps.deps.clone());
    let response = engine
        .run_decision(
            ViewBuilder::new("T-ESC")
                .country("CO")
                .device("D-9")
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(response.decision, Decision::EscalateToHuman);
    assert!(response.hitl.required);
    assert_eq!(response.hitl.reason, "policy_or_low_confidence");
    let open = deps.hitl.list_open().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].transaction_id, "T-ESC");
}

#[tokio::test]
async fn scenario_borderline_confidence_flags_hitl_on_a_challenge() {
    // The model-assisted debate widens the pro-fraud delta enough to land
    // the score inside the borderline band while rule 3 still decides.
    let model = Arc::new(ScriptedModel::new());
    model.push_ok(serde_json::json!({
        "recommended_decision": "CHALLENGE",
        "confidence_delta": 0.10,
        "reasoning": "monto elevado fuera de horario"
    }));
    model.push_ok(serde_json::json!({
        "recommended_decision": "APPROVE",
        "confidence_delta": 0.03,
        "reasoning": "cliente con historial limpio"
    }));
    let deps = with_model(test_deps(), model);
    let engine = DecisionEngine::new(deps.deps.clone());
    let response = engine
        .run_decision(
            ViewBuilder::new("T-BORDER")
                .amount(1750.0)
                .timestamp("2025-03-01T03:15:00Z")
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(response.decision, Decision::Challenge);
    assert!((0.45..=0.60).contains(&response.confidence));
    assert!(response.hitl.required);
    assert_eq!(response.hitl.reason, "borderline_confidence");
    assert_eq!(deps.hitl.list_open().await.unwrap().len(), 1);
}

#[tokio::test]
async fn audit_trail_covers_every_stage_in_order() {
    let deps = test_deps();
    let engine = DecisionEngine::new(deps.deps.clone());
    engine
        .run_decision(ViewBuilder::new("T-TRAIL").build())
        .await
        .unwrap();

    let events = deps.audit.events("T-TRAIL").await.unwrap();
    let agents: Vec<&str> = events.iter().map(|e| e.agent.as_str()).collect();
    assert_eq!(
        agents,
        vec![
            "TransactionContext",
            "BehavioralPattern",
            "PolicyRAG",
            "ThreatIntel",
            "EvidenceAggregation",
            "DebateProFraud",
            "DebateProCustomer",
            "Arbiter",
            "Explainability",
            "HitlGate",
        ]
    );
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=10).collect::<Vec<u64>>());
    let run_ids: HashSet<&str> = events.iter().map(|e| e.run_id.as_str()).collect();
    assert_eq!(run_ids.len(), 1);
}

#[tokio::test]
async fn seq_keeps_increasing_across_runs_for_the_same_transaction() {
    let deps = test_deps();
    let engine = DecisionEngine::new(deps.deps.clone());
    engine
        .run_decision(ViewBuilder::new("T-RERUN").build())
        .await
        .unwrap();
    engine
        .run_decision(ViewBuilder::new("T-RERUN").build())
        .await
        .unwrap();

    let events = deps.audit.events("T-RERUN").await.unwrap();
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=20).collect::<Vec<u64>>());
    let run_ids: HashSet<&str> = events.iter().map(|e| e.run_id.as_str()).collect();
    assert_eq!(run_ids.len(), 2);
}

#[tokio::test]
async fn signals_never_duplicate_across_a_full_run() {
    let deps = test_deps();
    let engine = DecisionEngine::new(deps.deps.clone());
    let response = engine
        .run_decision(
            ViewBuilder::new("T-DUP")
                .amount(3000.0)
                .timestamp("2025-03-01T03:15:00Z")
                .country("CO")
                .device("D-9")
                .merchant("M-FRAUD-01")
                .build(),
        )
        .await
        .unwrap();

    let unique: HashSet<&Signal> = response.signals.iter().collect();
    assert_eq!(unique.len(), response.signals.len());
    assert_eq!(response.signals.len(), 5);
}

/// Index stub whose queries always fail, to drive the error path.
struct FailingIndex;

#[async_trait::async_trait]
impl PolicyIndex for FailingIndex {
    async fn upsert(&self, _docs: Vec<PolicyDocument>) -> Result<(), RetrievalError> {
        Err(RetrievalError::Storage {
            operation: "upsert".into(),
            message: "index offline".into(),
        })
    }

    async fn query(
        &self,
        _text: &str,
        _top_k: usize,
    ) -> Result<Vec<(PolicyDocument, f32)>, RetrievalError> {
        Err(RetrievalError::Storage {
            operation: "query".into(),
            message: "index offline".into(),
        })
    }

    async fn clear(&self) -> Result<(), RetrievalError> {
        Ok(())
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        Ok(0)
    }
}

#[tokio::test]
async fn stage_failure_forces_escalation_and_records_the_error() {
    let mut deps = test_deps();
    deps.deps.index = Arc::new(FailingIndex);
    let engine = DecisionEngine::new(deps.deps.clone());
    let response = engine
        .run_decision(ViewBuilder::new("T-FAIL").build())
        .await
        .unwrap();

    // Without the failure this transaction would APPROVE; the error pins
    // the outcome to escalation regardless of what later stages conclude.
    assert_eq!(response.decision, Decision::EscalateToHuman);
    assert!(response.hitl.required);
    assert_eq!(response.hitl.reason, "agent_error:PolicyRAG");

    let events = deps.audit.events("T-FAIL").await.unwrap();
    assert_eq!(events.len(), 10);
    let error_event = events.iter().find(|e| e.is_error()).unwrap();
    assert_eq!(error_event.agent, "PolicyRAG_error");
    let message = error_event.output_json["error"].as_str().unwrap();
    assert!(!message.is_empty());
    // The run continued: the arbiter and explainability still recorded.
    assert!(events.iter().any(|e| e.agent == "Arbiter"));
    assert!(events.iter().any(|e| e.agent == "Explainability"));
    // And the gate opened a case for the forced escalation.
    let open = deps.hitl.list_open().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].reason, "agent_error:PolicyRAG");
}

#[tokio::test]
async fn rerun_reuses_the_open_case() {
    let mut deps = test_deps();
    deps.deps.index = Arc::new(FailingIndex);
    let engine = DecisionEngine::new(deps.deps.clone());
    engine
        .run_decision(ViewBuilder::new("T-RETRY").build())
        .await
        .unwrap();
    engine
        .run_decision(ViewBuilder::new("T-RETRY").build())
        .await
        .unwrap();
    assert_eq!(deps.hitl.list_open().await.unwrap().len(), 1);
}

#[tokio::test]
async fn response_carries_explanations_and_report_sections() {
    let deps = test_deps();
    let engine = DecisionEngine::new(deps.deps.clone());
    let response = engine
        .run_decision(
            ViewBuilder::new("T-TEXT")
                .amount(2000.0)
                .timestamp("2025-03-01T03:15:00Z")
                .build(),
        )
        .await
        .unwrap();

    assert!(
        response
            .explanation_customer
            .contains("validación adicional")
    );
    assert!(response.explanation_audit.contains("Ruta de agentes:"));
    assert!(
        response
            .explanation_audit
            .contains("Context → Behavior → RAG → Web → Evidence → Debate → Decisión")
    );
    assert!(response.ai_summary.contains("## 6) Trazabilidad"));
}

#[tokio::test]
async fn concurrent_runs_for_different_transactions_are_independent() {
    let deps = test_deps();
    let engine = Arc::new(DecisionEngine::new(deps.deps.clone()));
    let mut handles = Vec::new();
    for i in 0..4 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .run_decision(ViewBuilder::new(&format!("T-PAR-{i}")).build())
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        let response = handle.await.unwrap();
        assert_eq!(response.decision, Decision::Approve);
    }
    for i in 0..4 {
        let events = deps.audit.events(&format!("T-PAR-{i}")).await.unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, (1..=10).collect::<Vec<u64>>());
    }
}
