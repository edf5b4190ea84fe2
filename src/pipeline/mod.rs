//! Pipeline orchestration: dependency wiring, the decision engine, and the
//! HITL resolution flow that overwrites a stored decision.

pub mod deps;
pub mod orchestrator;

use chrono::Utc;
use miette::Diagnostic;
use thiserror::Error;
use tracing::instrument;

use crate::audit::{AuditError, AuditEvent, AuditSink};
use crate::hitl::{HitlCase, HitlError, HitlStore, Resolution};
use crate::state::DecisionResponse;
use crate::storage::{StorageError, TransactionStore};

pub use deps::EngineDeps;
pub use orchestrator::{DecisionEngine, EngineError};

#[derive(Debug, Error, Diagnostic)]
pub enum ResolutionError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Hitl(#[from] HitlError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),
}

/// Close a review case with a human outcome.
///
/// Resolves the case (exactly once), records a manual audit event, and
/// overwrites the transaction's stored decision with the reviewer's outcome.
#[instrument(skip(hitl, audit, store, resolution), err)]
pub async fn apply_resolution(
    hitl: &dyn HitlStore,
    audit: &dyn AuditSink,
    store: &dyn TransactionStore,
    case_id: &str,
    resolution: Resolution,
) -> Result<HitlCase, ResolutionError> {
    let resolved_at = Utc::now();
    let case = hitl.resolve(case_id, resolution.clone(), resolved_at).await?;

    let seq = audit.next_seq(&case.transaction_id).await?;
    audit
        .append(AuditEvent {
            transaction_id: case.transaction_id.clone(),
            run_id: "hitl-manual".to_string(),
            seq,
            ts: resolved_at,
            duration_ms: 0.0,
            agent: "HITL".to_string(),
            input_summary: format!("case_id={case_id}, original_reason={}", case.reason),
            output_summary: format!("decision={}", resolution.decision),
            output_json: serde_json::json!({
                "decision": resolution.decision,
                "notes": resolution.notes,
            }),
        })
        .await?;

    if let Some(original) = store.get_decision(&case.transaction_id).await? {
        let updated = DecisionResponse {
            decision: resolution.decision,
            explanation_customer: format!("Resolución manual: {}", resolution.notes),
            explanation_audit: format!(
                "{} Resolución HITL: {} - {}",
                original.explanation_audit, resolution.decision, resolution.notes
            ),
            ..original
        };
        store.save_decision(&case.transaction_id, &updated).await?;
    }

    Ok(case)
}
