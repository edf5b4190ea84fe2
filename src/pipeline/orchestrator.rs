//! The decision engine: runs the fixed stage sequence over one transaction,
//! recording one audit event per stage and converting any stage failure into
//! a safe ESCALATE_TO_HUMAN outcome.

use chrono::Utc;
use miette::Diagnostic;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::audit::{AuditError, AuditEvent};
use crate::domain::ConsolidatedView;
use crate::stages::{
    Stage, StageName, arbiter::ArbiterStage, behavior::BehaviorStage, context::ContextStage,
    debate::{DebateProCustomerStage, DebateProFraudStage}, evidence::EvidenceStage,
    explain::ExplainabilityStage, hitl_gate::HitlGateStage, policy_rag::PolicyRagStage,
    threat_intel::ThreatIntelStage,
};
use crate::state::{Decision, DecisionResponse, EvalState, HitlFlag};

use super::EngineDeps;

/// Upper bound on one stage execution, I/O included. A stage that overruns
/// is treated exactly like a failing stage; there is no in-pipeline retry.
const STAGE_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    /// The audit trail is load-bearing: a run that cannot be recorded is not
    /// a run.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Audit(#[from] AuditError),

    #[error("pipeline finished without a decision for {transaction_id}")]
    #[diagnostic(code(fraudgraph::engine::missing_decision))]
    MissingDecision { transaction_id: String },
}

/// Sequences the pipeline stages for one transaction at a time.
///
/// The engine is synchronous per invocation: stages complete in order, and a
/// stage failure never aborts the run; the failure is recorded as an
/// `_error` audit event and the outcome is forced to ESCALATE_TO_HUMAN while
/// the remaining stages still execute. Concurrent invocations for different
/// transactions are independent; each run carries its own state and run id.
pub struct DecisionEngine {
    deps: EngineDeps,
    stages: Vec<Arc<dyn Stage>>,
}

impl DecisionEngine {
    #[must_use]
    pub fn new(deps: EngineDeps) -> Self {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(ContextStage),
            Arc::new(BehaviorStage),
            Arc::new(PolicyRagStage::new(deps.index.clone())),
            Arc::new(ThreatIntelStage::new(deps.search.clone())),
            Arc::new(EvidenceStage),
            Arc::new(DebateProFraudStage::new(deps.model.clone())),
            Arc::new(DebateProCustomerStage::new(deps.model.clone())),
            Arc::new(ArbiterStage),
            Arc::new(ExplainabilityStage::new(deps.audit.clone())),
            Arc::new(HitlGateStage::new(deps.hitl.clone())),
        ];
        Self { deps, stages }
    }

    /// Run the full pipeline and produce the stable decision shape.
    #[instrument(skip(self, view), fields(transaction_id = %view.transaction_id), err)]
    pub async fn run_decision(
        &self,
        view: ConsolidatedView,
    ) -> Result<DecisionResponse, EngineError> {
        let run_id = Uuid::new_v4().to_string();
        let mut state = EvalState::new(view);
        // Set once by the first failing stage; re-asserted after every later
        // merge so no stage can undo the forced outcome.
        let mut forced_hitl: Option<HitlFlag> = None;

        for stage in &self.stages {
            let name = stage.name();
            let seq = self.deps.audit.next_seq(&state.transaction_id).await?;
            let input_summary = input_summary(&state);
            let started = Instant::now();
            let outcome = match tokio::time::timeout(STAGE_DEADLINE, stage.run(&state)).await {
                Ok(result) => result.map_err(|err| err.to_string()),
                Err(_) => Err(format!(
                    "stage deadline of {}s exceeded",
                    STAGE_DEADLINE.as_secs()
                )),
            };

            match outcome {
                Ok(partial) => {
                    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
                    partial.merge_into(&mut state);
                    if let Some(flag) = &forced_hitl {
                        state.decision = Some(Decision::EscalateToHuman);
                        state.hitl = flag.clone();
                    }
                    self.deps
                        .audit
                        .append(AuditEvent {
                            transaction_id: state.transaction_id.clone(),
                            run_id: run_id.clone(),
                            seq,
                            ts: Utc::now(),
                            duration_ms,
                            agent: name.as_str().to_string(),
                            input_summary,
                            output_summary: output_summary(&state, name),
                            output_json: output_json(&state),
                        })
                        .await?;
                }
                Err(err) => {
                    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
                    error!(
                        transaction_id = %state.transaction_id,
                        stage = %name,
                        error = %err,
                        "stage failed; forcing escalation"
                    );
                    self.deps
                        .audit
                        .append(AuditEvent {
                            transaction_id: state.transaction_id.clone(),
                            run_id: run_id.clone(),
                            seq,
                            ts: Utc::now(),
                            duration_ms,
                            agent: format!("{name}_error"),
                            input_summary,
                            output_summary: format!("Error: {err}"),
                            output_json: serde_json::json!({ "error": err }),
                        })
                        .await?;
                    // The first failure pins the reason; later failures keep it.
                    let flag = forced_hitl.get_or_insert_with(|| HitlFlag {
                        required: true,
                        reason: format!("agent_error:{name}"),
                    });
                    state.decision = Some(Decision::EscalateToHuman);
                    state.hitl = flag.clone();
                }
            }
        }

        let decision = state
            .decision
            .ok_or_else(|| EngineError::MissingDecision {
                transaction_id: state.transaction_id.clone(),
            })?;
        info!(
            transaction_id = %state.transaction_id,
            run_id = %run_id,
            decision = %decision,
            "decision run complete"
        );
        Ok(DecisionResponse {
            decision,
            confidence: state.confidence.unwrap_or(0.0),
            signals: state.signals,
            citations_internal: state.citations_internal,
            citations_external: state.citations_external,
            explanation_customer: state.explanation_customer.unwrap_or_default(),
            explanation_audit: state.explanation_audit.unwrap_or_default(),
            ai_summary: state.ai_summary.unwrap_or_default(),
            hitl: state.hitl,
        })
    }
}

fn input_summary(state: &EvalState) -> String {
    format!(
        "signals={}, metrics_keys={:?}",
        state.signals.len(),
        state.metrics.keys()
    )
}

fn output_summary(state: &EvalState, stage: StageName) -> String {
    let mut summary = format!("signals={}", state.signals.len());
    if stage == StageName::PolicyRag {
        summary.push_str(&format!(", citations={}", state.citations_internal.len()));
    }
    if stage == StageName::ThreatIntel {
        summary.push_str(&format!(
            ", external_citations={}",
            state.citations_external.len()
        ));
    }
    if let Some(decision) = state.decision {
        summary.push_str(&format!(", decision={decision}"));
    }
    if let Some(confidence) = state.confidence {
        summary.push_str(&format!(", confidence={confidence}"));
    }
    summary
}

fn output_json(state: &EvalState) -> serde_json::Value {
    serde_json::json!({
        "signals": state.signals,
        "metrics": state.metrics,
        "citations_internal": state.citations_internal,
        "citations_external": state.citations_external,
        "decision": state.decision,
        "confidence": state.confidence,
    })
}
