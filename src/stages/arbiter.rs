//! Final arbitration: folds score, signals, debate and the policy hint into
//! the decision through ordered rules.

use async_trait::async_trait;
use tracing::info;

use crate::state::{Decision, EvalState, HitlFlag, PolicyHint, Signal, round2};

use super::{Stage, StageError, StageName, StagePartial};

/// Short machine-readable HITL reason tags. Long Spanish strings are
/// rendered at presentation time only.
pub const REASON_POLICY_OR_LOW_CONFIDENCE: &str = "policy_or_low_confidence";
pub const REASON_BORDERLINE_CONFIDENCE: &str = "borderline_confidence";

const BLOCK_THRESHOLD: f64 = 0.75;
const APPROVE_THRESHOLD: f64 = 0.45;
const CHALLENGE_THRESHOLD: f64 = 0.60;
const EXTERNAL_HIT_BONUS: f64 = 0.20;

pub struct ArbiterStage;

/// Fraud-risk score: behavior risk, plus the external-evidence bonus, plus
/// the debate adjustments, clamped to [0, 1].
fn confidence(state: &EvalState) -> f64 {
    let mut cf = state.metrics.behavior_risk.unwrap_or(0.0);
    if !state.citations_external.is_empty() {
        cf += EXTERNAL_HIT_BONUS;
    }
    if let Some(position) = &state.debate.pro_fraud {
        cf += position.confidence_delta;
    }
    if let Some(position) = &state.debate.pro_customer {
        cf -= position.confidence_delta;
    }
    cf.clamp(0.0, 1.0)
}

/// Ordered decision rules; the first match wins.
fn decide(state: &EvalState, cf: f64) -> Decision {
    let metrics = &state.metrics;
    let amount_ratio = metrics.amount_ratio.unwrap_or(1.0);
    let hour_outside = metrics.hour_outside.unwrap_or(false);
    let new_country = metrics.new_country.unwrap_or(false);
    let new_device = metrics.new_device.unwrap_or(false);
    let external_alert = state.has_signal(Signal::ExternalAlert);

    if metrics.policy_hint == Some(PolicyHint::EscalateToHuman) && new_country && new_device {
        Decision::EscalateToHuman
    } else if cf >= BLOCK_THRESHOLD && external_alert && amount_ratio > 3.0 {
        Decision::Block
    } else if amount_ratio > 3.0 && hour_outside {
        Decision::Challenge
    } else if cf < APPROVE_THRESHOLD && state.signals.len() <= 1 {
        Decision::Approve
    } else if cf >= CHALLENGE_THRESHOLD {
        Decision::Challenge
    } else {
        Decision::EscalateToHuman
    }
}

fn hitl_flag(decision: Decision, cf: f64) -> HitlFlag {
    if decision == Decision::EscalateToHuman {
        HitlFlag {
            required: true,
            reason: REASON_POLICY_OR_LOW_CONFIDENCE.to_string(),
        }
    } else if (APPROVE_THRESHOLD..=CHALLENGE_THRESHOLD).contains(&cf) {
        HitlFlag {
            required: true,
            reason: REASON_BORDERLINE_CONFIDENCE.to_string(),
        }
    } else {
        HitlFlag::default()
    }
}

#[async_trait]
impl Stage for ArbiterStage {
    fn name(&self) -> StageName {
        StageName::Arbiter
    }

    async fn run(&self, state: &EvalState) -> Result<StagePartial, StageError> {
        let cf = confidence(state);
        let decision = decide(state, cf);
        let hitl = hitl_flag(decision, cf);

        info!(
            transaction_id = %state.transaction_id,
            decision = %decision,
            fraud_risk = cf,
            hitl_required = hitl.required,
            "arbiter ruled"
        );
        Ok(StagePartial::new()
            .with_decision(decision, round2(cf))
            .with_hitl(hitl))
    }
}
