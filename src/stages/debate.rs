//! Two-sided debate: a Pro-Fraud advocate and a Pro-Customer advocate each
//! produce a recommendation with a bounded confidence delta.
//!
//! Both stages have a deterministic fallback and an optional model-assisted
//! path. Model output is never trusted: fields default, deltas clamp to the
//! advocate's envelope, and transport or parse failures select the fallback.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm::ReasoningModel;
use crate::state::{DebatePosition, Decision, EvalState, Signal};

use super::{Stage, StageError, StageName, StagePartial};

/// Maximum delta the Pro-Fraud advocate may add on the model path.
const PRO_FRAUD_DELTA_CAP: f64 = 0.15;
/// Maximum delta the Pro-Customer advocate may subtract on the model path.
const PRO_CUSTOMER_DELTA_CAP: f64 = 0.05;
/// Delta applied when the model omits the field.
const DEFAULT_MODEL_DELTA: f64 = 0.02;

pub struct DebateProFraudStage {
    model: Option<Arc<dyn ReasoningModel>>,
}

pub struct DebateProCustomerStage {
    model: Option<Arc<dyn ReasoningModel>>,
}

impl DebateProFraudStage {
    #[must_use]
    pub fn new(model: Option<Arc<dyn ReasoningModel>>) -> Self {
        Self { model }
    }
}

impl DebateProCustomerStage {
    #[must_use]
    pub fn new(model: Option<Arc<dyn ReasoningModel>>) -> Self {
        Self { model }
    }
}

fn fallback_pro_fraud(state: &EvalState) -> DebatePosition {
    let amount_ratio = state.metrics.amount_ratio.unwrap_or(1.0);
    let (recommended_decision, reasoning) = if state.has_signal(Signal::ExternalAlert)
        && amount_ratio > 3.0
    {
        (
            Decision::Block,
            "Alta probabilidad de fraude: alerta externa detectada con monto \
             significativamente elevado.",
        )
    } else if state.has_signal(Signal::AmountOutOfRange) && state.has_signal(Signal::UnusualHour) {
        (
            Decision::Challenge,
            "Múltiples señales de riesgo: monto y horario fuera de patrones habituales.",
        )
    } else {
        (
            Decision::Challenge,
            "Señales de riesgo detectadas que requieren verificación adicional.",
        )
    };

    let confidence_delta = match state.signals.len() {
        n if n >= 3 => 0.05,
        2 => 0.02,
        _ => 0.00,
    };

    DebatePosition {
        recommended_decision,
        confidence_delta,
        reasoning: reasoning.to_string(),
    }
}

fn fallback_pro_customer(state: &EvalState) -> DebatePosition {
    let minor_only = state
        .signals
        .iter()
        .all(|s| matches!(s, Signal::UnusualHour | Signal::NewDevice));
    let (recommended_decision, reasoning) = if state.signals.len() <= 1
        && (state.signals.is_empty() || minor_only)
    {
        (
            Decision::Approve,
            "Bajo riesgo: señales menores que no justifican bloqueo o challenge.",
        )
    } else {
        (
            Decision::Challenge,
            "Aunque el cliente tiene historial limpio, las señales detectadas requieren \
             verificación.",
        )
    };

    let confidence_delta = if state.has_signal(Signal::ExternalAlert) {
        0.00
    } else {
        0.03
    };

    DebatePosition {
        recommended_decision,
        confidence_delta,
        reasoning: reasoning.to_string(),
    }
}

fn parse_decision(value: &Value) -> Decision {
    match value.as_str() {
        Some("APPROVE") => Decision::Approve,
        Some("BLOCK") => Decision::Block,
        Some("ESCALATE_TO_HUMAN") => Decision::EscalateToHuman,
        _ => Decision::Challenge,
    }
}

/// Interpret a model response, defaulting missing fields and clamping the
/// delta into `[0, cap]`.
fn position_from_model(value: &Value, cap: f64, default_reasoning: &str) -> DebatePosition {
    let confidence_delta = value
        .get("confidence_delta")
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_MODEL_DELTA)
        .clamp(0.0, cap);
    DebatePosition {
        recommended_decision: parse_decision(&value["recommended_decision"]),
        confidence_delta,
        reasoning: value
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or(default_reasoning)
            .to_string(),
    }
}

fn signals_text(state: &EvalState) -> String {
    if state.signals.is_empty() {
        "Ninguna".to_string()
    } else {
        state
            .signals
            .iter()
            .map(Signal::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn debate_context(state: &EvalState) -> String {
    let metrics = &state.metrics;
    format!(
        "Transacción {}: monto={} {}, país={}, canal={}, fecha={}.\n\
         Señales: {}.\n\
         Métricas: amount_ratio={}, hour_outside={}, new_country={}, new_device={}, \
         behavior_risk={}.\n\
         Políticas citadas: {}. Alertas externas: {}.\n\
         Responde únicamente un objeto JSON con las claves recommended_decision \
         (APPROVE|CHALLENGE|BLOCK|ESCALATE_TO_HUMAN), confidence_delta (número) y \
         reasoning (texto).",
        state.transaction_id,
        state.view.amount,
        state.view.currency,
        state.view.country,
        state.view.channel,
        state.view.timestamp,
        signals_text(state),
        metrics.amount_ratio.unwrap_or(1.0),
        metrics.hour_outside.unwrap_or(false),
        metrics.new_country.unwrap_or(false),
        metrics.new_device.unwrap_or(false),
        metrics.behavior_risk.unwrap_or(0.0),
        state.citations_internal.len(),
        state.citations_external.len(),
    )
}

const PRO_FRAUD_SYSTEM: &str = "Eres el abogado Pro-Fraude en un comité de decisión. \
     Argumenta por qué esta transacción podría ser fraudulenta, anclado en las señales \
     y evidencias provistas.";

const PRO_CUSTOMER_SYSTEM: &str = "Eres el abogado Pro-Cliente en un comité de decisión. \
     Argumenta por qué esta transacción podría ser legítima, anclado en el historial \
     del cliente y las evidencias provistas.";

async fn model_position(
    model: &dyn ReasoningModel,
    system: &str,
    state: &EvalState,
    cap: f64,
    default_reasoning: &str,
) -> Option<DebatePosition> {
    match model.generate_json(system, &debate_context(state)).await {
        Ok(value) => Some(position_from_model(&value, cap, default_reasoning)),
        Err(err) => {
            warn!(
                transaction_id = %state.transaction_id,
                error = %err,
                "reasoning model unavailable; using deterministic debate"
            );
            None
        }
    }
}

#[async_trait]
impl Stage for DebateProFraudStage {
    fn name(&self) -> StageName {
        StageName::DebateProFraud
    }

    async fn run(&self, state: &EvalState) -> Result<StagePartial, StageError> {
        let position = match &self.model {
            Some(model) => model_position(
                model.as_ref(),
                PRO_FRAUD_SYSTEM,
                state,
                PRO_FRAUD_DELTA_CAP,
                "Análisis de fraude completado.",
            )
            .await
            .unwrap_or_else(|| fallback_pro_fraud(state)),
            None => fallback_pro_fraud(state),
        };
        debug!(
            transaction_id = %state.transaction_id,
            recommends = %position.recommended_decision,
            delta = position.confidence_delta,
            "pro-fraud position taken"
        );
        Ok(StagePartial::new().with_pro_fraud(position))
    }
}

#[async_trait]
impl Stage for DebateProCustomerStage {
    fn name(&self) -> StageName {
        StageName::DebateProCustomer
    }

    async fn run(&self, state: &EvalState) -> Result<StagePartial, StageError> {
        let position = match &self.model {
            Some(model) => model_position(
                model.as_ref(),
                PRO_CUSTOMER_SYSTEM,
                state,
                PRO_CUSTOMER_DELTA_CAP,
                "Defensa del cliente completada.",
            )
            .await
            .unwrap_or_else(|| fallback_pro_customer(state)),
            None => fallback_pro_customer(state),
        };
        debug!(
            transaction_id = %state.transaction_id,
            recommends = %position.recommended_decision,
            delta = position.confidence_delta,
            "pro-customer position taken"
        );
        Ok(StagePartial::new().with_pro_customer(position))
    }
}
