//! Explainability: renders the customer line, the audit line and the
//! detailed Markdown report from the accumulated state and the audit trail.

use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

use crate::audit::AuditSink;
use crate::state::{Decision, EvalState};

use super::arbiter::{REASON_BORDERLINE_CONFIDENCE, REASON_POLICY_OR_LOW_CONFIDENCE};
use super::{Stage, StageError, StageName, StagePartial};

/// Characters of advocate reasoning quoted in the report.
const REASONING_EXCERPT: usize = 150;

pub struct ExplainabilityStage {
    audit: Arc<dyn AuditSink>,
}

impl ExplainabilityStage {
    #[must_use]
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self { audit }
    }
}

fn friendly_name(agent: &str) -> Option<&'static str> {
    match agent {
        "TransactionContext" => Some("Context"),
        "BehavioralPattern" => Some("Behavior"),
        "PolicyRAG" => Some("RAG"),
        "ThreatIntel" => Some("Web"),
        "EvidenceAggregation" => Some("Evidence"),
        "DebateProFraud" | "DebateProCustomer" => Some("Debate"),
        "Arbiter" => Some("Decisión"),
        "Explainability" => Some("Explicación"),
        // The gate records after rendering; it never belongs in the path.
        _ => None,
    }
}

/// Rebuild the agent path from the recorded audit events, skipping error
/// entries and collapsing the two debate stages into one label.
async fn agent_path(
    audit: &dyn AuditSink,
    transaction_id: &str,
) -> Result<String, StageError> {
    let events = audit
        .events(transaction_id)
        .await
        .map_err(|err| StageError::Audit {
            message: err.to_string(),
        })?;
    let mut parts: Vec<&'static str> = Vec::new();
    for event in &events {
        if event.is_error() {
            continue;
        }
        if let Some(name) = friendly_name(&event.agent)
            && !parts.contains(&name)
        {
            parts.push(name);
        }
    }
    Ok(parts.join(" → "))
}

fn customer_line(decision: Decision) -> String {
    match decision {
        Decision::Approve => {
            "La transacción fue aprobada. No se detectaron señales relevantes.".to_string()
        }
        Decision::Challenge => "La transacción requiere validación adicional por señales \
             inusuales detectadas. / Additional verification is required to complete this \
             transaction."
            .to_string(),
        Decision::Block => "La transacción fue bloqueada por alta probabilidad de fraude \
             según señales y evidencias."
            .to_string(),
        Decision::EscalateToHuman => {
            "La transacción requiere revisión humana para una validación adicional.".to_string()
        }
    }
}

fn audit_line(state: &EvalState, path: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !state.citations_internal.is_empty() {
        let ids: Vec<&str> = state
            .citations_internal
            .iter()
            .map(|c| c.policy_id.as_str())
            .collect();
        parts.push(format!("Se aplicó la política {}", ids.join(", ")));
    }
    if !state.citations_external.is_empty() {
        parts.push("se detectó alerta externa".to_string());
    }
    parts.push(format!("Ruta de agentes: {path}"));
    format!("{}.", parts.join(". "))
}

/// Long Spanish rendering of the short HITL reason tags.
fn hitl_reason_es(reason: &str) -> String {
    if reason == REASON_POLICY_OR_LOW_CONFIDENCE {
        "Política o baja confianza requiere revisión humana".to_string()
    } else if reason == REASON_BORDERLINE_CONFIDENCE {
        "Nivel de confianza límite requiere evaluación manual".to_string()
    } else if let Some(stage) = reason.strip_prefix("agent_error:") {
        format!("Error del agente {stage} durante la evaluación")
    } else {
        reason.to_string()
    }
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= REASONING_EXCERPT {
        text.to_string()
    } else {
        let cut: String = text.chars().take(REASONING_EXCERPT).collect();
        format!("{cut}...")
    }
}

fn summary_reason(state: &EvalState, decision: Decision) -> String {
    if let Some(first) = state.signals.first() {
        let extra = state.signals.len() - 1;
        if extra > 0 {
            let plural = if extra > 1 { "es" } else { "" };
            format!("{first} y {extra} señal{plural} adicional{plural} detectadas.")
        } else {
            first.to_string()
        }
    } else if decision == Decision::Approve {
        "Transacción dentro de parámetros normales del cliente.".to_string()
    } else {
        "Requiere evaluación adicional por contexto de riesgo.".to_string()
    }
}

fn render_report(state: &EvalState, decision: Decision, confidence: f64, path: &str) -> String {
    let mut out = String::new();

    out.push_str("## 1) Decisión final y nivel de confianza\n\n");
    let _ = writeln!(
        out,
        "**Decisión:** {} ({})\n",
        decision.label_es(),
        decision
    );
    let _ = writeln!(
        out,
        "**Riesgo de fraude:** {}% ({:.2})\n",
        (confidence * 100.0).round() as i64,
        confidence
    );
    let _ = writeln!(out, "**Resumen:** {}\n", summary_reason(state, decision));

    out.push_str("## 2) Señales clave que influyeron en la decisión\n\n");
    if state.signals.is_empty() {
        out.push_str("- No se detectaron señales de riesgo significativas.\n");
    } else {
        for signal in &state.signals {
            let detail = if let Some(risk) = state.metrics.behavior_risk {
                format!(" (riesgo comportamental: {risk:.2})")
            } else if let Some(ratio) = state.metrics.amount_ratio {
                format!(" (ratio: {ratio:.2}x)")
            } else {
                String::new()
            };
            let _ = writeln!(out, "- {signal}{detail}");
        }
    }
    out.push('\n');

    out.push_str("## 3) Políticas internas aplicadas (RAG)\n\n");
    if state.citations_internal.is_empty() {
        out.push_str("Sin políticas recuperadas.\n");
    } else {
        for (idx, citation) in state.citations_internal.iter().enumerate() {
            let _ = writeln!(
                out,
                "**Política {}:** {} versión {} (fragmento {})\n",
                idx + 1,
                citation.policy_id,
                citation.version,
                citation.chunk_id
            );
        }
        out.push_str("**Aplicación:** ");
        out.push_str(match decision {
            Decision::Challenge => {
                "Las políticas detectadas establecen umbrales de validación que aplican a \
                 esta transacción. Se requiere verificación adicional del cliente antes de \
                 aprobar.\n"
            }
            Decision::Block => {
                "Las condiciones definidas en las políticas justifican el bloqueo inmediato \
                 por alto riesgo de fraude.\n"
            }
            Decision::EscalateToHuman => {
                "Las políticas requieren escalamiento a revisión humana para casos con estas \
                 características específicas.\n"
            }
            Decision::Approve => {
                "Las políticas validan que la transacción cumple con los criterios de \
                 aprobación establecidos.\n"
            }
        });
    }
    out.push('\n');

    out.push_str("## 4) Inteligencia de amenazas externas (búsqueda gobernada)\n\n");
    let _ = writeln!(out, "**Resultados:** {}\n", state.citations_external.len());
    if state.citations_external.is_empty() {
        out.push_str("No se registraron alertas externas relevantes en las fuentes permitidas.\n");
    } else {
        for citation in &state.citations_external {
            let _ = writeln!(out, "- {} — {}", citation.url, citation.summary);
        }
    }
    out.push('\n');

    out.push_str("## 5) Resumen del debate entre agentes Pro-Fraude y Pro-Cliente\n\n");
    match &state.debate.pro_fraud {
        Some(position) if !position.reasoning.is_empty() => {
            let _ = writeln!(out, "**Pro-Fraude:** {}\n", excerpt(&position.reasoning));
        }
        _ => out.push_str(
            "**Pro-Fraude:** Las señales detectadas sugieren un nivel de riesgo que \
             justifica precaución.\n\n",
        ),
    }
    match &state.debate.pro_customer {
        Some(position) if !position.reasoning.is_empty() => {
            let _ = writeln!(out, "**Pro-Cliente:** {}\n", excerpt(&position.reasoning));
        }
        _ => out.push_str(
            "**Pro-Cliente:** Algunos patrones del cliente coinciden con su comportamiento \
             habitual.\n\n",
        ),
    }

    out.push_str("## 6) Trazabilidad y siguientes pasos\n\n");
    let _ = writeln!(out, "**Ruta de agentes:** {path}\n");
    if state.hitl.required {
        let _ = writeln!(
            out,
            "**¿Se necesita intervención humana?:** Sí — {}\n",
            hitl_reason_es(&state.hitl.reason)
        );
    } else {
        out.push_str("**¿Se necesita intervención humana?:** No\n\n");
    }
    out.push_str("**Acción recomendada:** ");
    out.push_str(match decision {
        Decision::Approve => {
            "Procesar la transacción normalmente. El riesgo es aceptable dentro de los \
             parámetros establecidos."
        }
        Decision::Challenge => {
            "Solicitar validación adicional del cliente (OTP, biometría, etc.) antes de \
             aprobar."
        }
        Decision::Block => {
            "Bloquear la transacción y notificar al cliente sobre actividad sospechosa \
             detectada."
        }
        Decision::EscalateToHuman => {
            "Derivar el caso a un analista especializado para revisión manual y decisión \
             final."
        }
    });
    out.push('\n');

    out
}

#[async_trait]
impl Stage for ExplainabilityStage {
    fn name(&self) -> StageName {
        StageName::Explainability
    }

    async fn run(&self, state: &EvalState) -> Result<StagePartial, StageError> {
        // An error earlier in the run forces ESCALATE before this stage.
        let decision = state.decision.unwrap_or(Decision::EscalateToHuman);
        let confidence = state.confidence.unwrap_or(0.0);
        let path = agent_path(self.audit.as_ref(), &state.transaction_id).await?;

        debug!(
            transaction_id = %state.transaction_id,
            decision = %decision,
            "rendered explanations"
        );
        let mut partial = StagePartial::new();
        partial.explanation_customer = Some(customer_line(decision));
        partial.explanation_audit = Some(audit_line(state, &path));
        partial.ai_summary = Some(render_report(state, decision, confidence, &path));
        Ok(partial)
    }
}
