//! Internal policy retrieval: queries the vector index and extracts a
//! decision hint from the retrieved rule text.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::retrieval::PolicyIndex;
use crate::state::{CitationInternal, EvalState, Metrics, PolicyHint};

use super::{Stage, StageError, StageName, StagePartial};

const TOP_K: usize = 2;

pub struct PolicyRagStage {
    index: Arc<dyn PolicyIndex>,
}

impl PolicyRagStage {
    #[must_use]
    pub fn new(index: Arc<dyn PolicyIndex>) -> Self {
        Self { index }
    }
}

/// Build the retrieval query from current signals plus the metric tokens
/// that hold, joined by `"; "`.
fn build_query(state: &EvalState) -> String {
    let mut parts: Vec<String> = state.signals.iter().map(|s| s.to_string()).collect();
    if let Some(ratio) = state.metrics.amount_ratio
        && ratio != 0.0
    {
        parts.push(format!("amount_ratio={ratio}"));
    }
    if state.metrics.hour_outside == Some(true) {
        parts.push("hour_outside=true".to_string());
    }
    if state.metrics.new_country == Some(true) {
        parts.push("new_country=true".to_string());
    }
    if state.metrics.new_device == Some(true) {
        parts.push("new_device=true".to_string());
    }
    parts.join("; ")
}

/// Scan rule text for decision keywords; higher-severity hints win
/// regardless of retrieval order. The uppercase match subsumes the
/// `"→ BLOCK"` arrow form rule authors use.
fn scan_hint(content: &str) -> Option<PolicyHint> {
    let upper = content.to_uppercase();
    if upper.contains("ESCALATE_TO_HUMAN") {
        Some(PolicyHint::EscalateToHuman)
    } else if upper.contains("BLOCK") {
        Some(PolicyHint::Block)
    } else if upper.contains("CHALLENGE") {
        Some(PolicyHint::Challenge)
    } else {
        None
    }
}

#[async_trait]
impl Stage for PolicyRagStage {
    fn name(&self) -> StageName {
        StageName::PolicyRag
    }

    async fn run(&self, state: &EvalState) -> Result<StagePartial, StageError> {
        let query = build_query(state);
        let hits = self
            .index
            .query(&query, TOP_K)
            .await
            .map_err(|err| StageError::VectorStore {
                operation: "query".into(),
                message: err.to_string(),
            })?;

        let mut citations = Vec::with_capacity(hits.len());
        let mut hint: Option<PolicyHint> = None;
        for (doc, _similarity) in &hits {
            citations.push(CitationInternal {
                policy_id: doc.policy_id.clone(),
                chunk_id: doc.chunk_id.clone(),
                version: doc.version.clone(),
            });
            hint = hint.max(scan_hint(&doc.content));
        }

        debug!(
            transaction_id = %state.transaction_id,
            query,
            citations = citations.len(),
            hint = hint.map(|h| h.to_string()),
            "policy retrieval completed"
        );
        Ok(StagePartial::new()
            .with_citations_internal(citations)
            .with_metrics(Metrics {
                policy_hint: hint,
                ..Metrics::default()
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConsolidatedView, UsualHours};
    use crate::state::Signal;

    fn base_state() -> EvalState {
        EvalState::new(ConsolidatedView {
            transaction_id: "T-RAG".into(),
            customer_id: "C-1".into(),
            amount: 2000.0,
            currency: "PEN".into(),
            country: "CO".into(),
            channel: "web".into(),
            device_id: "D-9".into(),
            timestamp: "2025-03-01T03:15:00Z".into(),
            merchant_id: "M-1".into(),
            usual_amount_avg: 500.0,
            usual_hours: UsualHours { start: 8, end: 20 },
            usual_countries: vec!["PE".into()],
            usual_devices: vec!["D-1".into()],
        })
    }

    #[test]
    fn query_concatenates_signals_and_held_metric_tokens() {
        let mut state = base_state();
        state.signals = vec![Signal::AmountOutOfRange, Signal::UnusualHour];
        state.metrics.amount_ratio = Some(4.0);
        state.metrics.hour_outside = Some(true);
        state.metrics.new_country = Some(false);
        state.metrics.new_device = Some(true);
        assert_eq!(
            build_query(&state),
            "Monto fuera de rango; Horario no habitual; amount_ratio=4; \
             hour_outside=true; new_device=true"
        );
    }

    #[test]
    fn empty_state_builds_an_empty_query() {
        let state = base_state();
        assert_eq!(build_query(&state), "");
    }

    #[test]
    fn hint_scan_matches_keywords_and_arrow_forms() {
        assert_eq!(
            scan_hint("Si monto > 3x → CHALLENGE"),
            Some(PolicyHint::Challenge)
        );
        assert_eq!(
            scan_hint("bloqueo inmediato: → BLOCK"),
            Some(PolicyHint::Block)
        );
        assert_eq!(
            scan_hint("derivar a analista (escalate_to_human)"),
            Some(PolicyHint::EscalateToHuman)
        );
        assert_eq!(scan_hint("sin palabra clave"), None);
    }

    #[test]
    fn escalate_beats_block_inside_one_rule() {
        assert_eq!(
            scan_hint("→ BLOCK salvo revisión; si duda → ESCALATE_TO_HUMAN"),
            Some(PolicyHint::EscalateToHuman)
        );
    }
}
