//! Evaluation state threaded through the decision pipeline.
//!
//! The pipeline contract is functional monotone growth: every stage receives
//! the current [`EvalState`] and returns a partial update that only *adds*
//! information (signals, metrics, citations, debate slots, decision fields).
//! No stage removes anything. The orchestrator owns the state exclusively for
//! the duration of a run, so merges happen in place.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::ConsolidatedView;

/// Final pipeline outcome for a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Challenge,
    Block,
    EscalateToHuman,
}

impl Decision {
    /// Wire form, e.g. `"ESCALATE_TO_HUMAN"`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "APPROVE",
            Decision::Challenge => "CHALLENGE",
            Decision::Block => "BLOCK",
            Decision::EscalateToHuman => "ESCALATE_TO_HUMAN",
        }
    }

    /// Spanish presentation label used in rendered reports.
    #[must_use]
    pub fn label_es(&self) -> &'static str {
        match self {
            Decision::Approve => "Aprobada",
            Decision::Challenge => "Requiere validación",
            Decision::Block => "Bloqueada",
            Decision::EscalateToHuman => "Revisión humana",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualitative observation accumulated across stages.
///
/// The vocabulary is closed; the wire form is the Spanish string each variant
/// serializes to. Signals are recorded in insertion order and each stage adds
/// a given signal at most once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    #[serde(rename = "Monto fuera de rango")]
    AmountOutOfRange,
    #[serde(rename = "Horario no habitual")]
    UnusualHour,
    #[serde(rename = "País no habitual")]
    UnusualCountry,
    #[serde(rename = "Dispositivo nuevo")]
    NewDevice,
    #[serde(rename = "Alerta externa")]
    ExternalAlert,
}

impl Signal {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::AmountOutOfRange => "Monto fuera de rango",
            Signal::UnusualHour => "Horario no habitual",
            Signal::UnusualCountry => "País no habitual",
            Signal::NewDevice => "Dispositivo nuevo",
            Signal::ExternalAlert => "Alerta externa",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision bias extracted from retrieved policy rule text.
///
/// Ordered by severity: `Challenge < Block < EscalateToHuman`. Promotion
/// across retrieved rules takes the maximum, so retrieval order never
/// matters.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyHint {
    Challenge,
    Block,
    EscalateToHuman,
}

impl fmt::Display for PolicyHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PolicyHint::Challenge => "CHALLENGE",
            PolicyHint::Block => "BLOCK",
            PolicyHint::EscalateToHuman => "ESCALATE_TO_HUMAN",
        })
    }
}

/// Tagged metrics record.
///
/// Every known key is an explicit optional field; absence is distinct from
/// any value. Stages merge by setting the fields they own.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour_outside: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_country: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_device: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior_risk: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_hint: Option<PolicyHint>,
}

impl Metrics {
    /// Names of the fields currently set, in declaration order. Used for
    /// audit input summaries.
    #[must_use]
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.amount_ratio.is_some() {
            keys.push("amount_ratio");
        }
        if self.hour.is_some() {
            keys.push("hour");
        }
        if self.hour_outside.is_some() {
            keys.push("hour_outside");
        }
        if self.new_country.is_some() {
            keys.push("new_country");
        }
        if self.new_device.is_some() {
            keys.push("new_device");
        }
        if self.behavior_risk.is_some() {
            keys.push("behavior_risk");
        }
        if self.policy_hint.is_some() {
            keys.push("policy_hint");
        }
        keys
    }

    /// Merge `patch` into `self`, taking each field that `patch` sets.
    pub fn merge(&mut self, patch: Metrics) {
        if patch.amount_ratio.is_some() {
            self.amount_ratio = patch.amount_ratio;
        }
        if patch.hour.is_some() {
            self.hour = patch.hour;
        }
        if patch.hour_outside.is_some() {
            self.hour_outside = patch.hour_outside;
        }
        if patch.new_country.is_some() {
            self.new_country = patch.new_country;
        }
        if patch.new_device.is_some() {
            self.new_device = patch.new_device;
        }
        if patch.behavior_risk.is_some() {
            self.behavior_risk = patch.behavior_risk;
        }
        if patch.policy_hint.is_some() {
            self.policy_hint = patch.policy_hint;
        }
    }
}

/// Pointer to an internal policy rule that backed the decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationInternal {
    pub policy_id: String,
    pub chunk_id: String,
    pub version: String,
}

/// Pointer to an external intelligence source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationExternal {
    pub url: String,
    pub summary: String,
}

/// One advocate's position out of the debate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DebatePosition {
    pub recommended_decision: Decision,
    /// Non-negative score adjustment; clamped per advocate at the stage
    /// boundary.
    pub confidence_delta: f64,
    pub reasoning: String,
}

/// Both debate slots; each is filled by its own stage.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DebateState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pro_fraud: Option<DebatePosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pro_customer: Option<DebatePosition>,
}

/// Human-in-the-loop requirement flag with a short machine-readable tag.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitlFlag {
    pub required: bool,
    pub reason: String,
}

/// Snapshot of the accumulated evidence at aggregation time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub signals: Vec<Signal>,
    pub metrics: Metrics,
    pub citations_internal: Vec<CitationInternal>,
    pub citations_external: Vec<CitationExternal>,
}

/// Shared evaluation state threaded through the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvalState {
    pub transaction_id: String,
    pub view: ConsolidatedView,
    pub signals: Vec<Signal>,
    pub metrics: Metrics,
    pub citations_internal: Vec<CitationInternal>,
    pub citations_external: Vec<CitationExternal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
    pub debate: DebateState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation_customer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation_audit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    pub hitl: HitlFlag,
}

impl EvalState {
    /// Fresh state for one pipeline invocation.
    #[must_use]
    pub fn new(view: ConsolidatedView) -> Self {
        Self {
            transaction_id: view.transaction_id.clone(),
            view,
            signals: Vec::new(),
            metrics: Metrics::default(),
            citations_internal: Vec::new(),
            citations_external: Vec::new(),
            evidence: None,
            debate: DebateState::default(),
            decision: None,
            confidence: None,
            explanation_customer: None,
            explanation_audit: None,
            ai_summary: None,
            hitl: HitlFlag::default(),
        }
    }

    #[must_use]
    pub fn has_signal(&self, signal: Signal) -> bool {
        self.signals.contains(&signal)
    }
}

/// Stable external decision shape returned to callers and persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub decision: Decision,
    /// Fraud-risk score in `[0, 1]`, rounded to two decimals.
    pub confidence: f64,
    pub signals: Vec<Signal>,
    pub citations_internal: Vec<CitationInternal>,
    pub citations_external: Vec<CitationExternal>,
    pub explanation_customer: String,
    pub explanation_audit: String,
    pub ai_summary: String,
    pub hitl: HitlFlag,
}

/// Round to two decimals the way the wire format expects.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
