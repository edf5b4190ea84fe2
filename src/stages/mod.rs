//! Stage execution framework for the decision pipeline.
//!
//! A [`Stage`] is a single unit of evidence accumulation. Stages receive the
//! current [`EvalState`] read-only and return a [`StagePartial`] describing
//! what to add; the orchestrator merges partials into the state. Stages never
//! remove information.

pub mod arbiter;
pub mod behavior;
pub mod context;
pub mod debate;
pub mod evidence;
pub mod explain;
pub mod hitl_gate;
pub mod policy_rag;
pub mod threat_intel;

use async_trait::async_trait;
use miette::Diagnostic;
use std::fmt;
use thiserror::Error;

use crate::state::{
    CitationExternal, CitationInternal, DebatePosition, Decision, EvalState, Evidence, HitlFlag,
    Metrics, Signal,
};

/// Identifies a pipeline stage; the string form is the audit `agent` name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageName {
    Context,
    Behavior,
    PolicyRag,
    ThreatIntel,
    Evidence,
    DebateProFraud,
    DebateProCustomer,
    Arbiter,
    Explainability,
    HitlGate,
}

impl StageName {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Context => "TransactionContext",
            StageName::Behavior => "BehavioralPattern",
            StageName::PolicyRag => "PolicyRAG",
            StageName::ThreatIntel => "ThreatIntel",
            StageName::Evidence => "EvidenceAggregation",
            StageName::DebateProFraud => "DebateProFraud",
            StageName::DebateProCustomer => "DebateProCustomer",
            StageName::Arbiter => "Arbiter",
            StageName::Explainability => "Explainability",
            StageName::HitlGate => "HitlGate",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by stage execution.
///
/// The orchestrator converts any of these into an `_error` audit event and a
/// forced ESCALATE_TO_HUMAN outcome; they never abort the pipeline.
#[derive(Debug, Error, Diagnostic)]
pub enum StageError {
    #[error("vector store failure during {operation}: {message}")]
    #[diagnostic(
        code(fraudgraph::stage::vector_store),
        help("Check the policy index file and the sqlite-vec extension.")
    )]
    VectorStore { operation: String, message: String },

    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(fraudgraph::stage::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    #[error("audit trail unavailable: {message}")]
    #[diagnostic(code(fraudgraph::stage::audit))]
    Audit { message: String },

    #[error("hitl store failure: {message}")]
    #[diagnostic(code(fraudgraph::stage::hitl))]
    Hitl { message: String },

    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(fraudgraph::stage::missing_input),
        help("A prior stage should have produced {what}.")
    )]
    MissingInput { what: &'static str },
}

/// Partial state update returned by a stage.
///
/// All fields are additive; the orchestrator merges them into the shared
/// state in stage order. Builder-style `with_*` methods keep stage bodies
/// terse.
#[derive(Clone, Debug, Default)]
pub struct StagePartial {
    pub signals: Vec<Signal>,
    pub metrics: Metrics,
    pub citations_internal: Vec<CitationInternal>,
    pub citations_external: Vec<CitationExternal>,
    pub evidence: Option<Evidence>,
    pub pro_fraud: Option<DebatePosition>,
    pub pro_customer: Option<DebatePosition>,
    pub decision: Option<Decision>,
    pub confidence: Option<f64>,
    pub explanation_customer: Option<String>,
    pub explanation_audit: Option<String>,
    pub ai_summary: Option<String>,
    pub hitl: Option<HitlFlag>,
}

impl StagePartial {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signals.push(signal);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_citations_internal(mut self, citations: Vec<CitationInternal>) -> Self {
        self.citations_internal = citations;
        self
    }

    #[must_use]
    pub fn with_citations_external(mut self, citations: Vec<CitationExternal>) -> Self {
        self.citations_external = citations;
        self
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = Some(evidence);
        self
    }

    #[must_use]
    pub fn with_pro_fraud(mut self, position: DebatePosition) -> Self {
        self.pro_fraud = Some(position);
        self
    }

    #[must_use]
    pub fn with_pro_customer(mut self, position: DebatePosition) -> Self {
        self.pro_customer = Some(position);
        self
    }

    #[must_use]
    pub fn with_decision(mut self, decision: Decision, confidence: f64) -> Self {
        self.decision = Some(decision);
        self.confidence = Some(confidence);
        self
    }

    #[must_use]
    pub fn with_hitl(mut self, hitl: HitlFlag) -> Self {
        self.hitl = Some(hitl);
        self
    }

    /// Merge this partial into `state`. Additive only: sequences extend,
    /// metric fields overlay, optional slots fill in.
    pub fn merge_into(self, state: &mut EvalState) {
        state.signals.extend(self.signals);
        state.metrics.merge(self.metrics);
        state.citations_internal.extend(self.citations_internal);
        state.citations_external.extend(self.citations_external);
        if let Some(evidence) = self.evidence {
            state.evidence = Some(evidence);
        }
        if let Some(position) = self.pro_fraud {
            state.debate.pro_fraud = Some(position);
        }
        if let Some(position) = self.pro_customer {
            state.debate.pro_customer = Some(position);
        }
        if let Some(decision) = self.decision {
            state.decision = Some(decision);
        }
        if let Some(confidence) = self.confidence {
            state.confidence = Some(confidence);
        }
        if let Some(text) = self.explanation_customer {
            state.explanation_customer = Some(text);
        }
        if let Some(text) = self.explanation_audit {
            state.explanation_audit = Some(text);
        }
        if let Some(text) = self.ai_summary {
            state.ai_summary = Some(text);
        }
        if let Some(hitl) = self.hitl {
            state.hitl = hitl;
        }
    }
}

/// One unit of evidence accumulation in the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    async fn run(&self, state: &EvalState) -> Result<StagePartial, StageError>;
}
