//! # fraudgraph: ambiguous-fraud decision engine
//!
//! A deterministic, auditable multi-agent pipeline that evaluates one
//! financial transaction against its customer's behavioral profile and
//! produces one of four outcomes (APPROVE, CHALLENGE, BLOCK,
//! ESCALATE_TO_HUMAN) together with a fraud-risk score, machine-readable
//! citations, Spanish-language explanations and a complete per-stage audit
//! trail.
//!
//! ## Architecture
//!
//! The engine runs a fixed linear stage sequence over a shared
//! [`state::EvalState`]:
//!
//! ```text
//! Context → Behavior → PolicyRAG → ThreatIntel → EvidenceAggregation
//!        → DebateProFraud → DebateProCustomer → Arbiter
//!        → Explainability → HitlGate
//! ```
//!
//! Each stage returns a partial update that only grows the state; the
//! orchestrator ([`pipeline::DecisionEngine`]) merges partials, records one
//! audit event per stage with monotonically increasing sequence numbers, and
//! converts any stage failure into a safe ESCALATE_TO_HUMAN outcome; a run
//! never aborts halfway.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fraudgraph::audit::InMemoryAuditSink;
//! use fraudgraph::domain::{CustomerBehavior, Transaction, consolidate};
//! use fraudgraph::hitl::InMemoryHitlStore;
//! use fraudgraph::pipeline::{DecisionEngine, EngineDeps};
//! use fraudgraph::retrieval::{HashEmbedder, InMemoryPolicyIndex};
//! use fraudgraph::search::{Allowlist, GovernedSearch, MockSearchProvider};
//!
//! # async fn example(txn: Transaction, profile: CustomerBehavior) -> Result<(), Box<dyn std::error::Error>> {
//! let allowlist = Allowlist::new(["example.com", "owasp.org", "mitre.org"]);
//! let deps = EngineDeps::new(
//!     Arc::new(InMemoryPolicyIndex::new(Arc::new(HashEmbedder::default()))),
//!     GovernedSearch::new(Arc::new(MockSearchProvider::new(allowlist)), 3),
//!     Arc::new(InMemoryAuditSink::new()),
//!     Arc::new(InMemoryHitlStore::new()),
//! );
//! let engine = DecisionEngine::new(deps);
//!
//! let view = consolidate(Some(&txn), &txn.transaction_id, Some(&profile))?;
//! let response = engine.run_decision(view).await?;
//! println!("{} ({:.2})", response.decision, response.confidence);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module guide
//!
//! - [`domain`] - immutable inputs and the consolidation join
//! - [`state`] - the evaluation state, metrics record and response shape
//! - [`stages`] - the nine agents plus the HITL gate
//! - [`pipeline`] - the orchestrator, dependency wiring and HITL resolution
//! - [`audit`] - append-only audit events with monotonic sequence numbers
//! - [`hitl`] - human-review cases and their store contract
//! - [`storage`] - transaction/decision persistence (file and table backed)
//! - [`retrieval`] - the persistent policy vector index and embedders
//! - [`search`] - allowlist-governed external search
//! - [`llm`] - the optional reasoning-model contract for the debate
//! - [`config`] - environment-driven settings

pub mod audit;
pub mod config;
pub mod domain;
pub mod hitl;
pub mod llm;
pub mod pipeline;
pub mod retrieval;
pub mod search;
pub mod stages;
pub mod state;
pub mod storage;
