//! Append-only audit trail for pipeline runs.
//!
//! Every stage execution emits exactly one [`AuditEvent`]. For a given
//! transaction, `seq` starts at 1 and increases strictly, across runs too:
//! [`AuditSink::next_seq`] always returns a value greater than the maximum
//! ever recorded for that transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One recorded stage execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub transaction_id: String,
    /// Unique per pipeline invocation.
    pub run_id: String,
    /// Per-transaction monotonically increasing, `>= 1`.
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub duration_ms: f64,
    /// Stage name, suffixed `_error` when the stage failed.
    pub agent: String,
    pub input_summary: String,
    pub output_summary: String,
    /// Schemaless structured snapshot of the stage outcome.
    pub output_json: serde_json::Value,
}

impl AuditEvent {
    /// Whether this event records a stage failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.agent.ends_with("_error")
    }
}

/// Errors from audit sink operations.
#[derive(Debug, Error, Diagnostic)]
pub enum AuditError {
    #[error("audit backend error: {message}")]
    #[diagnostic(
        code(fraudgraph::audit::backend),
        help("Check audit store connectivity and permissions.")
    )]
    Backend { message: String },

    #[error("audit event malformed: {message}")]
    #[diagnostic(code(fraudgraph::audit::malformed))]
    Malformed { message: String },
}

/// Append-only, per-transaction event log with a monotonic sequence.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one event. Appends are never rewritten.
    async fn append(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// All events for a transaction, sorted by `seq`.
    async fn events(&self, transaction_id: &str) -> Result<Vec<AuditEvent>, AuditError>;

    /// Next sequence number: strictly greater than the maximum `seq` ever
    /// recorded for this transaction, `1` for an unseen transaction.
    async fn next_seq(&self, transaction_id: &str) -> Result<u64, AuditError>;
}

/// Volatile in-process sink for tests and local runs.
#[derive(Default)]
pub struct InMemoryAuditSink {
    inner: Mutex<FxHashMap<String, Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut map = self.inner.lock();
        map.entry(event.transaction_id.clone())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn events(&self, transaction_id: &str) -> Result<Vec<AuditEvent>, AuditError> {
        let map = self.inner.lock();
        let mut events = map.get(transaction_id).cloned().unwrap_or_default();
        events.sort_by_key(|e| e.seq);
        Ok(events)
    }

    async fn next_seq(&self, transaction_id: &str) -> Result<u64, AuditError> {
        let map = self.inner.lock();
        Ok(map
            .get(transaction_id)
            .and_then(|events| events.iter().map(|e| e.seq).max())
            .map_or(1, |max| max + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(txn: &str, seq: u64, agent: &str) -> AuditEvent {
        AuditEvent {
            transaction_id: txn.to_string(),
            run_id: "run-1".into(),
            seq,
            ts: Utc::now(),
            duration_ms: 1.0,
            agent: agent.into(),
            input_summary: "signals=0, metrics_keys=[]".into(),
            output_summary: "signals=0".into(),
            output_json: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn next_seq_starts_at_one_and_tracks_the_max() {
        let sink = InMemoryAuditSink::new();
        assert_eq!(sink.next_seq("T-1").await.unwrap(), 1);
        sink.append(event("T-1", 1, "TransactionContext")).await.unwrap();
        sink.append(event("T-1", 7, "Arbiter")).await.unwrap();
        assert_eq!(sink.next_seq("T-1").await.unwrap(), 8);
        assert_eq!(sink.next_seq("T-2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn events_come_back_sorted_by_seq() {
        let sink = InMemoryAuditSink::new();
        sink.append(event("T-1", 2, "BehavioralPattern")).await.unwrap();
        sink.append(event("T-1", 1, "TransactionContext")).await.unwrap();
        let events = sink.events("T-1").await.unwrap();
        assert_eq!(
            events.iter().map(|e| e.seq).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn error_suffix_is_detected() {
        assert!(event("T-1", 1, "PolicyRAG_error").is_error());
        assert!(!event("T-1", 1, "PolicyRAG").is_error());
    }
}
