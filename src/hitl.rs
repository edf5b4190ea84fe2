//! Human-in-the-loop case storage.
//!
//! A case ties one pending human review to exactly one transaction. At most
//! one OPEN case may exist per transaction at any time, and a case is
//! resolved exactly once: after that its resolution fields are immutable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::state::Decision;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    Open,
    Resolved,
}

/// Reviewer outcome recorded when a case is closed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub decision: Decision,
    pub notes: String,
}

/// A pending or closed human-review record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HitlCase {
    pub case_id: String,
    pub transaction_id: String,
    pub status: CaseStatus,
    /// Short machine-readable tag, e.g. `"borderline_confidence"`.
    pub reason: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl HitlCase {
    /// New OPEN case with a fresh `HITL-` id.
    #[must_use]
    pub fn open(transaction_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            case_id: new_case_id(),
            transaction_id: transaction_id.into(),
            status: CaseStatus::Open,
            reason: reason.into(),
            created_at: Utc::now(),
            resolved_at: None,
            resolution: None,
        }
    }
}

fn new_case_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("HITL-{}", hex[..8].to_uppercase())
}

#[derive(Debug, Error, Diagnostic)]
pub enum HitlError {
    #[error("case not found: {case_id}")]
    #[diagnostic(code(fraudgraph::hitl::not_found))]
    CaseNotFound { case_id: String },

    #[error("transaction {transaction_id} already has open case {case_id}")]
    #[diagnostic(
        code(fraudgraph::hitl::duplicate_open),
        help("Resolve the existing case before opening another one.")
    )]
    DuplicateOpenCase {
        transaction_id: String,
        case_id: String,
    },

    #[error("case {case_id} is already resolved")]
    #[diagnostic(code(fraudgraph::hitl::already_resolved))]
    AlreadyResolved { case_id: String },

    #[error("hitl backend error: {message}")]
    #[diagnostic(code(fraudgraph::hitl::backend))]
    Backend { message: String },
}

/// Storage for HITL cases.
///
/// Implementations must enforce the one-OPEN-case-per-transaction invariant
/// by lookup-before-insert under the same lock (or a conditional write), and
/// must reject a second resolution of the same case.
#[async_trait]
pub trait HitlStore: Send + Sync {
    async fn create(&self, case: HitlCase) -> Result<(), HitlError>;

    async fn get(&self, case_id: &str) -> Result<Option<HitlCase>, HitlError>;

    /// Most recent case for the transaction regardless of status.
    async fn find_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<HitlCase>, HitlError>;

    /// The OPEN case for the transaction, if one exists.
    async fn find_open_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<HitlCase>, HitlError>;

    async fn list_open(&self) -> Result<Vec<HitlCase>, HitlError>;

    /// Close a case exactly once; returns the resolved case.
    async fn resolve(
        &self,
        case_id: &str,
        resolution: Resolution,
        resolved_at: DateTime<Utc>,
    ) -> Result<HitlCase, HitlError>;
}

/// Volatile in-process store for tests and local runs.
#[derive(Default)]
pub struct InMemoryHitlStore {
    cases: Mutex<Vec<HitlCase>>,
}

impl InMemoryHitlStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HitlStore for InMemoryHitlStore {
    async fn create(&self, case: HitlCase) -> Result<(), HitlError> {
        let mut cases = self.cases.lock();
        if let Some(existing) = cases
            .iter()
            .find(|c| c.transaction_id == case.transaction_id && c.status == CaseStatus::Open)
        {
            return Err(HitlError::DuplicateOpenCase {
                transaction_id: case.transaction_id,
                case_id: existing.case_id.clone(),
            });
        }
        cases.push(case);
        Ok(())
    }

    async fn get(&self, case_id: &str) -> Result<Option<HitlCase>, HitlError> {
        Ok(self
            .cases
            .lock()
            .iter()
            .find(|c| c.case_id == case_id)
            .cloned())
    }

    async fn find_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<HitlCase>, HitlError> {
        Ok(self
            .cases
            .lock()
            .iter()
            .rev()
            .find(|c| c.transaction_id == transaction_id)
            .cloned())
    }

    async fn find_open_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<HitlCase>, HitlError> {
        Ok(self
            .cases
            .lock()
            .iter()
            .find(|c| c.transaction_id == transaction_id && c.status == CaseStatus::Open)
            .cloned())
    }

    async fn list_open(&self) -> Result<Vec<HitlCase>, HitlError> {
        Ok(self
            .cases
            .lock()
            .iter()
            .filter(|c| c.status == CaseStatus::Open)
            .cloned()
            .collect())
    }

    async fn resolve(
        &self,
        case_id: &str,
        resolution: Resolution,
        resolved_at: DateTime<Utc>,
    ) -> Result<HitlCase, HitlError> {
        let mut cases = self.cases.lock();
        let case = cases
            .iter_mut()
            .find(|c| c.case_id == case_id)
            .ok_or_else(|| HitlError::CaseNotFound {
                case_id: case_id.to_string(),
            })?;
        if case.status == CaseStatus::Resolved {
            return Err(HitlError::AlreadyResolved {
                case_id: case_id.to_string(),
            });
        }
        case.status = CaseStatus::Resolved;
        case.resolution = Some(resolution);
        case.resolved_at = Some(resolved_at);
        Ok(case.clone())
    }
}
