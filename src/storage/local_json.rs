//! File-backed reference implementation of the storage contracts.
//!
//! Layout under the state directory:
//! - `transactions_index.json`, `customers_index.json`,
//!   `decisions_index.json` - one JSON map per record kind
//! - `hitl_cases.json` - case list
//! - `audit/<transaction_id>.jsonl` - one append-only event log per
//!   transaction
//!
//! Every append and read-modify-write runs under a cross-process advisory
//! lock (`<file>.lock`), so concurrent engine processes sharing a state
//! directory keep the seq and single-open-case invariants.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs4::FileExt;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::instrument;

use crate::audit::{AuditError, AuditEvent, AuditSink};
use crate::domain::{CustomerBehavior, Transaction};
use crate::hitl::{CaseStatus, HitlCase, HitlError, HitlStore, Resolution};
use crate::state::DecisionResponse;

use super::{StorageError, TransactionStore, TransactionSummary};

pub struct LocalJsonStore {
    transactions_file: PathBuf,
    customers_file: PathBuf,
    decisions_file: PathBuf,
    cases_file: PathBuf,
    audit_dir: PathBuf,
}

impl LocalJsonStore {
    /// Open (and create) the state directory.
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let state_dir = state_dir.as_ref().to_path_buf();
        let audit_dir = state_dir.join("audit");
        fs::create_dir_all(&audit_dir).map_err(StorageError::backend)?;
        Ok(Self {
            transactions_file: state_dir.join("transactions_index.json"),
            customers_file: state_dir.join("customers_index.json"),
            decisions_file: state_dir.join("decisions_index.json"),
            cases_file: state_dir.join("hitl_cases.json"),
            audit_dir,
        })
    }

    fn audit_file(&self, transaction_id: &str) -> PathBuf {
        self.audit_dir.join(format!("{transaction_id}.jsonl"))
    }
}

/// Run `body` while holding the advisory lock for `path`.
fn locked<T, E>(
    path: &Path,
    map_err: impl Fn(String) -> E,
    body: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    let mut lock_path = OsString::from(path.as_os_str());
    lock_path.push(".lock");
    let lock_file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| map_err(e.to_string()))?;
    lock_file
        .lock_exclusive()
        .map_err(|e| map_err(e.to_string()))?;
    let result = body();
    let _ = lock_file.unlock();
    result
}

fn read_map<T: DeserializeOwned>(path: &Path) -> Result<FxHashMap<String, T>, StorageError> {
    if !path.exists() {
        return Ok(FxHashMap::default());
    }
    let raw = fs::read_to_string(path).map_err(StorageError::backend)?;
    if raw.trim().is_empty() {
        return Ok(FxHashMap::default());
    }
    serde_json::from_str(&raw).map_err(StorageError::malformed)
}

fn write_map<T: Serialize>(path: &Path, map: &FxHashMap<String, T>) -> Result<(), StorageError> {
    let raw = serde_json::to_string_pretty(map).map_err(StorageError::malformed)?;
    fs::write(path, raw).map_err(StorageError::backend)
}

fn upsert_record<T: Serialize + DeserializeOwned>(
    path: &Path,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    locked(path, |m| StorageError::Backend { message: m }, || {
        let mut map: FxHashMap<String, serde_json::Value> = read_map(path)?;
        map.insert(
            key.to_string(),
            serde_json::to_value(value).map_err(StorageError::malformed)?,
        );
        write_map(path, &map)
    })
}

fn read_record<T: DeserializeOwned>(path: &Path, key: &str) -> Result<Option<T>, StorageError> {
    locked(path, |m| StorageError::Backend { message: m }, || {
        let map: FxHashMap<String, serde_json::Value> = read_map(path)?;
        map.get(key)
            .cloned()
            .map(|value| serde_json::from_value(value).map_err(StorageError::malformed))
            .transpose()
    })
}

#[async_trait]
impl TransactionStore for LocalJsonStore {
    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), StorageError> {
        upsert_record(
            &self.transactions_file,
            &transaction.transaction_id,
            transaction,
        )
    }

    async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, StorageError> {
        read_record(&self.transactions_file, transaction_id)
    }

    async fn save_behavior(&self, profile: &CustomerBehavior) -> Result<(), StorageError> {
        upsert_record(&self.customers_file, &profile.customer_id, profile)
    }

    async fn get_behavior(
        &self,
        customer_id: &str,
    ) -> Result<Option<CustomerBehavior>, StorageError> {
        read_record(&self.customers_file, customer_id)
    }

    async fn save_decision(
        &self,
        transaction_id: &str,
        decision: &DecisionResponse,
    ) -> Result<(), StorageError> {
        upsert_record(&self.decisions_file, transaction_id, decision)
    }

    async fn get_decision(
        &self,
        transaction_id: &str,
    ) -> Result<Option<DecisionResponse>, StorageError> {
        read_record(&self.decisions_file, transaction_id)
    }

    #[instrument(skip(self), err)]
    async fn list_summaries(&self) -> Result<Vec<TransactionSummary>, StorageError> {
        let transactions: FxHashMap<String, Transaction> =
            locked(
                &self.transactions_file,
                |m| StorageError::Backend { message: m },
                || read_map(&self.transactions_file),
            )?;
        let decisions: FxHashMap<String, DecisionResponse> = locked(
            &self.decisions_file,
            |m| StorageError::Backend { message: m },
            || read_map(&self.decisions_file),
        )?;
        let mut summaries: Vec<TransactionSummary> = transactions
            .values()
            .map(|txn| {
                let decision = decisions.get(&txn.transaction_id);
                TransactionSummary {
                    transaction_id: txn.transaction_id.clone(),
                    customer_id: txn.customer_id.clone(),
                    amount: txn.amount,
                    currency: txn.currency.clone(),
                    timestamp: txn.timestamp.clone(),
                    decision: decision.map(|d| d.decision),
                    confidence: decision.map(|d| d.confidence),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.transaction_id.cmp(&b.transaction_id));
        Ok(summaries)
    }
}

fn audit_backend(message: String) -> AuditError {
    AuditError::Backend { message }
}

fn read_events(path: &Path) -> Result<Vec<AuditEvent>, AuditError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path).map_err(|e| audit_backend(e.to_string()))?;
    let mut events = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        events.push(
            serde_json::from_str(line).map_err(|e| AuditError::Malformed {
                message: e.to_string(),
            })?,
        );
    }
    events.sort_by_key(|e: &AuditEvent| e.seq);
    Ok(events)
}

#[async_trait]
impl AuditSink for LocalJsonStore {
    async fn append(&self, event: AuditEvent) -> Result<(), AuditError> {
        let path = self.audit_file(&event.transaction_id);
        locked(&path, audit_backend, || {
            let line = serde_json::to_string(&event).map_err(|e| AuditError::Malformed {
                message: e.to_string(),
            })?;
            use std::io::Write;
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| audit_backend(e.to_string()))?;
            writeln!(file, "{line}").map_err(|e| audit_backend(e.to_string()))
        })
    }

    async fn events(&self, transaction_id: &str) -> Result<Vec<AuditEvent>, AuditError> {
        let path = self.audit_file(transaction_id);
        locked(&path, audit_backend, || read_events(&path))
    }

    async fn next_seq(&self, transaction_id: &str) -> Result<u64, AuditError> {
        let path = self.audit_file(transaction_id);
        locked(&path, audit_backend, || {
            let events = read_events(&path)?;
            Ok(events.iter().map(|e| e.seq).max().map_or(1, |max| max + 1))
        })
    }
}

fn hitl_backend(message: String) -> HitlError {
    HitlError::Backend { message }
}

fn read_cases(path: &Path) -> Result<Vec<HitlCase>, HitlError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path).map_err(|e| hitl_backend(e.to_string()))?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw).map_err(|e| hitl_backend(e.to_string()))
}

fn write_cases(path: &Path, cases: &[HitlCase]) -> Result<(), HitlError> {
    let raw = serde_json::to_string_pretty(cases).map_err(|e| hitl_backend(e.to_string()))?;
    fs::write(path, raw).map_err(|e| hitl_backend(e.to_string()))
}

#[async_trait]
impl HitlStore for LocalJsonStore {
    async fn create(&self, case: HitlCase) -> Result<(), HitlError> {
        locked(&self.cases_file, hitl_backend, || {
            let mut cases = read_cases(&self.cases_file)?;
            if let Some(existing) = cases
                .iter()
                .find(|c| c.transaction_id == case.transaction_id && c.status == CaseStatus::Open)
            {
                return Err(HitlError::DuplicateOpenCase {
                    transaction_id: case.transaction_id.clone(),
                    case_id: existing.case_id.clone(),
                });
            }
            cases.push(case);
            write_cases(&self.cases_file, &cases)
        })
    }

    async fn get(&self, case_id: &str) -> Result<Option<HitlCase>, HitlError> {
        locked(&self.cases_file, hitl_backend, || {
            Ok(read_cases(&self.cases_file)?
                .into_iter()
                .find(|c| c.case_id == case_id))
        })
    }

    async fn find_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<HitlCase>, HitlError> {
        locked(&self.cases_file, hitl_backend, || {
            Ok(read_cases(&self.cases_file)?
                .into_iter()
                .rev()
                .find(|c| c.transaction_id == transaction_id))
        })
    }

    async fn find_open_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<HitlCase>, HitlError> {
        locked(&self.cases_file, hitl_backend, || {
            Ok(read_cases(&self.cases_file)?
                .into_iter()
                .find(|c| c.transaction_id == transaction_id && c.status == CaseStatus::Open))
        })
    }

    async fn list_open(&self) -> Result<Vec<HitlCase>, HitlError> {
        locked(&self.cases_file, hitl_backend, || {
            Ok(read_cases(&self.cases_file)?
                .into_iter()
                .filter(|c| c.status == CaseStatus::Open)
                .collect())
        })
    }

    async fn resolve(
        &self,
        case_id: &str,
        resolution: Resolution,
        resolved_at: DateTime<Utc>,
    ) -> Result<HitlCase, HitlError> {
        locked(&self.cases_file, hitl_backend, || {
            let mut cases = read_cases(&self.cases_file)?;
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
            let resolved = case.clone();
            write_cases(&self.cases_file, &cases)?;
            Ok(resolved)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Decision, HitlFlag};

    fn txn(id: &str) -> Transaction {
        Transaction {
            transaction_id: id.into(),
            customer_id: "C-1".into(),
            amount: 500.0,
            currency: "PEN".into(),
            country: "PE".into(),
            channel: "web".into(),
            device_id: "D-1".into(),
            timestamp: "2025-03-01T10:00:00Z".into(),
            merchant_id: "M-1".into(),
        }
    }

    fn decision(outcome: Decision) -> DecisionResponse {
        DecisionResponse {
            decision: outcome,
            confidence: 0.25,
            signals: vec![],
            citations_internal: vec![],
            citations_external: vec![],
            explanation_customer: "ok".into(),
            explanation_audit: "ok".into(),
            ai_summary: "ok".into(),
            hitl: HitlFlag::default(),
        }
    }

    #[tokio::test]
    async fn transaction_and_decision_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalJsonStore::open(dir.path()).unwrap();
        store.save_transaction(&txn("T-1")).await.unwrap();
        store
            .save_decision("T-1", &decision(Decision::Approve))
            .await
            .unwrap();

        // A second handle on the same directory sees the same records.
        let other = LocalJsonStore::open(dir.path()).unwrap();
        assert_eq!(other.get_transaction("T-1").await.unwrap(), Some(txn("T-1")));
        let stored = other.get_decision("T-1").await.unwrap().unwrap();
        assert_eq!(stored.decision, Decision::Approve);
    }

    #[tokio::test]
    async fn summaries_join_transactions_with_decisions() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalJsonStore::open(dir.path()).unwrap();
        store.save_transaction(&txn("T-1")).await.unwrap();
        store.save_transaction(&txn("T-2")).await.unwrap();
        store
            .save_decision("T-1", &decision(Decision::Challenge))
            .await
            .unwrap();

        let summaries = store.list_summaries().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].transaction_id, "T-1");
        assert_eq!(summaries[0].decision, Some(Decision::Challenge));
        assert_eq!(summaries[1].decision, None);
    }

    #[tokio::test]
    async fn audit_log_survives_reopen_and_keeps_seq_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        {
            let sink = LocalJsonStore::open(dir.path()).unwrap();
            for seq in 1..=3 {
                sink.append(AuditEvent {
                    transaction_id: "T-1".into(),
                    run_id: "r".into(),
                    seq,
                    ts: Utc::now(),
                    duration_ms: 0.5,
                    agent: "TransactionContext".into(),
                    input_summary: String::new(),
                    output_summary: String::new(),
                    output_json: serde_json::json!({}),
                })
                .await
                .unwrap();
            }
        }
        let sink = LocalJsonStore::open(dir.path()).unwrap();
        assert_eq!(sink.next_seq("T-1").await.unwrap(), 4);
        assert_eq!(sink.events("T-1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn hitl_invariants_hold_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalJsonStore::open(dir.path()).unwrap();
        let case = HitlCase::open("T-9", "borderline_confidence");
        let case_id = case.case_id.clone();
        store.create(case).await.unwrap();
        assert!(matches!(
            store.create(HitlCase::open("T-9", "x")).await,
            Err(HitlError::DuplicateOpenCase { .. })
        ));
        store
            .resolve(
                &case_id,
                Resolution {
                    decision: Decision::Approve,
                    notes: "ok".into(),
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(matches!(
            store
                .resolve(
                    &case_id,
                    Resolution {
                        decision: Decision::Block,
                        notes: String::new(),
                    },
                    Utc::now(),
                )
                .await,
            Err(HitlError::AlreadyResolved { .. })
        ));
    }
}
