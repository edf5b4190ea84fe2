//! Table-backed reference implementation of the storage contracts.
//!
//! Single-table design over SQLite: every record lives in `records`, keyed
//! by partition key + sort key. Audit events use the sort key
//! `ts#<rfc3339>#seq#<6-digit>#agent#<name>`; plain records use `"#"`.
//! The invariants that the file backend guards with an advisory lock are
//! enforced here with conditional writes inside transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;

use crate::audit::{AuditError, AuditEvent, AuditSink};
use crate::domain::{CustomerBehavior, Transaction};
use crate::hitl::{CaseStatus, HitlCase, HitlError, HitlStore, Resolution};
use crate::state::DecisionResponse;

use super::{StorageError, TransactionStore, TransactionSummary};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    pk             TEXT NOT NULL,
    sk             TEXT NOT NULL,
    entity_type    TEXT NOT NULL,
    transaction_id TEXT,
    status         TEXT,
    seq            INTEGER,
    body           TEXT NOT NULL,
    PRIMARY KEY (pk, sk)
);
CREATE INDEX IF NOT EXISTS idx_records_txn
    ON records(entity_type, transaction_id);
CREATE INDEX IF NOT EXISTS idx_records_status
    ON records(entity_type, status);
";

const PLAIN_SK: &str = "#";

/// Sort key for one audit event.
fn audit_sort_key(event: &AuditEvent) -> String {
    format!(
        "ts#{}#seq#{:06}#agent#{}",
        event.ts.to_rfc3339(),
        event.seq,
        event.agent
    )
}

pub struct TableStore {
    pool: SqlitePool,
}

impl TableStore {
    /// Connect to (and create) the backing database, applying the schema.
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::backend)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(StorageError::backend)?;
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(StorageError::backend)?;
        Ok(Self { pool })
    }

    async fn put_plain<T: Serialize>(
        &self,
        entity_type: &str,
        pk: &str,
        transaction_id: Option<&str>,
        status: Option<&str>,
        value: &T,
    ) -> Result<(), StorageError> {
        let body = serde_json::to_string(value).map_err(StorageError::malformed)?;
        sqlx::query(
            "INSERT INTO records (pk, sk, entity_type, transaction_id, status, seq, body) \
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6) \
             ON CONFLICT (pk, sk) DO UPDATE SET \
                 entity_type = excluded.entity_type, \
                 transaction_id = excluded.transaction_id, \
                 status = excluded.status, \
                 body = excluded.body",
        )
        .bind(pk)
        .bind(PLAIN_SK)
        .bind(entity_type)
        .bind(transaction_id)
        .bind(status)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(StorageError::backend)?;
        Ok(())
    }

    async fn get_plain<T: DeserializeOwned>(
        &self,
        entity_type: &str,
        pk: &str,
    ) -> Result<Option<T>, StorageError> {
        let row = sqlx::query(
            "SELECT body FROM records WHERE pk = ?1 AND sk = ?2 AND entity_type = ?3",
        )
        .bind(pk)
        .bind(PLAIN_SK)
        .bind(entity_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::backend)?;
        row.map(|row| {
            let body: String = row.get("body");
            serde_json::from_str(&body).map_err(StorageError::malformed)
        })
        .transpose()
    }
}

#[async_trait]
impl TransactionStore for TableStore {
    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), StorageError> {
        self.put_plain(
            "transaction",
            &transaction.transaction_id,
            Some(&transaction.transaction_id),
            None,
            transaction,
        )
        .await
    }

    async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, StorageError> {
        self.get_plain("transaction", transaction_id).await
    }

    async fn save_behavior(&self, profile: &CustomerBehavior) -> Result<(), StorageError> {
        self.put_plain("customer", &profile.customer_id, None, None, profile)
            .await
    }

    async fn get_behavior(
        &self,
        customer_id: &str,
    ) -> Result<Option<CustomerBehavior>, StorageError> {
        self.get_plain("customer", customer_id).await
    }

    async fn save_decision(
        &self,
        transaction_id: &str,
        decision: &DecisionResponse,
    ) -> Result<(), StorageError> {
        self.put_plain(
            "decision",
            &format!("decision#{transaction_id}"),
            Some(transaction_id),
            None,
            decision,
        )
        .await
    }

    async fn get_decision(
        &self,
        transaction_id: &str,
    ) -> Result<Option<DecisionResponse>, StorageError> {
        self.get_plain("decision", &format!("decision#{transaction_id}"))
            .await
    }

    async fn list_summaries(&self) -> Result<Vec<TransactionSummary>, StorageError> {
        let rows = sqlx::query(
            "SELECT t.body AS txn_body, d.body AS decision_body \
             FROM records t \
             LEFT JOIN records d \
               ON d.entity_type = 'decision' AND d.transaction_id = t.transaction_id \
             WHERE t.entity_type = 'transaction' \
             ORDER BY t.pk",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::backend)?;
        rows.into_iter()
            .map(|row| {
                let txn_body: String = row.get("txn_body");
                let txn: Transaction =
                    serde_json::from_str(&txn_body).map_err(StorageError::malformed)?;
                let decision: Option<DecisionResponse> = row
                    .get::<Option<String>, _>("decision_body")
                    .map(|body| serde_json::from_str(&body).map_err(StorageError::malformed))
                    .transpose()?;
                Ok(TransactionSummary {
                    transaction_id: txn.transaction_id,
                    customer_id: txn.customer_id,
                    amount: txn.amount,
                    currency: txn.currency,
                    timestamp: txn.timestamp,
                    decision: decision.as_ref().map(|d| d.decision),
                    confidence: decision.as_ref().map(|d| d.confidence),
                })
            })
            .collect()
    }
}

fn audit_backend(err: impl std::fmt::Display) -> AuditError {
    AuditError::Backend {
        message: err.to_string(),
    }
}

#[async_trait]
impl AuditSink for TableStore {
    async fn append(&self, event: AuditEvent) -> Result<(), AuditError> {
        let body = serde_json::to_string(&event).map_err(|e| AuditError::Malformed {
            message: e.to_string(),
        })?;
        sqlx::query(
            "INSERT INTO records (pk, sk, entity_type, transaction_id, status, seq, body) \
             VALUES (?1, ?2, 'audit', ?3, NULL, ?4, ?5)",
        )
        .bind(&event.transaction_id)
        .bind(audit_sort_key(&event))
        .bind(&event.transaction_id)
        .bind(event.seq as i64)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(audit_backend)?;
        Ok(())
    }

    async fn events(&self, transaction_id: &str) -> Result<Vec<AuditEvent>, AuditError> {
        let rows = sqlx::query(
            "SELECT body FROM records \
             WHERE entity_type = 'audit' AND transaction_id = ?1 \
             ORDER BY seq ASC",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await
        .map_err(audit_backend)?;
        rows.into_iter()
            .map(|row| {
                let body: String = row.get("body");
                serde_json::from_str(&body).map_err(|e| AuditError::Malformed {
                    message: e.to_string(),
                })
            })
            .collect()
    }

    async fn next_seq(&self, transaction_id: &str) -> Result<u64, AuditError> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(seq), 0) AS max_seq FROM records \
             WHERE entity_type = 'audit' AND transaction_id = ?1",
        )
        .bind(transaction_id)
        .fetch_one(&self.pool)
        .await
        .map_err(audit_backend)?;
        let max_seq: i64 = row.get("max_seq");
        Ok(max_seq as u64 + 1)
    }
}

fn hitl_backend(err: impl std::fmt::Display) -> HitlError {
    HitlError::Backend {
        message: err.to_string(),
    }
}

fn case_status(status: CaseStatus) -> &'static str {
    match status {
        CaseStatus::Open => "OPEN",
        CaseStatus::Resolved => "RESOLVED",
    }
}

fn parse_case(body: &str) -> Result<HitlCase, HitlError> {
    serde_json::from_str(body).map_err(hitl_backend)
}

#[async_trait]
impl HitlStore for TableStore {
    async fn create(&self, case: HitlCase) -> Result<(), HitlError> {
        let body = serde_json::to_string(&case).map_err(hitl_backend)?;
        // Conditional insert: the row only lands if no OPEN case exists for
        // the transaction.
        let result = sqlx::query(
            "INSERT INTO records (pk, sk, entity_type, transaction_id, status, seq, body) \
             SELECT ?1, ?2, 'hitl_case', ?3, ?4, NULL, ?5 \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM records \
                 WHERE entity_type = 'hitl_case' \
                   AND transaction_id = ?3 AND status = 'OPEN')",
        )
        .bind(&case.case_id)
        .bind(PLAIN_SK)
        .bind(&case.transaction_id)
        .bind(case_status(case.status))
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(hitl_backend)?;
        if result.rows_affected() == 0 {
            let existing = self
                .find_open_by_transaction(&case.transaction_id)
                .await?
                .map(|c| c.case_id)
                .unwrap_or_default();
            return Err(HitlError::DuplicateOpenCase {
                transaction_id: case.transaction_id,
                case_id: existing,
            });
        }
        Ok(())
    }

    async fn get(&self, case_id: &str) -> Result<Option<HitlCase>, HitlError> {
        let row = sqlx::query(
            "SELECT body FROM records \
             WHERE entity_type = 'hitl_case' AND pk = ?1",
        )
        .bind(case_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(hitl_backend)?;
        row.map(|row| parse_case(&row.get::<String, _>("body"))).transpose()
    }

    async fn find_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<HitlCase>, HitlError> {
        let row = sqlx::query(
            "SELECT body FROM records \
             WHERE entity_type = 'hitl_case' AND transaction_id = ?1 \
             ORDER BY rowid DESC LIMIT 1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(hitl_backend)?;
        row.map(|row| parse_case(&row.get::<String, _>("body"))).transpose()
    }

    async fn find_open_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<HitlCase>, HitlError> {
        let row = sqlx::query(
            "SELECT body FROM records \
             WHERE entity_type = 'hitl_case' \
               AND transaction_id = ?1 AND status = 'OPEN'",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(hitl_backend)?;
        row.map(|row| parse_case(&row.get::<String, _>("body"))).transpose()
    }

    async fn list_open(&self) -> Result<Vec<HitlCase>, HitlError> {
        let rows = sqlx::query(
            "SELECT body FROM records \
             WHERE entity_type = 'hitl_case' AND status = 'OPEN' \
             ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(hitl_backend)?;
        rows.into_iter()
            .map(|row| parse_case(&row.get::<String, _>("body")))
            .collect()
    }

    async fn resolve(
        &self,
        case_id: &str,
        resolution: Resolution,
        resolved_at: DateTime<Utc>,
    ) -> Result<HitlCase, HitlError> {
        let mut case = self
            .get(case_id)
            .await?
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
        let body = serde_json::to_string(&case).map_err(hitl_backend)?;
        // Conditional update: only an OPEN row transitions. A concurrent
        // resolver losing the race sees zero rows affected.
        let result = sqlx::query(
            "UPDATE records SET status = 'RESOLVED', body = ?1 \
             WHERE entity_type = 'hitl_case' AND pk = ?2 AND status = 'OPEN'",
        )
        .bind(body)
        .bind(case_id)
        .execute(&self.pool)
        .await
        .map_err(hitl_backend)?;
        if result.rows_affected() == 0 {
            return Err(HitlError::AlreadyResolved {
                case_id: case_id.to_string(),
            });
        }
        Ok(case)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Decision, HitlFlag};

    async fn open_store(dir: &tempfile::TempDir) -> TableStore {
        let url = format!("sqlite://{}", dir.path().join("state.db").display());
        TableStore::connect(&url).await.unwrap()
    }

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

    fn event(txn_id: &str, seq: u64) -> AuditEvent {
        AuditEvent {
            transaction_id: txn_id.into(),
            run_id: "r".into(),
            seq,
            ts: Utc::now(),
            duration_ms: 0.1,
            agent: "Arbiter".into(),
            input_summary: String::new(),
            output_summary: String::new(),
            output_json: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn records_round_trip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.save_transaction(&txn("T-1")).await.unwrap();
        assert_eq!(
            store.get_transaction("T-1").await.unwrap(),
            Some(txn("T-1"))
        );

        let decision = DecisionResponse {
            decision: Decision::Challenge,
            confidence: 0.5,
            signals: vec![],
            citations_internal: vec![],
            citations_external: vec![],
            explanation_customer: "a".into(),
            explanation_audit: "b".into(),
            ai_summary: "c".into(),
            hitl: HitlFlag::default(),
        };
        store.save_decision("T-1", &decision).await.unwrap();
        let overwritten = DecisionResponse {
            decision: Decision::Approve,
            ..decision
        };
        store.save_decision("T-1", &overwritten).await.unwrap();
        assert_eq!(
            store.get_decision("T-1").await.unwrap().unwrap().decision,
            Decision::Approve
        );

        let summaries = store.list_summaries().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].decision, Some(Decision::Approve));
    }

    #[tokio::test]
    async fn audit_seq_is_monotonic_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.append(event("T-1", 1)).await.unwrap();
        store.append(event("T-1", 2)).await.unwrap();
        let other = open_store(&dir).await;
        assert_eq!(other.next_seq("T-1").await.unwrap(), 3);
        assert_eq!(other.events("T-1").await.unwrap().len(), 2);
        assert_eq!(other.next_seq("T-2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn conditional_insert_enforces_one_open_case() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let case = HitlCase::open("T-1", "borderline_confidence");
        let case_id = case.case_id.clone();
        store.create(case).await.unwrap();
        assert!(matches!(
            store.create(HitlCase::open("T-1", "x")).await,
            Err(HitlError::DuplicateOpenCase { .. })
        ));
        let resolved = store
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
        assert_eq!(resolved.status, CaseStatus::Resolved);
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
        // The slot is free again for a new case.
        store.create(HitlCase::open("T-1", "y")).await.unwrap();
    }
}
