//! Storage contracts for transactions, decisions and behavior profiles.
//!
//! Two reference implementations exist: [`local_json`] (JSON index files and
//! one JSONL per transaction for audit, behind a cross-process advisory
//! lock) and [`table`] (a SQLite single-table design with conditional
//! updates inside transactions). Both also back the audit sink and HITL
//! store contracts.

pub mod local_json;
pub mod table;

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{CustomerBehavior, Transaction};
use crate::state::{Decision, DecisionResponse};

pub use local_json::LocalJsonStore;
pub use table::TableStore;

/// One row of the transaction listing, joined with its stored decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub transaction_id: String,
    pub customer_id: String,
    pub amount: f64,
    pub currency: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    #[error("storage backend error: {message}")]
    #[diagnostic(
        code(fraudgraph::storage::backend),
        help("Check the storage path or database connectivity.")
    )]
    Backend { message: String },

    #[error("stored record malformed: {message}")]
    #[diagnostic(code(fraudgraph::storage::malformed))]
    Malformed { message: String },
}

impl StorageError {
    pub(crate) fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend {
            message: err.to_string(),
        }
    }

    pub(crate) fn malformed(err: impl std::fmt::Display) -> Self {
        Self::Malformed {
            message: err.to_string(),
        }
    }
}

/// Persistence for the ingested inputs and the produced decisions.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), StorageError>;

    async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, StorageError>;

    async fn save_behavior(&self, profile: &CustomerBehavior) -> Result<(), StorageError>;

    async fn get_behavior(
        &self,
        customer_id: &str,
    ) -> Result<Option<CustomerBehavior>, StorageError>;

    /// Save or overwrite the decision for a transaction. HITL resolution
    /// overwrites through this same call.
    async fn save_decision(
        &self,
        transaction_id: &str,
        decision: &DecisionResponse,
    ) -> Result<(), StorageError>;

    async fn get_decision(
        &self,
        transaction_id: &str,
    ) -> Result<Option<DecisionResponse>, StorageError>;

    async fn list_summaries(&self) -> Result<Vec<TransactionSummary>, StorageError>;
}

/// Volatile in-process store for tests and local runs.
#[derive(Default)]
pub struct InMemoryTransactionStore {
    transactions: Mutex<FxHashMap<String, Transaction>>,
    behaviors: Mutex<FxHashMap<String, CustomerBehavior>>,
    decisions: Mutex<FxHashMap<String, DecisionResponse>>,
}

impl InMemoryTransactionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), StorageError> {
        self.transactions
            .lock()
            .insert(transaction.transaction_id.clone(), transaction.clone());
        Ok(())
    }

    async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, StorageError> {
        Ok(self.transactions.lock().get(transaction_id).cloned())
    }

    async fn save_behavior(&self, profile: &CustomerBehavior) -> Result<(), StorageError> {
        self.behaviors
            .lock()
            .insert(profile.customer_id.clone(), profile.clone());
        Ok(())
    }

    async fn get_behavior(
        &self,
        customer_id: &str,
    ) -> Result<Option<CustomerBehavior>, StorageError> {
        Ok(self.behaviors.lock().get(customer_id).cloned())
    }

    async fn save_decision(
        &self,
        transaction_id: &str,
        decision: &DecisionResponse,
    ) -> Result<(), StorageError> {
        self.decisions
            .lock()
            .insert(transaction_id.to_string(), decision.clone());
        Ok(())
    }

    async fn get_decision(
        &self,
        transaction_id: &str,
    ) -> Result<Option<DecisionResponse>, StorageError> {
        Ok(self.decisions.lock().get(transaction_id).cloned())
    }

    async fn list_summaries(&self) -> Result<Vec<TransactionSummary>, StorageError> {
        let transactions = self.transactions.lock();
        let decisions = self.decisions.lock();
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
