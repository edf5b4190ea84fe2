//! Immutable domain records and the consolidation join.
//!
//! A [`Transaction`] and its [`CustomerBehavior`] profile are ingested once
//! and read-only thereafter. [`consolidate`] joins the two into a
//! [`ConsolidatedView`], the sole input the decision pipeline sees.

use chrono::DateTime;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single financial transaction under evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub customer_id: String,
    /// Non-negative amount in `currency` units.
    pub amount: f64,
    pub currency: String,
    /// ISO-ish country code, e.g. `"PE"`.
    pub country: String,
    pub channel: String,
    pub device_id: String,
    /// ISO-8601 timestamp of the transaction.
    pub timestamp: String,
    pub merchant_id: String,
}

/// Historical behavior profile for one customer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomerBehavior {
    pub customer_id: String,
    /// Average historical amount, `>= 0`.
    pub usual_amount_avg: f64,
    /// Usual active window encoded as `"HH-HH"`.
    pub usual_hours: String,
    pub usual_countries: Vec<String>,
    pub usual_devices: Vec<String>,
}

/// One fraud policy rule as indexed for retrieval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FraudPolicy {
    pub policy_id: String,
    pub version: String,
    /// Free-text rule body; decision keywords in the text drive hinting.
    pub rule: String,
}

/// Inclusive hour-of-day window parsed from `"HH-HH"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsualHours {
    pub start: u8,
    pub end: u8,
}

impl UsualHours {
    /// Parse an `"HH-HH"` window. Malformed input falls back to business
    /// hours (08–20) rather than failing the whole profile.
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split('-');
        let start = parts.next().and_then(|p| p.trim().parse::<u8>().ok());
        let end = parts.next().and_then(|p| p.trim().parse::<u8>().ok());
        match (start, end) {
            (Some(start), Some(end)) if start <= 23 && end <= 23 => Self { start, end },
            _ => Self { start: 8, end: 20 },
        }
    }

    /// Whether `hour` falls outside the usual window.
    #[must_use]
    pub fn is_outside(&self, hour: u8) -> bool {
        hour < self.start || hour > self.end
    }
}

/// A transaction joined with its customer's behavior profile.
///
/// This is the read-only input threaded through every pipeline stage.
/// Re-consolidating the same pair yields an identical view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedView {
    pub transaction_id: String,
    pub customer_id: String,
    pub amount: f64,
    pub currency: String,
    pub country: String,
    pub channel: String,
    pub device_id: String,
    pub timestamp: String,
    pub merchant_id: String,
    pub usual_amount_avg: f64,
    pub usual_hours: UsualHours,
    pub usual_countries: Vec<String>,
    pub usual_devices: Vec<String>,
}

impl ConsolidatedView {
    /// Hour-of-day of the transaction timestamp; noon if unparseable.
    #[must_use]
    pub fn hour(&self) -> u8 {
        parse_hour(&self.timestamp).unwrap_or(12)
    }
}

fn parse_hour(timestamp: &str) -> Option<u8> {
    use chrono::Timelike;
    let normalized = timestamp.replace('Z', "+00:00");
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.hour() as u8);
    }
    // Timestamps without an offset still carry the local hour.
    chrono::NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.hour() as u8)
}

/// Errors raised while joining a transaction with its profile.
#[derive(Debug, Error, Diagnostic)]
pub enum ConsolidationError {
    #[error("transaction not found: {transaction_id}")]
    #[diagnostic(
        code(fraudgraph::domain::transaction_not_found),
        help("Ingest the transaction before requesting a decision for it.")
    )]
    TransactionNotFound { transaction_id: String },

    #[error("customer not found: {customer_id}")]
    #[diagnostic(
        code(fraudgraph::domain::customer_not_found),
        help("Ingest the behavior profile for customer `{customer_id}`.")
    )]
    CustomerNotFound { customer_id: String },
}

/// Join a transaction with its customer's behavior profile.
///
/// The profile lookup is by the transaction's `customer_id`; a missing
/// transaction or profile surfaces as a typed not-found error so callers can
/// map it to their own surface unchanged.
pub fn consolidate(
    transaction: Option<&Transaction>,
    transaction_id: &str,
    behavior: Option<&CustomerBehavior>,
) -> Result<ConsolidatedView, ConsolidationError> {
    let txn = transaction.ok_or_else(|| ConsolidationError::TransactionNotFound {
        transaction_id: transaction_id.to_string(),
    })?;
    let profile = behavior.ok_or_else(|| ConsolidationError::CustomerNotFound {
        customer_id: txn.customer_id.clone(),
    })?;
    Ok(ConsolidatedView {
        transaction_id: txn.transaction_id.clone(),
        customer_id: txn.customer_id.clone(),
        amount: txn.amount,
        currency: txn.currency.clone(),
        country: txn.country.clone(),
        channel: txn.channel.clone(),
        device_id: txn.device_id.clone(),
        timestamp: txn.timestamp.clone(),
        merchant_id: txn.merchant_id.clone(),
        usual_amount_avg: profile.usual_amount_avg,
        usual_hours: UsualHours::parse(&profile.usual_hours),
        usual_countries: profile.usual_countries.clone(),
        usual_devices: profile.usual_devices.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_hours() {
        assert_eq!(UsualHours::parse("08-20"), UsualHours { start: 8, end: 20 });
        assert_eq!(UsualHours::parse("0-23"), UsualHours { start: 0, end: 23 });
    }

    #[test]
    fn malformed_hours_fall_back_to_business_window() {
        for raw in ["", "banana", "25-09", "08", "08-"] {
            assert_eq!(UsualHours::parse(raw), UsualHours { start: 8, end: 20 });
        }
    }

    #[test]
    fn hour_extraction_handles_offsets_and_garbage() {
        let mut view = sample_view();
        view.timestamp = "2025-03-01T03:15:00Z".into();
        assert_eq!(view.hour(), 3);
        view.timestamp = "2025-03-01T18:40:00-05:00".into();
        assert_eq!(view.hour(), 18);
        view.timestamp = "not a timestamp".into();
        assert_eq!(view.hour(), 12);
    }

    #[test]
    fn consolidation_is_reproducible() {
        let txn = sample_transaction();
        let profile = sample_profile();
        let a = consolidate(Some(&txn), &txn.transaction_id, Some(&profile)).unwrap();
        let b = consolidate(Some(&txn), &txn.transaction_id, Some(&profile)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_parties_surface_typed_errors() {
        let txn = sample_transaction();
        let err = consolidate(None, "T-404", Some(&sample_profile())).unwrap_err();
        assert!(matches!(err, ConsolidationError::TransactionNotFound { .. }));
        let err = consolidate(Some(&txn), &txn.transaction_id, None).unwrap_err();
        assert!(matches!(err, ConsolidationError::CustomerNotFound { .. }));
    }

    fn sample_transaction() -> Transaction {
        Transaction {
            transaction_id: "T-001".into(),
            customer_id: "C-001".into(),
            amount: 500.0,
            currency: "PEN".into(),
            country: "PE".into(),
            channel: "web".into(),
            device_id: "D-1".into(),
            timestamp: "2025-03-01T10:00:00Z".into(),
            merchant_id: "M-100".into(),
        }
    }

    fn sample_profile() -> CustomerBehavior {
        CustomerBehavior {
            customer_id: "C-001".into(),
            usual_amount_avg: 500.0,
            usual_hours: "08-20".into(),
            usual_countries: vec!["PE".into()],
            usual_devices: vec!["D-1".into()],
        }
    }

    fn sample_view() -> ConsolidatedView {
        let txn = sample_transaction();
        let profile = sample_profile();
        consolidate(Some(&txn), &txn.transaction_id, Some(&profile)).unwrap()
    }
}
