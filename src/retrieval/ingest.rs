//! Policy ingest: rebuilds the vector index from a policy set.

use tracing::info;

use crate::domain::FraudPolicy;

use super::{PolicyDocument, PolicyIndex, RetrievalError};

/// Reindex the full policy set.
///
/// Clears the collection, then bulk-upserts one document per rule with
/// `chunk_id = "1"`. Returns the number of policies indexed.
pub async fn index_policies(
    policies: &[FraudPolicy],
    index: &dyn PolicyIndex,
) -> Result<usize, RetrievalError> {
    index.clear().await?;
    let documents: Vec<PolicyDocument> = policies
        .iter()
        .map(|policy| {
            PolicyDocument::from_rule(
                policy.policy_id.clone(),
                policy.version.clone(),
                policy.rule.clone(),
            )
        })
        .collect();
    let count = documents.len();
    index.upsert(documents).await?;
    info!(count, "indexed fraud policies");
    Ok(count)
}
