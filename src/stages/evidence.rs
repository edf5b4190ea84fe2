//! Evidence aggregation: snapshots the accumulated evidence for downstream
//! consumers. Side-effect-free with respect to decision fields.

use async_trait::async_trait;
use tracing::debug;

use crate::state::{EvalState, Evidence};

use super::{Stage, StageError, StageName, StagePartial};

pub struct EvidenceStage;

#[async_trait]
impl Stage for EvidenceStage {
    fn name(&self) -> StageName {
        StageName::Evidence
    }

    async fn run(&self, state: &EvalState) -> Result<StagePartial, StageError> {
        debug!(
            transaction_id = %state.transaction_id,
            signals = state.signals.len(),
            internal = state.citations_internal.len(),
            external = state.citations_external.len(),
            "aggregated evidence"
        );
        Ok(StagePartial::new().with_evidence(Evidence {
            signals: state.signals.clone(),
            metrics: state.metrics.clone(),
            citations_internal: state.citations_internal.clone(),
            citations_external: state.citations_external.clone(),
        }))
    }
}
