//! External threat intelligence via the governed search gateway.

use async_trait::async_trait;
use tracing::debug;

use crate::search::GovernedSearch;
use crate::state::{CitationExternal, EvalState, Signal};

use super::{Stage, StageError, StageName, StagePartial};

pub struct ThreatIntelStage {
    search: GovernedSearch,
}

impl ThreatIntelStage {
    #[must_use]
    pub fn new(search: GovernedSearch) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Stage for ThreatIntelStage {
    fn name(&self) -> StageName {
        StageName::ThreatIntel
    }

    async fn run(&self, state: &EvalState) -> Result<StagePartial, StageError> {
        let query = format!(
            "fraud alert {} {}",
            state.view.merchant_id, state.view.country
        );
        // Provider errors surface as an empty list, never as a stage failure.
        let results = self.search.search(&query).await;
        debug!(
            transaction_id = %state.transaction_id,
            query,
            hits = results.len(),
            "governed search completed"
        );

        let mut partial = StagePartial::new().with_citations_external(
            results
                .into_iter()
                .map(|r| CitationExternal {
                    url: r.url,
                    summary: r.summary,
                })
                .collect(),
        );
        if !partial.citations_external.is_empty() {
            partial = partial.with_signal(Signal::ExternalAlert);
        }
        Ok(partial)
    }
}
