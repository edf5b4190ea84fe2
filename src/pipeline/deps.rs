//! Dependency container handed to the decision engine.

use std::sync::Arc;

use crate::audit::AuditSink;
use crate::hitl::HitlStore;
use crate::llm::ReasoningModel;
use crate::retrieval::PolicyIndex;
use crate::search::GovernedSearch;

/// Everything a pipeline run consumes. All handles are shared; the engine
/// never owns a backend exclusively.
#[derive(Clone)]
pub struct EngineDeps {
    pub index: Arc<dyn PolicyIndex>,
    pub search: GovernedSearch,
    pub audit: Arc<dyn AuditSink>,
    pub hitl: Arc<dyn HitlStore>,
    /// Optional reasoning model for the debate stages; `None` selects the
    /// deterministic fallback path.
    pub model: Option<Arc<dyn ReasoningModel>>,
}

impl EngineDeps {
    #[must_use]
    pub fn new(
        index: Arc<dyn PolicyIndex>,
        search: GovernedSearch,
        audit: Arc<dyn AuditSink>,
        hitl: Arc<dyn HitlStore>,
    ) -> Self {
        Self {
            index,
            search,
            audit,
            hitl,
            model: None,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: Arc<dyn ReasoningModel>) -> Self {
        self.model = Some(model);
        self
    }
}
