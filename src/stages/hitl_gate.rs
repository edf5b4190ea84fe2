//! HITL gate: opens a review case when the run requires one. Idempotent
//! under retry: an existing OPEN case for the transaction is reused.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::hitl::{HitlCase, HitlError, HitlStore};
use crate::state::EvalState;

use super::{Stage, StageError, StageName, StagePartial};

pub struct HitlGateStage {
    store: Arc<dyn HitlStore>,
}

impl HitlGateStage {
    #[must_use]
    pub fn new(store: Arc<dyn HitlStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Stage for HitlGateStage {
    fn name(&self) -> StageName {
        StageName::HitlGate
    }

    async fn run(&self, state: &EvalState) -> Result<StagePartial, StageError> {
        if !state.hitl.required {
            return Ok(StagePartial::new());
        }
        let existing = self
            .store
            .find_open_by_transaction(&state.transaction_id)
            .await
            .map_err(|err| StageError::Hitl {
                message: err.to_string(),
            })?;
        if let Some(case) = existing {
            info!(
                transaction_id = %state.transaction_id,
                case_id = %case.case_id,
                "reusing open review case"
            );
            return Ok(StagePartial::new());
        }
        let case = HitlCase::open(state.transaction_id.clone(), state.hitl.reason.clone());
        let case_id = case.case_id.clone();
        match self.store.create(case).await {
            Ok(()) => {
                info!(
                    transaction_id = %state.transaction_id,
                    case_id = %case_id,
                    reason = %state.hitl.reason,
                    "opened review case"
                );
                Ok(StagePartial::new())
            }
            // Lost the race to a concurrent run for the same transaction;
            // that run's case serves.
            Err(HitlError::DuplicateOpenCase { .. }) => Ok(StagePartial::new()),
            Err(err) => Err(StageError::Hitl {
                message: err.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConsolidatedView, UsualHours};
    use crate::hitl::InMemoryHitlStore;
    use crate::state::HitlFlag;

    fn state(required: bool) -> EvalState {
        let mut state = EvalState::new(ConsolidatedView {
            transaction_id: "T-GATE".into(),
            customer_id: "C-1".into(),
            amount: 100.0,
            currency: "PEN".into(),
            country: "PE".into(),
            channel: "web".into(),
            device_id: "D-1".into(),
            timestamp: "2025-03-01T10:00:00Z".into(),
            merchant_id: "M-1".into(),
            usual_amount_avg: 100.0,
            usual_hours: UsualHours { start: 8, end: 20 },
            usual_countries: vec!["PE".into()],
            usual_devices: vec!["D-1".into()],
        });
        if required {
            state.hitl = HitlFlag {
                required: true,
                reason: "borderline_confidence".into(),
            };
        }
        state
    }

    #[tokio::test]
    async fn no_op_when_not_required() {
        let store = Arc::new(InMemoryHitlStore::new());
        let gate = HitlGateStage::new(store.clone());
        gate.run(&state(false)).await.unwrap();
        assert!(store.list_open().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn opens_exactly_one_case_under_retry() {
        let store = Arc::new(InMemoryHitlStore::new());
        let gate = HitlGateStage::new(store.clone());
        gate.run(&state(true)).await.unwrap();
        gate.run(&state(true)).await.unwrap();
        let open = store.list_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].transaction_id, "T-GATE");
        assert_eq!(open[0].reason, "borderline_confidence");
    }
}
