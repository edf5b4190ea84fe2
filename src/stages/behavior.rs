//! Behavioral pattern scoring: folds context metrics into a bounded risk.

use async_trait::async_trait;
use tracing::debug;

use crate::state::{EvalState, Metrics, round2};

use super::{Stage, StageError, StageName, StagePartial};

pub struct BehaviorStage;

/// Risk contribution table. The amount bands are mutually exclusive: only
/// the highest applicable band counts.
fn score(amount_ratio: f64, hour_outside: bool, new_device: bool, new_country: bool) -> f64 {
    let mut risk: f64 = 0.0;
    if amount_ratio > 5.0 {
        risk += 0.35;
    } else if amount_ratio > 3.0 {
        risk += 0.25;
    } else if amount_ratio > 2.0 {
        risk += 0.15;
    }
    if hour_outside {
        risk += 0.15;
    }
    if new_device {
        risk += 0.20;
    }
    if new_country {
        risk += 0.25;
    }
    risk.min(1.0)
}

#[async_trait]
impl Stage for BehaviorStage {
    fn name(&self) -> StageName {
        StageName::Behavior
    }

    async fn run(&self, state: &EvalState) -> Result<StagePartial, StageError> {
        let metrics = &state.metrics;
        let behavior_risk = score(
            metrics.amount_ratio.unwrap_or(1.0),
            metrics.hour_outside.unwrap_or(false),
            metrics.new_device.unwrap_or(false),
            metrics.new_country.unwrap_or(false),
        );

        debug!(
            transaction_id = %state.transaction_id,
            behavior_risk,
            "computed behavior risk"
        );
        Ok(StagePartial::new().with_metrics(Metrics {
            behavior_risk: Some(round2(behavior_risk)),
            ..Metrics::default()
        }))
    }
}
