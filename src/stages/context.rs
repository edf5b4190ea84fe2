//! Transaction context: derives metrics and signals from the transaction
//! against the customer's behavior profile.

use async_trait::async_trait;
use tracing::debug;

use crate::state::{EvalState, Metrics, Signal, round2};

use super::{Stage, StageError, StageName, StagePartial};

/// Sentinel ratio used when the profile has no usable average amount.
const UNKNOWN_BASELINE_RATIO: f64 = 999.0;

/// Amount ratio above which the out-of-range signal fires.
const AMOUNT_SIGNAL_THRESHOLD: f64 = 3.0;

pub struct ContextStage;

#[async_trait]
impl Stage for ContextStage {
    fn name(&self) -> StageName {
        StageName::Context
    }

    async fn run(&self, state: &EvalState) -> Result<StagePartial, StageError> {
        let view = &state.view;

        let hour = view.hour();
        let amount_ratio = if view.usual_amount_avg > 0.0 {
            round2(view.amount / view.usual_amount_avg)
        } else {
            UNKNOWN_BASELINE_RATIO
        };
        let hour_outside = view.usual_hours.is_outside(hour);
        let new_country = !view.usual_countries.contains(&view.country);
        let new_device = !view.usual_devices.contains(&view.device_id);

        let mut partial = StagePartial::new().with_metrics(Metrics {
            amount_ratio: Some(amount_ratio),
            hour: Some(hour),
            hour_outside: Some(hour_outside),
            new_country: Some(new_country),
            new_device: Some(new_device),
            ..Metrics::default()
        });

        if amount_ratio > AMOUNT_SIGNAL_THRESHOLD {
            partial = partial.with_signal(Signal::AmountOutOfRange);
        }
        if hour_outside {
            partial = partial.with_signal(Signal::UnusualHour);
        }
        if new_country {
            partial = partial.with_signal(Signal::UnusualCountry);
        }
        if new_device {
            partial = partial.with_signal(Signal::NewDevice);
        }

        debug!(
            transaction_id = %state.transaction_id,
            amount_ratio,
            hour_outside,
            signals = partial.signals.len(),
            "derived transaction context"
        );
        Ok(partial)
    }
}
