//! Stage counters, recorded through the `metrics` facade when the `metrics`
//! feature is enabled. Without the feature every function is a no-op.

use crate::core::ExitReason;

/// An item left a stage
#[inline]
pub(crate) fn item_emitted(stage: &str) {
    #[cfg(feature = "metrics")]
    metrics::counter!("pipeweld_items_emitted_total", "stage" => stage.to_string()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = stage;
}

/// A fallible transform produced an error item
#[inline]
pub(crate) fn item_failed(stage: &str) {
    #[cfg(feature = "metrics")]
    metrics::counter!("pipeweld_item_failures_total", "stage" => stage.to_string()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = stage;
}

/// A stage finished
#[inline]
pub(crate) fn stage_exited(stage: &str, reason: ExitReason) {
    #[cfg(feature = "metrics")]
    metrics::counter!(
        "pipeweld_stage_exits_total",
        "stage" => stage.to_string(),
        "reason" => reason.as_str()
    )
    .increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = (stage, reason);
}
