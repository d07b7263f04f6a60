//! Metric helpers for `bundlestream`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate. With the
//! `metrics` feature disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::{buffer::Disposition, delivery::StreamOutcome};

/// Name of the counter tracking admitted frames, labelled by disposition.
pub const FRAMES_TOTAL: &str = "bundlestream_frames_total";
/// Name of the counter tracking frames rejected before admission.
pub const FRAMES_REJECTED_TOTAL: &str = "bundlestream_frames_rejected_total";
/// Name of the counter tracking payload bytes released in order.
pub const BYTES_EMITTED_TOTAL: &str = "bundlestream_bytes_emitted_total";
/// Name of the counter tracking closed streams, labelled by outcome.
pub const STREAMS_CLOSED_TOTAL: &str = "bundlestream_streams_closed_total";
/// Name of the gauge tracking streams currently in the table.
pub const STREAMS_TRACKED: &str = "bundlestream_streams_tracked";

#[cfg(feature = "metrics")]
fn disposition_label(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::Applied => "applied",
        Disposition::Parked => "parked",
        Disposition::Duplicate => "duplicate",
        Disposition::Stale => "stale",
        Disposition::Overflow => "overflow",
    }
}

#[cfg(feature = "metrics")]
fn outcome_label(outcome: StreamOutcome) -> &'static str {
    match outcome {
        StreamOutcome::Complete => "COMPLETE",
        StreamOutcome::Failed(reason) => reason.code(),
    }
}

/// Record an admitted frame with its disposition.
#[cfg(feature = "metrics")]
pub fn inc_frames(disposition: Disposition) {
    counter!(FRAMES_TOTAL, "disposition" => disposition_label(disposition)).increment(1);
}

/// Record an admitted frame with its disposition.
#[cfg(not(feature = "metrics"))]
pub fn inc_frames(_disposition: Disposition) {}

/// Record a frame rejected before admission.
#[cfg(feature = "metrics")]
pub fn inc_rejected() { counter!(FRAMES_REJECTED_TOTAL).increment(1); }

/// Record a frame rejected before admission.
#[cfg(not(feature = "metrics"))]
pub fn inc_rejected() {}

/// Record payload bytes released to subscribers.
#[cfg(feature = "metrics")]
pub fn add_emitted_bytes(bytes: usize) {
    counter!(BYTES_EMITTED_TOTAL).increment(u64::try_from(bytes).unwrap_or(u64::MAX));
}

/// Record payload bytes released to subscribers.
#[cfg(not(feature = "metrics"))]
pub fn add_emitted_bytes(_bytes: usize) {}

/// Record `count` streams closing with the same outcome.
#[cfg(feature = "metrics")]
pub fn inc_streams_closed(outcome: StreamOutcome, count: usize) {
    counter!(STREAMS_CLOSED_TOTAL, "outcome" => outcome_label(outcome))
        .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Record `count` streams closing with the same outcome.
#[cfg(not(feature = "metrics"))]
pub fn inc_streams_closed(_outcome: StreamOutcome, _count: usize) {}

/// Increment the tracked streams gauge.
#[cfg(feature = "metrics")]
pub fn inc_streams_tracked() { gauge!(STREAMS_TRACKED).increment(1.0); }

/// Increment the tracked streams gauge.
#[cfg(not(feature = "metrics"))]
pub fn inc_streams_tracked() {}

/// Decrement the tracked streams gauge.
#[cfg(feature = "metrics")]
pub fn dec_streams_tracked() { gauge!(STREAMS_TRACKED).decrement(1.0); }

/// Decrement the tracked streams gauge.
#[cfg(not(feature = "metrics"))]
pub fn dec_streams_tracked() {}
