//! Shared utilities for integration tests.
//!
//! Provides a small engine configuration, slicer-driven frame builders, and
//! a drain helper that collects a subscription until its closing event.
//! These helpers reduce duplication across test modules.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::{
    num::NonZeroUsize,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use bundlestream::{
    Correlator,
    EndpointId,
    Frame,
    ReassemblyConfig,
    StreamEvent,
    StreamId,
    StreamOutcome,
    StreamSlicer,
    StreamSubscription,
};
use bytes::{Bytes, BytesMut};
use tokio::time::timeout;

/// Limits small enough to exercise ceilings, timeouts short enough to sweep.
pub fn test_config() -> ReassemblyConfig {
    ReassemblyConfig {
        max_pending_frames: NonZeroUsize::new(32).expect("non-zero"),
        max_pending_bytes: NonZeroUsize::new(64 * 1024).expect("non-zero"),
        inactivity_timeout: Duration::from_secs(2),
        sweep_interval: Duration::from_millis(100),
    }
}

/// Correlators are process-wide so repeated `sliced` calls never collide.
static NEXT_CORRELATOR: AtomicU64 = AtomicU64::new(0);

/// Slice `message` with the public sender helper, capping frame payloads at
/// `cap` bytes. Every call names a fresh stream.
pub fn sliced(message: &[u8], cap: usize) -> (StreamId, Vec<Frame>) {
    let slicer = StreamSlicer::starting_at(
        EndpointId::new("dtn://testing/sender"),
        NonZeroUsize::new(cap).expect("non-zero"),
        Correlator::new(NEXT_CORRELATOR.fetch_add(1, Ordering::Relaxed)),
    );
    let batch = slicer.slice(message.to_vec()).expect("slice message");
    (batch.stream_id().clone(), batch.into_frames())
}

/// Drain `subscription` until its closing event.
///
/// Returns the concatenated segment bytes and the close outcome; the outcome
/// is `None` when the channel ended without one.
pub async fn drain(mut subscription: StreamSubscription) -> (Bytes, Option<StreamOutcome>) {
    let mut collected = BytesMut::new();
    loop {
        let event = timeout(Duration::from_secs(1), subscription.recv())
            .await
            .expect("subscription should make progress");
        match event {
            Some(StreamEvent::Segment(segment)) => collected.extend_from_slice(&segment),
            Some(StreamEvent::Closed(outcome)) => return (collected.freeze(), Some(outcome)),
            None => return (collected.freeze(), None),
        }
    }
}
