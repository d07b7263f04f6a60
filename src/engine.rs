//! Concurrent reassembly engine coordinating streams, subscribers, and GC.
//!
//! [`ReassemblyEngine`] is the crate's front door: transports feed it frames
//! in whatever order the network produced, applications subscribe for
//! in-order bytes and collect terminal results. Admissions for one stream
//! serialise on that stream's entry, and subscriber events are sent before
//! the entry unlocks, so every channel observes admission order; frames for
//! different streams proceed in parallel.

use std::sync::{
    Arc,
    Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::time::{self, Instant};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    buffer::{Admission, Disposition, StreamBuffer, StreamState},
    config::ReassemblyConfig,
    delivery::{
        FailureReason,
        Outbox,
        StreamEvent,
        StreamOutcome,
        StreamResult,
        StreamSubscription,
        Subscriber,
        SubscriberToken,
    },
    error::{EngineClosed, IngestError},
    frame::Frame,
    id::StreamId,
    metrics,
    table::{StreamEntry, StreamTable, SweepReport, lock},
};


#[derive(Debug, Default)]
struct EngineInner {
    config: ReassemblyConfig,
    table: StreamTable,
    /// Subscribers parked for streams the engine has not seen yet.
    waiting: DashMap<StreamId, Vec<Subscriber>>,
    next_token: AtomicU64,
    started: AtomicBool,
    closed: AtomicBool,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

/// Shared, cloneable handle to the reassembly state.
///
/// # Examples
///
/// ```
/// use bundlestream::{
///     Correlator, EndpointId, Frame, ReassemblyEngine, SequenceNumber, StreamId, StreamResult,
/// };
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = ReassemblyEngine::default();
/// let id = StreamId::new(EndpointId::new("dtn://sensor-7/telemetry"), Correlator::new(1));
///
/// // Frames arrive in any order; bytes come out in sequence order.
/// engine.ingest(Frame::last(id.clone(), SequenceNumber::new(1), b"world".as_slice()))?;
/// engine.ingest(Frame::first(id.clone(), b"hello ".as_slice()))?;
///
/// match engine.take_result(&id) {
///     Some(StreamResult::Complete(bytes)) => assert_eq!(&bytes[..], b"hello world"),
///     other => panic!("stream should be complete, got {other:?}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct ReassemblyEngine {
    inner: Arc<EngineInner>,
}

impl ReassemblyEngine {
    /// Create an engine with the given limits and timeouts.
    #[must_use]
    pub fn new(config: ReassemblyConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                ..EngineInner::default()
            }),
        }
    }

    /// Limits and timeouts this engine was built with.
    #[must_use]
    pub fn config(&self) -> &ReassemblyConfig { &self.inner.config }

    /// Number of streams currently tracked, terminal entries included.
    #[must_use]
    pub fn tracked_streams(&self) -> usize { self.inner.table.len() }

    /// Whether [`shutdown`](Self::shutdown) has been invoked.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.inner.closed.load(Ordering::SeqCst) }

    /// Spawn the background sweeper that expires idle streams.
    ///
    /// Subsequent calls are no-ops. Engines used without `start` remain fully
    /// functional; drive [`sweep_expired_at`](Self::sweep_expired_at) from an
    /// external timer instead.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime, or if the configured sweep
    /// interval is zero.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let engine = self.clone();
        let token = self.inner.shutdown.clone();
        self.inner.tasks.spawn(async move {
            let mut ticker = time::interval(engine.inner.config.sweep_interval);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        engine.sweep_expired();
                    }
                }
            }
        });
    }

    /// Stop the engine: halt the sweeper and fail every open stream.
    ///
    /// Open streams close with [`FailureReason::EngineShutdown`]; subscribers
    /// parked for streams that never materialised receive the same closing
    /// event. Terminal results already accumulated stay collectable through
    /// [`take_result`](Self::take_result). Subsequent calls are no-ops.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        let mut outbox = Outbox::new();
        let closed =
            self.inner
                .table
                .close_all(FailureReason::EngineShutdown, Instant::now(), &mut outbox);
        let parked: Vec<StreamId> = self
            .inner
            .waiting
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in parked {
            if let Some((_, subscribers)) = self.inner.waiting.remove(&id) {
                outbox.broadcast(
                    &subscribers,
                    &StreamEvent::Closed(StreamOutcome::Failed(FailureReason::EngineShutdown)),
                );
            }
        }
        outbox.dispatch();

        metrics::inc_streams_closed(
            StreamOutcome::Failed(FailureReason::EngineShutdown),
            closed,
        );
        info!("shutdown: failed {closed} open streams");
    }

    /// Admit one frame using the current time.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Malformed`] when the frame violates framing
    /// rules, or [`IngestError::Closed`] after shutdown.
    pub fn ingest(&self, frame: Frame) -> Result<Disposition, IngestError> {
        self.ingest_at(frame, Instant::now())
    }

    /// Admit one frame using an explicit clock reading.
    ///
    /// Accepting an explicit `now` keeps expiry deterministic under test and
    /// lets transports stamp batches of frames consistently.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Malformed`] when the frame violates framing
    /// rules, or [`IngestError::Closed`] after shutdown.
    pub fn ingest_at(&self, frame: Frame, now: Instant) -> Result<Disposition, IngestError> {
        if self.is_closed() {
            return Err(EngineClosed.into());
        }
        if let Err(error) = frame.validate() {
            warn!("rejected frame: {error}");
            metrics::inc_rejected();
            return Err(error.into());
        }

        let id = frame.stream_id().clone();
        let (entry, created) = self.inner.table.lookup_or_create(&id, now);
        if created {
            // Shutdown may have raced the lookup; do not leave a zombie
            // stream behind the closed flag.
            if self.is_closed() {
                self.inner.table.remove(&id);
                return Err(EngineClosed.into());
            }
            debug!("stream {id}: tracking started");
            metrics::inc_streams_tracked();
            self.adopt_waiting(&id, &entry);
        }

        let admission = {
            let mut guard = lock(&entry);
            let admission = guard.buffer.admit(frame, &self.inner.config, now);
            let mut outbox = Outbox::new();
            Self::publish(&mut guard, &admission, &mut outbox);
            // Dispatch while the entry is still locked: racing admissions on
            // one stream must not interleave their sends.
            outbox.dispatch();
            admission
        };
        self.finish_admission(&id, &admission);
        Ok(admission.disposition)
    }

    /// Attach a subscriber to `id`, replaying anything already emitted.
    ///
    /// A late subscriber first receives the ordered prefix released so far,
    /// then live events; on an already-terminal stream the replay ends with
    /// its closing event. Subscribing ahead of the first frame parks the
    /// subscription until the stream appears.
    ///
    /// # Errors
    ///
    /// Returns [`EngineClosed`] once shutdown has begun.
    pub fn subscribe(&self, id: &StreamId) -> Result<StreamSubscription, EngineClosed> {
        if self.is_closed() {
            return Err(EngineClosed);
        }
        let token = self.next_token();
        let (subscriber, receiver) = Subscriber::channel(token);

        if let Some(entry) = self.inner.table.get(id) {
            let mut outbox = Outbox::new();
            let mut guard = lock(&entry);
            Self::replay_into(&guard.buffer, &subscriber, &mut outbox);
            if !guard.buffer.state().is_closed() {
                guard.subscribers.push(subscriber);
            }
            outbox.dispatch();
        } else {
            self.inner
                .waiting
                .entry(id.clone())
                .or_default()
                .push(subscriber);
            // Shutdown drains the parked map exactly once; a park that lost
            // that race must withdraw, or nobody would ever notify it.
            if self.is_closed() {
                self.remove_parked(id, token);
                return Err(EngineClosed);
            }
            // The first frame may have landed while we parked; adopt now so
            // the subscription cannot fall in the gap.
            if let Some(entry) = self.inner.table.get(id) {
                self.adopt_waiting(id, &entry);
            }
        }
        Ok(StreamSubscription::new(id.clone(), token, receiver))
    }

    /// Detach the subscriber identified by `token` from `id`.
    ///
    /// Returns `false` when no such subscriber was registered. Dropping the
    /// [`StreamSubscription`] achieves the same lazily; this frees the slot
    /// eagerly.
    pub fn unsubscribe(&self, id: &StreamId, token: SubscriberToken) -> bool {
        let mut removed = false;
        if let Some(entry) = self.inner.table.get(id) {
            let mut guard = lock(&entry);
            let before = guard.subscribers.len();
            guard.subscribers.retain(|subscriber| subscriber.token != token);
            removed = guard.subscribers.len() != before;
        }
        removed || self.remove_parked(id, token)
    }

    /// Collect the terminal result for `id` and stop tracking the stream.
    ///
    /// `None` when the stream is unknown or still open; open streams are left
    /// untouched. Each terminal result can be taken exactly once.
    #[must_use = "dropping the result loses the reassembled bytes"]
    pub fn take_result(&self, id: &StreamId) -> Option<StreamResult> {
        let result = self.inner.table.remove_terminal(id);
        if result.is_some() {
            debug!("stream {id}: result collected");
            metrics::dec_streams_tracked();
        }
        result
    }

    /// Abandon `id` using the current time.
    pub fn discard(&self, id: &StreamId) -> bool { self.discard_at(id, Instant::now()) }

    /// Abandon `id`: drop its state and fail any subscribers.
    ///
    /// An open stream closes with [`FailureReason::AbortedBySender`], exactly
    /// as if the sender had aborted it; subscribers parked for a stream that
    /// never materialised are released the same way. Returns `true` when a
    /// tracked stream was removed.
    pub fn discard_at(&self, id: &StreamId, now: Instant) -> bool {
        let mut outbox = Outbox::new();
        if let Some((_, subscribers)) = self.inner.waiting.remove(id) {
            outbox.broadcast(
                &subscribers,
                &StreamEvent::Closed(StreamOutcome::Failed(FailureReason::AbortedBySender)),
            );
        }
        let removed = self.inner.table.remove(id);
        let discarded = if let Some(entry) = &removed {
            let mut guard = lock(entry);
            if let Some(outcome) = guard.buffer.force_close(FailureReason::AbortedBySender, now) {
                guard.notify_closed(outcome, &mut outbox);
                metrics::inc_streams_closed(outcome, 1);
            }
            true
        } else {
            false
        };
        outbox.dispatch();
        if discarded {
            info!("stream {id}: discarded");
            metrics::dec_streams_tracked();
        }
        discarded
    }

    /// Run one GC pass using the current time.
    pub fn sweep_expired(&self) -> SweepReport { self.sweep_expired_at(Instant::now()) }

    /// Run one GC pass using an explicit clock reading.
    ///
    /// Streams idle past the inactivity timeout fail with
    /// [`FailureReason::Expired`]; terminal streams nobody collected within
    /// a further timeout are dropped outright, as are parked subscriptions
    /// whose receivers went away.
    pub fn sweep_expired_at(&self, now: Instant) -> SweepReport {
        let mut outbox = Outbox::new();
        let report = self
            .inner
            .table
            .sweep_expired_at(&self.inner.config, now, &mut outbox);
        outbox.dispatch();
        self.prune_parked();

        if !report.is_empty() {
            info!(
                "sweep: {} expired, {} reaped",
                report.expired.len(),
                report.reaped.len()
            );
            metrics::inc_streams_closed(
                StreamOutcome::Failed(FailureReason::Expired),
                report.expired.len(),
            );
            for _ in &report.reaped {
                metrics::dec_streams_tracked();
            }
        }
        report
    }

    fn next_token(&self) -> SubscriberToken {
        let value = self
            .inner
            .next_token
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_add(1)
            })
            .unwrap_or_else(|_| panic!("subscriber token counter exhausted"));
        SubscriberToken::new(value)
    }

    /// Move subscribers parked for `id` onto its live entry.
    fn adopt_waiting(&self, id: &StreamId, entry: &Mutex<StreamEntry>) {
        let Some((_, parked)) = self.inner.waiting.remove(id) else {
            return;
        };
        let mut outbox = Outbox::new();
        let mut guard = lock(entry);
        for subscriber in parked {
            Self::replay_into(&guard.buffer, &subscriber, &mut outbox);
            if !guard.buffer.state().is_closed() {
                guard.subscribers.push(subscriber);
            }
        }
        outbox.dispatch();
    }

    /// Withdraw the parked subscriber `token` for `id`, if still parked.
    fn remove_parked(&self, id: &StreamId, token: SubscriberToken) -> bool {
        let mut removed = false;
        if let Some(mut parked) = self.inner.waiting.get_mut(id) {
            let before = parked.len();
            parked.retain(|subscriber| subscriber.token != token);
            removed = parked.len() != before;
            drop(parked);
            self.inner.waiting.remove_if(id, |_, parked| parked.is_empty());
        }
        removed
    }

    /// Forget parked subscribers whose receiving halves have been dropped.
    fn prune_parked(&self) {
        let mut pruned = 0_usize;
        self.inner.waiting.retain(|_, parked| {
            let before = parked.len();
            parked.retain(|subscriber| !subscriber.is_closed());
            pruned += before - parked.len();
            !parked.is_empty()
        });
        if pruned > 0 {
            debug!("pruned {pruned} departed parked subscribers");
        }
    }

    /// Queue the buffered-so-far history of `buffer` for one subscriber.
    fn replay_into(buffer: &StreamBuffer, subscriber: &Subscriber, outbox: &mut Outbox) {
        for segment in buffer.assembled() {
            outbox.push(&subscriber.sender, StreamEvent::Segment(segment.clone()));
        }
        if let StreamState::Closed(outcome) = buffer.state() {
            outbox.push(&subscriber.sender, StreamEvent::Closed(outcome));
        }
    }

    /// Queue an admission's events for every live subscriber of the entry.
    fn publish(entry: &mut StreamEntry, admission: &Admission, outbox: &mut Outbox) {
        if admission.emitted.is_empty() && admission.closed.is_none() {
            return;
        }
        entry.prune_subscribers();
        for segment in &admission.emitted {
            outbox.broadcast(&entry.subscribers, &StreamEvent::Segment(segment.clone()));
        }
        if let Some(outcome) = admission.closed {
            entry.notify_closed(outcome, outbox);
        }
    }

    /// Post-admission logging and accounting, performed with no locks held.
    fn finish_admission(&self, id: &StreamId, admission: &Admission) {
        metrics::inc_frames(admission.disposition);
        let emitted: usize = admission.emitted.iter().map(Bytes::len).sum();
        if emitted > 0 {
            metrics::add_emitted_bytes(emitted);
        }
        match admission.disposition {
            Disposition::Applied | Disposition::Parked => {}
            Disposition::Duplicate => debug!("stream {id}: duplicate frame dropped"),
            Disposition::Stale => debug!("stream {id}: stale frame dropped"),
            Disposition::Overflow => warn!("stream {id}: reorder window overflowed"),
        }
        if let Some(outcome) = admission.closed {
            info!("stream {id}: closed ({outcome})");
            metrics::inc_streams_closed(outcome, 1);
        }
    }
}
