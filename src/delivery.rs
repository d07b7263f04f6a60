//! Application-facing delivery: stream events, outcomes, and subscriptions.
//!
//! Subscribers receive ordered [`StreamEvent`]s over per-subscriber
//! unbounded channels. Unbounded is sound here because every queued payload
//! is a refcounted slice of state the engine already retains for replay, so
//! a slow subscriber cannot grow memory beyond the retained stream itself,
//! and publication never blocks ingestion.

use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use derive_more::{Display, From, Into};
use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::id::StreamId;

/// Why a stream closed without completing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// The sender terminated the stream with an ABORT frame, or the
    /// application discarded it.
    AbortedBySender,
    /// The reorder window exceeded its configured ceiling.
    BufferOverflow,
    /// No frame arrived within the inactivity timeout.
    Expired,
    /// The engine shut down while the stream was still open.
    EngineShutdown,
}

impl FailureReason {
    /// Canonical reason code, stable across releases.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::AbortedBySender => "ABORTED_BY_SENDER",
            Self::BufferOverflow => "BUFFER_OVERFLOW",
            Self::Expired => "EXPIRED",
            Self::EngineShutdown => "ENGINE_SHUTDOWN",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.code()) }
}

/// Terminal state of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Every byte up to the recorded LAST was emitted in order.
    Complete,
    /// The stream closed without a complete ordered prefix.
    Failed(FailureReason),
}

impl StreamOutcome {
    /// Whether the stream delivered its full ordered byte sequence.
    #[must_use]
    pub const fn is_complete(self) -> bool { matches!(self, Self::Complete) }
}

impl fmt::Display for StreamOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => f.write_str("COMPLETE"),
            Self::Failed(reason) => reason.fmt(f),
        }
    }
}

/// One notification pushed to a stream subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// The next in-order slice of the stream's bytes.
    Segment(Bytes),
    /// The stream reached a terminal state; no further events follow.
    Closed(StreamOutcome),
}

/// Result of collecting a terminal stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamResult {
    /// The fully reassembled byte sequence.
    Complete(Bytes),
    /// The stream failed before completing.
    Failed(FailureReason),
}

/// Distinguishes subscribers registered on the same stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, From, Into)]
#[display("{_0}")]
pub struct SubscriberToken(u64);

impl SubscriberToken {
    /// Create a token.
    #[must_use]
    pub const fn new(value: u64) -> Self { Self(value) }

    /// Return the inner numeric value.
    #[must_use]
    pub const fn get(self) -> u64 { self.0 }
}

pub(crate) type EventSender = mpsc::UnboundedSender<StreamEvent>;

/// A registered subscriber: its token plus the sending half of its channel.
#[derive(Clone, Debug)]
pub(crate) struct Subscriber {
    pub(crate) token: SubscriberToken,
    pub(crate) sender: EventSender,
}

impl Subscriber {
    /// Create a subscriber and the receiving half of its channel.
    pub(crate) fn channel(token: SubscriberToken) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { token, sender }, receiver)
    }

    /// Whether the receiving half has been dropped.
    pub(crate) fn is_closed(&self) -> bool { self.sender.is_closed() }
}

/// Receiving half of a stream subscription.
///
/// When attached after frames have already arrived, the channel starts with
/// the buffered-so-far ordered prefix, then continues with live events; a
/// stream that is already terminal yields its [`StreamEvent::Closed`]
/// immediately. At most one `Closed` event is ever delivered.
#[derive(Debug)]
pub struct StreamSubscription {
    stream_id: StreamId,
    token: SubscriberToken,
    receiver: mpsc::UnboundedReceiver<StreamEvent>,
}

impl StreamSubscription {
    pub(crate) fn new(
        stream_id: StreamId,
        token: SubscriberToken,
        receiver: mpsc::UnboundedReceiver<StreamEvent>,
    ) -> Self {
        Self {
            stream_id,
            token,
            receiver,
        }
    }

    /// Stream this subscription observes.
    #[must_use]
    pub const fn stream_id(&self) -> &StreamId { &self.stream_id }

    /// Token identifying this subscriber for
    /// [`unsubscribe`](crate::engine::ReassemblyEngine::unsubscribe).
    #[must_use]
    pub const fn token(&self) -> SubscriberToken { self.token }

    /// Receive the next event.
    ///
    /// Returns `None` once the subscription is detached or the engine has
    /// shut down and all queued events were drained.
    pub async fn recv(&mut self) -> Option<StreamEvent> { self.receiver.recv().await }
}

impl Stream for StreamSubscription {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Events captured under a stream lock, delivered in queue order.
///
/// Paths that emit segments dispatch before the stream lock drops, so each
/// subscriber's channel observes admission order; sends target unbounded
/// channels and run no subscriber code, so the lock holder never blocks.
/// Close-only paths (sweep, shutdown, discard) may dispatch after their
/// locks drop: the closing broadcast empties the subscriber list, leaving
/// [`StreamEvent::Closed`] the final event on any channel it reaches.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    queued: Vec<(EventSender, StreamEvent)>,
}

impl Outbox {
    pub(crate) fn new() -> Self { Self::default() }

    /// Queue one event for one subscriber.
    pub(crate) fn push(&mut self, sender: &EventSender, event: StreamEvent) {
        self.queued.push((sender.clone(), event));
    }

    /// Queue `event` for every subscriber in `subscribers`.
    pub(crate) fn broadcast(&mut self, subscribers: &[Subscriber], event: &StreamEvent) {
        for subscriber in subscribers {
            self.queued.push((subscriber.sender.clone(), event.clone()));
        }
    }

    /// Deliver everything queued; receivers dropped mid-flight are skipped.
    pub(crate) fn dispatch(self) {
        for (sender, event) in self.queued {
            if sender.send(event).is_err() {
                debug!("subscriber departed before event delivery");
            }
        }
    }
}
