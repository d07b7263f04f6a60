//! Per-stream reassembly state machine.
//!
//! A [`StreamBuffer`] consumes frames in any arrival order and releases
//! payload bytes strictly in sequence order: after each admission it emits
//! the longest contiguous prefix available. Frames ahead of the cursor wait
//! in a bounded reorder window; duplicates drop without effect; LAST records
//! the stream's end; ABORT, ceiling overflow, and inactivity close the
//! stream with a reason. Terminal states are final.

use std::{collections::BTreeMap, time::Duration};

use bytes::{Bytes, BytesMut};
use log::warn;
use tokio::time::Instant;

use crate::{
    config::ReassemblyConfig,
    delivery::{FailureReason, StreamOutcome, StreamResult},
    frame::{Frame, FrameKind, SequenceNumber},
    id::StreamId,
};

#[cfg(test)]
mod tests;

/// Lifecycle state of a stream buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// Accepting frames.
    Open,
    /// Terminal; no further frame has any effect.
    Closed(StreamOutcome),
}

impl StreamState {
    /// Whether the stream reached a terminal state.
    #[must_use]
    pub const fn is_closed(self) -> bool { matches!(self, Self::Closed(_)) }
}

/// How an admitted frame was treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Took effect: advanced the prefix, completed, or closed the stream.
    Applied,
    /// Ahead of the cursor; held in the reorder window until the gap fills.
    Parked,
    /// Sequence already seen, or a repeated LAST; dropped without effect.
    Duplicate,
    /// Dropped without effect: terminal stream, or inconsistent with the
    /// recorded end of stream.
    Stale,
    /// Dropped, and the reorder ceiling was exceeded; the stream aborted.
    Overflow,
}

/// Outcome of one [`StreamBuffer::admit`] call.
#[derive(Debug, PartialEq, Eq)]
pub struct Admission {
    /// How the frame itself was treated.
    pub disposition: Disposition,
    /// Newly released in-order segments, oldest first; empty payloads
    /// advance the cursor without producing a segment.
    pub emitted: Vec<Bytes>,
    /// Terminal transition triggered by the frame, if any.
    pub closed: Option<StreamOutcome>,
}

impl Admission {
    fn dropped(disposition: Disposition) -> Self {
        Self {
            disposition,
            emitted: Vec::new(),
            closed: None,
        }
    }

    fn closed(disposition: Disposition, outcome: StreamOutcome) -> Self {
        Self {
            disposition,
            emitted: Vec::new(),
            closed: Some(outcome),
        }
    }
}

/// Reassembly state for a single stream.
///
/// The received-sequence set is implicit: a sequence counts as seen iff it
/// lies below the cursor or sits in the reorder window. Emission only moves
/// the cursor forward, so the representation stays bounded while preserving
/// the duplicate-drop guarantee.
#[derive(Debug)]
pub struct StreamBuffer {
    id: StreamId,
    next_expected: SequenceNumber,
    pending: BTreeMap<SequenceNumber, Bytes>,
    pending_bytes: usize,
    final_sequence: Option<SequenceNumber>,
    state: StreamState,
    last_activity: Instant,
    assembled: Vec<Bytes>,
    assembled_bytes: usize,
}

impl StreamBuffer {
    /// Create an open buffer for `id`, stamped with `now`.
    #[must_use]
    pub fn new(id: StreamId, now: Instant) -> Self {
        Self {
            id,
            next_expected: SequenceNumber::ZERO,
            pending: BTreeMap::new(),
            pending_bytes: 0,
            final_sequence: None,
            state: StreamState::Open,
            last_activity: now,
            assembled: Vec::new(),
            assembled_bytes: 0,
        }
    }

    /// Identity of the stream this buffer assembles.
    #[must_use]
    pub const fn id(&self) -> &StreamId { &self.id }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> StreamState { self.state }

    /// Sequence the contiguous prefix expects next.
    #[must_use]
    pub const fn next_expected(&self) -> SequenceNumber { self.next_expected }

    /// Recorded end of stream, once a LAST has been admitted.
    #[must_use]
    pub const fn final_sequence(&self) -> Option<SequenceNumber> { self.final_sequence }

    /// Instant of the most recent admission, or of the terminal transition.
    #[must_use]
    pub const fn last_activity(&self) -> Instant { self.last_activity }

    /// Segments emitted so far, in order, retained for replay.
    #[must_use]
    pub fn assembled(&self) -> &[Bytes] { self.assembled.as_slice() }

    /// Total bytes across the emitted prefix.
    #[must_use]
    pub const fn assembled_bytes(&self) -> usize { self.assembled_bytes }

    /// Frames currently parked in the reorder window.
    #[must_use]
    pub fn pending_frames(&self) -> usize { self.pending.len() }

    /// Payload bytes currently parked in the reorder window.
    #[must_use]
    pub const fn pending_bytes(&self) -> usize { self.pending_bytes }

    /// Admit one frame, releasing any newly contiguous segments.
    ///
    /// `now` stamps activity for expiry accounting; the expiry transition
    /// itself belongs to [`expire_if_idle`](Self::expire_if_idle).
    pub fn admit(&mut self, frame: Frame, config: &ReassemblyConfig, now: Instant) -> Admission {
        debug_assert_eq!(
            frame.stream_id(),
            &self.id,
            "frame routed to the wrong stream buffer"
        );
        if self.state.is_closed() {
            return Admission::dropped(Disposition::Stale);
        }
        self.last_activity = now;

        let (_, sequence, kind, payload) = frame.into_parts();
        if matches!(kind, FrameKind::Abort) {
            let outcome = self.close(StreamOutcome::Failed(FailureReason::AbortedBySender), now);
            return Admission::closed(Disposition::Applied, outcome);
        }

        if sequence < self.next_expected || self.pending.contains_key(&sequence) {
            return Admission::dropped(Disposition::Duplicate);
        }
        if let Some(final_sequence) = self.final_sequence
            && sequence > final_sequence
        {
            let id = &self.id;
            warn!("stream {id}: frame at {sequence} lies beyond recorded end {final_sequence}");
            return Admission::dropped(Disposition::Stale);
        }
        if matches!(kind, FrameKind::Last) {
            if let Some(final_sequence) = self.final_sequence {
                let id = &self.id;
                warn!("stream {id}: second LAST at {sequence}, end already recorded at {final_sequence}");
                return Admission::dropped(Disposition::Duplicate);
            }
            self.record_final(sequence);
        }

        if sequence == self.next_expected {
            let mut emitted = Vec::new();
            self.release(payload, &mut emitted);
            self.drain_contiguous(&mut emitted);
            let closed = self.complete_if_finished(now);
            return Admission {
                disposition: Disposition::Applied,
                emitted,
                closed,
            };
        }

        if self.pending.len() + 1 > config.max_pending_frames.get()
            || self.pending_bytes + payload.len() > config.max_pending_bytes.get()
        {
            let outcome = self.close(StreamOutcome::Failed(FailureReason::BufferOverflow), now);
            return Admission::closed(Disposition::Overflow, outcome);
        }
        self.pending_bytes += payload.len();
        self.pending.insert(sequence, payload);
        Admission::dropped(Disposition::Parked)
    }

    /// Close an idle open stream as expired.
    ///
    /// Returns the terminal outcome when the transition happened; `None`
    /// when the buffer is already terminal or was active within `timeout`.
    /// Repeated sweeps therefore expire a stream exactly once.
    pub fn expire_if_idle(&mut self, timeout: Duration, now: Instant) -> Option<StreamOutcome> {
        if self.state.is_closed() || now.duration_since(self.last_activity) < timeout {
            return None;
        }
        Some(self.close(StreamOutcome::Failed(FailureReason::Expired), now))
    }

    /// Force-close an open stream (engine shutdown, application discard).
    ///
    /// `None` when the buffer was already terminal.
    pub fn force_close(&mut self, reason: FailureReason, now: Instant) -> Option<StreamOutcome> {
        if self.state.is_closed() {
            return None;
        }
        Some(self.close(StreamOutcome::Failed(reason), now))
    }

    /// Whether a terminal buffer has sat uncollected for `timeout`.
    #[must_use]
    pub fn lingering(&self, timeout: Duration, now: Instant) -> bool {
        self.state.is_closed() && now.duration_since(self.last_activity) >= timeout
    }

    /// Snapshot the terminal result; `None` while the stream is open.
    ///
    /// A complete stream yields its emitted prefix as one contiguous buffer.
    #[must_use]
    pub fn result(&self) -> Option<StreamResult> {
        match self.state {
            StreamState::Open => None,
            StreamState::Closed(StreamOutcome::Complete) => {
                Some(StreamResult::Complete(self.concatenated()))
            }
            StreamState::Closed(StreamOutcome::Failed(reason)) => {
                Some(StreamResult::Failed(reason))
            }
        }
    }

    fn record_final(&mut self, sequence: SequenceNumber) {
        self.final_sequence = Some(sequence);
        // Parked frames past the end can never join the prefix.
        let beyond = self.pending.split_off(&sequence.saturating_increment());
        if !beyond.is_empty() {
            let id = &self.id;
            let count = beyond.len();
            warn!("stream {id}: discarding {count} parked frames beyond recorded end {sequence}");
            self.pending_bytes -= beyond.values().map(Bytes::len).sum::<usize>();
        }
    }

    fn release(&mut self, payload: Bytes, emitted: &mut Vec<Bytes>) {
        self.next_expected = self.next_expected.saturating_increment();
        if payload.is_empty() {
            return;
        }
        self.assembled_bytes += payload.len();
        self.assembled.push(payload.clone());
        emitted.push(payload);
    }

    fn drain_contiguous(&mut self, emitted: &mut Vec<Bytes>) {
        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() != self.next_expected {
                break;
            }
            let payload = entry.remove();
            self.pending_bytes -= payload.len();
            self.release(payload, emitted);
        }
    }

    fn complete_if_finished(&mut self, now: Instant) -> Option<StreamOutcome> {
        let final_sequence = self.final_sequence?;
        (self.next_expected > final_sequence).then(|| self.close(StreamOutcome::Complete, now))
    }

    fn close(&mut self, outcome: StreamOutcome, now: Instant) -> StreamOutcome {
        debug_assert!(!self.state.is_closed(), "terminal states are final");
        self.pending.clear();
        self.pending_bytes = 0;
        if matches!(outcome, StreamOutcome::Failed(_)) {
            self.assembled.clear();
            self.assembled_bytes = 0;
        }
        self.state = StreamState::Closed(outcome);
        self.last_activity = now;
        outcome
    }

    /// Concatenate the emitted prefix into one contiguous buffer.
    fn concatenated(&self) -> Bytes {
        if let [only] = self.assembled.as_slice() {
            return only.clone();
        }
        let mut buf = BytesMut::with_capacity(self.assembled_bytes);
        for segment in &self.assembled {
            buf.extend_from_slice(segment);
        }
        buf.freeze()
    }
}
