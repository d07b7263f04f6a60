//! Behavioural tests for the per-stream reassembly state machine.

use std::{num::NonZeroUsize, time::Duration};

use bytes::Bytes;
use proptest::prelude::*;
use rstest::rstest;
use tokio::time::Instant;

use super::{Admission, Disposition, StreamBuffer, StreamState};
use crate::{
    config::ReassemblyConfig,
    delivery::{FailureReason, StreamOutcome, StreamResult},
    frame::{Frame, SequenceNumber},
    id::{Correlator, EndpointId, StreamId},
};

fn stream_id() -> StreamId {
    StreamId::new(EndpointId::new("dtn://testing"), Correlator::new(123))
}

fn config() -> ReassemblyConfig {
    ReassemblyConfig {
        max_pending_frames: NonZeroUsize::new(4).expect("non-zero"),
        max_pending_bytes: NonZeroUsize::new(64).expect("non-zero"),
        inactivity_timeout: Duration::from_secs(5),
        sweep_interval: Duration::from_secs(1),
    }
}

fn buffer() -> StreamBuffer { StreamBuffer::new(stream_id(), Instant::now()) }

fn admit(buffer: &mut StreamBuffer, frame: Frame) -> Admission {
    buffer.admit(frame, &config(), Instant::now())
}

fn collected(admissions: &[Admission]) -> Bytes {
    let mut bytes = Vec::new();
    for admission in admissions {
        for segment in &admission.emitted {
            bytes.extend_from_slice(segment);
        }
    }
    Bytes::from(bytes)
}

#[test]
fn in_order_frames_emit_immediately() {
    let mut buffer = buffer();
    let first = admit(&mut buffer, Frame::first(stream_id(), b"ab".as_slice()));
    assert_eq!(first.disposition, Disposition::Applied);
    assert_eq!(first.emitted, vec![Bytes::from_static(b"ab")]);
    assert_eq!(first.closed, None);

    let second = admit(
        &mut buffer,
        Frame::data(stream_id(), SequenceNumber::new(1), b"cd".as_slice()),
    );
    assert_eq!(second.emitted, vec![Bytes::from_static(b"cd")]);
    assert_eq!(buffer.next_expected(), SequenceNumber::new(2));
    assert_eq!(buffer.assembled_bytes(), 4);
}

#[test]
fn reversed_pair_round_trips_to_completion() {
    let mut buffer = buffer();
    let last = admit(
        &mut buffer,
        Frame::last(stream_id(), SequenceNumber::new(1), b"B".as_slice()),
    );
    assert_eq!(last.disposition, Disposition::Parked);
    assert!(last.emitted.is_empty());
    assert_eq!(buffer.state(), StreamState::Open);

    let first = admit(&mut buffer, Frame::first(stream_id(), b"A".as_slice()));
    assert_eq!(first.disposition, Disposition::Applied);
    assert_eq!(
        first.emitted,
        vec![Bytes::from_static(b"A"), Bytes::from_static(b"B")]
    );
    assert_eq!(first.closed, Some(StreamOutcome::Complete));
    assert_eq!(
        buffer.result(),
        Some(StreamResult::Complete(Bytes::from_static(b"AB")))
    );
}

#[test]
fn gap_holds_emission_until_the_opening_frame_arrives() {
    let mut buffer = buffer();
    let parked2 = admit(
        &mut buffer,
        Frame::data(stream_id(), SequenceNumber::new(2), b"c".as_slice()),
    );
    let parked1 = admit(
        &mut buffer,
        Frame::data(stream_id(), SequenceNumber::new(1), b"b".as_slice()),
    );
    assert_eq!(parked2.disposition, Disposition::Parked);
    assert_eq!(parked1.disposition, Disposition::Parked);
    assert!(buffer.assembled().is_empty());

    let first = admit(&mut buffer, Frame::first(stream_id(), b"a".as_slice()));
    assert_eq!(
        first.emitted,
        vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
            Bytes::from_static(b"c"),
        ]
    );
    assert_eq!(first.closed, None);

    let last = admit(
        &mut buffer,
        Frame::last(stream_id(), SequenceNumber::new(3), b"d".as_slice()),
    );
    assert_eq!(last.emitted, vec![Bytes::from_static(b"d")]);
    assert_eq!(last.closed, Some(StreamOutcome::Complete));
    assert_eq!(
        buffer.result(),
        Some(StreamResult::Complete(Bytes::from_static(b"abcd")))
    );
}

#[rstest]
#[case::below_cursor(SequenceNumber::ZERO)]
#[case::already_parked(SequenceNumber::new(2))]
fn repeated_sequences_drop_as_duplicates(#[case] sequence: SequenceNumber) {
    let mut buffer = buffer();
    admit(&mut buffer, Frame::first(stream_id(), b"a".as_slice()));
    admit(
        &mut buffer,
        Frame::data(stream_id(), SequenceNumber::new(2), b"c".as_slice()),
    );

    let duplicate = admit(
        &mut buffer,
        Frame::data(stream_id(), sequence, b"x".as_slice()),
    );
    assert_eq!(duplicate.disposition, Disposition::Duplicate);
    assert!(duplicate.emitted.is_empty());
    assert_eq!(buffer.assembled(), &[Bytes::from_static(b"a")]);
    assert_eq!(buffer.pending_frames(), 1);
}

#[test]
fn frame_count_ceiling_aborts_the_stream() {
    let mut buffer = buffer();
    for sequence in 5..9 {
        let parked = admit(
            &mut buffer,
            Frame::data(stream_id(), SequenceNumber::new(sequence), b"x".as_slice()),
        );
        assert_eq!(parked.disposition, Disposition::Parked);
    }

    let overflow = admit(
        &mut buffer,
        Frame::data(stream_id(), SequenceNumber::new(9), b"x".as_slice()),
    );
    assert_eq!(overflow.disposition, Disposition::Overflow);
    assert_eq!(
        overflow.closed,
        Some(StreamOutcome::Failed(FailureReason::BufferOverflow))
    );
    assert!(overflow.emitted.is_empty());
    assert_eq!(buffer.pending_frames(), 0);
    assert_eq!(
        buffer.result(),
        Some(StreamResult::Failed(FailureReason::BufferOverflow))
    );
}

#[test]
fn byte_ceiling_aborts_the_stream() {
    let mut buffer = buffer();
    let payload = vec![0_u8; 40];
    admit(
        &mut buffer,
        Frame::data(stream_id(), SequenceNumber::new(5), payload.clone()),
    );

    let overflow = admit(
        &mut buffer,
        Frame::data(stream_id(), SequenceNumber::new(6), payload),
    );
    assert_eq!(overflow.disposition, Disposition::Overflow);
    assert_eq!(
        overflow.closed,
        Some(StreamOutcome::Failed(FailureReason::BufferOverflow))
    );
}

#[test]
fn abort_discards_partial_progress() {
    let mut buffer = buffer();
    admit(&mut buffer, Frame::first(stream_id(), b"a".as_slice()));
    admit(
        &mut buffer,
        Frame::data(stream_id(), SequenceNumber::new(2), b"c".as_slice()),
    );

    let abort = admit(&mut buffer, Frame::abort(stream_id(), SequenceNumber::new(9)));
    assert_eq!(abort.disposition, Disposition::Applied);
    assert_eq!(
        abort.closed,
        Some(StreamOutcome::Failed(FailureReason::AbortedBySender))
    );
    assert!(buffer.assembled().is_empty());
    assert_eq!(buffer.pending_frames(), 0);
    assert_eq!(
        buffer.result(),
        Some(StreamResult::Failed(FailureReason::AbortedBySender))
    );
}

#[test]
fn abort_takes_precedence_over_a_later_last() {
    let mut buffer = buffer();
    admit(&mut buffer, Frame::first(stream_id(), b"a".as_slice()));
    admit(
        &mut buffer,
        Frame::data(stream_id(), SequenceNumber::new(1), b"b".as_slice()),
    );
    admit(&mut buffer, Frame::abort(stream_id(), SequenceNumber::new(2)));

    let late_last = admit(
        &mut buffer,
        Frame::last(stream_id(), SequenceNumber::new(2), b"c".as_slice()),
    );
    assert_eq!(late_last.disposition, Disposition::Stale);
    assert_eq!(
        buffer.state(),
        StreamState::Closed(StreamOutcome::Failed(FailureReason::AbortedBySender))
    );
}

#[test]
fn parked_last_defers_completion_until_the_gap_fills() {
    let mut buffer = buffer();
    admit(&mut buffer, Frame::first(stream_id(), b"a".as_slice()));
    let last = admit(
        &mut buffer,
        Frame::last(stream_id(), SequenceNumber::new(2), b"c".as_slice()),
    );
    assert_eq!(last.disposition, Disposition::Parked);
    assert_eq!(buffer.final_sequence(), Some(SequenceNumber::new(2)));
    assert_eq!(buffer.state(), StreamState::Open);

    let fill = admit(
        &mut buffer,
        Frame::data(stream_id(), SequenceNumber::new(1), b"b".as_slice()),
    );
    assert_eq!(
        fill.emitted,
        vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")]
    );
    assert_eq!(fill.closed, Some(StreamOutcome::Complete));
    assert_eq!(
        buffer.result(),
        Some(StreamResult::Complete(Bytes::from_static(b"abc")))
    );
}

#[test]
fn conflicting_second_last_is_dropped() {
    let mut buffer = buffer();
    admit(&mut buffer, Frame::first(stream_id(), b"a".as_slice()));
    admit(
        &mut buffer,
        Frame::last(stream_id(), SequenceNumber::new(5), b"z".as_slice()),
    );

    let conflicting = admit(
        &mut buffer,
        Frame::last(stream_id(), SequenceNumber::new(3), b"y".as_slice()),
    );
    assert_eq!(conflicting.disposition, Disposition::Duplicate);
    assert_eq!(buffer.final_sequence(), Some(SequenceNumber::new(5)));

    for (sequence, payload) in [(1, "b"), (2, "c"), (3, "d"), (4, "e")] {
        admit(
            &mut buffer,
            Frame::data(stream_id(), SequenceNumber::new(sequence), payload.as_bytes()),
        );
    }
    assert_eq!(
        buffer.result(),
        Some(StreamResult::Complete(Bytes::from_static(b"abcdez")))
    );
}

#[test]
fn frames_beyond_the_recorded_end_are_stale() {
    let mut buffer = buffer();
    admit(&mut buffer, Frame::first(stream_id(), b"a".as_slice()));
    admit(
        &mut buffer,
        Frame::last(stream_id(), SequenceNumber::new(3), b"d".as_slice()),
    );

    let beyond = admit(
        &mut buffer,
        Frame::data(stream_id(), SequenceNumber::new(9), b"x".as_slice()),
    );
    assert_eq!(beyond.disposition, Disposition::Stale);
    assert_eq!(buffer.pending_frames(), 1);
}

#[test]
fn recording_the_end_prunes_parked_frames_beyond_it() {
    let mut buffer = buffer();
    admit(
        &mut buffer,
        Frame::data(stream_id(), SequenceNumber::new(5), b"x".as_slice()),
    );
    admit(
        &mut buffer,
        Frame::last(stream_id(), SequenceNumber::new(2), b"c".as_slice()),
    );
    assert_eq!(buffer.pending_frames(), 1);
    assert_eq!(buffer.pending_bytes(), 1);

    admit(&mut buffer, Frame::first(stream_id(), b"a".as_slice()));
    let fill = admit(
        &mut buffer,
        Frame::data(stream_id(), SequenceNumber::new(1), b"b".as_slice()),
    );
    assert_eq!(fill.closed, Some(StreamOutcome::Complete));
    assert_eq!(
        buffer.result(),
        Some(StreamResult::Complete(Bytes::from_static(b"abc")))
    );
}

#[test]
fn empty_payloads_advance_the_cursor_without_segments() {
    let mut buffer = buffer();
    let first = admit(&mut buffer, Frame::first(stream_id(), Bytes::new()));
    assert_eq!(first.disposition, Disposition::Applied);
    assert!(first.emitted.is_empty());
    assert_eq!(buffer.next_expected(), SequenceNumber::new(1));

    let last = admit(
        &mut buffer,
        Frame::last(stream_id(), SequenceNumber::new(1), Bytes::new()),
    );
    assert!(last.emitted.is_empty());
    assert_eq!(last.closed, Some(StreamOutcome::Complete));
    assert_eq!(buffer.result(), Some(StreamResult::Complete(Bytes::new())));
}

#[test]
fn idle_stream_expires_exactly_once() {
    let start = Instant::now();
    let timeout = config().inactivity_timeout;
    let mut buffer = StreamBuffer::new(stream_id(), start);
    buffer.admit(
        Frame::first(stream_id(), b"a".as_slice()),
        &config(),
        start,
    );

    assert_eq!(buffer.expire_if_idle(timeout, start + timeout / 2), None);
    assert_eq!(buffer.state(), StreamState::Open);

    let expired = buffer.expire_if_idle(timeout, start + timeout);
    assert_eq!(expired, Some(StreamOutcome::Failed(FailureReason::Expired)));
    assert!(buffer.assembled().is_empty());

    // Later sweeps must not re-expire the stream.
    assert_eq!(buffer.expire_if_idle(timeout, start + timeout * 3), None);
    assert_eq!(
        buffer.result(),
        Some(StreamResult::Failed(FailureReason::Expired))
    );
}

#[test]
fn any_frame_refreshes_the_inactivity_clock() {
    let start = Instant::now();
    let timeout = config().inactivity_timeout;
    let mut buffer = StreamBuffer::new(stream_id(), start);
    buffer.admit(
        Frame::data(stream_id(), SequenceNumber::new(4), b"x".as_slice()),
        &config(),
        start + Duration::from_secs(3),
    );

    assert_eq!(buffer.expire_if_idle(timeout, start + timeout), None);
    assert!(
        buffer
            .expire_if_idle(timeout, start + Duration::from_secs(3) + timeout)
            .is_some()
    );
}

#[test]
fn closed_streams_ignore_frames_and_freeze_the_linger_clock() {
    let start = Instant::now();
    let timeout = config().inactivity_timeout;
    let mut buffer = StreamBuffer::new(stream_id(), start);
    buffer.force_close(FailureReason::AbortedBySender, start);

    let stale = buffer.admit(
        Frame::data(stream_id(), SequenceNumber::new(1), b"x".as_slice()),
        &config(),
        start + Duration::from_secs(4),
    );
    assert_eq!(stale.disposition, Disposition::Stale);
    assert!(buffer.lingering(timeout, start + timeout));
    assert!(!buffer.lingering(timeout, start + timeout / 2));
}

#[test]
fn force_close_applies_only_to_open_streams() {
    let now = Instant::now();
    let mut buffer = StreamBuffer::new(stream_id(), now);
    assert_eq!(
        buffer.force_close(FailureReason::EngineShutdown, now),
        Some(StreamOutcome::Failed(FailureReason::EngineShutdown))
    );
    assert_eq!(buffer.force_close(FailureReason::EngineShutdown, now), None);
}

#[test]
fn result_is_unavailable_while_open() {
    let mut buffer = buffer();
    admit(&mut buffer, Frame::first(stream_id(), b"a".as_slice()));
    assert_eq!(buffer.result(), None);
}

fn permutation_inputs() -> impl Strategy<Value = (Vec<Vec<u8>>, Vec<usize>)> {
    proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..16), 1..8).prop_flat_map(
        |chunks| {
            let frame_count = chunks.len().max(2);
            let order = Just((0..frame_count).collect::<Vec<usize>>()).prop_shuffle();
            (Just(chunks), order)
        },
    )
}

fn frames_for(chunks: &[Vec<u8>], id: &StreamId) -> Vec<Frame> {
    let mut frames = vec![Frame::first(id.clone(), chunks[0].clone())];
    for (offset, chunk) in chunks.iter().enumerate().skip(1) {
        let sequence = SequenceNumber::new(u64::try_from(offset).expect("offset fits u64"));
        if offset == chunks.len() - 1 {
            frames.push(Frame::last(id.clone(), sequence, chunk.clone()));
        } else {
            frames.push(Frame::data(id.clone(), sequence, chunk.clone()));
        }
    }
    if frames.len() == 1 {
        frames.push(Frame::last(id.clone(), SequenceNumber::new(1), Bytes::new()));
    }
    frames
}

proptest! {
    /// Arrival order never affects the bytes a stream emits.
    #[test]
    fn arrival_order_never_changes_output((chunks, order) in permutation_inputs()) {
        let roomy = ReassemblyConfig {
            max_pending_frames: NonZeroUsize::new(16).expect("non-zero"),
            max_pending_bytes: NonZeroUsize::new(4096).expect("non-zero"),
            ..ReassemblyConfig::default()
        };
        let id = stream_id();
        let frames = frames_for(&chunks, &id);
        let now = Instant::now();
        let mut buffer = StreamBuffer::new(id, now);

        let mut admissions = Vec::new();
        for index in &order {
            admissions.push(buffer.admit(frames[*index].clone(), &roomy, now));
        }

        prop_assert_eq!(buffer.state(), StreamState::Closed(StreamOutcome::Complete));
        let expected: Vec<u8> = chunks.concat();
        prop_assert_eq!(collected(&admissions), Bytes::from(expected.clone()));
        prop_assert_eq!(
            buffer.result(),
            Some(StreamResult::Complete(Bytes::from(expected)))
        );

        // Re-ingesting the whole set is idempotent: the stream is terminal
        // and nothing is emitted twice.
        for frame in frames {
            let replay = buffer.admit(frame, &roomy, now);
            prop_assert_eq!(replay.disposition, Disposition::Stale);
            prop_assert!(replay.emitted.is_empty());
        }
    }
}
