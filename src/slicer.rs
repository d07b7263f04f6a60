//! Outbound helper that slices application payloads into stream frames.
//!
//! [`StreamSlicer`] is the sender-side mirror of the engine: it chunks a
//! payload into FIRST/DATA/LAST frames under a fixed payload cap, tagging
//! every frame with a [`StreamId`] built from the slicer's source endpoint
//! and a fresh correlator. The struct tracks correlators internally so
//! callers can open streams without worrying about identifier collisions.

use std::{
    num::NonZeroUsize,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;

use crate::{
    error::SliceError,
    frame::{Frame, SequenceNumber},
    id::{Correlator, EndpointId, StreamId},
};

/// Splits payloads into frame-sized pieces for transmission.
#[derive(Debug)]
pub struct StreamSlicer {
    source: EndpointId,
    max_frame_payload: NonZeroUsize,
    next_correlator: AtomicU64,
}

impl StreamSlicer {
    /// Create a slicer that caps frame payloads at `max_frame_payload` bytes.
    #[must_use]
    pub const fn new(source: EndpointId, max_frame_payload: NonZeroUsize) -> Self {
        Self::starting_at(source, max_frame_payload, Correlator::new(0))
    }

    /// Create a slicer whose first stream uses a specific [`Correlator`].
    #[must_use]
    pub const fn starting_at(
        source: EndpointId,
        max_frame_payload: NonZeroUsize,
        start_at: Correlator,
    ) -> Self {
        Self {
            source,
            max_frame_payload,
            next_correlator: AtomicU64::new(start_at.get()),
        }
    }

    /// Source endpoint stamped on every stream this slicer opens.
    #[must_use]
    pub const fn source(&self) -> &EndpointId { &self.source }

    /// Maximum frame payload size in bytes.
    #[must_use]
    pub const fn max_frame_payload(&self) -> NonZeroUsize { self.max_frame_payload }

    /// Generate and return the next [`Correlator`].
    ///
    /// # Panics
    ///
    /// Panics if the correlator counter reaches `u64::MAX` and overflows.
    /// Callers should treat correlators as unique for the lifetime of the
    /// slicer.
    #[must_use]
    pub fn next_correlator(&self) -> Correlator {
        let previous = self
            .next_correlator
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_add(1)
            })
            .unwrap_or_else(|_| panic!("correlator counter exhausted"));
        Correlator::new(previous)
    }

    /// Slice `payload` into frames, opening a fresh stream.
    ///
    /// # Errors
    ///
    /// Returns [`SliceError::SequenceOverflow`] if the payload needs more
    /// than `u64::MAX` frames.
    pub fn slice(&self, payload: impl Into<Bytes>) -> Result<StreamBatch, SliceError> {
        let correlator = self.next_correlator();
        self.slice_with_correlator(correlator, payload)
    }

    /// Slice `payload` into frames for the stream named by `correlator`.
    ///
    /// The batch always opens with FIRST at sequence zero and ends with a
    /// LAST frame; a payload that fits one frame is followed by an empty
    /// LAST so receivers can recognise the end.
    ///
    /// # Errors
    ///
    /// Returns [`SliceError::SequenceOverflow`] if the payload needs more
    /// than `u64::MAX` frames.
    pub fn slice_with_correlator(
        &self,
        correlator: Correlator,
        payload: impl Into<Bytes>,
    ) -> Result<StreamBatch, SliceError> {
        let stream_id = StreamId::new(self.source.clone(), correlator);
        let max = self.max_frame_payload.get();
        let mut remaining: Bytes = payload.into();

        let opening = remaining.split_to(remaining.len().min(max));
        let mut frames = vec![Frame::first(stream_id.clone(), opening)];
        let mut sequence = SequenceNumber::ZERO;
        while !remaining.is_empty() {
            sequence = sequence
                .checked_increment()
                .ok_or(SliceError::SequenceOverflow { last: sequence })?;
            let chunk = remaining.split_to(remaining.len().min(max));
            frames.push(if remaining.is_empty() {
                Frame::last(stream_id.clone(), sequence, chunk)
            } else {
                Frame::data(stream_id.clone(), sequence, chunk)
            });
        }
        if frames.len() == 1 {
            frames.push(Frame::last(stream_id.clone(), SequenceNumber::new(1), Bytes::new()));
        }

        Ok(StreamBatch::new(stream_id, frames))
    }

    /// Build an ABORT frame terminating the stream named by `correlator`.
    ///
    /// `sequence` should be the next position the sender would have used;
    /// receivers terminate on ABORT regardless of its position.
    #[must_use]
    pub fn abort_frame(&self, correlator: Correlator, sequence: SequenceNumber) -> Frame {
        Frame::abort(StreamId::new(self.source.clone(), correlator), sequence)
    }
}

/// Collection of frames produced for a single stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamBatch {
    stream_id: StreamId,
    frames: Vec<Frame>,
}

impl StreamBatch {
    fn new(stream_id: StreamId, frames: Vec<Frame>) -> Self {
        debug_assert!(frames.len() >= 2, "stream batches carry FIRST and LAST");
        Self { stream_id, frames }
    }

    /// Return the [`StreamId`] shared by all frames.
    #[must_use]
    pub const fn stream_id(&self) -> &StreamId { &self.stream_id }

    /// Return the frames as a slice, in sequence order.
    #[must_use]
    pub fn frames(&self) -> &[Frame] { self.frames.as_slice() }

    /// Number of frames in the batch.
    #[expect(
        clippy::len_without_is_empty,
        reason = "batches are guaranteed non-empty"
    )]
    #[must_use]
    pub fn len(&self) -> usize { self.frames.len() }

    /// Consume the batch, returning all frames.
    #[must_use]
    pub fn into_frames(self) -> Vec<Frame> { self.frames }
}

impl IntoIterator for StreamBatch {
    type Item = Frame;
    type IntoIter = std::vec::IntoIter<Frame>;

    fn into_iter(self) -> Self::IntoIter { self.frames.into_iter() }
}
