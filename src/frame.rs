//! Frame model: the unit of stream transfer carried by one bundle.
//!
//! Each frame pairs a [`StreamId`] with a zero-based sequence number, a
//! role within the stream ([`FrameKind`]), and a payload slice. Frames are
//! consumed exactly once by the reassembly engine; payloads travel as
//! refcounted [`Bytes`] so retaining emitted slices for replay stays cheap.

use std::fmt;

use bincode::{Decode, Encode};
use bytes::Bytes;
use derive_more::{Display, From, Into};

use crate::{error::MalformedFrame, id::StreamId};

/// Position of a frame within its stream.
///
/// Assigned by the sender starting at zero; the receiver releases payloads
/// in strictly increasing sequence order. Wraparound is not handled on the
/// receive side: [`checked_increment`](Self::checked_increment) makes
/// exhaustion a sender-side construction error.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Encode,
    Decode,
    Display,
    From,
    Into,
)]
#[display("{_0}")]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// First sequence in any stream.
    pub const ZERO: Self = Self(0);

    /// Create a sequence number.
    #[must_use]
    pub const fn new(value: u64) -> Self { Self(value) }

    /// Return the numeric position.
    #[must_use]
    pub const fn get(self) -> u64 { self.0 }

    /// Next sequence, or `None` once the counter is exhausted.
    #[must_use]
    pub const fn checked_increment(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(next) => Some(Self(next)),
            None => None,
        }
    }

    /// Next sequence, clamping at the counter's maximum.
    #[must_use]
    pub const fn saturating_increment(self) -> Self { Self(self.0.saturating_add(1)) }
}

/// Role a frame plays within its stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub enum FrameKind {
    /// Opens the stream; always sequence zero and at most one per stream.
    First,
    /// Carries a middle slice of the stream.
    Data,
    /// Carries the final slice; its sequence is the stream's highest.
    Last,
    /// Terminates the stream abnormally at the sender's request.
    Abort,
}

impl FrameKind {
    /// Canonical uppercase name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::First => "FIRST",
            Self::Data => "DATA",
            Self::Last => "LAST",
            Self::Abort => "ABORT",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

/// One stream fragment extracted from a bundle payload.
///
/// # Examples
///
/// ```
/// use bundlestream::{Correlator, EndpointId, Frame, FrameKind, StreamId};
///
/// let id = StreamId::new(EndpointId::new("dtn://testing"), Correlator::new(1));
/// let frame = Frame::first(id, b"hello".as_slice());
/// assert_eq!(frame.kind(), FrameKind::First);
/// assert!(frame.is_valid());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    stream_id: StreamId,
    sequence: SequenceNumber,
    kind: FrameKind,
    payload: Bytes,
}

impl Frame {
    /// Construct a frame from its components.
    #[must_use]
    pub fn new(
        stream_id: StreamId,
        sequence: SequenceNumber,
        kind: FrameKind,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            stream_id,
            sequence,
            kind,
            payload: payload.into(),
        }
    }

    /// Construct the opening frame of a stream (sequence zero).
    #[must_use]
    pub fn first(stream_id: StreamId, payload: impl Into<Bytes>) -> Self {
        Self::new(stream_id, SequenceNumber::ZERO, FrameKind::First, payload)
    }

    /// Construct a middle frame.
    #[must_use]
    pub fn data(stream_id: StreamId, sequence: SequenceNumber, payload: impl Into<Bytes>) -> Self {
        Self::new(stream_id, sequence, FrameKind::Data, payload)
    }

    /// Construct the terminating frame carrying the final slice.
    #[must_use]
    pub fn last(stream_id: StreamId, sequence: SequenceNumber, payload: impl Into<Bytes>) -> Self {
        Self::new(stream_id, sequence, FrameKind::Last, payload)
    }

    /// Construct an abnormal-termination frame; the payload is empty.
    #[must_use]
    pub fn abort(stream_id: StreamId, sequence: SequenceNumber) -> Self {
        Self::new(stream_id, sequence, FrameKind::Abort, Bytes::new())
    }

    /// Identity of the stream this frame belongs to.
    #[must_use]
    pub const fn stream_id(&self) -> &StreamId { &self.stream_id }

    /// Position within the stream.
    #[must_use]
    pub const fn sequence(&self) -> SequenceNumber { self.sequence }

    /// Role within the stream.
    #[must_use]
    pub const fn kind(&self) -> FrameKind { self.kind }

    /// Payload bytes carried by this frame.
    #[must_use]
    pub const fn payload(&self) -> &Bytes { &self.payload }

    /// Consume the frame, returning its components.
    #[must_use]
    pub fn into_parts(self) -> (StreamId, SequenceNumber, FrameKind, Bytes) {
        (self.stream_id, self.sequence, self.kind, self.payload)
    }

    /// Check the frame against the sender contract.
    ///
    /// FIRST frames must open their stream at sequence zero, and every frame
    /// needs a non-empty source endpoint. ABORT frames are exempt from
    /// payload expectations and may appear at any sequence.
    ///
    /// # Errors
    ///
    /// Returns a [`MalformedFrame`] naming the violated rule; the engine
    /// rejects such frames before they reach any buffer.
    pub fn validate(&self) -> Result<(), MalformedFrame> {
        if self.stream_id.source().is_empty() {
            return Err(MalformedFrame::EmptySource {
                sequence: self.sequence,
            });
        }
        if matches!(self.kind, FrameKind::First) && self.sequence != SequenceNumber::ZERO {
            return Err(MalformedFrame::FirstNotAtZero {
                stream_id: self.stream_id.clone(),
                sequence: self.sequence,
            });
        }
        Ok(())
    }

    /// Whether [`validate`](Self::validate) passes.
    #[must_use]
    pub fn is_valid(&self) -> bool { self.validate().is_ok() }
}
