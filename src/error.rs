//! Error taxonomy for ingestion, identity parsing, and outbound slicing.
//!
//! Stream failures (abort, overflow, expiry, shutdown) are not errors: they
//! surface as terminal [`StreamOutcome`](crate::delivery::StreamOutcome)
//! values on the delivery side. The types here cover operations that fail
//! before any stream state is touched.

use thiserror::Error;

use crate::{frame::SequenceNumber, id::StreamId};

/// A frame rejected by validation before reaching any buffer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MalformedFrame {
    /// A FIRST frame carried a non-zero sequence.
    #[error("FIRST frame for {stream_id} must carry sequence 0, found {sequence}")]
    FirstNotAtZero {
        /// Stream the frame claimed to open.
        stream_id: StreamId,
        /// Sequence the frame actually carried.
        sequence: SequenceNumber,
    },
    /// The source endpoint was empty.
    #[error("frame at sequence {sequence} carries an empty source endpoint")]
    EmptySource {
        /// Sequence of the offending frame.
        sequence: SequenceNumber,
    },
}

impl MalformedFrame {
    /// Canonical reason code used in logs and operator tooling.
    #[must_use]
    pub const fn code(&self) -> &'static str { "MALFORMED_FRAME" }
}

/// The engine has been shut down and accepts no further work.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("reassembly engine is shut down")]
pub struct EngineClosed;

/// Why [`ingest`](crate::engine::ReassemblyEngine::ingest) refused a frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    /// The frame failed validation; no stream state was touched.
    #[error("malformed frame: {0}")]
    Malformed(#[from] MalformedFrame),
    /// The engine is shut down.
    #[error(transparent)]
    Closed(#[from] EngineClosed),
}

/// Failure while slicing an outbound payload into frames.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SliceError {
    /// The sequence counter cannot represent the next frame.
    #[error("sequence counter exhausted after {last}")]
    SequenceOverflow {
        /// Last sequence successfully assigned.
        last: SequenceNumber,
    },
}

/// Failure parsing the canonical `"<source>#<correlator>"` form.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum StreamIdParseError {
    /// No `#` separator was present.
    #[error("stream id is missing the `#` separator")]
    MissingSeparator,
    /// The correlator half was not an unsigned 64-bit number.
    #[error("stream id correlator is not an unsigned 64-bit number")]
    InvalidCorrelator,
}
