#![doc(html_root_url = "https://docs.rs/bundlestream/latest")]
//! Public API for the `bundlestream` library.
//!
//! This crate reassembles logical byte streams from frames carried over
//! delay-tolerant bundle transports, where arrival order, duplication, and
//! long gaps are all routine rather than exceptional.

pub mod buffer;
pub mod codec;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod frame;
pub mod id;
pub mod metrics;
pub mod slicer;
pub mod table;

pub use buffer::{Admission, Disposition, StreamBuffer, StreamState};
pub use codec::{STREAM_MAGIC, decode_frame, encode_frame, frame_overhead};
pub use config::ReassemblyConfig;
pub use delivery::{
    FailureReason,
    StreamEvent,
    StreamOutcome,
    StreamResult,
    StreamSubscription,
    SubscriberToken,
};
pub use engine::ReassemblyEngine;
pub use error::{EngineClosed, IngestError, MalformedFrame, SliceError, StreamIdParseError};
pub use frame::{Frame, FrameKind, SequenceNumber};
pub use id::{Correlator, EndpointId, StreamId};
pub use metrics::{
    BYTES_EMITTED_TOTAL,
    FRAMES_REJECTED_TOTAL,
    FRAMES_TOTAL,
    STREAMS_CLOSED_TOTAL,
    STREAMS_TRACKED,
};
pub use slicer::{StreamBatch, StreamSlicer};
pub use table::{StreamTable, SweepReport};
