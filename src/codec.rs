//! Wire format for frames carried inside bundle payloads.
//!
//! A frame travels as the payload of one bundle: a short magic marker, a
//! length-prefixed header naming the stream, sequence, and kind, and finally
//! the raw payload bytes. Receivers strip the metadata before handing the
//! payload to reassembly, so the format stays agnostic of the convergence
//! layer the bundle crossed.

use std::num::NonZeroUsize;

use bincode::{
    Decode,
    Encode,
    config,
    decode_from_slice,
    encode_to_vec,
    error::{DecodeError, EncodeError},
};
use bytes::Bytes;

use crate::{
    frame::{Frame, FrameKind, SequenceNumber},
    id::StreamId,
};

/// Magic prefix that marks a bundle payload as a stream frame.
pub const STREAM_MAGIC: &[u8; 4] = b"BSTM";

/// Frame metadata encoded ahead of the payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
struct WireHeader {
    stream_id: StreamId,
    sequence: SequenceNumber,
    kind: FrameKind,
}

/// Fixed bytes required to wrap a payload for `stream_id`, excluding the
/// payload itself.
///
/// The sequence is priced at its widest encoding, so the returned value is an
/// upper bound valid for every frame of the stream. Useful when budgeting
/// payload sizes against a convergence-layer MTU.
///
/// # Panics
///
/// Panics if encoding the worst-case header fails, which would indicate a
/// programmer error in the header definition.
#[must_use]
pub fn frame_overhead(stream_id: &StreamId) -> NonZeroUsize {
    let header = WireHeader {
        stream_id: stream_id.clone(),
        sequence: SequenceNumber::new(u64::MAX),
        kind: FrameKind::Abort,
    };
    let header_bytes = encode_to_vec(header, config::standard())
        .unwrap_or_else(|err| panic!("worst-case header encoding must be infallible: {err}"));
    let overhead = STREAM_MAGIC.len() + std::mem::size_of::<u16>() + header_bytes.len();
    NonZeroUsize::new(overhead)
        .unwrap_or_else(|| panic!("frame overhead must be non-zero (computed {overhead})"))
}

/// Encode a frame for transport by prefixing marker and header bytes.
///
/// The returned buffer layout is:
/// `[STREAM_MAGIC][u16 header_len][header bytes][frame payload]`.
///
/// # Errors
///
/// Returns a [`bincode::error::EncodeError`] if the header cannot be encoded.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, EncodeError> {
    let header = WireHeader {
        stream_id: frame.stream_id().clone(),
        sequence: frame.sequence(),
        kind: frame.kind(),
    };
    let header_bytes = encode_to_vec(header, config::standard())?;
    let header_len = u16::try_from(header_bytes.len())
        .map_err(|_| EncodeError::Other("frame header length must fit within u16::MAX"))?;

    let payload = frame.payload();
    let mut buf = Vec::with_capacity(
        STREAM_MAGIC.len() + std::mem::size_of::<u16>() + header_bytes.len() + payload.len(),
    );
    buf.extend_from_slice(STREAM_MAGIC);
    buf.extend_from_slice(&header_len.to_be_bytes());
    buf.extend_from_slice(&header_bytes);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Attempt to decode a bundle payload as a stream frame.
///
/// Returns `Ok(Some(frame))` when `payload` carries the stream marker and a
/// valid header, `Ok(None)` when the marker is absent (the bundle belongs to
/// some other consumer), or an error if the marker is present but decoding
/// fails.
///
/// Decoding performs no stream-level validation; feed the frame to the
/// engine, which rejects malformed ones with a structured error.
///
/// # Errors
///
/// Returns a [`DecodeError`] when the marker is present but the header bytes
/// cannot be decoded.
pub fn decode_frame(payload: &[u8]) -> Result<Option<Frame>, DecodeError> {
    let minimum_len = STREAM_MAGIC.len() + std::mem::size_of::<u16>();
    if payload.len() < minimum_len {
        return Ok(None);
    }

    let Some(prefix) = payload.get(..STREAM_MAGIC.len()) else {
        return Ok(None);
    };
    if prefix != STREAM_MAGIC {
        return Ok(None);
    }

    let header_len_offset = STREAM_MAGIC.len();
    let len_bytes = match (
        payload.get(header_len_offset),
        payload.get(header_len_offset + 1),
    ) {
        (Some(a), Some(b)) => [*a, *b],
        _ => {
            return Err(DecodeError::UnexpectedEnd {
                additional: minimum_len - payload.len(),
            });
        }
    };
    let header_len = u16::from_be_bytes(len_bytes) as usize;
    let header_start = header_len_offset + std::mem::size_of::<u16>();
    let header_end = header_start + header_len;

    let Some(header_bytes) = payload.get(header_start..header_end) else {
        return Err(DecodeError::UnexpectedEnd {
            additional: header_end.saturating_sub(payload.len()),
        });
    };

    let (header, consumed) =
        decode_from_slice::<WireHeader, _>(header_bytes, config::standard())?;
    if consumed != header_len {
        return Err(DecodeError::OtherString(
            "frame header length mismatch".to_string(),
        ));
    }

    let remainder = payload.get(header_end..).unwrap_or_default();
    let WireHeader {
        stream_id,
        sequence,
        kind,
    } = header;
    Ok(Some(Frame::new(
        stream_id,
        sequence,
        kind,
        Bytes::copy_from_slice(remainder),
    )))
}
