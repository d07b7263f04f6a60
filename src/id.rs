//! Identity types for logical streams.
//!
//! A stream is keyed by the pair of its source endpoint and a sender-chosen
//! correlator. The pair, not either half alone, identifies the stream: one
//! endpoint may interleave many concurrent streams, and correlators from
//! different endpoints never collide.

use std::{fmt, str::FromStr};

use bincode::{Decode, Encode};
use derive_more::{Display, From, Into};

use crate::error::StreamIdParseError;

/// Name of an addressable participant in the bundle transport.
///
/// Endpoint identifiers are opaque structured strings, typically URI-like
/// (`dtn://testing`). This crate never interprets their internal structure;
/// the only requirement is that frames carry a non-empty one.
///
/// # Examples
///
/// ```
/// use bundlestream::EndpointId;
/// let endpoint = EndpointId::new("dtn://testing");
/// assert_eq!(endpoint.as_str(), "dtn://testing");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, Display, From, Into)]
#[display("{_0}")]
pub struct EndpointId(String);

impl EndpointId {
    /// Create an endpoint identifier from its textual form.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    /// Return the textual form.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }

    /// Whether the identifier is empty, and therefore invalid in a frame.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl From<&str> for EndpointId {
    fn from(value: &str) -> Self { Self(value.to_owned()) }
}

/// Sender-chosen number disambiguating concurrent streams from one source.
///
/// Correlators are scoped to their source endpoint; reuse is safe only once
/// the receiver has collected or reaped the previous stream with the same
/// value.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, Display, From, Into,
)]
#[display("{_0}")]
pub struct Correlator(u64);

impl Correlator {
    /// Create a correlator.
    #[must_use]
    pub const fn new(value: u64) -> Self { Self(value) }

    /// Return the inner numeric value.
    #[must_use]
    pub const fn get(self) -> u64 { self.0 }
}

/// Identity of one logical stream: source endpoint plus correlator.
///
/// Two identities are equal iff both halves are equal, and the hash is
/// consistent with equality, so the id can key any standard map directly.
/// The canonical textual form is `"<source>#<correlator>"`, stable across
/// releases and suitable for logs and map-key surrogates.
///
/// # Examples
///
/// ```
/// use bundlestream::{Correlator, EndpointId, StreamId};
///
/// let id = StreamId::new(EndpointId::new("dtn://testing"), Correlator::new(123));
/// assert_eq!(id.to_string(), "dtn://testing#123");
/// assert_eq!(id, "dtn://testing#123".parse().expect("canonical form parses"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct StreamId {
    source: EndpointId,
    correlator: Correlator,
}

impl StreamId {
    /// Create a stream identity from its two halves.
    #[must_use]
    pub const fn new(source: EndpointId, correlator: Correlator) -> Self {
        Self { source, correlator }
    }

    /// Source endpoint half of the identity.
    #[must_use]
    pub const fn source(&self) -> &EndpointId { &self.source }

    /// Correlator half of the identity.
    #[must_use]
    pub const fn correlator(&self) -> Correlator { self.correlator }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source, self.correlator)
    }
}

impl FromStr for StreamId {
    type Err = StreamIdParseError;

    /// Parse the canonical `"<source>#<correlator>"` form.
    ///
    /// The split happens at the last `#` so endpoint names containing the
    /// character still round-trip through `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, correlator) = s
            .rsplit_once('#')
            .ok_or(StreamIdParseError::MissingSeparator)?;
        let correlator = correlator
            .parse::<u64>()
            .map_err(|_| StreamIdParseError::InvalidCorrelator)?;
        Ok(Self::new(EndpointId::new(source), Correlator::new(correlator)))
    }
}
