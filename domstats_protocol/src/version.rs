//! Protocol version tags and version dispatch.

use std::fmt;

use crate::error::ProtocolResult;
use crate::v1::V1Decoder;
use crate::v2::V2Decoder;
use crate::wire::ReadOutcome;

/// Wire protocol revisions a producer can register with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// Text header, MD5 checksum, JSON body.
    V1,
    /// Binary header, CRC32 checksums, positional values.
    V2,
}

impl ProtocolVersion {
    /// Parse a registration tag. Unknown tags are rejected at the
    /// registration boundary, never defaulted.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "v1" => Some(ProtocolVersion::V1),
            "v2" => Some(ProtocolVersion::V2),
            _ => None,
        }
    }

    /// Canonical tag string.
    pub fn tag(&self) -> &'static str {
        match self {
            ProtocolVersion::V1 => "V1",
            ProtocolVersion::V2 => "V2",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A stateful decoder for whichever protocol revision the producer chose.
///
/// Holds the last accepted checksum so an unchanged payload surfaces as
/// [`ReadOutcome::NoUpdate`].
#[derive(Debug)]
pub enum PayloadDecoder {
    /// Protocol v1 state.
    V1(V1Decoder),
    /// Protocol v2 state.
    V2(V2Decoder),
}

impl PayloadDecoder {
    /// Fresh decoder for the given revision.
    pub fn new(version: ProtocolVersion) -> Self {
        match version {
            ProtocolVersion::V1 => PayloadDecoder::V1(V1Decoder::new()),
            ProtocolVersion::V2 => PayloadDecoder::V2(V2Decoder::new()),
        }
    }

    /// The revision this decoder speaks.
    pub fn version(&self) -> ProtocolVersion {
        match self {
            PayloadDecoder::V1(_) => ProtocolVersion::V1,
            PayloadDecoder::V2(_) => ProtocolVersion::V2,
        }
    }

    /// Decode one payload buffer.
    pub fn decode(&mut self, buf: &[u8]) -> ProtocolResult<ReadOutcome> {
        match self {
            PayloadDecoder::V1(d) => d.decode(buf),
            PayloadDecoder::V2(d) => d.decode(buf),
        }
    }
}
