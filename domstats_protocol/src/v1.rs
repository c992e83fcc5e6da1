//! Protocol v1: text header, MD5 checksum, JSON body.
//!
//! Layout:
//!
//! ```text
//! DATASOURCES\n          12 bytes, fixed marker
//! <32 hex chars>\n       MD5 of the JSON body
//! <8 hex chars>\n        body length in bytes
//! <JSON body>            length as declared above
//! ```
//!
//! Anything after the body (page padding from shared-memory producers) is
//! ignored. Validation runs header first, then the length bound, then the
//! checksum; the body is only parsed once all three hold.

use domstats::consts::{MAX_DATASOURCES_PER_PAYLOAD, MAX_PAYLOAD_BYTES};

use crate::error::{ProtocolError, ProtocolResult};
use crate::view::ByteView;
use crate::wire::{ReadOutcome, V1Body};

const MARKER: &[u8; 12] = b"DATASOURCES\n";
const CHECKSUM_HEX: usize = 32;
const LENGTH_HEX: usize = 8;

/// Stateful v1 decoder.
#[derive(Debug, Default)]
pub struct V1Decoder {
    last_checksum: Option<String>,
}

impl V1Decoder {
    /// Decoder with no previous read.
    pub fn new() -> Self {
        V1Decoder::default()
    }

    /// Decode one payload buffer.
    pub fn decode(&mut self, buf: &[u8]) -> ProtocolResult<ReadOutcome> {
        let mut view = ByteView::new(buf);

        let marker = view
            .take(MARKER.len())
            .map_err(|_| ProtocolError::InvalidHeaderString)?;
        if marker != MARKER {
            return Err(ProtocolError::InvalidHeaderString);
        }

        let checksum = parse_hex_line::<CHECKSUM_HEX>(&mut view)?;
        let length_digits = parse_hex_line::<LENGTH_HEX>(&mut view)?;
        let declared = usize::from_str_radix(&length_digits, 16)
            .map_err(|_| ProtocolError::InvalidHeaderString)?;

        if declared > MAX_PAYLOAD_BYTES {
            return Err(ProtocolError::InvalidLengthField {
                declared,
                available: MAX_PAYLOAD_BYTES,
            });
        }
        let body = view.take(declared)?;

        let digest = format!("{:x}", md5::compute(body));
        if digest != checksum {
            return Err(ProtocolError::InvalidChecksum);
        }
        if self.last_checksum.as_deref() == Some(checksum.as_str()) {
            return Ok(ReadOutcome::NoUpdate);
        }

        let body: V1Body =
            serde_json::from_slice(body).map_err(|e| ProtocolError::Payload(e.to_string()))?;
        if body.datasources.len() > MAX_DATASOURCES_PER_PAYLOAD {
            return Err(ProtocolError::InvalidLengthField {
                declared: body.datasources.len(),
                available: MAX_DATASOURCES_PER_PAYLOAD,
            });
        }

        self.last_checksum = Some(checksum);
        Ok(ReadOutcome::Update(body.into_update()))
    }
}

/// Consume `N` hex digits plus a terminating newline; lowercases the digits.
fn parse_hex_line<const N: usize>(view: &mut ByteView<'_>) -> ProtocolResult<String> {
    let line = view
        .take(N + 1)
        .map_err(|_| ProtocolError::InvalidHeaderString)?;
    if line[N] != b'\n' || !line[..N].iter().all(u8::is_ascii_hexdigit) {
        return Err(ProtocolError::InvalidHeaderString);
    }
    // Hex digits are ASCII, checked above.
    let digits = std::str::from_utf8(&line[..N]).map_err(|_| ProtocolError::InvalidHeaderString)?;
    Ok(digits.to_ascii_lowercase())
}
