//! Protocol v2: binary header, CRC32 checksums, positional values.
//!
//! All integers are big-endian. Layout:
//!
//! ```text
//! offset  0   "DATASOURCES" + NUL   12-byte magic
//! offset 12   u32                   CRC32 of the data section
//! offset 16   u32                   CRC32 of the metadata JSON
//! offset 20   u32                   datasource count n
//! offset 24   u64                   unix timestamp        ┐ data
//! offset 32   n x f64 bit patterns  values, in order      ┘ section
//! ...         u32                   metadata length m
//! ...         m bytes               metadata JSON
//! ```
//!
//! Values correlate with metadata entries by position. Metadata changes
//! rarely, so a reader that saw the data checksum before skips everything
//! past the data section and reports [`ReadOutcome::NoUpdate`]. Trailing
//! page padding is ignored.

use domstats::consts::{MAX_DATASOURCES_PER_PAYLOAD, MAX_PAYLOAD_BYTES};

use crate::crc::crc32;
use crate::error::{ProtocolError, ProtocolResult};
use crate::view::ByteView;
use crate::wire::{PayloadUpdate, ReadOutcome, V2Metadata};

/// 11 marker characters plus a NUL pad.
pub const MAGIC: &[u8; 12] = b"DATASOURCES\0";

/// Stateful v2 decoder.
#[derive(Debug, Default)]
pub struct V2Decoder {
    last_checksum: Option<u32>,
}

impl V2Decoder {
    /// Decoder with no previous read.
    pub fn new() -> Self {
        V2Decoder::default()
    }

    /// Decode one payload buffer.
    pub fn decode(&mut self, buf: &[u8]) -> ProtocolResult<ReadOutcome> {
        let mut view = ByteView::new(buf);

        let magic = view
            .take(MAGIC.len())
            .map_err(|_| ProtocolError::InvalidHeaderString)?;
        if magic != MAGIC {
            return Err(ProtocolError::InvalidHeaderString);
        }
        let data_checksum = view
            .read_u32_be()
            .map_err(|_| ProtocolError::InvalidHeaderString)?;
        let metadata_checksum = view
            .read_u32_be()
            .map_err(|_| ProtocolError::InvalidHeaderString)?;
        let count = view
            .read_u32_be()
            .map_err(|_| ProtocolError::InvalidHeaderString)? as usize;

        if count > MAX_DATASOURCES_PER_PAYLOAD {
            return Err(ProtocolError::InvalidLengthField {
                declared: count,
                available: MAX_DATASOURCES_PER_PAYLOAD,
            });
        }

        // Data section: timestamp plus the value array, covered by the
        // first checksum.
        let data_start = view.position();
        let timestamp = view.read_u64_be()?;
        let values_bytes = view.take(count * 8)?;
        let data_end = view.position();

        if crc32(&buf[data_start..data_end]) != data_checksum {
            return Err(ProtocolError::InvalidChecksum);
        }
        if self.last_checksum == Some(data_checksum) {
            return Ok(ReadOutcome::NoUpdate);
        }

        let metadata_len = view.read_u32_be()? as usize;
        if metadata_len > MAX_PAYLOAD_BYTES {
            return Err(ProtocolError::InvalidLengthField {
                declared: metadata_len,
                available: MAX_PAYLOAD_BYTES,
            });
        }
        let metadata = view.take(metadata_len)?;
        if crc32(metadata) != metadata_checksum {
            return Err(ProtocolError::InvalidChecksum);
        }

        let meta: V2Metadata =
            serde_json::from_slice(metadata).map_err(|e| ProtocolError::Payload(e.to_string()))?;
        if meta.datasources.len() != count {
            return Err(ProtocolError::Payload(format!(
                "metadata lists {} datasources, header declares {count}",
                meta.datasources.len()
            )));
        }

        let samples = meta
            .datasources
            .into_iter()
            .zip(values_bytes.chunks_exact(8))
            .map(|(named, bits)| {
                let value = f64::from_bits(u64::from_be_bytes([
                    bits[0], bits[1], bits[2], bits[3], bits[4], bits[5], bits[6], bits[7],
                ]));
                named.ds.into_sample(named.name, value)
            })
            .collect();

        self.last_checksum = Some(data_checksum);
        Ok(ReadOutcome::Update(PayloadUpdate { timestamp, samples }))
    }
}
