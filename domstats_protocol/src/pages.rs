//! Payload reader for interdomain plugins publishing through granted pages.
//!
//! A guest-side producer grants a run of pages to the control domain; the
//! toolstack materialises them as `<grant_dir>/<frontend-domid>/<name>`.
//! The reader maps that region read-only once at registration and decodes
//! from a private snapshot on every cycle, so a foreign write racing the
//! read can at worst fail the checksum, never tear a decoded value.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use domstats::consts::{page_size, MAX_PAYLOAD_BYTES};

use crate::error::{ProtocolError, ProtocolResult};
use crate::reader::PayloadReader;
use crate::version::{PayloadDecoder, ProtocolVersion};
use crate::wire::ReadOutcome;

/// Reader over a mapped run of granted pages.
#[derive(Debug)]
pub struct PageReader {
    region: PathBuf,
    mmap: Option<Mmap>,
    snapshot: Vec<u8>,
    decoder: PayloadDecoder,
}

impl PageReader {
    /// Map `refs.len()` pages of `<grant_dir>/<frontend_domid>/<name>`.
    ///
    /// The grant list bounds the mapping; a backing region smaller than
    /// the granted run is rejected, as is a run larger than the payload
    /// bound allows.
    pub fn map(
        grant_dir: &Path,
        frontend_domid: u32,
        name: &str,
        refs: &[u32],
        version: ProtocolVersion,
    ) -> ProtocolResult<Self> {
        if refs.is_empty() {
            return Err(ProtocolError::Io {
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "empty grant reference list",
                ),
            });
        }
        let page = page_size();
        let region_len = refs
            .len()
            .checked_mul(page)
            .filter(|len| *len <= MAX_PAYLOAD_BYTES.max(page))
            .ok_or(ProtocolError::InvalidLengthField {
                declared: refs.len(),
                available: MAX_PAYLOAD_BYTES / page,
            })?;

        let region = grant_dir.join(frontend_domid.to_string()).join(name);
        let file = File::open(&region)?;
        let backing_len = file.metadata()?.len();
        if backing_len < region_len as u64 {
            return Err(ProtocolError::InvalidLengthField {
                declared: region_len,
                available: backing_len as usize,
            });
        }

        // Read-only mapping; the producer side keeps write access.
        let mmap = unsafe { MmapOptions::new().len(region_len).map(&file)? };
        Ok(PageReader {
            region,
            mmap: Some(mmap),
            snapshot: Vec::with_capacity(region_len),
            decoder: PayloadDecoder::new(version),
        })
    }

    /// The materialised region backing this reader.
    pub fn region(&self) -> &Path {
        &self.region
    }
}

impl PayloadReader for PageReader {
    fn read_payload(&mut self) -> ProtocolResult<ReadOutcome> {
        let Some(mmap) = self.mmap.as_ref() else {
            return Err(ProtocolError::Io {
                source: std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "plugin pages already unmapped",
                ),
            });
        };
        let len = mmap.len();
        if self.snapshot.len() < len {
            self.snapshot.resize(len, 0);
        }
        // Copy the foreign pages into the snapshot before decoding; the
        // owner may rewrite them mid-read.
        unsafe {
            std::ptr::copy_nonoverlapping(mmap.as_ptr(), self.snapshot.as_mut_ptr(), len);
        }
        self.decoder.decode(&self.snapshot[..len])
    }

    fn cleanup(&mut self) {
        if self.mmap.take().is_some() {
            tracing::debug!(region = %self.region.display(), "unmapped plugin pages");
        }
    }
}
