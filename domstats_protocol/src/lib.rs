//! # domstats Plugin Wire Protocol
//!
//! Decoders and payload readers for the two revisions of the plugin wire
//! protocol, shared by every producer the daemon samples.
//!
//! ## Transport vs. format
//!
//! A *reader* fetches raw bytes (a local payload file, or a mapped run of
//! pages granted by a guest domain); a *decoder* validates and parses
//! them. Readers own a decoder and surface one call,
//! [`PayloadReader::read_payload`].
//!
//! ```text
//! ┌──────────────┐   bytes   ┌────────────────┐   ReadOutcome
//! │ FileReader   ├──────────►│ PayloadDecoder ├───────────────►
//! │ PageReader   │           │   (v1 | v2)    │
//! └──────────────┘           └────────────────┘
//! ```
//!
//! ## Validation contract
//!
//! Payload bytes are foreign and unsynchronised, so both decoders treat
//! the buffer as hostile: header marker first, then declared lengths
//! against what is actually present (and against the global payload
//! bound), then checksums, and only then content. Every access goes
//! through a bounds-checked [`view::ByteView`]; out-of-range never
//! panics, it reports [`ProtocolError::InvalidLengthField`].
//!
//! An unchanged checksum is not an error. It decodes to
//! [`ReadOutcome::NoUpdate`], the ordinary idle answer of a slow
//! producer.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use domstats_protocol::{FileReader, PayloadReader, ProtocolVersion, ReadOutcome};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut reader = FileReader::open("/dev/shm/domstats/my-plugin", ProtocolVersion::V2);
//! match reader.read_payload()? {
//!     ReadOutcome::Update(update) => println!("{} samples", update.samples.len()),
//!     ReadOutcome::NoUpdate => {}
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod crc;
pub mod error;
pub mod file;
pub mod pages;
pub mod reader;
pub mod v1;
pub mod v2;
pub mod version;
pub mod view;
pub mod wire;

pub use crc::crc32;
pub use error::{ProtocolError, ProtocolResult};
pub use file::FileReader;
pub use pages::PageReader;
pub use reader::PayloadReader;
pub use v1::V1Decoder;
pub use v2::V2Decoder;
pub use version::{PayloadDecoder, ProtocolVersion};
pub use wire::{PayloadUpdate, ReadOutcome};
