//! The capability a registered producer exposes to the sampling loop.

use crate::error::ProtocolResult;
use crate::wire::ReadOutcome;

/// Fetches a producer's current payload bytes and decodes them.
///
/// Implementations keep whatever per-producer state the transport needs
/// (an open mapping, the last accepted checksum) and must never block
/// beyond the I/O of a single fetch.
pub trait PayloadReader {
    /// Read and decode the producer's current payload.
    fn read_payload(&mut self) -> ProtocolResult<ReadOutcome>;

    /// Release resources shared with the producer.
    ///
    /// After cleanup every further read fails. A read already in flight
    /// when cleanup runs may still complete against the old resources;
    /// callers tolerate at most one such read.
    fn cleanup(&mut self);
}
