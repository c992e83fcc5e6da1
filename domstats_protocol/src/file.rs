//! Payload reader for plugins that publish into a local file.

use std::fs;
use std::path::{Path, PathBuf};

use domstats::consts::MAX_PAYLOAD_BYTES;

use crate::error::{ProtocolError, ProtocolResult};
use crate::reader::PayloadReader;
use crate::version::{PayloadDecoder, ProtocolVersion};
use crate::wire::ReadOutcome;

/// Reads `<plugin_dir>/<id>` afresh on every sampling cycle.
///
/// The file is re-opened per read, so a producer that atomically replaces
/// it (the normal write-then-rename pattern) is always seen whole.
#[derive(Debug)]
pub struct FileReader {
    path: PathBuf,
    decoder: PayloadDecoder,
}

impl FileReader {
    /// Reader for the given payload file. No I/O happens here; the file
    /// does not need to exist until the first read.
    pub fn open(path: impl Into<PathBuf>, version: ProtocolVersion) -> Self {
        FileReader {
            path: path.into(),
            decoder: PayloadDecoder::new(version),
        }
    }

    /// The payload file this reader polls.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PayloadReader for FileReader {
    fn read_payload(&mut self) -> ProtocolResult<ReadOutcome> {
        let len = fs::metadata(&self.path)?.len();
        if len > MAX_PAYLOAD_BYTES as u64 {
            return Err(ProtocolError::InvalidLengthField {
                declared: len as usize,
                available: MAX_PAYLOAD_BYTES,
            });
        }
        let bytes = fs::read(&self.path)?;
        self.decoder.decode(&bytes)
    }

    fn cleanup(&mut self) {
        // Nothing shared to release; the file belongs to the producer.
    }
}
