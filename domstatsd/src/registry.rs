//! Generic plugin registry: one engine, one instantiation per producer
//! kind.
//!
//! A producer registers an identity plus the metadata its reader needs,
//! and from then on the sampling loop polls it every cycle. Reads are
//! best-effort: one misbehaving plugin never stalls the others.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use domstats::consts::NEXT_READING_UNREGISTERED;
use domstats::ds::{DsOwner, Sample};
use domstats_protocol::{
    FileReader, PageReader, PayloadReader, ProtocolError, ProtocolResult, ProtocolVersion,
    ReadOutcome,
};

// ─── Errors ─────────────────────────────────────────────────────────

/// Errors surfaced by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The identity has no record in this registry.
    #[error("plugin {id} is not registered")]
    NotRegistered {
        /// Rendered plugin identity.
        id: String,
    },

    /// The registration request named a protocol tag nobody speaks.
    #[error("{tag:?} is not a supported protocol version")]
    UnknownProtocolVersion {
        /// The tag as the producer sent it.
        tag: String,
    },

    /// A validation failure from the protocol layer, kept precise so
    /// callers can distinguish marker, length and checksum trouble.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Any other read failure, normalized to a plain description.
    #[error("reading plugin {id} failed: {detail}")]
    Read {
        /// Rendered plugin identity.
        id: String,
        /// Human-readable cause.
        detail: String,
    },
}

// ─── Producer Kinds ─────────────────────────────────────────────────

/// One family of metric producers sharing an identity scheme, a
/// registration payload and a transport.
pub trait ProducerKind {
    /// Identity a producer registers under.
    type Id: Clone + Eq + Hash + fmt::Display + Send;
    /// Registration details the reader is built from.
    type Metadata: Send;
    /// Transport-specific payload reader.
    type Reader: PayloadReader + Send;

    /// Label for log lines.
    const KIND: &'static str;

    /// Build a reader for a fresh registration. Construction sets up
    /// whatever the transport needs but must not read a payload yet.
    fn make_reader(
        root: &Path,
        id: &Self::Id,
        meta: &Self::Metadata,
        version: ProtocolVersion,
    ) -> ProtocolResult<Self::Reader>;
}

/// Plugins that publish into `<plugin_dir>/<name>` on the local host.
pub struct LocalFiles;

/// Publish cadence a local plugin declares at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingFrequency {
    /// One payload every five seconds. The only cadence we accept.
    FiveSeconds,
}

impl SamplingFrequency {
    /// The cadence in seconds.
    pub fn seconds(self) -> f64 {
        match self {
            SamplingFrequency::FiveSeconds => 5.0,
        }
    }
}

/// Registration details for a local file-backed plugin.
#[derive(Debug, Clone)]
pub struct LocalMeta {
    /// Declared publish cadence.
    pub frequency: SamplingFrequency,
}

impl ProducerKind for LocalFiles {
    type Id = String;
    type Metadata = LocalMeta;
    type Reader = FileReader;

    const KIND: &'static str = "local";

    fn make_reader(
        root: &Path,
        id: &String,
        _meta: &LocalMeta,
        version: ProtocolVersion,
    ) -> ProtocolResult<FileReader> {
        Ok(FileReader::open(root.join(id), version))
    }
}

/// Producers running in another domain, publishing over granted pages.
pub struct Interdomain;

/// Identity of an interdomain plugin: the granted region's name plus the
/// domain that granted it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterdomainId {
    /// Region name chosen by the producer.
    pub name: String,
    /// Domain id of the granting side.
    pub frontend_domid: u32,
}

impl fmt::Display for InterdomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (domid {})", self.name, self.frontend_domid)
    }
}

/// Registration details for an interdomain plugin.
#[derive(Debug, Clone)]
pub struct InterdomainMeta {
    /// Grant references for the shared region, in page order.
    pub page_refs: Vec<u32>,
}

impl ProducerKind for Interdomain {
    type Id = InterdomainId;
    type Metadata = InterdomainMeta;
    type Reader = PageReader;

    const KIND: &'static str = "interdomain";

    fn make_reader(
        root: &Path,
        id: &InterdomainId,
        meta: &InterdomainMeta,
        version: ProtocolVersion,
    ) -> ProtocolResult<PageReader> {
        PageReader::map(root, id.frontend_domid, &id.name, &meta.page_refs, version)
    }
}

// ─── Sampling Clock ─────────────────────────────────────────────────

/// Cycle timing shared across registries. The sampling loop marks the
/// end of each cycle; producers align their publishes to the deadline
/// this hands back at registration.
pub struct SamplingClock {
    cycle_len: f64,
    last_cycle_end: Mutex<Instant>,
}

impl SamplingClock {
    /// Clock for the given cycle length in seconds.
    pub fn new(cycle_seconds: f64) -> Self {
        SamplingClock {
            cycle_len: cycle_seconds,
            last_cycle_end: Mutex::new(Instant::now()),
        }
    }

    /// Seconds left until the next reading, clamped to `[0, cycle_len]`.
    pub fn seconds_until_next_reading(&self) -> f64 {
        let elapsed = self.last_cycle_end.lock().elapsed().as_secs_f64();
        (self.cycle_len - elapsed).clamp(0.0, self.cycle_len)
    }

    /// Record that a sampling cycle just finished.
    pub fn mark_cycle_end(&self) {
        *self.last_cycle_end.lock() = Instant::now();
    }

    /// Configured cycle length in seconds.
    pub fn cycle_len(&self) -> f64 {
        self.cycle_len
    }
}

// ─── Registry ───────────────────────────────────────────────────────

struct PluginRecord<K: ProducerKind> {
    meta: K::Metadata,
    reader: Arc<Mutex<K::Reader>>,
}

/// The registry proper. The table lock is held only for lookups and
/// insertions; payload I/O runs against a per-plugin reader handle after
/// the table lock is released.
pub struct PluginRegistry<K: ProducerKind> {
    root: PathBuf,
    clock: Arc<SamplingClock>,
    plugins: Mutex<HashMap<K::Id, PluginRecord<K>>>,
}

impl<K: ProducerKind> PluginRegistry<K> {
    /// Registry rooted at the directory producers of this kind publish
    /// under.
    pub fn new(root: impl Into<PathBuf>, clock: Arc<SamplingClock>) -> Self {
        PluginRegistry {
            root: root.into(),
            clock,
            plugins: Mutex::new(HashMap::new()),
        }
    }

    /// Admit a producer under the given protocol tag and return the
    /// seconds until the next scheduled reading.
    ///
    /// Re-registering a present identity is a no-op that still returns
    /// the deadline.
    pub fn register(
        &self,
        id: K::Id,
        meta: K::Metadata,
        tag: &str,
    ) -> Result<f64, RegistryError> {
        let version =
            ProtocolVersion::from_tag(tag).ok_or_else(|| RegistryError::UnknownProtocolVersion {
                tag: tag.to_string(),
            })?;
        let mut plugins = self.plugins.lock();
        if !plugins.contains_key(&id) {
            let reader = K::make_reader(&self.root, &id, &meta, version)?;
            info!(kind = K::KIND, plugin = %id, version = %version, "registered plugin");
            plugins.insert(
                id,
                PluginRecord {
                    meta,
                    reader: Arc::new(Mutex::new(reader)),
                },
            );
        }
        Ok(self.clock.seconds_until_next_reading())
    }

    /// Run the reader's cleanup hook and drop the record. Unknown
    /// identities are ignored.
    ///
    /// Cleanup runs outside the table lock, so a read racing this window
    /// may still complete once; callers accept that.
    pub fn deregister(&self, id: &K::Id) {
        let reader = {
            let plugins = self.plugins.lock();
            match plugins.get(id) {
                Some(record) => Arc::clone(&record.reader),
                None => return,
            }
        };
        reader.lock().cleanup();
        if self.plugins.lock().remove(id).is_some() {
            info!(kind = K::KIND, plugin = %id, "deregistered plugin");
        }
    }

    /// Whether the identity currently has a record.
    pub fn is_registered(&self, id: &K::Id) -> bool {
        self.plugins.lock().contains_key(id)
    }

    /// Seconds until the next reading for a registered identity, or the
    /// [`NEXT_READING_UNREGISTERED`] sentinel.
    pub fn next_reading(&self, id: &K::Id) -> f64 {
        if self.is_registered(id) {
            self.clock.seconds_until_next_reading()
        } else {
            NEXT_READING_UNREGISTERED
        }
    }

    /// Inspect a registered plugin's metadata.
    pub fn with_metadata<R>(
        &self,
        id: &K::Id,
        f: impl FnOnce(&K::Metadata) -> R,
    ) -> Option<R> {
        self.plugins.lock().get(id).map(|record| f(&record.meta))
    }

    /// Read one plugin's current payload.
    ///
    /// Marker, length and checksum failures are logged and re-raised
    /// precisely; everything else is normalized to [`RegistryError::Read`].
    pub fn read_one(&self, id: &K::Id) -> Result<ReadOutcome, RegistryError> {
        let reader = {
            let plugins = self.plugins.lock();
            let record = plugins.get(id).ok_or_else(|| RegistryError::NotRegistered {
                id: id.to_string(),
            })?;
            Arc::clone(&record.reader)
        };
        let outcome = reader.lock().read_payload();
        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(kind = K::KIND, plugin = %id, error = %err, "plugin read failed");
                match err {
                    precise @ (ProtocolError::InvalidHeaderString
                    | ProtocolError::InvalidLengthField { .. }
                    | ProtocolError::InvalidChecksum) => Err(RegistryError::Protocol(precise)),
                    other => Err(RegistryError::Read {
                        id: id.to_string(),
                        detail: other.to_string(),
                    }),
                }
            }
        }
    }

    /// Poll every registered plugin once and collect the samples that
    /// arrived this cycle.
    ///
    /// Failures are swallowed per plugin after [`PluginRegistry::read_one`]
    /// has logged them; the fan-out is best-effort, never all-or-nothing.
    pub fn read_all(&self) -> Vec<(DsOwner, Sample)> {
        let ids: Vec<K::Id> = self.plugins.lock().keys().cloned().collect();
        let mut samples = Vec::new();
        for id in ids {
            match self.read_one(&id) {
                Ok(ReadOutcome::Update(update)) => samples.extend(update.samples),
                Ok(ReadOutcome::NoUpdate) => {}
                Err(_) => {}
            }
        }
        samples
    }
}
