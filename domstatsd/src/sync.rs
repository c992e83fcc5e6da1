//! Moving RRDs between hosts and to disk: periodic backup, push and
//! migrate over the wire, the shutdown archive, and the legacy load
//! path used once at startup.
//!
//! Everything here is best-effort telemetry transport. A guest's
//! lifecycle operation must never fail because its metrics could not
//! travel, so the public entry points log failures at the point of
//! suppression and return normally.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing::{debug, info, warn};

use domstats::config::PoolConfig;
use domstats::consts::HOST_RRD_ID;

use crate::store::{RrdInfo, RrdStore};

// ─── Errors ─────────────────────────────────────────────────────────

/// Failures on the sync paths. These never escape the public entry
/// points; they exist so every suppression site logs a precise cause.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The HTTP client failed before a response arrived.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// The peer answered with a non-success status.
    #[error("peer answered with status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Reading or writing an on-disk archive failed.
    #[error("archive I/O failed: {0}")]
    Io(#[from] io::Error),

    /// An archive did not decode as a serialized RRD.
    #[error("archive encoding failed: {0}")]
    Codec(#[from] serde_json::Error),

    /// A pulled body's length prefix did not match its payload.
    #[error("length-prefixed body is malformed")]
    MalformedBody,
}

// ─── Peer Transport ─────────────────────────────────────────────────

/// The wire contract for moving serialized RRDs between hosts.
pub trait PeerTransport {
    /// Deliver one serialized RRD to a peer. `archive` distinguishes a
    /// shutdown archive from a live transfer.
    fn send_rrd(
        &self,
        address: &str,
        session: Option<&str>,
        uuid: &str,
        archive: bool,
        body: &[u8],
    ) -> Result<(), SyncError>;

    /// Pull a uuid's serialized RRD from a peer, authenticating with the
    /// shared pool secret. Returns the raw archive bytes.
    fn fetch_rrd(&self, address: &str, secret: &str, uuid: &str) -> Result<Vec<u8>, SyncError>;
}

/// [`PeerTransport`] over plain HTTP to the peer daemon.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Client with a bounded per-request timeout so a dead peer cannot
    /// wedge a shutdown or migration handler.
    pub fn new() -> Result<Self, SyncError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(HttpTransport { client })
    }
}

impl PeerTransport for HttpTransport {
    fn send_rrd(
        &self,
        address: &str,
        session: Option<&str>,
        uuid: &str,
        archive: bool,
        body: &[u8],
    ) -> Result<(), SyncError> {
        let mut url = format!("http://{address}/rrds/{uuid}?archive={archive}");
        if let Some(session) = session {
            url.push_str("&session_id=");
            url.push_str(session);
        }
        let response = self.client.put(url).body(body.to_vec()).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    fn fetch_rrd(&self, address: &str, secret: &str, uuid: &str) -> Result<Vec<u8>, SyncError> {
        let url = format!("http://{address}/rrds/{uuid}");
        let response = self
            .client
            .get(url)
            .header(reqwest::header::COOKIE, format!("pool_secret={secret}"))
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                status: status.as_u16(),
            });
        }
        decode_length_prefixed(&response.bytes()?)
    }
}

/// Split a `%08x` + newline length prefix off a pulled body and return
/// exactly the declared number of payload bytes.
pub fn decode_length_prefixed(body: &[u8]) -> Result<Vec<u8>, SyncError> {
    let newline = body
        .iter()
        .position(|b| *b == b'\n')
        .ok_or(SyncError::MalformedBody)?;
    let digits = std::str::from_utf8(&body[..newline]).map_err(|_| SyncError::MalformedBody)?;
    let declared =
        usize::from_str_radix(digits.trim(), 16).map_err(|_| SyncError::MalformedBody)?;
    let payload = &body[newline + 1..];
    if payload.len() < declared {
        return Err(SyncError::MalformedBody);
    }
    Ok(payload[..declared].to_vec())
}

// ─── Archive Codec ──────────────────────────────────────────────────

/// Serialize an entry for disk or the wire: JSON, gzip-compressed.
pub fn encode_archive(info: &RrdInfo) -> Result<Vec<u8>, SyncError> {
    let json = serde_json::to_vec(info)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// Decode either archive form: gzip, sniffed by its magic bytes, or the
/// plain JSON written by older daemons.
pub fn decode_archive(bytes: &[u8]) -> Result<RrdInfo, SyncError> {
    if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut json = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut json)?;
        Ok(serde_json::from_slice(&json)?)
    } else {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn gz_path(rrd_root: &Path, uuid: &str) -> PathBuf {
    rrd_root.join(format!("{uuid}.gz"))
}

fn plain_path(rrd_root: &Path, uuid: &str) -> PathBuf {
    rrd_root.join(uuid)
}

/// Write an entry's compressed archive under the rrd root.
pub fn write_archive(rrd_root: &Path, uuid: &str, info: &RrdInfo) -> Result<(), SyncError> {
    fs::create_dir_all(rrd_root)?;
    let bytes = encode_archive(info)?;
    fs::write(gz_path(rrd_root, uuid), bytes)?;
    Ok(())
}

/// Read an entry's archive, preferring the compressed form.
pub fn read_archive(rrd_root: &Path, uuid: &str) -> Result<RrdInfo, SyncError> {
    let bytes = match fs::read(gz_path(rrd_root, uuid)) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => fs::read(plain_path(rrd_root, uuid))?,
        Err(err) => return Err(err.into()),
    };
    decode_archive(&bytes)
}

// ─── Backup ─────────────────────────────────────────────────────────

/// Lock-acquisition policy for the periodic backup.
#[derive(Debug, Clone, Copy)]
pub struct BackupPolicy {
    /// Snapshot attempts before giving up on the cycle.
    pub attempts: u32,
    /// Pause between attempts.
    pub pause: Duration,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        BackupPolicy {
            attempts: 5,
            pause: Duration::from_secs(1),
        }
    }
}

/// Archive every live entry to local disk. Returns whether a snapshot
/// was taken.
///
/// The snapshot needs the store lock. Rather than queue behind a busy
/// store and starve the sampling path, try up to `policy.attempts`
/// times with `policy.pause` between tries, then skip the cycle with a
/// warning. Serialization and disk writes run after the lock is
/// released.
pub fn backup_all(store: &RrdStore, rrd_root: &Path, policy: BackupPolicy) -> bool {
    let mut snapshot = None;
    for attempt in 0..policy.attempts {
        if attempt > 0 {
            thread::sleep(policy.pause);
        }
        if let Some(taken) = store.try_snapshot_all() {
            snapshot = Some(taken);
            break;
        }
    }
    let Some((host, guests)) = snapshot else {
        warn!(
            attempts = policy.attempts,
            "store stayed busy, skipping this backup cycle"
        );
        return false;
    };

    if let Some(host) = host {
        if let Err(err) = write_archive(rrd_root, HOST_RRD_ID, &host) {
            warn!(error = %err, "host RRD backup failed");
        }
    }
    for (uuid, info) in guests {
        if let Err(err) = write_archive(rrd_root, &uuid, &info) {
            warn!(uuid = %uuid, error = %err, "guest RRD backup failed");
        }
    }
    true
}

// ─── Push / Migrate / Shutdown Archive ──────────────────────────────

/// Bring an archived guest RRD back into service: insert it into the
/// store when the guest runs here, otherwise forward it to the pool
/// master. Failures are logged and dropped.
#[allow(clippy::too_many_arguments)]
pub fn push_guest(
    store: &RrdStore,
    transport: &dyn PeerTransport,
    rrd_root: &Path,
    master_address: Option<&str>,
    session: Option<&str>,
    uuid: &str,
    domid: i64,
    on_localhost: bool,
) {
    let outcome = try_push_guest(
        store,
        transport,
        rrd_root,
        master_address,
        session,
        uuid,
        domid,
        on_localhost,
    );
    if let Err(err) = outcome {
        debug!(uuid = %uuid, error = %err, "guest RRD push abandoned");
    }
}

#[allow(clippy::too_many_arguments)]
fn try_push_guest(
    store: &RrdStore,
    transport: &dyn PeerTransport,
    rrd_root: &Path,
    master_address: Option<&str>,
    session: Option<&str>,
    uuid: &str,
    domid: i64,
    on_localhost: bool,
) -> Result<(), SyncError> {
    let mut info = read_archive(rrd_root, uuid)?;
    if on_localhost {
        info.domid = domid;
        store.replace_guest(uuid, info);
        return Ok(());
    }
    match master_address {
        Some(master) => try_send(transport, master, session, uuid, false, &info),
        None => {
            debug!(uuid = %uuid, "guest not here and no master to forward to, dropping push");
            Ok(())
        }
    }
}

/// Hand a migrating guest's RRD to the destination host. The entry
/// leaves the store either way; the destination rebuilds from samples
/// if the send is lost.
pub fn migrate_guest(
    store: &RrdStore,
    transport: &dyn PeerTransport,
    remote_address: &str,
    session: Option<&str>,
    uuid: &str,
) {
    let Some(info) = store.remove_guest(uuid) else {
        info!(uuid = %uuid, "no RRD to migrate, guest not in the store");
        return;
    };
    if let Err(err) = try_send(transport, remote_address, session, uuid, false, &info) {
        warn!(uuid = %uuid, remote = %remote_address, error = %err, "guest RRD migration send failed");
    }
}

/// Ship the host RRD to the pool master for durability across a daemon
/// shutdown. A no-op while the host slot is empty.
pub fn archive_host_rrd(
    store: &RrdStore,
    transport: &dyn PeerTransport,
    master_address: &str,
    session: Option<&str>,
    uuid: &str,
) {
    let Some(info) = store.snapshot_host() else {
        return;
    };
    if let Err(err) = try_send(transport, master_address, session, uuid, true, &info) {
        warn!(error = %err, "host RRD shutdown archive failed");
    }
}

fn try_send(
    transport: &dyn PeerTransport,
    address: &str,
    session: Option<&str>,
    uuid: &str,
    archive: bool,
    info: &RrdInfo,
) -> Result<(), SyncError> {
    let body = encode_archive(info)?;
    transport.send_rrd(address, session, uuid, archive, &body)
}

// ─── Remove / Load ──────────────────────────────────────────────────

/// Delete a guest's on-disk archive in both forms, ignoring absence.
pub fn remove_guest_archive(rrd_root: &Path, uuid: &str) {
    for path in [gz_path(rrd_root, uuid), plain_path(rrd_root, uuid)] {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not remove archived RRD");
            }
        }
    }
}

/// Legacy recovery path, run once at startup for the host RRD: the
/// local archive first, then a pull from the master when this host is a
/// pool member. Every failure is swallowed; the daemon simply starts
/// without history.
pub fn load_rrd(
    transport: &dyn PeerTransport,
    pool: &PoolConfig,
    rrd_root: &Path,
    uuid: &str,
) -> Option<RrdInfo> {
    match read_archive(rrd_root, uuid) {
        Ok(info) => return Some(info),
        Err(err) => debug!(uuid = %uuid, error = %err, "no usable local archive"),
    }
    if pool.is_master {
        return None;
    }
    let (Some(master), Some(secret)) = (pool.master_address.as_deref(), pool.secret.as_deref())
    else {
        return None;
    };
    match try_pull(transport, master, secret, uuid) {
        Ok(info) => Some(info),
        Err(err) => {
            debug!(uuid = %uuid, error = %err, "master pull failed, starting without history");
            None
        }
    }
}

fn try_pull(
    transport: &dyn PeerTransport,
    master: &str,
    secret: &str,
    uuid: &str,
) -> Result<RrdInfo, SyncError> {
    decode_archive(&transport.fetch_rrd(master, secret, uuid)?)
}
