//! System-wide constants for the domstats workspace.
//!
//! Single source of truth for default paths, protocol bounds and sampling
//! parameters. Imported by all crates, no duplication permitted.

/// Default directory holding archived RRDs (one file per entity uuid).
pub const DEFAULT_RRD_ROOT: &str = "/var/lib/domstats/rrd";

/// Default directory where local plugins publish their payload files.
pub const DEFAULT_PLUGIN_DIR: &str = "/dev/shm/domstats";

/// Default directory where the toolstack materialises granted guest pages,
/// laid out as `<grant_dir>/<frontend-domid>/<plugin-name>`.
pub const DEFAULT_GRANT_DIR: &str = "/var/run/domstats/grants";

/// Default daemon configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/domstats/domstatsd.toml";

/// Archive identifier used for the host RRD (guests use their uuid).
pub const HOST_RRD_ID: &str = "host";

/// Length of one sampling cycle in seconds.
pub const DEFAULT_CYCLE_SECONDS: f64 = 5.0;

/// Interval between periodic RRD backups, in seconds.
pub const DEFAULT_BACKUP_INTERVAL_SECONDS: u64 = 86_400;

/// Seconds a datasource may go unrefreshed before its value turns unknown.
pub const HEARTBEAT_WINDOW_SECS: f64 = 300.0;

/// Upper bound on any single plugin payload, shared by both protocol
/// versions and by the file reader's pre-read size check.
pub const MAX_PAYLOAD_BYTES: usize = 1 << 20;

/// Upper bound on the datasource count a single payload may declare.
pub const MAX_DATASOURCES_PER_PAYLOAD: usize = 1024;

/// Returned by `next_reading` for identities that are not registered.
pub const NEXT_READING_UNREGISTERED: f64 = -1.0;

/// Runtime page size, as granted pages are page-granular.
pub fn page_size() -> usize {
    // SAFETY: sysconf with a valid name has no preconditions.
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz > 0 { sz as usize } else { 4096 }
}
