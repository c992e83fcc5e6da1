//! The process-wide context: every table the daemon owns, constructed
//! once at startup and passed by reference. There are no ambient
//! globals; anything that needs state takes the context.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use domstats::config::DaemonConfig;

use crate::ha::HaStatsTracker;
use crate::registry::{Interdomain, LocalFiles, PluginRegistry, SamplingClock};
use crate::store::RrdStore;

/// Owner of all daemon state. Each component keeps its own lock, so the
/// context itself is shared freely across threads.
pub struct DaemonContext {
    /// Validated daemon configuration.
    pub config: DaemonConfig,
    /// Cycle timing shared with both registries.
    pub clock: Arc<SamplingClock>,
    /// The RRD state store.
    pub store: RrdStore,
    /// Registry of local file-backed plugins.
    pub local_plugins: PluginRegistry<LocalFiles>,
    /// Registry of interdomain page-backed plugins.
    pub interdomain_plugins: PluginRegistry<Interdomain>,
    /// HA liveness readings.
    pub ha: HaStatsTracker,
    memory_targets: Mutex<HashMap<i64, i64>>,
    cache_sr: Mutex<Option<String>>,
}

impl DaemonContext {
    /// Build the full context from a validated configuration.
    pub fn new(config: DaemonConfig) -> Self {
        let clock = Arc::new(SamplingClock::new(config.sampling.cycle_seconds));
        DaemonContext {
            store: RrdStore::new(),
            local_plugins: PluginRegistry::new(&config.paths.plugin_dir, Arc::clone(&clock)),
            interdomain_plugins: PluginRegistry::new(&config.paths.grant_dir, Arc::clone(&clock)),
            ha: HaStatsTracker::new(),
            memory_targets: Mutex::new(HashMap::new()),
            cache_sr: Mutex::new(None),
            clock,
            config,
        }
    }

    /// One sampling cycle: poll every producer of both kinds, fold the
    /// returned samples into the store, then mark the cycle boundary
    /// that registration deadlines derive from.
    pub fn sample_once(&self, timestamp: f64) {
        let mut samples = self.local_plugins.read_all();
        samples.extend(self.interdomain_plugins.read_all());
        self.store.fold_samples(timestamp, samples);
        self.clock.mark_cycle_end();
    }

    // ─── Cache SR Slot ───

    /// Record which storage repository caches guest disks.
    pub fn set_cache_sr(&self, sr_uuid: String) {
        *self.cache_sr.lock() = Some(sr_uuid);
    }

    /// Forget the caching storage repository.
    pub fn unset_cache_sr(&self) {
        *self.cache_sr.lock() = None;
    }

    /// The caching storage repository, if one is set.
    pub fn cache_sr(&self) -> Option<String> {
        self.cache_sr.lock().clone()
    }

    // ─── Memory Target Table ───

    /// Record the ballooning target for a domain, in bytes.
    pub fn set_guest_memory_target(&self, domid: i64, target: i64) {
        self.memory_targets.lock().insert(domid, target);
    }

    /// The recorded ballooning target for a domain.
    pub fn guest_memory_target(&self, domid: i64) -> Option<i64> {
        self.memory_targets.lock().get(&domid).copied()
    }

    /// Drop a domain's target on teardown, returning what was recorded.
    pub fn remove_guest_memory_target(&self, domid: i64) -> Option<i64> {
        self.memory_targets.lock().remove(&domid)
    }
}
