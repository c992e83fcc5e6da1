//! Liveness readings reported by the HA subsystem.

use parking_lot::Mutex;

/// One snapshot of the HA readings.
///
/// While HA is disabled the latencies keep their last known values;
/// only the flag says whether they are current.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HaStats {
    /// Whether HA is currently armed on this host.
    pub enabled: bool,
    /// Write latency per statefile, in seconds.
    pub statefile_latencies: Vec<f64>,
    /// Network heartbeat latency in seconds.
    pub heartbeat_latency: Option<f64>,
    /// Control-plane API call latency in seconds.
    pub xapi_latency: Option<f64>,
}

/// Single-lock tracker the HA subsystem reports into.
#[derive(Default)]
pub struct HaStatsTracker {
    stats: Mutex<HaStats>,
}

impl HaStatsTracker {
    /// Tracker starting disabled with no readings.
    pub fn new() -> Self {
        HaStatsTracker::default()
    }

    /// Mark HA enabled and refresh every reading in one critical
    /// section, so a snapshot never mixes old and new latencies.
    pub fn enable_and_update(
        &self,
        statefile_latencies: &[f64],
        heartbeat_latency: f64,
        xapi_latency: f64,
    ) {
        let mut stats = self.stats.lock();
        stats.enabled = true;
        stats.statefile_latencies = statefile_latencies.to_vec();
        stats.heartbeat_latency = Some(heartbeat_latency);
        stats.xapi_latency = Some(xapi_latency);
    }

    /// Clear only the enabled flag. The latencies stay as last-known
    /// readings.
    pub fn disable(&self) {
        self.stats.lock().enabled = false;
    }

    /// Copy of the current readings.
    pub fn snapshot(&self) -> HaStats {
        self.stats.lock().clone()
    }
}
