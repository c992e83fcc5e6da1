//! Minimal named-series container backing each RRD slot.
//!
//! Consolidation math (averaging, decay, archive rotation) lives outside
//! this daemon; what the store needs from a series is the contract below:
//! deep copy, add/remove a named source, query the latest value, fold in
//! one batch of samples, and serde serialization for archives.

use serde::{Deserialize, Serialize};

use domstats::consts::HEARTBEAT_WINDOW_SECS;
use domstats::ds::{flex_f64, DataSourceSpec, DsType};

/// One enabled datasource within a series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RrdSource {
    /// Metric name, unique within the series.
    pub name: String,
    /// Combination semantics, copied from the descriptor at enable time.
    #[serde(rename = "type")]
    pub ds_type: DsType,
    /// Seconds without a refresh before the value turns unknown.
    pub heartbeat: f64,
    /// Smallest admissible value.
    #[serde(with = "flex_f64")]
    pub min: f64,
    /// Largest admissible value.
    #[serde(with = "flex_f64")]
    pub max: f64,
    /// Unit label.
    pub units: String,
    /// Most recent accepted value; NaN while unknown.
    #[serde(with = "flex_f64")]
    pub last_value: f64,
    /// Unix time of the last accepted value.
    pub last_updated: f64,
}

/// A live series: the set of enabled sources plus their latest values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rrd {
    last_updated: f64,
    sources: Vec<RrdSource>,
}

impl Rrd {
    /// Empty series anchored at the given unix time.
    pub fn new(timestamp: f64) -> Self {
        Rrd {
            last_updated: timestamp,
            sources: Vec::new(),
        }
    }

    /// Unix time of the last fold.
    pub fn last_updated(&self) -> f64 {
        self.last_updated
    }

    /// Enable a datasource. Starts unknown (NaN) with the fixed heartbeat
    /// window; enabling an already-enabled name is a no-op.
    pub fn add_source(&mut self, spec: &DataSourceSpec) {
        if self.contains(&spec.name) {
            return;
        }
        self.sources.push(RrdSource {
            name: spec.name.clone(),
            ds_type: spec.ds_type,
            heartbeat: HEARTBEAT_WINDOW_SECS,
            min: spec.min,
            max: spec.max,
            units: spec.units.clone(),
            last_value: f64::NAN,
            last_updated: self.last_updated,
        });
    }

    /// Disable a datasource. Returns whether it was enabled.
    pub fn remove_source(&mut self, name: &str) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.name != name);
        self.sources.len() != before
    }

    /// Whether the named datasource is enabled.
    pub fn contains(&self, name: &str) -> bool {
        self.sources.iter().any(|s| s.name == name)
    }

    /// Names of every enabled datasource.
    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.name.as_str())
    }

    /// Number of enabled datasources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether the series has no enabled datasources.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Latest value of the named datasource, NaN while unknown.
    pub fn last_value(&self, name: &str) -> Option<f64> {
        self.sources
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.last_value)
    }

    /// Fold one batch of readings into the series.
    ///
    /// Enabled sources named in `values` take the new reading, except
    /// out-of-range readings which record as unknown. Enabled sources not
    /// named keep their value until the heartbeat window lapses, then turn
    /// unknown. Names without an enabled source are ignored.
    pub fn update(&mut self, timestamp: f64, values: &[(&str, f64)]) {
        self.last_updated = timestamp;
        for source in &mut self.sources {
            match values.iter().find(|(name, _)| *name == source.name) {
                Some((_, value)) => {
                    source.last_value = if *value >= source.min && *value <= source.max {
                        *value
                    } else {
                        f64::NAN
                    };
                    source.last_updated = timestamp;
                }
                None => {
                    if timestamp - source.last_updated > source.heartbeat {
                        source.last_value = f64::NAN;
                    }
                }
            }
        }
    }
}
