//! Decoded payload types and the metadata JSON schema.
//!
//! Both protocol versions describe datasources with the same JSON entry
//! shape; v1 keys entries by name and embeds the value, v2 lists entries
//! in a named array and carries values positionally in the binary section.

use std::collections::BTreeMap;

use serde::Deserialize;

use domstats::ds::{flex_bool, flex_f64, DataSourceSpec, DsOwner, DsType, Sample};

// ─── Decode Outcome ─────────────────────────────────────────────────

/// One successfully decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadUpdate {
    /// Producer-side unix timestamp of the sample batch.
    pub timestamp: u64,
    /// Every decoded reading, tagged with the entity it belongs to.
    pub samples: Vec<(DsOwner, Sample)>,
}

/// Result of one read against a live producer.
///
/// An unchanged payload is ordinary steady-state behaviour, not a failure,
/// so it is a value here rather than an error variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// The producer published new data since the last read.
    Update(PayloadUpdate),
    /// The payload checksum matches the previous read; nothing new.
    NoUpdate,
}

// ─── Wire Schema ────────────────────────────────────────────────────

pub(crate) fn default_owner() -> DsOwner {
    DsOwner::Host
}

fn nan() -> f64 {
    f64::NAN
}

fn neg_inf() -> f64 {
    f64::NEG_INFINITY
}

fn pos_inf() -> f64 {
    f64::INFINITY
}

/// One datasource entry as producers spell it in metadata JSON.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireDatasource {
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_owner")]
    pub owner: DsOwner,
    #[serde(rename = "type", default)]
    pub ds_type: DsType,
    #[serde(rename = "default", default, with = "flex_bool")]
    pub default_enabled: bool,
    // v2 metadata omits the value (it travels in the binary section).
    #[serde(default = "nan", with = "flex_f64")]
    pub value: f64,
    #[serde(default = "neg_inf", with = "flex_f64")]
    pub min: f64,
    #[serde(default = "pos_inf", with = "flex_f64")]
    pub max: f64,
    #[serde(default)]
    pub units: String,
}

impl WireDatasource {
    /// Pair the entry with its name and sampled value.
    pub(crate) fn into_sample(self, name: String, value: f64) -> (DsOwner, Sample) {
        let spec = DataSourceSpec {
            name,
            description: self.description,
            ds_type: self.ds_type,
            default_enabled: self.default_enabled,
            min: self.min,
            max: self.max,
            units: self.units,
        };
        (self.owner, Sample { spec, value })
    }
}

/// v1 payload body: timestamp plus entries keyed by datasource name.
#[derive(Debug, Deserialize)]
pub(crate) struct V1Body {
    #[serde(with = "flex_f64")]
    pub timestamp: f64,
    pub datasources: BTreeMap<String, WireDatasource>,
}

impl V1Body {
    pub(crate) fn into_update(self) -> PayloadUpdate {
        let timestamp = if self.timestamp > 0.0 {
            self.timestamp as u64
        } else {
            0
        };
        let samples = self
            .datasources
            .into_iter()
            .map(|(name, ds)| {
                let value = ds.value;
                ds.into_sample(name, value)
            })
            .collect();
        PayloadUpdate { timestamp, samples }
    }
}

/// One v2 metadata entry: the shared shape plus an explicit name, since
/// ordering against the binary values is positional.
#[derive(Debug, Deserialize)]
pub(crate) struct NamedDatasource {
    pub name: String,
    #[serde(flatten)]
    pub ds: WireDatasource,
}

/// v2 metadata document.
#[derive(Debug, Deserialize)]
pub(crate) struct V2Metadata {
    pub datasources: Vec<NamedDatasource>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_body_parses_string_spellings() {
        let json = r#"{
            "timestamp": "1700000000",
            "datasources": {
                "cpu_usage": {
                    "description": "CPU usage",
                    "owner": "host",
                    "type": "gauge",
                    "default": "true",
                    "value": "0.42",
                    "min": "0.0",
                    "max": "1.0",
                    "units": "(fraction)"
                }
            }
        }"#;
        let body: V1Body = serde_json::from_str(json).unwrap();
        let update = body.into_update();
        assert_eq!(update.timestamp, 1_700_000_000);
        assert_eq!(update.samples.len(), 1);
        let (owner, sample) = &update.samples[0];
        assert_eq!(*owner, DsOwner::Host);
        assert_eq!(sample.spec.name, "cpu_usage");
        assert_eq!(sample.value, 0.42);
        assert!(sample.spec.default_enabled);
    }

    #[test]
    fn owner_defaults_to_host() {
        let json = r#"{"timestamp": 1, "datasources": {"x": {"value": 1.5}}}"#;
        let body: V1Body = serde_json::from_str(json).unwrap();
        let update = body.into_update();
        assert_eq!(update.samples[0].0, DsOwner::Host);
    }

    #[test]
    fn v2_metadata_preserves_entry_order() {
        let json = r#"{"datasources": [
            {"name": "b", "owner": "vm 1111"},
            {"name": "a", "owner": "vm 2222"}
        ]}"#;
        let meta: V2Metadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.datasources[0].name, "b");
        assert_eq!(meta.datasources[1].name, "a");
        assert_eq!(meta.datasources[1].ds.owner, DsOwner::Guest("2222".into()));
    }
}
