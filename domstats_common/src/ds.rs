//! Datasource model shared between the wire protocol and the state store.
//!
//! A *datasource* is one named metric stream published by a plugin. Each
//! sample on the wire carries the full descriptor alongside the value, so
//! the daemon can (re)construct series without any out-of-band schema.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Datasource Type ────────────────────────────────────────────────

/// How consecutive samples of a datasource combine into a series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DsType {
    /// Value is consumed as-is and resets after each read.
    #[default]
    Absolute,
    /// Value is a monotonic counter; the series stores its derivative.
    Rate,
    /// Value is an instantaneous level.
    Gauge,
}

impl fmt::Display for DsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DsType::Absolute => write!(f, "absolute"),
            DsType::Rate => write!(f, "rate"),
            DsType::Gauge => write!(f, "gauge"),
        }
    }
}

// ─── Owner ──────────────────────────────────────────────────────────

/// Entity a datasource belongs to, as tagged on the wire.
///
/// Wire forms are `host`, `vm <uuid>` and `sr <uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DsOwner {
    /// The host itself.
    Host,
    /// A guest domain, keyed by uuid.
    Guest(String),
    /// A storage repository, keyed by uuid.
    Sr(String),
}

/// Error returned when an owner tag does not match any known wire form.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognised datasource owner {tag:?}")]
pub struct OwnerParseError {
    /// The offending tag, as found on the wire.
    pub tag: String,
}

impl FromStr for DsOwner {
    type Err = OwnerParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "host" {
            return Ok(DsOwner::Host);
        }
        if let Some(uuid) = s.strip_prefix("vm ") {
            if !uuid.is_empty() {
                return Ok(DsOwner::Guest(uuid.to_string()));
            }
        }
        if let Some(uuid) = s.strip_prefix("sr ") {
            if !uuid.is_empty() {
                return Ok(DsOwner::Sr(uuid.to_string()));
            }
        }
        Err(OwnerParseError { tag: s.to_string() })
    }
}

impl fmt::Display for DsOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DsOwner::Host => write!(f, "host"),
            DsOwner::Guest(uuid) => write!(f, "vm {uuid}"),
            DsOwner::Sr(uuid) => write!(f, "sr {uuid}"),
        }
    }
}

impl TryFrom<String> for DsOwner {
    type Error = OwnerParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DsOwner> for String {
    fn from(owner: DsOwner) -> String {
        owner.to_string()
    }
}

// ─── Descriptor & Sample ────────────────────────────────────────────

/// Static description of one datasource, as declared by its producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceSpec {
    /// Name of the metric, unique within its owner.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Combination semantics for the series.
    #[serde(rename = "type", default)]
    pub ds_type: DsType,
    /// Whether the datasource is recorded without explicit enabling.
    #[serde(rename = "default", default, with = "flex_bool")]
    pub default_enabled: bool,
    /// Smallest admissible value.
    #[serde(default = "neg_inf", with = "flex_f64")]
    pub min: f64,
    /// Largest admissible value.
    #[serde(default = "pos_inf", with = "flex_f64")]
    pub max: f64,
    /// Unit label, free-form.
    #[serde(default)]
    pub units: String,
}

impl DataSourceSpec {
    /// A descriptor with the given name and every other field defaulted.
    pub fn named(name: impl Into<String>) -> Self {
        DataSourceSpec {
            name: name.into(),
            description: String::new(),
            ds_type: DsType::default(),
            default_enabled: false,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            units: String::new(),
        }
    }
}

fn neg_inf() -> f64 {
    f64::NEG_INFINITY
}

fn pos_inf() -> f64 {
    f64::INFINITY
}

/// One decoded reading: the descriptor it arrived with plus the value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Descriptor carried alongside the value.
    pub spec: DataSourceSpec,
    /// The sampled value.
    pub value: f64,
}

// ─── Serde Helpers ──────────────────────────────────────────────────

/// Float field that tolerates the wire's string spellings.
///
/// JSON has no representation for non-finite floats, and producers also
/// emit numeric strings. Serializes finite values as numbers and the rest
/// as `"inf"` / `"-inf"` / `"nan"`; accepts either form back.
pub mod flex_f64 {
    use serde::de::{self, Unexpected};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_finite() {
            s.serialize_f64(*v)
        } else if v.is_nan() {
            s.serialize_str("nan")
        } else if *v > 0.0 {
            s.serialize_str("inf")
        } else {
            s.serialize_str("-inf")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        struct FlexF64;

        impl de::Visitor<'_> for FlexF64 {
            type Value = f64;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a float, integer or numeric string")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
                Ok(v as f64)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
                Ok(v as f64)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
                match v.to_ascii_lowercase().as_str() {
                    "inf" | "infinity" => Ok(f64::INFINITY),
                    "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
                    "nan" => Ok(f64::NAN),
                    other => other
                        .parse()
                        .map_err(|_| E::invalid_value(Unexpected::Str(v), &self)),
                }
            }
        }

        d.deserialize_any(FlexF64)
    }
}

/// Bool field that also accepts the wire's `"true"` / `"false"` strings.
pub mod flex_bool {
    use serde::de::{self, Unexpected};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(v: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bool(*v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        struct FlexBool;

        impl de::Visitor<'_> for FlexBool {
            type Value = bool;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a boolean or \"true\"/\"false\"")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
                Ok(v)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
                if v.eq_ignore_ascii_case("true") {
                    Ok(true)
                } else if v.eq_ignore_ascii_case("false") {
                    Ok(false)
                } else {
                    Err(E::invalid_value(Unexpected::Str(v), &self))
                }
            }
        }

        d.deserialize_any(FlexBool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_wire_forms_round_trip() {
        for tag in ["host", "vm 4f7a", "sr 09ab-33"] {
            let owner: DsOwner = tag.parse().unwrap();
            assert_eq!(owner.to_string(), tag);
        }
    }

    #[test]
    fn owner_rejects_unknown_tags() {
        for tag in ["", "vm", "vm ", "sr ", "guest 4f7a", "HOST"] {
            assert!(tag.parse::<DsOwner>().is_err(), "accepted {tag:?}");
        }
    }

    #[test]
    fn owner_serde_uses_wire_form() {
        let json = serde_json::to_string(&DsOwner::Guest("abc".into())).unwrap();
        assert_eq!(json, "\"vm abc\"");
        let back: DsOwner = serde_json::from_str("\"sr s1\"").unwrap();
        assert_eq!(back, DsOwner::Sr("s1".into()));
    }

    #[test]
    fn spec_parses_wire_string_spellings() {
        let json = r#"{
            "name": "cpu_usage",
            "description": "CPU usage",
            "type": "gauge",
            "default": "true",
            "min": "0.0",
            "max": "inf",
            "units": "%"
        }"#;
        let spec: DataSourceSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.ds_type, DsType::Gauge);
        assert!(spec.default_enabled);
        assert_eq!(spec.min, 0.0);
        assert_eq!(spec.max, f64::INFINITY);
    }

    #[test]
    fn spec_defaults_cover_omitted_fields() {
        let spec: DataSourceSpec = serde_json::from_str(r#"{"name": "io_wait"}"#).unwrap();
        assert_eq!(spec.ds_type, DsType::Absolute);
        assert!(!spec.default_enabled);
        assert_eq!(spec.min, f64::NEG_INFINITY);
        assert_eq!(spec.max, f64::INFINITY);
        assert!(spec.units.is_empty());
    }

    #[test]
    fn non_finite_bounds_survive_serde() {
        let spec = DataSourceSpec::named("latency");
        let json = serde_json::to_string(&spec).unwrap();
        let back: DataSourceSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.min, f64::NEG_INFINITY);
        assert_eq!(back.max, f64::INFINITY);
    }
}
