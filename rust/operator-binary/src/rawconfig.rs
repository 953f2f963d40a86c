//! Structurally-typed opaque configuration blobs.
//!
//! LogConfig sources, sinks and interceptors all carry a free-form inline configuration
//! body alongside a handful of fields the controller needs to interpret. Rather than
//! threading `serde_yaml::Value` through every call site, callers decode the fields they
//! care about into a strongly-typed shape, mutate it, and re-encode it back into the
//! common map — mirroring `cfg.Pack`/`cfg.Unpack` from the upstream project this was
//! distilled from.
use serde::{de::DeserializeOwned, Serialize};
use snafu::{ResultExt, Snafu};

/// A single inline configuration document, e.g. one source stanza or interceptor entry.
pub type RawConfig = serde_yaml::Mapping;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to decode config into target shape"))]
    Decode { source: serde_yaml::Error },
    #[snafu(display("failed to encode config from target shape"))]
    Encode { source: serde_yaml::Error },
    #[snafu(display("config document is not a mapping"))]
    NotAMapping,
}

/// Decode a raw config document into a strongly-typed shape.
pub fn decode<T: DeserializeOwned>(raw: &RawConfig) -> Result<T, Error> {
    serde_yaml::from_value(serde_yaml::Value::Mapping(raw.clone())).context(DecodeSnafu)
}

/// Encode a strongly-typed shape back into a raw config document.
pub fn encode<T: Serialize>(value: &T) -> Result<RawConfig, Error> {
    match serde_yaml::to_value(value).context(EncodeSnafu)? {
        serde_yaml::Value::Mapping(m) => Ok(m),
        serde_yaml::Value::Null => Ok(RawConfig::new()),
        _ => NotAMappingSnafu.fail(),
    }
}

/// Merge `overlay` into `base`, with `overlay`'s keys winning on conflict.
pub fn merge(base: &RawConfig, overlay: &RawConfig) -> RawConfig {
    let mut merged = base.clone();
    for (k, v) in overlay {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Remove and return the given keys from `raw`, leaving the rest untouched.
pub fn extract(raw: &mut RawConfig, keys: &[&str]) -> RawConfig {
    let mut extracted = RawConfig::new();
    for key in keys {
        let key_val = serde_yaml::Value::String((*key).to_string());
        if let Some(v) = raw.remove(&key_val) {
            extracted.insert(key_val, v);
        }
    }
    extracted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        #[serde(default)]
        count: u32,
    }

    #[test]
    fn encode_decode_round_trip() {
        let sample = Sample {
            name: "app".to_string(),
            count: 3,
        };
        let raw = encode(&sample).unwrap();
        let decoded: Sample = decode(&raw).unwrap();
        assert_eq!(sample, decoded);
    }

    #[test]
    fn merge_overlay_wins() {
        let base = encode(&Sample {
            name: "base".to_string(),
            count: 1,
        })
        .unwrap();
        let overlay = encode(&Sample {
            name: "overlay".to_string(),
            count: 2,
        })
        .unwrap();
        let merged: Sample = decode(&merge(&base, &overlay)).unwrap();
        assert_eq!(merged.name, "overlay");
        assert_eq!(merged.count, 2);
    }

    #[test]
    fn extract_pulls_named_keys_only() {
        let mut raw = encode(&Sample {
            name: "app".to_string(),
            count: 3,
        })
        .unwrap();
        let extracted = extract(&mut raw, &["name"]);
        assert!(!raw.contains_key("name"));
        assert!(raw.contains_key("count"));
        assert!(extracted.contains_key("name"));
    }
}
