//! Layered YAML loading: parse, overlay, secret scan, canonical hash.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::engine::EngineConfig;
use crate::secrets::reject_literal_secrets;

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    /// Typed engine settings with defaults for absent keys.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        EngineConfig::from_config_json(&self.config_json)
    }

    fn from_merged(config_json: Value) -> Result<Self> {
        reject_literal_secrets(&config_json)?;
        // serde_json's default Map is key-sorted, so compact output is canonical.
        let canonical_json =
            serde_json::to_string(&config_json).context("canonical json serialize failed")?;
        let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));
        Ok(Self {
            config_hash,
            canonical_json,
            config_json,
        })
    }
}

/// Files merge in argument order; later files override earlier ones.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let docs = paths
        .iter()
        .map(|p| std::fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}")))
        .collect::<Result<Vec<String>>>()?;
    merge_layers(docs.iter().map(String::as_str))
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    merge_layers(yaml_docs.iter().copied())
}

fn merge_layers<'a>(docs: impl IntoIterator<Item = &'a str>) -> Result<LoadedConfig> {
    let merged = docs
        .into_iter()
        .try_fold(Value::Object(Map::new()), |mut acc, raw| -> Result<Value> {
            let layer: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
            // empty document
            if !layer.is_null() {
                let layer = serde_json::to_value(layer).context("yaml->json conversion failed")?;
                overlay(&mut acc, layer);
            }
            Ok(acc)
        })?;
    LoadedConfig::from_merged(merged)
}

/// Objects merge key by key; anything else in `layer` replaces `base`.
fn overlay(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base_map), Value::Object(layer_map)) => {
            for (key, value) in layer_map {
                match base_map.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_layer_is_ignored() {
        let a = load_layered_yaml_from_strings(&["engine:\n  chunk_size: 5\n", ""]).unwrap();
        assert_eq!(a.config_json.pointer("/engine/chunk_size"), Some(&Value::from(5)));
    }

    #[test]
    fn overlay_keeps_siblings_and_replaces_lists() {
        let mut base = json!({ "engine": { "chunk_size": 20, "entities": ["FPT", "VCB"] } });
        overlay(&mut base, json!({ "engine": { "entities": ["HPG"] }, "store": {} }));
        assert_eq!(
            base,
            json!({ "engine": { "chunk_size": 20, "entities": ["HPG"] }, "store": {} })
        );
    }
}
