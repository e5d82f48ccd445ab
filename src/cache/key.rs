//! Cache keys for units of work.
//!
//! A key is the hex-encoded SHA-256 of a canonical JSON document built
//! from the fields that determine the solver's output. Sets are encoded
//! as sorted arrays, so tool ordering never changes the key. Paths, the
//! time budget and the force flag are deliberately not part of the key.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::RunConfig;

/// Bumped whenever the canonical encoding below changes.
const KEY_SCHEMA: u32 = 1;

/// Deterministic fingerprint of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

#[derive(Serialize)]
struct KeyMaterial<'a> {
    schema: u32,
    task: &'a str,
    index: u64,
    model: &'a str,
    enabled_tools: &'a BTreeSet<String>,
    output_types: &'a BTreeSet<String>,
}

impl CacheKey {
    /// Derives the key for a resolved configuration.
    pub fn for_config(config: &RunConfig) -> Self {
        let material = KeyMaterial {
            schema: KEY_SCHEMA,
            task: config.task(),
            index: config.index(),
            model: config.model(),
            enabled_tools: config.enabled_tools(),
            output_types: config.output_types(),
        };
        // Serializing borrowed strings, integers and string sets cannot fail.
        let canonical = serde_json::to_vec(&material).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigOptions;

    fn options() -> ConfigOptions {
        ConfigOptions::new()
            .with_task("demo")
            .with_data_file("demo/data.json")
            .with_model("gpt-4o")
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = CacheKey::for_config(&options().resolve().unwrap());
        let b = CacheKey::for_config(&options().resolve().unwrap());
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn test_tool_order_does_not_matter() {
        let a = options()
            .with_enabled_tools(["Python_Coder_Tool", "Google_Search_Tool"])
            .resolve()
            .unwrap();
        let b = options()
            .with_enabled_tools(["Google_Search_Tool", "Python_Coder_Tool", "Google_Search_Tool"])
            .resolve()
            .unwrap();
        assert_eq!(CacheKey::for_config(&a), CacheKey::for_config(&b));
    }

    #[test]
    fn test_key_fields_change_key() {
        let base = CacheKey::for_config(&options().resolve().unwrap());
        let variants = [
            options().with_index(1),
            options().with_task("other"),
            options().with_model("gpt-4o-mini"),
            options().with_enabled_tools(["Python_Coder_Tool"]),
            options().with_output_types(["final"]),
        ];
        for variant in variants {
            assert_ne!(CacheKey::for_config(&variant.resolve().unwrap()), base);
        }
    }

    #[test]
    fn test_non_key_fields_keep_key() {
        let base = CacheKey::for_config(&options().resolve().unwrap());
        let other = options()
            .with_max_time(5)
            .with_cache_dir("/tmp/elsewhere")
            .with_output_dir("/tmp/out")
            .with_force(true)
            .resolve()
            .unwrap();
        assert_eq!(CacheKey::for_config(&other), base);
    }
}
