//! # Engine Configuration
//!
//! Loaded from a TOML file. Every section is optional:
//!
//! ```toml
//! [cache]
//! ttl_secs = 600
//!
//! [rules.containment]
//! DummyRoot = ["InventoryObject"]
//! Rack = ["GenericBoard"]
//!
//! [rules.relationships]
//! GenericPhysicalLink = [{ a = "GenericPort", b = "GenericPort" }]
//!
//! [rules.validators]
//! GenericPhysicalNode = "physicalNode"
//! ```
//!
//! A `[rules]` table replaces the seeded rule tables as a whole.

use crate::primitives::DEFAULT_CACHE_TTL_SECS;
use crate::rules::RuleSet;
use crate::types::TaxonError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Life expectancy of a cache slot, in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub rules: RuleSet,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            rules: RuleSet::seeded(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, TaxonError> {
        toml::from_str(contents).map_err(|e| TaxonError::Config(e.to_string()))
    }

    /// Read `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TaxonError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| TaxonError::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&contents)
            .map_err(|e| TaxonError::Config(format!("{}: {}", path.display(), e)))
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::EndpointPair;
    use tempfile::tempdir;

    #[test]
    fn empty_file_means_defaults() {
        let config = EngineConfig::from_toml_str("").expect("parse");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.cache_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn rules_table_replaces_seed() {
        let config = EngineConfig::from_toml_str(
            r#"
            [cache]
            ttl_secs = 5

            [rules.containment]
            Rack = ["GenericBoard"]

            [rules.relationships]
            Cable = [{ a = "PortA", b = "PortB" }]
            "#,
        )
        .expect("parse");

        assert_eq!(config.cache.ttl_secs, 5);
        assert_eq!(config.rules.containment.len(), 1);
        assert!(config.rules.containment["Rack"].contains("GenericBoard"));
        assert!(config.rules.relationships["Cable"].contains(&EndpointPair::new("PortA", "PortB")));
        assert!(config.rules.validators.is_empty());
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let result = EngineConfig::from_toml_str("[cache\nttl_secs = ");
        assert!(matches!(result, Err(TaxonError::Config(_))));
    }

    #[test]
    fn load_missing_and_present_files() {
        let dir = tempdir().expect("temp dir");
        let missing = EngineConfig::load(dir.path().join("absent.toml")).expect("load");
        assert_eq!(missing, EngineConfig::default());

        let path = dir.path().join("taxon.toml");
        fs::write(&path, "[cache]\nttl_secs = 30\n").expect("write");
        let loaded = EngineConfig::load(&path).expect("load");
        assert_eq!(loaded.cache.ttl_secs, 30);
        assert_eq!(loaded.rules, RuleSet::seeded());
    }
}
