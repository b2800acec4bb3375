//! Configuration types for the resolver runtime.
//!
//! This module defines the settings that shape registration and resolution:
//! the duplicate-mapper policy, the per-call deadline, and the opt-in
//! cross-call cache. Settings are read from `hypermap.toml` with defaults
//! applied for missing keys.

use crate::error::{HypermapError, Result};
use crate::registry::MapperRegistry;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default file name looked up by [`ResolverConfig::load`] callers.
pub const CONFIG_FILE_NAME: &str = "hypermap.toml";

/// How the registry treats a second mapper with an already registered
/// (input set, output) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail registration with `HypermapError::DuplicateMapper`.
    #[default]
    Reject,

    /// Keep the mapper registered first and drop the newcomer.
    FirstWins,

    /// Replace the earlier mapper in place. The replacement keeps the
    /// earlier registration slot, so tie-break order does not move.
    LastWins,
}

/// Resolver runtime configuration.
///
/// Every field has a default, so an empty or missing file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Policy applied when duplicate mappers are registered.
    pub duplicate_policy: DuplicatePolicy,

    /// Deadline for one boundary call in milliseconds. `None` waits forever.
    pub call_timeout_ms: Option<u64>,

    /// Enables memoization of pure mapper outputs across calls.
    pub cross_call_cache: bool,

    /// Maximum number of entries kept by the cross-call cache.
    pub cache_capacity: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::Reject,
            call_timeout_ms: None,
            cross_call_cache: false,
            cache_capacity: 1024,
        }
    }
}

impl ResolverConfig {
    /// Loads configuration from `path`, falling back to defaults when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `HypermapError::ConfigParseError` if the file is not valid TOML or
    ///   holds values of the wrong type
    /// - `HypermapError::InvalidConfig` if the values are inconsistent
    /// - `HypermapError::Io` if the file exists but cannot be read
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file missing, using defaults");
            return Ok(Self::default());
        }
        Self::load_required(path)
    }

    /// Loads configuration from `path`, which must exist.
    ///
    /// # Errors
    ///
    /// Same as [`ResolverConfig::load`], plus `HypermapError::ConfigNotFound`
    /// when the file is missing.
    pub fn load_required(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HypermapError::ConfigNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), ?config, "loaded resolver config");
        Ok(config)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `HypermapError::ConfigParseError` or
    /// `HypermapError::InvalidConfig`.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| HypermapError::ConfigParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns `HypermapError::InvalidConfig` when the cache is enabled with
    /// zero capacity or the timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.cross_call_cache && self.cache_capacity == 0 {
            return Err(HypermapError::InvalidConfig(
                "cache_capacity must be positive when cross_call_cache is enabled".to_string(),
            ));
        }
        if self.call_timeout_ms == Some(0) {
            return Err(HypermapError::InvalidConfig(
                "call_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Creates an empty registry using this configuration's duplicate policy.
    pub fn registry(&self) -> MapperRegistry {
        MapperRegistry::with_policy(self.duplicate_policy)
    }

    /// Per-call deadline as a `Duration`.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.call_timeout(), None);
        assert!(!config.cross_call_cache);
        assert_eq!(config.cache_capacity, 1024);
    }

    #[test]
    fn test_parse_full_file() {
        let config = ResolverConfig::from_toml_str(
            r#"
duplicate_policy = "last_wins"
call_timeout_ms = 250
cross_call_cache = true
cache_capacity = 16
"#,
        )
        .unwrap();

        assert_eq!(config.duplicate_policy, DuplicatePolicy::LastWins);
        assert_eq!(config.call_timeout(), Some(Duration::from_millis(250)));
        assert!(config.cross_call_cache);
        assert_eq!(config.cache_capacity, 16);
    }

    #[test]
    fn test_unknown_policy_is_parse_error() {
        let err = ResolverConfig::from_toml_str(r#"duplicate_policy = "random""#).unwrap_err();
        assert!(matches!(err, HypermapError::ConfigParseError(_)));
    }

    #[test]
    fn test_zero_capacity_with_cache_is_invalid() {
        let err = ResolverConfig::from_toml_str("cross_call_cache = true\ncache_capacity = 0")
            .unwrap_err();
        assert!(matches!(err, HypermapError::InvalidConfig(_)));
    }

    #[test]
    fn test_registry_uses_configured_policy() {
        let config = ResolverConfig::from_toml_str(r#"duplicate_policy = "first_wins""#).unwrap();
        assert_eq!(config.registry().policy(), DuplicatePolicy::FirstWins);
        assert_eq!(ResolverConfig::default().registry().policy(), DuplicatePolicy::Reject);
    }

    #[test]
    fn test_zero_timeout_is_invalid() {
        let err = ResolverConfig::from_toml_str("call_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, HypermapError::InvalidConfig(_)));
    }
}
