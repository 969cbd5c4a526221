//! Stack configuration
//!
//! A `StackConfig` is the snapshot a stack is built from. Deployments
//! load their configuration however they like (files, environment,
//! flags) and hand the engine a ready snapshot, optionally through
//! [`StackConfig::from_properties`] for string-keyed sources.

use std::collections::HashMap;

/// Default maximum depth of the value stack
pub const DEFAULT_MAX_DEPTH: usize = 1000;

/// Default operation budget per execution
pub const DEFAULT_MAX_OPS: u64 = 100_000;

/// Default maximum number of symbol table entries
pub const DEFAULT_MAX_SYMBOLS: usize = 64;

/// Default maximum recursion level
pub const DEFAULT_MAX_RECURSION: u64 = 16;

/// Default size of the register file
pub const DEFAULT_REGISTERS: usize = 256;

/// Default ancillary limits, consumed by functions rather than the
/// engine itself
pub const DEFAULT_FETCH_LIMIT: i64 = 100_000;
pub const DEFAULT_GTS_LIMIT: i64 = 100_000;
pub const DEFAULT_LOOP_MAXDURATION_MS: i64 = 5_000;
pub const DEFAULT_MAX_BUCKETS: i64 = 1 << 22;
pub const DEFAULT_MAX_PIXELS: i64 = 8_388_608;
pub const DEFAULT_MAX_GEOCELLS: i64 = 10_000;
pub const DEFAULT_JSON_MAXSIZE: i64 = 20 * 1024 * 1024;

/// Configuration snapshot for a stack
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Maximum depth of the value stack (visible + hidden)
    pub max_depth: usize,

    /// Maximum number of operations per execution
    pub max_ops: u64,

    /// Maximum number of entries in the symbol table
    pub max_symbols: usize,

    /// Maximum recursion level
    pub max_recursion: u64,

    /// Size of the register file
    pub registers: usize,

    /// When true, clearing a redefinition unshadows the library
    /// function instead of installing a failing stub
    pub unshadow: bool,

    /// Limits exposed through attributes and consumed by functions
    pub fetch_limit: i64,
    pub gts_limit: i64,
    pub loop_max_duration_ms: i64,
    pub max_buckets: i64,
    pub max_pixels: i64,
    pub max_geocells: i64,
    pub json_max_size: i64,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            max_depth: DEFAULT_MAX_DEPTH,
            max_ops: DEFAULT_MAX_OPS,
            max_symbols: DEFAULT_MAX_SYMBOLS,
            max_recursion: DEFAULT_MAX_RECURSION,
            registers: DEFAULT_REGISTERS,
            unshadow: false,
            fetch_limit: DEFAULT_FETCH_LIMIT,
            gts_limit: DEFAULT_GTS_LIMIT,
            loop_max_duration_ms: DEFAULT_LOOP_MAXDURATION_MS,
            max_buckets: DEFAULT_MAX_BUCKETS,
            max_pixels: DEFAULT_MAX_PIXELS,
            max_geocells: DEFAULT_MAX_GEOCELLS,
            json_max_size: DEFAULT_JSON_MAXSIZE,
        }
    }
}

/// Errors raised while building a configuration snapshot
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A property holds a value of the wrong shape
    #[error("Invalid value '{value}' for property '{key}'")]
    InvalidValue { key: String, value: String },
}

impl StackConfig {
    /// Build a snapshot from string properties, starting from the
    /// defaults. Unknown keys are ignored so property files can carry
    /// settings for other components.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = StackConfig::default();

        config.max_depth = parse_or(properties, "quartz.maxdepth", config.max_depth)?;
        config.max_ops = parse_or(properties, "quartz.maxops", config.max_ops)?;
        config.max_symbols = parse_or(properties, "quartz.maxsymbols", config.max_symbols)?;
        config.max_recursion = parse_or(properties, "quartz.maxrecurse", config.max_recursion)?;
        config.registers = parse_or(properties, "quartz.registers", config.registers)?;
        config.unshadow = properties
            .get("quartz.def.unshadow")
            .map(|value| "true" == value)
            .unwrap_or(config.unshadow);
        config.fetch_limit = parse_or(properties, "quartz.limit.fetch", config.fetch_limit)?;
        config.gts_limit = parse_or(properties, "quartz.limit.gts", config.gts_limit)?;
        config.loop_max_duration_ms = parse_or(
            properties,
            "quartz.limit.loop.duration",
            config.loop_max_duration_ms,
        )?;
        config.max_buckets = parse_or(properties, "quartz.limit.buckets", config.max_buckets)?;
        config.max_pixels = parse_or(properties, "quartz.limit.pixels", config.max_pixels)?;
        config.max_geocells = parse_or(properties, "quartz.limit.geocells", config.max_geocells)?;
        config.json_max_size = parse_or(properties, "quartz.limit.json", config.json_max_size)?;

        Ok(config)
    }
}

fn parse_or<T: std::str::FromStr>(
    properties: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match properties.get(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StackConfig::default();
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.registers, DEFAULT_REGISTERS);
        assert!(!config.unshadow);
    }

    #[test]
    fn test_from_properties_overrides() {
        let mut properties = HashMap::new();
        properties.insert("quartz.maxdepth".to_string(), "128".to_string());
        properties.insert("quartz.def.unshadow".to_string(), "true".to_string());
        properties.insert("other.component.key".to_string(), "ignored".to_string());

        let config = StackConfig::from_properties(&properties).unwrap();
        assert_eq!(config.max_depth, 128);
        assert!(config.unshadow);
        assert_eq!(config.max_ops, DEFAULT_MAX_OPS);
    }

    #[test]
    fn test_from_properties_rejects_garbage() {
        let mut properties = HashMap::new();
        properties.insert("quartz.maxops".to_string(), "not-a-number".to_string());
        let err = StackConfig::from_properties(&properties).unwrap_err();
        assert!(err.to_string().contains("quartz.maxops"));
    }
}
