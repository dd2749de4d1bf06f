//! Configuration surface. `spec.md` §6 describes a property-callback
//! mechanism the front-end embeds; this module gives that mechanism a
//! concrete, minimal shape rather than pulling in an on-disk format (no
//! `serde`/`toml` dependency — the embedder owns configuration storage).

/// A single configuration value as read from a `ConfigSource`.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Missing,
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

/// Implemented by whatever front-end embeds the engine; the engine never
/// reads environment variables or files directly.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> ConfigValue;
}

/// A `ConfigSource` that always reports `Missing`, used when no embedder
/// configuration is supplied.
pub struct EmptyConfigSource;

impl ConfigSource for EmptyConfigSource {
    fn get(&self, _key: &str) -> ConfigValue {
        ConfigValue::Missing
    }
}

/// Resolved engine configuration: the two keys spec.md §6 names explicitly,
/// plus two internal tunables recovered from the original mempool/equeue
/// headers (see `DESIGN.md`).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub profiler_enabled: bool,
    pub profiler_output: Option<String>,
    pub mempool_page_cache_limit: usize,
    pub equeue_ring_capacity: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profiler_enabled: false,
            profiler_output: None,
            mempool_page_cache_limit: 16,
            equeue_ring_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let mut config = Self::default();
        if let Some(enabled) = source.get("profiler.enabled").as_bool() {
            config.profiler_enabled = enabled;
        }
        if let Some(output) = source.get("profiler.output").as_str() {
            config.profiler_output = if output.is_empty() {
                None
            } else {
                Some(output.to_string())
            };
        }
        if let Some(limit) = source.get("mempool.page_cache_limit").as_int() {
            if limit > 0 {
                config.mempool_page_cache_limit = limit as usize;
            }
        }
        if let Some(capacity) = source.get("equeue.ring_capacity").as_int() {
            if capacity > 0 {
                config.equeue_ring_capacity = capacity as u32;
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapConfigSource(HashMap<&'static str, ConfigValue>);

    impl ConfigSource for MapConfigSource {
        fn get(&self, key: &str) -> ConfigValue {
            self.0.get(key).cloned().unwrap_or(ConfigValue::Missing)
        }
    }

    #[test]
    fn empty_source_yields_defaults() {
        let config = EngineConfig::from_source(&EmptyConfigSource);
        assert!(!config.profiler_enabled);
        assert_eq!(config.profiler_output, None);
        assert_eq!(config.mempool_page_cache_limit, 16);
    }

    #[test]
    fn overrides_apply_from_source() {
        let mut map = HashMap::new();
        map.insert("profiler.enabled", ConfigValue::Bool(true));
        map.insert("profiler.output", ConfigValue::Str("/tmp/prof.log".into()));
        map.insert("equeue.ring_capacity", ConfigValue::Int(1024));
        let config = EngineConfig::from_source(&MapConfigSource(map));
        assert!(config.profiler_enabled);
        assert_eq!(config.profiler_output.as_deref(), Some("/tmp/prof.log"));
        assert_eq!(config.equeue_ring_capacity, 1024);
    }
}
