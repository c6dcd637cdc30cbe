use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `LEAD_EXPRESS__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// Upper bound on resolve/aggregate/save cycles per event when the store
    /// reports a write conflict.
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,
    /// When false, only exact visitor-id matches resolve to an existing visitor.
    #[serde(default = "default_fingerprint_matching")]
    pub fingerprint_matching: bool,
    #[serde(default = "default_field_debounce_ms")]
    pub field_debounce_ms: u64,
    #[serde(default = "default_field_flush_interval_ms")]
    pub field_flush_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_score_ttl_secs")]
    pub score_ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_max_write_attempts() -> u32 {
    3
}
fn default_fingerprint_matching() -> bool {
    true
}
fn default_field_debounce_ms() -> u64 {
    1500
}
fn default_field_flush_interval_ms() -> u64 {
    500
}
fn default_score_ttl_secs() -> u64 {
    60
}
fn default_max_entries() -> usize {
    100_000
}
fn default_eviction_interval_secs() -> u64 {
    60
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: default_max_write_attempts(),
            fingerprint_matching: default_fingerprint_matching(),
            field_debounce_ms: default_field_debounce_ms(),
            field_flush_interval_ms: default_field_flush_interval_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            score_ttl_secs: default_score_ttl_secs(),
            max_entries: default_max_entries(),
            eviction_interval_secs: default_eviction_interval_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            tracking: TrackingConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("LEAD_EXPRESS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.api.http_port, 8080);
        assert_eq!(config.tracking.max_write_attempts, 3);
        assert!(config.tracking.fingerprint_matching);
        assert_eq!(config.cache.score_ttl_secs, 60);
    }

    #[test]
    fn test_empty_sections_deserialize_to_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"tracking": {}}"#).unwrap();
        assert_eq!(config.node_id, "node-01");
        assert_eq!(config.tracking.field_debounce_ms, 1500);
    }
}
