use crate::error::StreamError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `PRICE_STREAM_HEARTBEAT_INTERVAL_MS=10000`
pub const ENV_PREFIX: &str = "PRICE_STREAM";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StreamSettings {
    /// Explicit stream URL. Takes precedence over `page_url`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Origin of the hosting page; the stream URL is derived from it.
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default = "default_stream_path")]
    pub stream_path: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default)]
    pub heartbeat_ack_timeout_ms: Option<u64>,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_multiplier")]
    pub reconnect_multiplier: f64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    #[serde(default)]
    pub reconnect_jitter: f64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_fallback_retry_interval_ms")]
    pub fallback_retry_interval_ms: u64,
    #[serde(default = "default_idle_check_interval_ms")]
    pub idle_check_interval_ms: u64,
    #[serde(default = "default_key_suffix")]
    pub key_suffix: String,
    #[serde(default = "default_prefix_lengths")]
    pub prefix_lengths: Vec<usize>,
    #[serde(default)]
    pub price_cache_capacity: Option<usize>,
}

impl StreamSettings {
    /// Load from a TOML file, then apply `PRICE_STREAM_*` environment overrides.
    pub fn from_file(path: &str) -> Result<Self, StreamError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));
        let cfg = builder.build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn save_to_file(&self, path: &str) -> Result<(), StreamError> {
        let toml_string = toml::to_string(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Validate settings ranges and constraints
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.connect_timeout_ms == 0 {
            return Err(StreamError::Validation("connect_timeout_ms must be > 0".to_string()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(StreamError::Validation("heartbeat_interval_ms must be > 0".to_string()));
        }
        if self.heartbeat_ack_timeout_ms == Some(0) {
            return Err(StreamError::Validation("heartbeat_ack_timeout_ms must be > 0".to_string()));
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err(StreamError::Validation("reconnect_base_delay_ms must be > 0".to_string()));
        }
        if self.reconnect_multiplier < 1.0 {
            return Err(StreamError::Validation("reconnect_multiplier must be >= 1".to_string()));
        }
        if self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            return Err(StreamError::Validation(
                "reconnect_max_delay_ms must be >= reconnect_base_delay_ms".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.reconnect_jitter) {
            return Err(StreamError::Validation("reconnect_jitter must be in [0, 1)".to_string()));
        }
        if self.fallback_retry_interval_ms == 0 {
            return Err(StreamError::Validation("fallback_retry_interval_ms must be > 0".to_string()));
        }
        if self.idle_check_interval_ms == 0 {
            return Err(StreamError::Validation("idle_check_interval_ms must be > 0".to_string()));
        }
        if self.prefix_lengths.is_empty() || self.prefix_lengths.contains(&0) {
            return Err(StreamError::Validation(
                "prefix_lengths must be non-empty and > 0".to_string(),
            ));
        }
        if self.price_cache_capacity == Some(0) {
            return Err(StreamError::Validation("price_cache_capacity must be > 0".to_string()));
        }
        Ok(())
    }

    /// The URL to stream from: `endpoint` if set, otherwise derived from `page_url`.
    pub fn resolve_endpoint(&self) -> Result<String, StreamError> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.clone());
        }
        match &self.page_url {
            Some(page) => crate::endpoint::derive_stream_endpoint(page, &self.stream_path),
            None => Err(StreamError::Validation(
                "either endpoint or page_url must be set".to_string(),
            )),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_ack_timeout(&self) -> Option<Duration> {
        self.heartbeat_ack_timeout_ms.map(Duration::from_millis)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_millis(self.idle_check_interval_ms)
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            page_url: None,
            stream_path: default_stream_path(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_ack_timeout_ms: None,
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_multiplier: default_reconnect_multiplier(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            reconnect_jitter: 0.0,
            max_reconnect_attempts: default_max_reconnect_attempts(),
            fallback_retry_interval_ms: default_fallback_retry_interval_ms(),
            idle_check_interval_ms: default_idle_check_interval_ms(),
            key_suffix: default_key_suffix(),
            prefix_lengths: default_prefix_lengths(),
            price_cache_capacity: None,
        }
    }
}

fn default_stream_path() -> String { "/ws".to_string() }
fn default_connect_timeout_ms() -> u64 { 10_000 }
fn default_heartbeat_interval_ms() -> u64 { 15_000 }
fn default_reconnect_base_delay_ms() -> u64 { 1_000 }
fn default_reconnect_multiplier() -> f64 { 1.5 }
fn default_reconnect_max_delay_ms() -> u64 { 30_000 }
fn default_max_reconnect_attempts() -> u32 { 10 }
fn default_fallback_retry_interval_ms() -> u64 { 120_000 }
fn default_idle_check_interval_ms() -> u64 { 60_000 }
fn default_key_suffix() -> String { crate::key::DEFAULT_KEY_SUFFIX.to_string() }
fn default_prefix_lengths() -> Vec<usize> { vec![8, 12] }

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_example_config() {
        let s = StreamSettings::from_file("config.example.toml").unwrap();
        assert_eq!(s.page_url.as_deref(), Some("https://dashboard.example.com"));
        assert_eq!(s.heartbeat_interval_ms, 15_000);
        assert_eq!(s.prefix_lengths, vec![8, 12]);
        s.validate().unwrap();
    }

    #[test]
    fn test_defaults_are_valid() {
        let s = StreamSettings::default();
        s.validate().unwrap();
        assert_eq!(s.connect_timeout(), Duration::from_secs(10));
        assert_eq!(s.idle_check_interval(), Duration::from_secs(60));
        assert!(s.heartbeat_ack_timeout().is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stream.toml");
        let path = path.to_str().unwrap();

        let mut s = StreamSettings::default();
        s.endpoint = Some("ws://127.0.0.1:9001/ws".to_string());
        s.heartbeat_ack_timeout_ms = Some(5_000);
        s.save_to_file(path).unwrap();

        let loaded = StreamSettings::from_file(path).unwrap();
        assert_eq!(loaded, s);
    }

    #[test]
    fn test_validate_rejects_bad_backoff() {
        let mut s = StreamSettings::default();
        s.reconnect_multiplier = 0.5;
        assert!(matches!(s.validate(), Err(StreamError::Validation(_))));

        let mut s = StreamSettings::default();
        s.reconnect_max_delay_ms = 10;
        assert!(s.validate().is_err());

        let mut s = StreamSettings::default();
        s.prefix_lengths = vec![8, 0];
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_resolve_endpoint_prefers_explicit() {
        let mut s = StreamSettings::default();
        assert!(s.resolve_endpoint().is_err());

        s.page_url = Some("http://localhost:3333".to_string());
        assert_eq!(s.resolve_endpoint().unwrap(), "ws://localhost:3333/ws");

        s.endpoint = Some("wss://feed.example.com/prices".to_string());
        assert_eq!(s.resolve_endpoint().unwrap(), "wss://feed.example.com/prices");
    }
}
