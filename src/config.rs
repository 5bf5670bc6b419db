//! Configuration for the dispatch engine.
//!
//! The registration record for each tool (name, version, schemas, endpoint,
//! transport kind, timeout, retries, rate limit, breaker thresholds) is
//! consumed from a TOML catalog; engine-wide knobs can also come from the
//! environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::breaker::BreakerConfig;
use crate::ratelimit::RateLimit;
use crate::registry::ToolDefinition;
use crate::retry::Backoff;
use crate::transport::{EndpointRef, TransportKind};

/// Engine-wide settings not tied to a single tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default total budget for a dispatch when the caller supplies none.
    pub default_deadline: Duration,

    /// Backoff configuration shared by every tool's retry loop.
    pub backoff: BackoffConfig,

    /// Drop rate-limiter keys idle for longer than this when eviction runs.
    pub limiter_max_idle: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_deadline: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
            limiter_max_idle: Duration::from_secs(600),
        }
    }
}

/// Backoff knobs in plain units for serde.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    pub fn to_backoff(&self) -> Backoff {
        Backoff::exponential(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .with_jitter(self.jitter)
    }
}

/// One tool's registration record as it appears in the catalog file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub endpoint: String,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub input_schema: Value,
    #[serde(default)]
    pub output_schema: Value,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub rate_limit: RateLimit,
    #[serde(default)]
    pub breaker: BreakerSettings,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    2
}

/// Breaker thresholds in plain units for serde.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cool_down_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let cfg = BreakerConfig::default();
        Self {
            failure_threshold: cfg.failure_threshold,
            success_threshold: cfg.success_threshold,
            cool_down_ms: cfg.cool_down.as_millis() as u64,
        }
    }
}

impl From<BreakerSettings> for BreakerConfig {
    fn from(s: BreakerSettings) -> Self {
        Self {
            failure_threshold: s.failure_threshold,
            success_threshold: s.success_threshold,
            cool_down: Duration::from_millis(s.cool_down_ms),
        }
    }
}

impl ToolConfig {
    pub fn into_definition(self) -> ToolDefinition {
        let endpoint = EndpointRef {
            address: self.endpoint,
            kind: self.transport,
        };
        ToolDefinition::new(self.name, endpoint)
            .version(self.version)
            .input_schema(self.input_schema)
            .output_schema(self.output_schema)
            .timeout(Duration::from_millis(self.timeout_ms))
            .max_retries(self.max_retries)
            .rate_limit(self.rate_limit)
            .breaker(self.breaker.into())
    }
}

/// The catalog file: engine settings plus a list of tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub engine: Option<EngineConfig>,
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
}

impl CatalogConfig {
    /// Load a catalog from a TOML file.
    pub fn from_file(
        path: impl AsRef<std::path::Path>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: CatalogConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn into_definitions(self) -> Vec<ToolDefinition> {
        self.tools
            .into_iter()
            .map(ToolConfig::into_definition)
            .collect()
    }
}

/// Engine settings from environment variables, falling back to defaults.
pub fn engine_from_env() -> EngineConfig {
    let mut config = EngineConfig::default();

    if let Ok(secs) = std::env::var("DISPATCH_DEADLINE_SECS") {
        if let Ok(secs) = secs.parse::<u64>() {
            config.default_deadline = Duration::from_secs(secs);
        }
    }

    if let Ok(ms) = std::env::var("DISPATCH_BACKOFF_INITIAL_MS") {
        if let Ok(ms) = ms.parse::<u64>() {
            config.backoff.initial_delay_ms = ms;
        }
    }

    if let Ok(jitter) = std::env::var("DISPATCH_BACKOFF_JITTER") {
        config.backoff.jitter = jitter.to_lowercase() == "true" || jitter == "1";
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_engine_config() {
        let config = EngineConfig::default();
        assert_eq!(config.default_deadline, Duration::from_secs(30));
        assert_eq!(config.backoff.initial_delay_ms, 100);
        assert!(config.backoff.jitter);
    }

    #[test]
    fn catalog_parses_with_defaults() {
        let toml_src = r#"
            [[tools]]
            name = "search"
            endpoint = "searchd.media.svc:7301"

            [tools.input_schema]
            type = "object"
            required = ["query"]

            [[tools]]
            name = "device_control"
            endpoint = "devicegw.media.svc:7500"
            transport = "server_streaming"
            timeout_ms = 1500
            max_retries = 0

            [tools.rate_limit]
            capacity = 20.0
            refill_per_sec = 2.0

            [tools.breaker]
            failure_threshold = 3
            success_threshold = 1
            cool_down_ms = 5000
        "#;
        let catalog: CatalogConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(catalog.tools.len(), 2);

        let search = catalog.tools[0].clone().into_definition();
        assert_eq!(search.timeout, Duration::from_millis(5_000));
        assert_eq!(search.max_retries, 2);
        assert_eq!(search.endpoint.kind, TransportKind::Unary);
        assert_eq!(search.input_schema["required"][0], "query");

        let device = catalog.tools[1].clone().into_definition();
        assert_eq!(device.endpoint.kind, TransportKind::ServerStreaming);
        assert_eq!(device.max_retries, 0);
        assert_eq!(device.rate_limit.capacity, 20.0);
        assert_eq!(device.breaker.cool_down, Duration::from_millis(5000));
    }

    #[test]
    fn catalog_round_trips_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.toml");
        std::fs::write(
            &path,
            "[[tools]]\nname = \"memory_store\"\nendpoint = \"memoryd:7600\"\n",
        )
        .unwrap();

        let catalog = CatalogConfig::from_file(&path).unwrap();
        let defs = catalog.into_definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "memory_store");
    }
}
