//! Tool definitions and the registry that serves them.
//!
//! A definition is immutable once registered. Lookups hand out `Arc`
//! snapshots, so a reload swaps the table atomically while in-flight calls
//! finish against the definition they started with.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::breaker::BreakerConfig;
use crate::ratelimit::RateLimit;
use crate::transport::EndpointRef;

/// Everything the engine needs to know about one dispatchable tool.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub version: String,
    /// Structural schema for the request payload; `Value::Null` means the
    /// payload is opaque and skipped by validation.
    pub input_schema: Value,
    /// Structural schema for the response payload (and for each chunk of a
    /// streaming response).
    pub output_schema: Value,
    pub endpoint: EndpointRef,
    /// Per-attempt timeout.
    pub timeout: Duration,
    pub max_retries: u32,
    pub rate_limit: RateLimit,
    pub breaker: BreakerConfig,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, endpoint: EndpointRef) -> Self {
        Self {
            name: name.into(),
            version: "0.1.0".to_string(),
            input_schema: Value::Null,
            output_schema: Value::Null,
            endpoint,
            timeout: Duration::from_secs(5),
            max_retries: 2,
            rate_limit: RateLimit::default(),
            breaker: BreakerConfig::default(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }
}

/// DX sugar: derive the input and output schemas from Rust types.
/// - `I` is the request payload type
/// - `O` is the response payload type
pub fn tool_typed<I, O>(name: &str, endpoint: EndpointRef) -> ToolDefinition
where
    I: JsonSchema,
    O: JsonSchema,
{
    let input = schemars::schema_for!(I);
    let output = schemars::schema_for!(O);
    ToolDefinition::new(name, endpoint)
        .input_schema(serde_json::to_value(input.schema).unwrap_or(Value::Null))
        .output_schema(serde_json::to_value(output.schema).unwrap_or(Value::Null))
}

/// Name-keyed table of tool definitions with atomic replacement.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<ToolDefinition>>>,
}

impl ToolRegistry {
    pub fn new(defs: Vec<ToolDefinition>) -> Self {
        let mut tools = HashMap::new();
        for def in defs {
            tools.insert(def.name.clone(), Arc::new(def));
        }
        Self {
            tools: RwLock::new(tools),
        }
    }

    pub async fn lookup(&self, name: &str) -> Option<Arc<ToolDefinition>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Replace the whole table. In-flight calls keep their `Arc` snapshot
    /// of the old definition.
    pub async fn reload(&self, defs: Vec<ToolDefinition>) {
        let mut tools = HashMap::new();
        for def in defs {
            tools.insert(def.name.clone(), Arc::new(def));
        }
        *self.tools.write().await = tools;
    }

    /// Addresses currently referenced by any definition. Used to prune
    /// breaker state after a reload.
    pub async fn endpoint_addresses(&self) -> HashSet<String> {
        self.tools
            .read()
            .await
            .values()
            .map(|d| d.endpoint.address.clone())
            .collect()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }
}
