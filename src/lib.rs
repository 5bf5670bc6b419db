//! # tower-dispatch
//!
//! A Tower-flavored execution engine that lets an orchestrating agent invoke
//! remote tools (search, recommendation, rights validation, device control,
//! memory storage) through one uniform contract: declare a tool's input and
//! output schema plus an endpoint, and the engine handles discovery,
//! validation, dispatch, resilience, and error normalization.
//!
//! ## Core Concepts
//!
//! - **ToolDefinition**: a named, schema-described operation bound to exactly
//!   one backend endpoint, with its timeout, retry, rate-limit, and breaker
//!   settings
//! - **Transport**: the single async seam to the backends; implementations
//!   are opaque RPC clients returning a value or a chunk stream
//! - **Dispatcher**: runs the pipeline per call, with per-endpoint circuit
//!   breaking and per-(tool, caller) token-bucket rate limiting
//! - **CanonicalError**: the one normalized error shape every failure path
//!   returns, with a deterministic kind and retryable flag
//!
//! ## Getting Started
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serde_json::json;
//! use tower_dispatch::{
//!     Dispatcher, EndpointRef, ScriptedTransport, ToolDefinition, ToolRegistry,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let search = ToolDefinition::new("search", EndpointRef::unary("searchd:7301"))
//!     .input_schema(json!({
//!         "type": "object",
//!         "properties": {"query": {"type": "string"}},
//!         "required": ["query"]
//!     }))
//!     .output_schema(json!({"type": "object", "required": ["results"]}));
//!
//! let registry = Arc::new(ToolRegistry::new(vec![search]));
//! let transport = Arc::new(ScriptedTransport::new(vec![Ok(json!({"results": []}))]));
//! let dispatcher = Dispatcher::new(registry, transport);
//!
//! let output = dispatcher
//!     .execute("search", json!({"query": "sci-fi"}), "orchestrator", Duration::from_secs(5))
//!     .await?;
//! println!("results: {}", output);
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod observe;
pub mod ratelimit;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod transport;

// Public re-exports for convenience
pub use breaker::{BreakerConfig, BreakerMode, BreakerSet};
pub use config::{CatalogConfig, EngineConfig, ToolConfig};
pub use dispatch::{DispatchService, DispatchStream, Dispatcher, ExecuteRequest, ExecutionContext};
pub use error::{CanonicalError, ErrorKind, Result};
pub use observe::{EventSink, ExecutionEvent, Outcome, TracingSink, VecSink};
pub use ratelimit::{RateLimit, RateLimiter};
pub use registry::{tool_typed, ToolDefinition, ToolRegistry};
pub use retry::{Backoff, RetryDecision, RetryPolicy};
pub use schema::{validate, Violation};
pub use transport::{
    CallReply, EndpointRef, FnTransport, ReplyStream, ScriptedTransport, StatusCode, Transport,
    TransportError, TransportKind,
};

// Re-export Tower traits that users need
pub use tower::{Layer, Service, ServiceExt};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_imports() {
        // Verify that all modules compile
        let _ = std::mem::size_of::<CanonicalError>();
    }
}
