//! Remote call interface to backend services.
//!
//! Backends (search, recommendation, rights, device, memory) are opaque RPC
//! targets reached through one uniform seam: `Transport::call` takes an
//! endpoint reference and an opaque JSON payload and returns either a single
//! response value or a stream of response chunks. The dispatcher never sees
//! a concrete client type.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

/// How an endpoint is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// One request, one response.
    #[default]
    Unary,
    /// One request, a server-side stream of response chunks.
    ServerStreaming,
}

/// Opaque address of a backend service plus how to call it.
///
/// Never mutated after registration; circuit-breaker state is keyed by
/// `address`, so two tools sharing an address share failure history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointRef {
    pub address: String,
    #[serde(default)]
    pub kind: TransportKind,
}

impl EndpointRef {
    pub fn unary(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            kind: TransportKind::Unary,
        }
    }

    pub fn streaming(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            kind: TransportKind::ServerStreaming,
        }
    }
}

/// Status signal attached to a transport failure.
///
/// Mirrors the usual RPC status space; classification into the canonical
/// taxonomy keys off this value alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Unavailable,
    DeadlineExceeded,
    NotFound,
    ResourceExhausted,
    InvalidArgument,
    Internal,
    Unknown,
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StatusCode::Unavailable => "unavailable",
            StatusCode::DeadlineExceeded => "deadline_exceeded",
            StatusCode::NotFound => "not_found",
            StatusCode::ResourceExhausted => "resource_exhausted",
            StatusCode::InvalidArgument => "invalid_argument",
            StatusCode::Internal => "internal",
            StatusCode::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Raw failure reported by a transport implementation.
#[derive(Debug, Clone, Error)]
#[error("{status}: {message}")]
pub struct TransportError {
    pub status: StatusCode,
    pub message: String,
}

impl TransportError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }
}

/// Stream of response chunks from a server-streaming call.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<Value, TransportError>> + Send>>;

/// Response from a backend call.
pub enum CallReply {
    Unary(Value),
    Streaming(ReplyStream),
}

impl std::fmt::Debug for CallReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallReply::Unary(v) => f.debug_tuple("Unary").field(v).finish(),
            CallReply::Streaming(_) => f.debug_tuple("Streaming").finish(),
        }
    }
}

/// Uniform client interface over all backends.
///
/// `deadline` is the caller's remaining budget; implementations should stop
/// work once it passes. The dispatcher additionally enforces a per-attempt
/// timeout, so a transport that ignores the deadline is still bounded.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(
        &self,
        endpoint: &EndpointRef,
        payload: Value,
        deadline: Instant,
    ) -> Result<CallReply, TransportError>;
}

/// Test transport replaying a scripted sequence of outcomes, one per call.
///
/// Once the script is exhausted every further call fails with `Unavailable`.
pub struct ScriptedTransport {
    script: std::sync::Mutex<VecDeque<Result<Value, TransportError>>>,
    calls: std::sync::atomic::AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(outcomes: Vec<Result<Value, TransportError>>) -> Self {
        Self {
            script: std::sync::Mutex::new(outcomes.into()),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// A transport that always answers with the same value.
    pub fn always(value: Value) -> Arc<dyn Transport> {
        Arc::new(FnTransport::new(move |_, _| Ok(value.clone())))
    }

    /// Number of calls that reached this transport.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn call(
        &self,
        _endpoint: &EndpointRef,
        _payload: Value,
        _deadline: Instant,
    ) -> Result<CallReply, TransportError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .expect("script lock poisoned")
            .pop_front();
        match next {
            Some(Ok(v)) => Ok(CallReply::Unary(v)),
            Some(Err(e)) => Err(e),
            None => Err(TransportError::unavailable("script exhausted")),
        }
    }
}

/// Function-backed transport for tests and small adapters.
#[allow(clippy::type_complexity)]
pub struct FnTransport {
    f: Arc<dyn Fn(&EndpointRef, Value) -> Result<Value, TransportError> + Send + Sync>,
}

impl FnTransport {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&EndpointRef, Value) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }
}

#[async_trait]
impl Transport for FnTransport {
    async fn call(
        &self,
        endpoint: &EndpointRef,
        payload: Value,
        _deadline: Instant,
    ) -> Result<CallReply, TransportError> {
        (self.f)(endpoint, payload).map(CallReply::Unary)
    }
}
