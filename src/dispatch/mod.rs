//! The dispatch pipeline.
//!
//! What this module provides
//! - `Dispatcher::execute`, one tool invocation end to end: registry lookup,
//!   rate-limit check, input validation, a breaker-gated attempt loop with
//!   per-attempt timeouts and bounded retries, then output validation
//! - `Dispatcher::execute_streaming` for server-streaming endpoints, where
//!   every response chunk is validated before being forwarded
//! - `DispatchService`, a `tower::Service` adapter over the dispatcher so
//!   callers can stack standard middleware on top
//!
//! Failure handling
//! - Every exit produces a single `CanonicalError`; raw transport errors
//!   never escape
//! - Every attempt feeds breaker state; every terminal outcome emits one
//!   `ExecutionEvent` through the configured sink before returning

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::time::{sleep, timeout, Instant};
use tower::{BoxError, Service};
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use crate::breaker::BreakerSet;
use crate::config::CatalogConfig;
use crate::error::{CanonicalError, ErrorKind, Result};
use crate::observe::{EventSink, ExecutionEvent, Outcome, TracingSink};
use crate::ratelimit::RateLimiter;
use crate::registry::{ToolDefinition, ToolRegistry};
use crate::retry::{Backoff, RetryDecision, RetryPolicy};
use crate::schema;
use crate::schema::Violation;
use crate::transport::{CallReply, ReplyStream, Transport};

/// Per-call state; created when a dispatch starts and discarded with it.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub request_id: String,
    pub caller: String,
    pub deadline: Instant,
    /// Attempts made so far; zero until the first network attempt starts.
    pub attempt: u32,
}

impl ExecutionContext {
    fn new(caller: &str, budget: Duration) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            caller: caller.to_string(),
            deadline: Instant::now() + budget,
            attempt: 0,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Stream of validated response chunks from a streaming dispatch.
pub type DispatchStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// Orchestrates tool invocations against a registry and a transport.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
    breakers: BreakerSet,
    backoff: Backoff,
    default_deadline: Duration,
    sink: Arc<dyn EventSink>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
            limiter: RateLimiter::new(),
            breakers: BreakerSet::new(),
            backoff: Backoff::default(),
            default_deadline: Duration::from_secs(30),
            sink: Arc::new(TracingSink),
        }
    }

    /// Build a dispatcher from a parsed catalog, applying its engine
    /// settings where present.
    pub fn from_catalog(catalog: CatalogConfig, transport: Arc<dyn Transport>) -> Self {
        let engine = catalog.engine.clone().unwrap_or_default();
        let defs = catalog.into_definitions();
        Self::new(Arc::new(ToolRegistry::new(defs)), transport)
            .backoff(engine.backoff.to_backoff())
            .default_deadline(engine.default_deadline)
    }

    pub fn default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = deadline;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Breaker state, shared across all dispatches. Exposed for
    /// introspection; transitions happen only through dispatch outcomes.
    pub fn breakers(&self) -> &BreakerSet {
        &self.breakers
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Swap the tool catalog and drop breaker state for endpoints no longer
    /// referenced. Breakers are keyed by address, so a reloaded tool that
    /// keeps its address keeps its failure history.
    pub async fn reload(&self, defs: Vec<ToolDefinition>) {
        self.registry.reload(defs).await;
        let live = self.registry.endpoint_addresses().await;
        self.breakers.retain(&live).await;
    }

    /// Execute `tool` with `input` for `caller`, bounded overall by `budget`.
    pub async fn execute(
        &self,
        tool: &str,
        input: Value,
        caller: &str,
        budget: Duration,
    ) -> Result<Value> {
        let started = Instant::now();
        let mut ctx = ExecutionContext::new(caller, budget);
        let span = info_span!("dispatch", tool, caller, request_id = %ctx.request_id);
        let result = self
            .run_unary(tool, input, &mut ctx)
            .instrument(span)
            .await;
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) => Outcome::Failure(e.kind),
        };
        self.emit(tool, &ctx, started.elapsed(), outcome);
        result
    }

    /// Like [`Dispatcher::execute`] with the engine's default deadline.
    pub async fn execute_with_defaults(
        &self,
        tool: &str,
        input: Value,
        caller: &str,
    ) -> Result<Value> {
        self.execute(tool, input, caller, self.default_deadline).await
    }

    /// Execute a server-streaming tool. The returned stream yields each
    /// response chunk after it passes output validation; the first invalid
    /// chunk (or transport error) ends the stream with an error item.
    pub async fn execute_streaming(
        &self,
        tool: &str,
        input: Value,
        caller: &str,
        budget: Duration,
    ) -> Result<DispatchStream> {
        let started = Instant::now();
        let mut ctx = ExecutionContext::new(caller, budget);
        let span = info_span!("dispatch", tool, caller, request_id = %ctx.request_id, streaming = true);
        let result: Result<DispatchStream> = async {
            let def = self.prepare(tool, &input, &ctx).await?;
            let reply = self.call_with_retries(&def, input, &mut ctx).await?;
            let source: ReplyStream = match reply {
                CallReply::Streaming(s) => s,
                // A unary reply is forwarded as a one-chunk stream
                CallReply::Unary(v) => Box::pin(futures::stream::iter(vec![Ok(v)])),
            };

            let schema = def.output_schema.clone();
            let request_id = ctx.request_id.clone();
            let validated = source.map(move |item| match item {
                Ok(chunk) => match schema::validate(&schema, &chunk) {
                    Ok(()) => Ok(chunk),
                    Err(violations) => {
                        Err(schema_violation("response chunk", violations, &request_id))
                    }
                },
                Err(raw) => Err(CanonicalError::from_transport(&raw, &request_id)),
            });
            // Fuse after the first error item
            let fused = validated.scan(false, |errored, item| {
                if *errored {
                    return futures::future::ready(None);
                }
                if item.is_err() {
                    *errored = true;
                }
                futures::future::ready(Some(item))
            });
            Ok(Box::pin(fused) as DispatchStream)
        }
        .instrument(span)
        .await;
        // The event records stream establishment; chunk consumption happens
        // on the caller's schedule
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) => Outcome::Failure(e.kind),
        };
        self.emit(tool, &ctx, started.elapsed(), outcome);
        result
    }

    /// Steps 1 to 3 of the pipeline: lookup, rate limit, input validation.
    async fn prepare(
        &self,
        tool: &str,
        input: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Arc<ToolDefinition>> {
        let Some(def) = self.registry.lookup(tool).await else {
            return Err(CanonicalError::new(
                ErrorKind::UnknownTool,
                format!("no tool registered as '{}'", tool),
                &ctx.request_id,
            ));
        };

        if !self
            .limiter
            .try_consume(tool, &ctx.caller, def.rate_limit)
            .await
        {
            return Err(CanonicalError::new(
                ErrorKind::RateLimited,
                format!("rate limit exceeded for '{}' by '{}'", tool, ctx.caller),
                &ctx.request_id,
            ));
        }

        if let Err(violations) = schema::validate(&def.input_schema, input) {
            return Err(schema_violation("input", violations, &ctx.request_id));
        }

        Ok(def)
    }

    /// Step 4: the breaker-gated attempt loop.
    async fn call_with_retries(
        &self,
        def: &ToolDefinition,
        input: Value,
        ctx: &mut ExecutionContext,
    ) -> Result<CallReply> {
        let policy = RetryPolicy::new(def.max_retries, self.backoff);
        let address = def.endpoint.address.as_str();
        let mut attempt: u32 = 0;

        loop {
            // The breaker encodes "not now"; surface immediately rather than
            // retrying inside this dispatch
            if !self.breakers.admit(address, def.breaker).await {
                return Err(CanonicalError::new(
                    ErrorKind::CircuitOpen,
                    format!("circuit open for endpoint '{}'", address),
                    &ctx.request_id,
                ));
            }

            let remaining = ctx.remaining();
            if remaining.is_zero() {
                return Err(CanonicalError::new(
                    ErrorKind::Timeout,
                    "overall deadline exhausted",
                    &ctx.request_id,
                ));
            }

            let per_attempt = def.timeout.min(remaining);
            ctx.attempt = attempt + 1;
            let call = self.transport.call(&def.endpoint, input.clone(), ctx.deadline);
            let outcome = match timeout(per_attempt, call).await {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(raw)) => Err(CanonicalError::from_transport(&raw, &ctx.request_id)),
                Err(_elapsed) => Err(CanonicalError::new(
                    ErrorKind::Timeout,
                    format!("attempt timed out after {}ms", per_attempt.as_millis()),
                    &ctx.request_id,
                )),
            };

            match outcome {
                Ok(reply) => {
                    self.breakers.record_success(address, def.breaker).await;
                    return Ok(reply);
                }
                Err(err) => {
                    self.breakers.record_failure(address, def.breaker).await;
                    match policy.decide(attempt, err.retryable, ctx.remaining()) {
                        RetryDecision::Retry(delay) => {
                            warn!(
                                attempt = attempt + 1,
                                delay_ms = delay.as_millis() as u64,
                                kind = %err.kind,
                                "attempt failed, backing off"
                            );
                            sleep(delay).await;
                            attempt += 1;
                        }
                        RetryDecision::DeadlineExhausted => {
                            return Err(CanonicalError::new(
                                ErrorKind::Timeout,
                                "overall deadline exhausted",
                                &ctx.request_id,
                            )
                            .with_details(json!({ "last_error": err.kind.to_string() })));
                        }
                        RetryDecision::Stop => return Err(err),
                    }
                }
            }
        }
    }

    async fn run_unary(
        &self,
        tool: &str,
        input: Value,
        ctx: &mut ExecutionContext,
    ) -> Result<Value> {
        let def = self.prepare(tool, &input, ctx).await?;
        let reply = self.call_with_retries(&def, input, ctx).await?;
        let value = match reply {
            CallReply::Unary(v) => v,
            CallReply::Streaming(_) => {
                return Err(CanonicalError::new(
                    ErrorKind::Internal,
                    "streaming reply to a unary dispatch; use execute_streaming",
                    &ctx.request_id,
                ));
            }
        };

        // Step 5: the transport call succeeded, but the payload must still
        // honor the declared contract
        match schema::validate(&def.output_schema, &value) {
            Ok(()) => Ok(value),
            Err(violations) => Err(schema_violation("output", violations, &ctx.request_id)),
        }
    }

    fn emit(&self, tool: &str, ctx: &ExecutionContext, latency: Duration, outcome: Outcome) {
        self.sink.record(ExecutionEvent {
            tool: tool.to_string(),
            caller: ctx.caller.clone(),
            request_id: ctx.request_id.clone(),
            attempts: ctx.attempt,
            latency,
            outcome,
            timestamp: chrono::Utc::now(),
        });
    }
}

fn schema_violation(
    what: &str,
    violations: Vec<Violation>,
    request_id: &str,
) -> CanonicalError {
    CanonicalError::new(
        ErrorKind::SchemaViolation,
        format!("{} failed schema validation", what),
        request_id,
    )
    .with_details(json!({ "violations": violations }))
}

/// Request shape for the Tower adapter.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub tool: String,
    pub input: Value,
    pub caller: String,
    pub budget: Duration,
}

/// `tower::Service` facade over a shared dispatcher, so standard layers
/// (load shedding, concurrency limits, instrumentation) can stack on top.
#[derive(Clone)]
pub struct DispatchService {
    dispatcher: Arc<Dispatcher>,
}

impl DispatchService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl Service<ExecuteRequest> for DispatchService {
    type Response = Value;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Value, BoxError>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ExecuteRequest) -> Self::Future {
        let dispatcher = self.dispatcher.clone();
        Box::pin(async move {
            dispatcher
                .execute(&req.tool, req.input, &req.caller, req.budget)
                .await
                .map_err(Into::into)
        })
    }
}
