//! Structured Logger (C13): a batched, circuit-broken sink with task-local
//! correlation propagation. Generalizes the old shared `Arc<RwLock<_>>`
//! logging context into a proper task-local scope, and reuses the job
//! circuit breaker against the log transport instead of a remote job.

use crate::error::{Error, Result};
use crate::jobs::{CircuitBreaker, CircuitBreakerConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::interval;
use tracing::Instrument;

tokio::task_local! {
    static LOG_CONTEXT: LogContext;
}

/// Correlation identifiers propagated across an async call chain.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    pub correlation_id: Option<String>,
    pub request_id: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

impl LogContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }

    /// The context visible to the currently running task, if any was scoped.
    pub fn current() -> Option<LogContext> {
        LOG_CONTEXT.try_with(|ctx| ctx.clone()).ok()
    }

    /// Run `future` with `self` as the task-local context for its duration.
    pub async fn scope<F: std::future::Future>(self, future: F) -> F::Output {
        LOG_CONTEXT.scope(self, future).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub target: String,
    pub fields: BTreeMap<String, Value>,
    pub correlation_id: Option<String>,
    pub request_id: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

impl LogRecord {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        let ctx = LogContext::current().unwrap_or_default();
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            target: target.into(),
            fields: BTreeMap::new(),
            correlation_id: ctx.correlation_id,
            request_id: ctx.request_id,
            trace_id: ctx.trace_id,
            span_id: ctx.span_id,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// A destination a batch of log records can be flushed to.
#[async_trait]
pub trait LogTransport: Send + Sync {
    async fn send_batch(&self, records: &[LogRecord]) -> Result<()>;
}

/// Default transport: re-emits each record through `tracing`'s level
/// macros, keyed off `LogRecord::level`.
pub struct TracingTransport;

#[async_trait]
impl LogTransport for TracingTransport {
    async fn send_batch(&self, records: &[LogRecord]) -> Result<()> {
        for record in records {
            match record.level {
                LogLevel::Trace => tracing::trace!(
                    target = %record.target,
                    correlation_id = ?record.correlation_id,
                    fields = ?record.fields,
                    "{}", record.message
                ),
                LogLevel::Debug => tracing::debug!(
                    target = %record.target,
                    correlation_id = ?record.correlation_id,
                    fields = ?record.fields,
                    "{}", record.message
                ),
                LogLevel::Info => tracing::info!(
                    target = %record.target,
                    correlation_id = ?record.correlation_id,
                    fields = ?record.fields,
                    "{}", record.message
                ),
                LogLevel::Warn => tracing::warn!(
                    target = %record.target,
                    correlation_id = ?record.correlation_id,
                    fields = ?record.fields,
                    "{}", record.message
                ),
                LogLevel::Error => tracing::error!(
                    target = %record.target,
                    correlation_id = ?record.correlation_id,
                    fields = ?record.fields,
                    "{}", record.message
                ),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub max_batch_size: usize,
    pub flush_interval: Duration,
    pub max_queue_size: usize,
    pub shutdown_grace: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 256,
            flush_interval: Duration::from_secs(1),
            max_queue_size: 10_000,
            shutdown_grace: Duration::from_secs(5),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

enum WorkerMessage {
    Record(LogRecord),
}

/// Batched async sink. `log` never blocks: the record is either queued or the
/// call fails with a typed backpressure error -- it is never silently
/// dropped.
pub struct BatchedLogger {
    sender: mpsc::Sender<WorkerMessage>,
    shutdown: Arc<Notify>,
    worker: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BatchedLogger {
    pub fn start(config: LoggerConfig, transport: Arc<dyn LogTransport>) -> Self {
        let (tx, rx) = mpsc::channel(config.max_queue_size);
        let shutdown = Arc::new(Notify::new());
        let worker = tokio::spawn(
            run_worker(rx, transport, config.clone(), shutdown.clone()).in_current_span(),
        );
        Self { sender: tx, shutdown, worker: tokio::sync::Mutex::new(Some(worker)) }
    }

    /// Non-blocking enqueue. Returns an error if the bounded queue is full.
    pub fn log(&self, record: LogRecord) -> Result<()> {
        self.sender.try_send(WorkerMessage::Record(record)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::retry_exhausted("log queue is full, record dropped by caller")
            }
            mpsc::error::TrySendError::Closed(_) => Error::internal("log worker has shut down"),
        })
    }

    pub fn trace(&self, target: &str, message: impl Into<String>) -> Result<()> {
        self.log(LogRecord::new(LogLevel::Trace, target, message))
    }

    pub fn debug(&self, target: &str, message: impl Into<String>) -> Result<()> {
        self.log(LogRecord::new(LogLevel::Debug, target, message))
    }

    pub fn info(&self, target: &str, message: impl Into<String>) -> Result<()> {
        self.log(LogRecord::new(LogLevel::Info, target, message))
    }

    pub fn warn(&self, target: &str, message: impl Into<String>) -> Result<()> {
        self.log(LogRecord::new(LogLevel::Warn, target, message))
    }

    pub fn error(&self, target: &str, message: impl Into<String>) -> Result<()> {
        self.log(LogRecord::new(LogLevel::Error, target, message))
    }

    /// Notify the worker to stop, then wait up to `shutdown_grace` (passed at
    /// construction) for outstanding batches to flush.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        self.shutdown.notify_one();
        let mut guard = self.worker.lock().await;
        if let Some(handle) = guard.take() {
            match tokio::time::timeout(deadline, handle).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(Error::internal(format!("log worker panicked: {e}"))),
                Err(_) => Err(Error::retry_exhausted("log worker did not flush within the shutdown deadline")),
            }
        } else {
            Ok(())
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<WorkerMessage>,
    transport: Arc<dyn LogTransport>,
    config: LoggerConfig,
    shutdown: Arc<Notify>,
) {
    let breaker = CircuitBreaker::new(config.circuit_breaker);
    let mut batch = Vec::with_capacity(config.max_batch_size);
    let mut ticker = interval(config.flush_interval);
    let mut closing = false;

    loop {
        if closing {
            // Drain whatever is queued without waiting for the next tick.
            while let Ok(WorkerMessage::Record(record)) = rx.try_recv() {
                batch.push(record);
                if batch.len() >= config.max_batch_size {
                    flush(&breaker, transport.as_ref(), &mut batch).await;
                }
            }
            break;
        }

        tokio::select! {
            biased;
            _ = shutdown.notified() => {
                closing = true;
            }
            maybe_msg = rx.recv() => {
                match maybe_msg {
                    Some(WorkerMessage::Record(record)) => {
                        batch.push(record);
                        if batch.len() >= config.max_batch_size {
                            flush(&breaker, transport.as_ref(), &mut batch).await;
                        }
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    flush(&breaker, transport.as_ref(), &mut batch).await;
                }
            }
        }
    }

    if !batch.is_empty() {
        flush(&breaker, transport.as_ref(), &mut batch).await;
    }
}

async fn flush(breaker: &CircuitBreaker, transport: &dyn LogTransport, batch: &mut Vec<LogRecord>) {
    if !breaker.can_execute().await {
        tracing::warn!(dropped = batch.len(), "log transport circuit open, discarding batch");
        batch.clear();
        return;
    }

    match transport.send_batch(batch).await {
        Ok(()) => breaker.on_success().await,
        Err(e) => {
            breaker.on_failure().await;
            tracing::warn!(error = %e, dropped = batch.len(), "failed to flush log batch");
        }
    }
    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransport {
        count: AtomicUsize,
    }

    #[async_trait]
    impl LogTransport for CountingTransport {
        async fn send_batch(&self, records: &[LogRecord]) -> Result<()> {
            self.count.fetch_add(records.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn propagates_task_local_context() {
        let ctx = LogContext::new().with_correlation_id("corr-1").with_request_id("req-1");
        let record = ctx
            .scope(async { LogRecord::new(LogLevel::Info, "test", "hello") })
            .await;
        assert_eq!(record.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(record.request_id.as_deref(), Some("req-1"));
    }

    #[tokio::test]
    async fn no_context_when_unscoped() {
        let record = LogRecord::new(LogLevel::Info, "test", "hello");
        assert!(record.correlation_id.is_none());
    }

    #[tokio::test]
    async fn flushes_on_batch_size() {
        let transport = Arc::new(CountingTransport { count: AtomicUsize::new(0) });
        let config = LoggerConfig { max_batch_size: 2, flush_interval: Duration::from_secs(60), ..Default::default() };
        let logger = BatchedLogger::start(config, transport.clone());

        logger.info("test", "one").unwrap();
        logger.info("test", "two").unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.count.load(Ordering::SeqCst), 2);

        logger.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_flushes_remaining_records() {
        let transport = Arc::new(CountingTransport { count: AtomicUsize::new(0) });
        let config = LoggerConfig { max_batch_size: 100, flush_interval: Duration::from_secs(60), ..Default::default() };
        let logger = BatchedLogger::start(config, transport.clone());

        logger.info("test", "lonely record").unwrap();
        logger.shutdown(Duration::from_secs(1)).await.unwrap();

        assert_eq!(transport.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejects_when_queue_full() {
        let transport = Arc::new(CountingTransport { count: AtomicUsize::new(0) });
        let config = LoggerConfig {
            max_batch_size: 1000,
            flush_interval: Duration::from_secs(60),
            max_queue_size: 1,
            ..Default::default()
        };
        let logger = BatchedLogger::start(config, transport);

        logger.info("test", "first").unwrap();
        let second = logger.info("test", "second");
        assert!(second.is_err());

        logger.shutdown(Duration::from_secs(1)).await.ok();
    }
}
