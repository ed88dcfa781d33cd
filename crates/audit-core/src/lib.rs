pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod storage;

pub use config::{
    AppConfig, BrokerConfig, Config, CryptoConfig, DatabaseConfig, GdprConfig, KmsConfig,
    MetricsConfig, RetentionConfig, ServerConfig,
};
pub use crypto::{CryptoCore, HmacKeyring, KmsClient, LocalKms, Signature, hash_event, verify_hash};
pub use database::DatabasePool;
pub use error::{Error, ErrorCode, ErrorContext, ErrorMetrics, Result};
pub use jobs::{
    CircuitBreaker, CircuitBreakerConfig, DeadLetterQueue, DeadLetterRecord, JobExecutor,
    JobQueue, RedisDeadLetterQueue, RedisJobQueue, RetryPolicy, SerializableJob,
};
pub use logging::{BatchedLogger, LogContext, LogLevel, LogRecord, LogTransport, LoggerConfig, TracingTransport};
pub use metrics::{MetricsRegistry, MetricsService, PipelineMetrics};
pub use model::{
    AuditEvent, AuditEventBuilder, AuditPreset, DataClassification, EventStatus, ExtensionValue,
    Geolocation, SessionContext,
};
pub use storage::{
    AuditQuery, AuditQueryBuilder, AuditQuerySort, StorageAdapter, StorageHealth, StoreOutcome,
};

// Re-export commonly used types from dependencies
pub use uuid::Uuid;
pub use chrono::{DateTime, Utc};