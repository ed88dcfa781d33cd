pub mod circuit_breaker;
pub mod dlq;
pub mod executor;
pub mod queue;
pub mod retry;
pub mod traits;
pub mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
pub use dlq::{DeadLetterQueue, DeadLetterRecord, RedisDeadLetterQueue};
pub use executor::{JobExecutor, ExecutorConfig};
pub use queue::RedisJobQueue;
pub use retry::{execute_with_retry, is_retryable, RetryPolicy};
pub use traits::JobQueue;
pub use traits::{Job, JobContext, JobHandler, JobHandlerConfig, JobResult, QueueStats};
pub use types::{JobId, JobPriority, JobState, JobStatus, QueuedJob, SerializableJob};
