pub mod handler;
pub mod producer;

pub use handler::AuditIngestHandler;
pub use producer::{AuditProducer, INGEST_JOB_TYPE};
