//! Storage Adapter boundary (C9): the contract the pipeline writes through
//! and the query/compliance layers read through. Generalized from the old
//! single-event-type backend trait to the canonical
//! [`crate::model::AuditEvent`], and widened to the organization-scoped,
//! classification-aware query shape the compliance engine needs.

use crate::error::Result;
use crate::model::{AuditEvent, DataClassification};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Persist an event, assigning its id. Must be idempotent on
    /// `(organization_id, hash)` so a redelivered job does not duplicate
    /// storage; `StoreOutcome::was_duplicate` tells the caller whether the
    /// row already existed so it can count it instead of treating it as a
    /// fresh ingest.
    async fn store_event(&self, event: AuditEvent) -> Result<StoreOutcome>;

    async fn get_event(&self, organization_id: &str, id: &str) -> Result<Option<AuditEvent>>;

    async fn query_events(&self, filter: &AuditQuery) -> Result<Vec<AuditEvent>>;

    async fn count_events(&self, filter: &AuditQuery) -> Result<u64>;

    /// Apply retention: hard-delete events past their window, except
    /// compliance-critical ones which the caller must pseudonymize instead.
    async fn delete_events_older_than(
        &self,
        organization_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64>;

    /// Hard-delete `principal_id`'s non-compliance-critical events, for GDPR
    /// erasure. Scoped to the single principal -- unlike
    /// `delete_events_older_than`, which sweeps the whole organization by
    /// age. Compliance-critical events for the principal are left in place
    /// for the caller to pseudonymize via `pseudonymize_principal`.
    async fn delete_events_for_principal(
        &self,
        organization_id: &str,
        principal_id: &str,
    ) -> Result<u64>;

    /// Overwrite the principal-identifying fields of matching events with a
    /// pseudonym, used for GDPR erasure on events retention would otherwise
    /// keep forever.
    async fn pseudonymize_principal(
        &self,
        organization_id: &str,
        principal_id: &str,
        pseudonym: &str,
    ) -> Result<u64>;

    async fn health_check(&self) -> Result<StorageHealth>;
}

/// Result of a `store_event` call: the stored event (id assigned) plus
/// whether it was already present under `(organization_id, hash)`.
#[derive(Debug, Clone)]
pub struct StoreOutcome {
    pub event: AuditEvent,
    pub was_duplicate: bool,
}

#[derive(Debug, Clone)]
pub struct StorageHealth {
    pub is_healthy: bool,
    pub message: Option<String>,
    pub last_write: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub organization_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub principal_id: Option<String>,
    pub actions: Option<Vec<String>>,
    pub target_resource_type: Option<String>,
    pub target_resource_id: Option<String>,
    pub data_classification: Option<DataClassification>,
    pub correlation_id: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub sort: AuditQuerySort,
}

#[derive(Debug, Clone, Default)]
pub enum AuditQuerySort {
    #[default]
    TimestampDesc,
    TimestampAsc,
}

pub struct AuditQueryBuilder {
    query: AuditQuery,
}

impl AuditQueryBuilder {
    pub fn new(organization_id: impl Into<String>) -> Self {
        Self {
            query: AuditQuery {
                organization_id: organization_id.into(),
                ..Default::default()
            },
        }
    }

    pub fn time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.query.start_time = Some(start);
        self.query.end_time = Some(end);
        self
    }

    pub fn principal_id(mut self, principal_id: impl Into<String>) -> Self {
        self.query.principal_id = Some(principal_id.into());
        self
    }

    pub fn actions(mut self, actions: Vec<String>) -> Self {
        self.query.actions = Some(actions);
        self
    }

    pub fn target(mut self, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.query.target_resource_type = Some(resource_type.into());
        self.query.target_resource_id = Some(resource_id.into());
        self
    }

    pub fn classification(mut self, classification: DataClassification) -> Self {
        self.query.data_classification = Some(classification);
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.query.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.query.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.query.offset = Some(offset);
        self
    }

    pub fn build(self) -> AuditQuery {
        self.query
    }
}

impl AuditQuery {
    pub fn builder(organization_id: impl Into<String>) -> AuditQueryBuilder {
        AuditQueryBuilder::new(organization_id)
    }
}
