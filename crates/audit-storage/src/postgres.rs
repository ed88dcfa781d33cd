//! Postgres-backed `StorageAdapter` (C9): the concrete implementation the
//! pipeline, compliance engine, and CLI all write through and read through.
//! Table layout follows `audit_events` / `audit_integrity_log` /
//! `pseudonym_mappings`, indexed on `(organization_id, timestamp DESC)`,
//! `(principal_id)`, `(correlation_id)`, and `(action)`.

use async_trait::async_trait;
use audit_core::error::Result;
use audit_core::model::{AuditEvent, DataClassification, EventStatus, ExtensionValue};
use audit_core::storage::{AuditQuery, AuditQuerySort, StorageAdapter, StorageHealth, StoreOutcome};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;

pub struct PostgresStorageAdapter {
    pool: PgPool,
}

impl PostgresStorageAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_event(row: &sqlx::postgres::PgRow) -> sqlx::Result<AuditEvent> {
        let status: String = row.try_get("status")?;
        let classification: String = row.try_get("data_classification")?;
        let extensions_json: serde_json::Value = row.try_get("extensions")?;

        Ok(AuditEvent {
            id: row.try_get::<Option<String>, _>("id")?,
            timestamp: row.try_get("timestamp")?,
            action: row.try_get("action")?,
            status: parse_status(&status),
            principal_id: row.try_get("principal_id")?,
            organization_id: row.try_get("organization_id")?,
            target_resource_type: row.try_get("target_resource_type")?,
            target_resource_id: row.try_get("target_resource_id")?,
            outcome_description: row.try_get("outcome_description")?,
            data_classification: parse_classification(&classification),
            retention_policy: row.try_get("retention_policy")?,
            correlation_id: row.try_get("correlation_id")?,
            event_version: row.try_get("event_version")?,
            session_context: row
                .try_get::<Option<serde_json::Value>, _>("session_context")?
                .and_then(|v| serde_json::from_value(v).ok()),
            hash: row.try_get("hash")?,
            hash_algorithm: row.try_get("hash_algorithm")?,
            signature: row.try_get("signature")?,
            signature_algorithm: row.try_get("signature_algorithm")?,
            processing_latency_ms: row.try_get("processing_latency_ms")?,
            queue_depth: row
                .try_get::<Option<i64>, _>("queue_depth")?
                .map(|v| v as u64),
            extensions: serde_json::from_value::<HashMap<String, ExtensionValue>>(extensions_json)
                .unwrap_or_default(),
        })
    }
}

fn status_str(status: EventStatus) -> &'static str {
    match status {
        EventStatus::Attempt => "attempt",
        EventStatus::Success => "success",
        EventStatus::Failure => "failure",
    }
}

fn parse_status(raw: &str) -> EventStatus {
    match raw {
        "success" => EventStatus::Success,
        "failure" => EventStatus::Failure,
        _ => EventStatus::Attempt,
    }
}

fn classification_str(classification: DataClassification) -> &'static str {
    match classification {
        DataClassification::Public => "PUBLIC",
        DataClassification::Internal => "INTERNAL",
        DataClassification::Confidential => "CONFIDENTIAL",
        DataClassification::Phi => "PHI",
    }
}

fn parse_classification(raw: &str) -> DataClassification {
    match raw {
        "PUBLIC" => DataClassification::Public,
        "CONFIDENTIAL" => DataClassification::Confidential,
        "PHI" => DataClassification::Phi,
        _ => DataClassification::Internal,
    }
}

#[async_trait]
impl StorageAdapter for PostgresStorageAdapter {
    async fn store_event(&self, event: AuditEvent) -> Result<StoreOutcome> {
        let id = event.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let session_context = event
            .session_context
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| audit_core::error::Error::internal(format!("session_context encode failed: {e}")))?;
        let extensions = serde_json::to_value(&event.extensions)
            .map_err(|e| audit_core::error::Error::internal(format!("extensions encode failed: {e}")))?;

        let row = sqlx::query(
            r#"
            INSERT INTO audit_events (
                id, organization_id, "timestamp", action, status, principal_id,
                target_resource_type, target_resource_id, outcome_description,
                data_classification, retention_policy, correlation_id, event_version,
                session_context, hash, hash_algorithm, signature, signature_algorithm,
                processing_latency_ms, queue_depth, extensions
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21
            )
            ON CONFLICT (organization_id, hash) WHERE hash IS NOT NULL DO UPDATE SET organization_id = EXCLUDED.organization_id
            RETURNING id, organization_id, "timestamp", action, status, principal_id,
                target_resource_type, target_resource_id, outcome_description,
                data_classification, retention_policy, correlation_id, event_version,
                session_context, hash, hash_algorithm, signature, signature_algorithm,
                processing_latency_ms, queue_depth, extensions, (xmax = 0) AS inserted
            "#,
        )
        .bind(&id)
        .bind(&event.organization_id)
        .bind(event.timestamp)
        .bind(&event.action)
        .bind(status_str(event.status))
        .bind(&event.principal_id)
        .bind(&event.target_resource_type)
        .bind(&event.target_resource_id)
        .bind(&event.outcome_description)
        .bind(classification_str(event.data_classification))
        .bind(&event.retention_policy)
        .bind(&event.correlation_id)
        .bind(&event.event_version)
        .bind(session_context)
        .bind(&event.hash)
        .bind(&event.hash_algorithm)
        .bind(&event.signature)
        .bind(&event.signature_algorithm)
        .bind(event.processing_latency_ms)
        .bind(event.queue_depth.map(|v| v as i64))
        .bind(extensions)
        .fetch_one(&self.pool)
        .await?;

        let inserted: bool = row.try_get("inserted")?;
        Ok(StoreOutcome { event: Self::row_to_event(&row)?, was_duplicate: !inserted })
    }

    async fn get_event(&self, organization_id: &str, id: &str) -> Result<Option<AuditEvent>> {
        let row = sqlx::query(
            r#"SELECT * FROM audit_events WHERE organization_id = $1 AND id = $2"#,
        )
        .bind(organization_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_event(&r)).transpose()?)
    }

    async fn query_events(&self, filter: &AuditQuery) -> Result<Vec<AuditEvent>> {
        let mut builder = sqlx::QueryBuilder::new(
            r#"SELECT * FROM audit_events WHERE organization_id = "#,
        );
        builder.push_bind(filter.organization_id.clone());

        if let Some(start) = filter.start_time {
            builder.push(" AND \"timestamp\" >= ");
            builder.push_bind(start);
        }
        if let Some(end) = filter.end_time {
            builder.push(" AND \"timestamp\" <= ");
            builder.push_bind(end);
        }
        if let Some(principal_id) = &filter.principal_id {
            builder.push(" AND principal_id = ");
            builder.push_bind(principal_id.clone());
        }
        if let Some(actions) = &filter.actions {
            builder.push(" AND action = ANY(");
            builder.push_bind(actions.clone());
            builder.push(")");
        }
        if let Some(resource_type) = &filter.target_resource_type {
            builder.push(" AND target_resource_type = ");
            builder.push_bind(resource_type.clone());
        }
        if let Some(resource_id) = &filter.target_resource_id {
            builder.push(" AND target_resource_id = ");
            builder.push_bind(resource_id.clone());
        }
        if let Some(classification) = filter.data_classification {
            builder.push(" AND data_classification = ");
            builder.push_bind(classification_str(classification));
        }
        if let Some(correlation_id) = &filter.correlation_id {
            builder.push(" AND correlation_id = ");
            builder.push_bind(correlation_id.clone());
        }

        match filter.sort {
            AuditQuerySort::TimestampDesc => builder.push(" ORDER BY \"timestamp\" DESC"),
            AuditQuerySort::TimestampAsc => builder.push(" ORDER BY \"timestamp\" ASC"),
        };

        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
        }
        if let Some(offset) = filter.offset {
            builder.push(" OFFSET ");
            builder.push_bind(offset as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        let events = rows
            .iter()
            .map(Self::row_to_event)
            .collect::<sqlx::Result<Vec<_>>>()?;
        Ok(events)
    }

    async fn count_events(&self, filter: &AuditQuery) -> Result<u64> {
        let mut builder = sqlx::QueryBuilder::new(
            r#"SELECT COUNT(*) as count FROM audit_events WHERE organization_id = "#,
        );
        builder.push_bind(filter.organization_id.clone());

        if let Some(start) = filter.start_time {
            builder.push(" AND \"timestamp\" >= ");
            builder.push_bind(start);
        }
        if let Some(end) = filter.end_time {
            builder.push(" AND \"timestamp\" <= ");
            builder.push_bind(end);
        }
        if let Some(principal_id) = &filter.principal_id {
            builder.push(" AND principal_id = ");
            builder.push_bind(principal_id.clone());
        }

        let row = builder.build().fetch_one(&self.pool).await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as u64)
    }

    async fn delete_events_older_than(
        &self,
        organization_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM audit_events
            WHERE organization_id = $1 AND "timestamp" < $2
              AND NOT (
                action LIKE 'security.%' OR action LIKE 'compliance.%' OR action LIKE 'gdpr.%'
                OR action LIKE 'auth.login.%' OR action = 'auth.logout'
                OR action = 'data.access.unauthorized' OR action = 'data.breach.detected'
                OR action LIKE 'system.backup.%'
              )
            "#,
        )
        .bind(organization_id)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_events_for_principal(
        &self,
        organization_id: &str,
        principal_id: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM audit_events
            WHERE organization_id = $1 AND principal_id = $2
              AND NOT (
                action LIKE 'security.%' OR action LIKE 'compliance.%' OR action LIKE 'gdpr.%'
                OR action LIKE 'auth.login.%' OR action = 'auth.logout'
                OR action = 'data.access.unauthorized' OR action = 'data.breach.detected'
                OR action LIKE 'system.backup.%'
              )
            "#,
        )
        .bind(organization_id)
        .bind(principal_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn pseudonymize_principal(
        &self,
        organization_id: &str,
        principal_id: &str,
        pseudonym: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"UPDATE audit_events SET principal_id = $1 WHERE organization_id = $2 AND principal_id = $3"#,
        )
        .bind(pseudonym)
        .bind(organization_id)
        .bind(principal_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<StorageHealth> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => {
                let last_write: Option<DateTime<Utc>> =
                    sqlx::query("SELECT MAX(\"timestamp\") as last_write FROM audit_events")
                        .fetch_optional(&self.pool)
                        .await
                        .ok()
                        .flatten()
                        .and_then(|r| r.try_get::<Option<DateTime<Utc>>, _>("last_write").ok().flatten());
                Ok(StorageHealth { is_healthy: true, message: None, last_write })
            }
            Err(e) => Ok(StorageHealth {
                is_healthy: false,
                message: Some(e.to_string()),
                last_write: None,
            }),
        }
    }
}
