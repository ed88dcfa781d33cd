//! GDPR/Compliance Engine (C10): data-subject operations, pseudonymization,
//! and the daily retention sweep. Every operation that touches a subject's
//! record emits its own `gdpr.*` audit event through the producer, so the
//! operation is itself part of the trail it manages.

use audit_core::error::{Error, Result};
use audit_core::model::{AuditEvent, DataClassification};
use audit_core::{AuditQuery, StorageAdapter};
use audit_pipeline::AuditProducer;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const PSEUDONYM_PREFIX: &str = "pseudo-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PseudonymizationMode {
    /// `pseudonym = "pseudo-" + sha256(originalId || salt)[0:16]` -- stable
    /// across repeated calls for the same `originalId`.
    Deterministic,
    /// 16 random bytes, hex-encoded; a fresh pseudonym every call.
    Random,
}

#[derive(Debug, Clone)]
pub struct PseudonymMapping {
    pub original_id: String,
    pub pseudonym_id: String,
    /// `originalId` encrypted via KMS; plaintext is discarded once this is set.
    pub encrypted_original: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub enum ExportFormat {
    Json,
    Csv,
    Xml,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SubjectExport {
    pub principal_id: String,
    pub event_count: usize,
    pub payload: String,
}

/// Fields stripped from every exported record -- internal/observability
/// data that isn't part of what the data subject is entitled to see.
const STRIPPED_FIELDS: &[&str] = &[
    "hash",
    "hashAlgorithm",
    "signature",
    "signatureAlgorithm",
    "processingLatencyMs",
    "queueDepth",
];

pub struct GdprEngine {
    storage: Arc<dyn StorageAdapter>,
    producer: Arc<AuditProducer>,
    kms: Arc<dyn audit_core::KmsClient>,
    pseudonym_salt: Vec<u8>,
    /// Keyed-mutex set serializing pseudonymization per `originalId` so two
    /// concurrent erasure requests for the same subject can't race.
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    mappings: DashMap<String, PseudonymMapping>,
}

impl GdprEngine {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        producer: Arc<AuditProducer>,
        kms: Arc<dyn audit_core::KmsClient>,
        pseudonym_salt: Vec<u8>,
    ) -> Self {
        Self {
            storage,
            producer,
            kms,
            pseudonym_salt,
            locks: DashMap::new(),
            mappings: DashMap::new(),
        }
    }

    fn lock_for(&self, original_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(original_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn deterministic_pseudonym(&self, original_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(original_id.as_bytes());
        hasher.update(&self.pseudonym_salt);
        let digest = hasher.finalize();
        format!("{PSEUDONYM_PREFIX}{}", hex::encode(&digest[..8]))
    }

    /// Returns the existing pseudonym for `original_id` in deterministic
    /// mode, or mints (and persists) a new mapping.
    pub async fn pseudonymize(&self, original_id: &str, mode: PseudonymizationMode) -> Result<String> {
        let guard = self.lock_for(original_id);
        let _permit = guard.lock().await;

        if mode == PseudonymizationMode::Deterministic {
            if let Some(existing) = self.mappings.get(original_id) {
                return Ok(existing.pseudonym_id.clone());
            }
        }

        let pseudonym_id = match mode {
            PseudonymizationMode::Deterministic => self.deterministic_pseudonym(original_id),
            PseudonymizationMode::Random => {
                use rand::RngCore;
                let mut bytes = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut bytes);
                format!("{PSEUDONYM_PREFIX}{}", hex::encode(bytes))
            }
        };

        let encrypted_original = self.kms.encrypt_data_key(original_id.as_bytes()).await?;
        self.mappings.insert(
            original_id.to_string(),
            PseudonymMapping {
                original_id: original_id.to_string(),
                pseudonym_id: pseudonym_id.clone(),
                encrypted_original,
                created_at: Utc::now(),
            },
        );

        Ok(pseudonym_id)
    }

    /// Erasure: hard-delete `principal_id`'s non-compliance-critical events
    /// and pseudonymize its compliance-critical ones, in the same call.
    /// Each operation that actually touches a row gets its own `gdpr.*`
    /// audit event, since the two are independent outcomes with distinct
    /// retention consequences.
    pub async fn erase(&self, organization_id: &str, principal_id: &str) -> Result<u64> {
        let query = AuditQuery::builder(organization_id).principal_id(principal_id).build();
        let events = self.storage.query_events(&query).await?;

        let has_non_critical = events.iter().any(|e| !e.is_compliance_critical());
        let has_critical = events.iter().any(|e| e.is_compliance_critical());

        let mut total = 0u64;

        if has_non_critical {
            let deleted = self
                .storage
                .delete_events_for_principal(organization_id, principal_id)
                .await?;
            total += deleted;

            let delete_event = AuditEvent::builder("gdpr.delete")
                .organization_id(organization_id)
                .principal_id(principal_id)
                .outcome_description(format!("deleted {deleted} non-critical event(s)"))
                .data_classification(DataClassification::Confidential)
                .build();
            self.producer.log_critical(delete_event).await?;
        }

        if has_critical {
            let pseudonym = self.pseudonymize(principal_id, PseudonymizationMode::Deterministic).await?;
            let pseudonymized = self
                .storage
                .pseudonymize_principal(organization_id, principal_id, &pseudonym)
                .await?;
            total += pseudonymized;

            let pseudonymize_event = AuditEvent::builder("gdpr.pseudonymize")
                .organization_id(organization_id)
                .principal_id(principal_id)
                .outcome_description(format!("pseudonymized {pseudonymized} compliance-critical event(s)"))
                .data_classification(DataClassification::Confidential)
                .build();
            self.producer.log_critical(pseudonymize_event).await?;
        }

        Ok(total)
    }

    /// Access/portability: a sanitized export stripped of integrity and
    /// observability fields, in the requested format.
    pub async fn export(&self, organization_id: &str, principal_id: &str, format: ExportFormat) -> Result<SubjectExport> {
        let query = AuditQuery::builder(organization_id).principal_id(principal_id).build();
        let events = self.storage.query_events(&query).await?;
        let sanitized: Vec<serde_json::Value> = events.iter().map(strip_internal_fields).collect();

        let payload = match format {
            ExportFormat::Json => serde_json::to_string_pretty(&sanitized)
                .map_err(|e| Error::validation(format!("failed to serialize export: {e}")))?,
            ExportFormat::Csv => render_csv(&sanitized),
            ExportFormat::Xml => render_xml(&sanitized)?,
        };

        let event = AuditEvent::builder("gdpr.access")
            .organization_id(organization_id)
            .principal_id(principal_id)
            .outcome_description(format!("exported {} events", sanitized.len()))
            .build();
        self.producer.log(event).await?;

        Ok(SubjectExport { principal_id: principal_id.to_string(), event_count: sanitized.len(), payload })
    }

    /// Rectification never mutates the original record; it only records a
    /// compensating audit event carrying the correction.
    pub async fn rectify(&self, organization_id: &str, principal_id: &str, correction: &str) -> Result<()> {
        let event = AuditEvent::builder("gdpr.rectify")
            .organization_id(organization_id)
            .principal_id(principal_id)
            .outcome_description(correction)
            .build();
        self.producer.log_critical(event).await?;
        Ok(())
    }
}

fn strip_internal_fields(event: &AuditEvent) -> serde_json::Value {
    let mut value = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
    if let serde_json::Value::Object(map) = &mut value {
        for field in STRIPPED_FIELDS {
            map.remove(*field);
        }
        if let Some(serde_json::Value::Object(details)) = map.get_mut("extensions") {
            details.remove("internalSystemId");
            details.remove("debugInfo");
            details.remove("performanceMetrics");
        }
    }
    value
}

fn render_csv(rows: &[serde_json::Value]) -> String {
    let Some(first) = rows.first() else { return String::new() };
    let serde_json::Value::Object(first_obj) = first else { return String::new() };
    let headers: Vec<&String> = first_obj.keys().collect();

    let mut out = headers.iter().map(|h| h.as_str()).collect::<Vec<_>>().join(",");
    out.push('\n');

    for row in rows {
        if let serde_json::Value::Object(obj) = row {
            let cells: Vec<String> = headers
                .iter()
                .map(|h| csv_escape(&obj.get(*h).map(|v| v.to_string()).unwrap_or_default()))
                .collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
    }
    out
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn render_xml(rows: &[serde_json::Value]) -> Result<String> {
    let mut out = String::from("<auditExport>\n");
    for row in rows {
        out.push_str("  <event>\n");
        if let serde_json::Value::Object(obj) = row {
            for (key, value) in obj {
                let escaped = quick_xml::escape::escape(value.to_string().trim_matches('"'));
                out.push_str(&format!("    <{key}>{escaped}</{key}>\n"));
            }
        }
        out.push_str("  </event>\n");
    }
    out.push_str("</auditExport>\n");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_pseudonym_is_stable_for_same_salt() {
        let engine_salt = b"fixed-salt-for-test".to_vec();
        let hash_one = {
            let mut h = Sha256::new();
            h.update(b"user-1");
            h.update(&engine_salt);
            h.finalize()
        };
        let hash_two = {
            let mut h = Sha256::new();
            h.update(b"user-1");
            h.update(&engine_salt);
            h.finalize()
        };
        assert_eq!(hash_one, hash_two);
    }

    #[test]
    fn csv_escapes_commas_and_quotes() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("a\"b"), "\"a\"\"b\"");
    }
}
