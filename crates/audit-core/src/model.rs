//! Canonical audit event data model.
//!
//! This is the single record type that flows through every stage of the
//! pipeline: producer -> broker -> worker -> storage -> compliance engine.
//! Only the critical field set (see [`AuditEvent::critical_fields`]) feeds the
//! integrity hash; everything else may be enriched after the fact without
//! invalidating a previously computed hash or signature.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Sensitivity classification driving retention and HIPAA handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataClassification {
    Public,
    Internal,
    Confidential,
    Phi,
}

impl Default for DataClassification {
    fn default() -> Self {
        DataClassification::Internal
    }
}

/// Outcome of the audited action as reported by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Attempt,
    Success,
    Failure,
}

/// Geolocation attached to a session, when the caller can supply it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geolocation {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

/// Session/request context a caller attaches to an event.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionContext {
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub geolocation: Option<Geolocation>,
}

/// Open, typed extension value for domain-specific context (FHIR, GDPR, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtensionValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ExtensionValue>),
    Map(HashMap<String, ExtensionValue>),
}

/// The canonical audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Assigned by the storage adapter on insert; absent before persistence.
    pub id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub status: EventStatus,
    pub principal_id: Option<String>,
    pub organization_id: Option<String>,
    pub target_resource_type: Option<String>,
    pub target_resource_id: Option<String>,
    pub outcome_description: Option<String>,
    #[serde(default)]
    pub data_classification: DataClassification,
    #[serde(default = "default_retention_policy")]
    pub retention_policy: String,
    pub correlation_id: Option<String>,
    #[serde(default = "default_event_version")]
    pub event_version: String,
    pub session_context: Option<SessionContext>,
    pub hash: Option<String>,
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,
    pub signature: Option<String>,
    pub signature_algorithm: Option<String>,
    pub processing_latency_ms: Option<i64>,
    pub queue_depth: Option<u64>,
    #[serde(default)]
    pub extensions: HashMap<String, ExtensionValue>,
}

fn default_retention_policy() -> String {
    "standard".to_string()
}

fn default_event_version() -> String {
    "1.0".to_string()
}

fn default_hash_algorithm() -> String {
    "SHA-256".to_string()
}

/// Actions that, per §4.10, may never be hard-deleted -- only pseudonymized.
const COMPLIANCE_CRITICAL_PREFIXES: &[&str] = &["security.", "compliance.", "gdpr."];
const COMPLIANCE_CRITICAL_ALLOWLIST: &[&str] = &[
    "auth.login.",
    "auth.logout",
    "data.access.unauthorized",
    "data.breach.detected",
    "system.backup.",
];

/// Resource type names that force `DataClassification::Phi` per §4.2 rule 4.
const PHI_RESOURCE_TYPES: &[&str] = &["patient", "encounter", "observation", "medical_record"];

const DATA_SUBJECT_RIGHTS_ACTIONS: &[&str] = &[
    "data.export",
    "data.delete",
    "data.rectify",
    "data.access",
    "consent.withdraw",
];

impl AuditEvent {
    pub fn builder(action: impl Into<String>) -> AuditEventBuilder {
        AuditEventBuilder::new(action)
    }

    /// Fields that participate in the integrity hash, in canonical (sorted
    /// key) order. Values are JSON-encoded; missing fields encode as `null`.
    pub fn critical_fields(&self) -> serde_json::Value {
        serde_json::json!({
            "action": self.action,
            "organizationId": self.organization_id,
            "outcomeDescription": self.outcome_description,
            "principalId": self.principal_id,
            "status": self.status,
            "targetResourceId": self.target_resource_id,
            "targetResourceType": self.target_resource_type,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }

    pub fn is_compliance_critical(&self) -> bool {
        COMPLIANCE_CRITICAL_PREFIXES
            .iter()
            .any(|p| self.action.starts_with(p))
            || COMPLIANCE_CRITICAL_ALLOWLIST
                .iter()
                .any(|p| self.action.starts_with(p))
    }

    pub fn requires_phi_classification(&self) -> bool {
        self.target_resource_type
            .as_deref()
            .map(|t| PHI_RESOURCE_TYPES.contains(&t))
            .unwrap_or(false)
    }

    pub fn is_data_subject_rights_action(&self) -> bool {
        DATA_SUBJECT_RIGHTS_ACTIONS
            .iter()
            .any(|a| self.action == *a)
    }
}

pub struct AuditEventBuilder {
    event: AuditEvent,
}

impl AuditEventBuilder {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            event: AuditEvent {
                id: None,
                timestamp: Utc::now(),
                action: action.into(),
                status: EventStatus::Attempt,
                principal_id: None,
                organization_id: None,
                target_resource_type: None,
                target_resource_id: None,
                outcome_description: None,
                data_classification: DataClassification::Internal,
                retention_policy: default_retention_policy(),
                correlation_id: None,
                event_version: default_event_version(),
                session_context: None,
                hash: None,
                hash_algorithm: default_hash_algorithm(),
                signature: None,
                signature_algorithm: None,
                processing_latency_ms: None,
                queue_depth: None,
                extensions: HashMap::new(),
            },
        }
    }

    pub fn status(mut self, status: EventStatus) -> Self {
        self.event.status = status;
        self
    }

    pub fn principal_id(mut self, principal_id: impl Into<String>) -> Self {
        self.event.principal_id = Some(principal_id.into());
        self
    }

    pub fn organization_id(mut self, organization_id: impl Into<String>) -> Self {
        self.event.organization_id = Some(organization_id.into());
        self
    }

    pub fn target(mut self, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.event.target_resource_type = Some(resource_type.into());
        self.event.target_resource_id = Some(resource_id.into());
        self
    }

    pub fn outcome_description(mut self, description: impl Into<String>) -> Self {
        self.event.outcome_description = Some(description.into());
        self
    }

    pub fn data_classification(mut self, classification: DataClassification) -> Self {
        self.event.data_classification = classification;
        self
    }

    pub fn retention_policy(mut self, policy: impl Into<String>) -> Self {
        self.event.retention_policy = policy.into();
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.event.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn session_context(mut self, context: SessionContext) -> Self {
        self.event.session_context = Some(context);
        self
    }

    pub fn extension(mut self, key: impl Into<String>, value: ExtensionValue) -> Self {
        self.event.extensions.insert(key.into(), value);
        self
    }

    /// Apply a named preset, letting any field already set on this builder win.
    pub fn preset(mut self, preset: &AuditPreset) -> Self {
        if self.event.target_resource_type.is_none() {
            self.event.target_resource_type = preset.target_resource_type.clone();
        }
        if self.event.data_classification == DataClassification::Internal {
            self.event.data_classification = preset.data_classification;
        }
        if self.event.retention_policy == default_retention_policy() {
            self.event.retention_policy = preset.retention_policy.clone();
        }
        for (k, v) in &preset.extensions {
            self.event.extensions.entry(k.clone()).or_insert_with(|| v.clone());
        }
        self
    }

    pub fn build(mut self) -> AuditEvent {
        if self.event.requires_phi_classification() {
            self.event.data_classification = DataClassification::Phi;
        }
        self.event
    }
}

/// A named default profile (target type, classification, retention) merged
/// into events produced through `AuditProducer::log_with_enhancements`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPreset {
    pub name: String,
    pub target_resource_type: Option<String>,
    pub data_classification: DataClassification,
    pub retention_policy: String,
    #[serde(default)]
    pub extensions: HashMap<String, ExtensionValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_defaults() {
        let event = AuditEvent::builder("auth.login.success")
            .status(EventStatus::Success)
            .principal_id("user-1")
            .build();

        assert_eq!(event.event_version, "1.0");
        assert_eq!(event.retention_policy, "standard");
        assert_eq!(event.hash_algorithm, "SHA-256");
        assert!(event.id.is_none());
    }

    #[test]
    fn phi_resource_forces_classification() {
        let event = AuditEvent::builder("fhir.patient.read")
            .target("patient", "p-1")
            .build();
        assert_eq!(event.data_classification, DataClassification::Phi);
    }

    #[test]
    fn compliance_critical_actions() {
        let critical = AuditEvent::builder("gdpr.erase").build();
        assert!(critical.is_compliance_critical());

        let ordinary = AuditEvent::builder("inventory.item.update").build();
        assert!(!ordinary.is_compliance_critical());
    }

    #[test]
    fn critical_fields_excludes_mutable_observability() {
        let event = AuditEvent::builder("data.export")
            .principal_id("user-1")
            .build();
        let fields = event.critical_fields();
        assert!(fields.get("processingLatencyMs").is_none());
        assert!(fields.get("hash").is_none());
    }
}
