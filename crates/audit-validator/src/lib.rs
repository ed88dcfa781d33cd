//! Validator/Sanitizer (C2): the gate between producer input and the
//! pipeline. Structured field-level errors follow the `validator` crate's
//! `ValidationErrors` idiom used across the auth layer; the recursive
//! sanitization walk is hand-rolled since nothing in the stack covers
//! cyclic-map traversal.

mod sanitize;

pub use sanitize::{sanitize_extensions, SanitizeOutcome};

use audit_core::model::{AuditEvent, DataClassification, ExtensionValue};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

const DEFAULT_MAX_STRING_LEN: usize = 10_000;
const DEFAULT_MAX_NESTING_DEPTH: usize = 3;

const PERSONAL_DATA_ACTIONS: &[&str] = &[
    "data.export", "data.delete", "data.rectify", "data.access", "consent.withdraw",
    "profile.update", "profile.read",
];

const DATA_SUBJECT_RIGHTS_ACTIONS: &[&str] = &[
    "data.export", "data.delete", "data.rectify", "data.access", "consent.withdraw",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(ValidationIssue { field: field.into(), message: message.into() });
    }

    fn warn(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue { field: field.into(), message: message.into() });
    }
}

#[derive(Debug, Clone)]
pub struct ComplianceOverlay {
    pub hipaa: bool,
    pub gdpr: bool,
}

impl Default for ComplianceOverlay {
    fn default() -> Self {
        Self { hipaa: false, gdpr: false }
    }
}

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub max_string_len: usize,
    pub max_nesting_depth: usize,
    pub compliance: ComplianceOverlay,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_string_len: DEFAULT_MAX_STRING_LEN,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            compliance: ComplianceOverlay::default(),
        }
    }
}

/// Validate structural invariants and sanitize free-text content. Does not
/// mutate `event` -- returns a cloned, sanitized copy alongside the report.
pub fn validate_and_sanitize(event: &AuditEvent, config: &ValidatorConfig) -> (AuditEvent, ValidationReport) {
    let mut report = ValidationReport { is_valid: true, ..Default::default() };
    let mut sanitized = event.clone();

    if event.action.trim().is_empty() {
        report.error("action", "action is required");
    }

    validate_classification_invariants(event, &mut report);

    if let Some(session) = &event.session_context {
        if let Some(ip) = &session.ip_address {
            match normalize_ip(ip) {
                Some(normalized) => {
                    sanitized.session_context.as_mut().unwrap().ip_address = Some(normalized);
                }
                None => report.error("sessionContext.ipAddress", format!("'{ip}' is not a valid IPv4 or IPv6 address")),
            }
        }
    }

    apply_compliance_overlay(event, &config.compliance, &mut report);

    sanitize_strings(&mut sanitized, config, &mut report);

    let outcome = sanitize_extensions(&sanitized.extensions, config.max_nesting_depth, config.max_string_len);
    sanitized.extensions = outcome.value;
    if outcome.circular_reference_found {
        report.warn("extensions", "circular reference detected in extension map; replaced with sentinel");
    }
    if outcome.depth_truncated {
        report.warn("extensions", format!("extension map nesting exceeded depth {}; truncated", config.max_nesting_depth));
    }
    if outcome.strings_sanitized {
        report.warn("extensions", "one or more extension string values were sanitized (control characters removed or truncated)");
    }

    (sanitized, report)
}

fn validate_classification_invariants(event: &AuditEvent, report: &mut ValidationReport) {
    if event.requires_phi_classification() && event.data_classification != DataClassification::Phi {
        report.error(
            "dataClassification",
            "events targeting a clinical resource type must be classified PHI",
        );
    }
}

fn apply_compliance_overlay(event: &AuditEvent, overlay: &ComplianceOverlay, report: &mut ValidationReport) {
    if overlay.hipaa && event.requires_phi_classification() && event.data_classification != DataClassification::Phi {
        report.error("dataClassification", "HIPAA overlay requires PHI classification for clinical resource targets");
    }

    if overlay.gdpr {
        let has_legal_basis = event
            .extensions
            .get("gdprContext")
            .map(|v| extension_has_key(v, "legalBasis"))
            .unwrap_or(false);

        if PERSONAL_DATA_ACTIONS.contains(&event.action.as_str()) && !has_legal_basis {
            report.error("extensions.gdprContext.legalBasis", "GDPR overlay requires a legal basis for personal-data actions");
        }

        if DATA_SUBJECT_RIGHTS_ACTIONS.contains(&event.action.as_str()) {
            let has_subject = event
                .extensions
                .get("gdprContext")
                .map(|v| extension_has_key(v, "dataSubjectId"))
                .unwrap_or(false);
            if !has_subject {
                report.error("extensions.gdprContext.dataSubjectId", "data-subject-rights actions require a dataSubjectId");
            }
        }
    }
}

fn extension_has_key(value: &ExtensionValue, key: &str) -> bool {
    matches!(value, ExtensionValue::Map(map) if map.contains_key(key))
}

fn sanitize_strings(event: &mut AuditEvent, config: &ValidatorConfig, report: &mut ValidationReport) {
    sanitize_field(&mut event.outcome_description, "outcomeDescription", config, report);
    sanitize_optional(&mut event.principal_id, "principalId", config, report);
    sanitize_optional(&mut event.target_resource_id, "targetResourceId", config, report);
}

fn sanitize_field(field: &mut Option<String>, name: &str, config: &ValidatorConfig, report: &mut ValidationReport) {
    sanitize_optional(field, name, config, report)
}

fn sanitize_optional(field: &mut Option<String>, name: &str, config: &ValidatorConfig, report: &mut ValidationReport) {
    if let Some(value) = field {
        let (clean, changed) = sanitize_string(value, config.max_string_len);
        if changed {
            report.warn(name, "value was sanitized (control characters removed or truncated)");
            *value = clean;
        }
    }
}

/// Strip NUL bytes and control characters (except tab/newline/CR), remove
/// angle brackets, escape quotes/backslashes, and truncate over-length
/// values with a `...[truncated]` suffix.
pub(crate) fn sanitize_string(input: &str, max_len: usize) -> (String, bool) {
    let mut changed = false;
    let mut out = String::with_capacity(input.len());

    for c in input.chars() {
        match c {
            '\0' => { changed = true; }
            c if c.is_control() && c != '\t' && c != '\n' && c != '\r' => { changed = true; }
            '<' | '>' => { changed = true; }
            '"' => { out.push('\\'); out.push('"'); changed = true; }
            '\\' => { out.push('\\'); out.push('\\'); changed = true; }
            c => out.push(c),
        }
    }

    if out.chars().count() > max_len {
        let truncated: String = out.chars().take(max_len).collect();
        out = format!("{truncated}...[truncated]");
        changed = true;
    }

    (out, changed)
}

fn normalize_ip(input: &str) -> Option<String> {
    if let Ok(v4) = Ipv4Addr::from_str(input) {
        return Some(v4.to_string());
    }
    if let Ok(v6) = Ipv6Addr::from_str(input) {
        return Some(v6.to_string().to_lowercase());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_core::model::{EventStatus, SessionContext};

    #[test]
    fn phi_target_without_phi_classification_fails_under_hipaa() {
        let mut event = AuditEvent::builder("fhir.patient.read")
            .target("patient", "p-1")
            .build();
        event.data_classification = DataClassification::Internal;

        let config = ValidatorConfig { compliance: ComplianceOverlay { hipaa: true, gdpr: false }, ..Default::default() };
        let (_, report) = validate_and_sanitize(&event, &config);
        assert!(!report.is_valid);
    }

    #[test]
    fn gdpr_requires_legal_basis_for_personal_data_actions() {
        let event = AuditEvent::builder("data.export").principal_id("user-1").build();
        let config = ValidatorConfig { compliance: ComplianceOverlay { hipaa: false, gdpr: true }, ..Default::default() };
        let (_, report) = validate_and_sanitize(&event, &config);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.field.contains("legalBasis")));
    }

    #[test]
    fn sanitizes_html_and_truncates_long_strings() {
        let event = AuditEvent::builder("system.startup")
            .status(EventStatus::Success)
            .outcome_description(format!("<script>{}", "a".repeat(20)))
            .build();
        let config = ValidatorConfig { max_string_len: 10, ..Default::default() };
        let (sanitized, report) = validate_and_sanitize(&event, &config);
        let desc = sanitized.outcome_description.unwrap();
        assert!(!desc.contains('<'));
        assert!(desc.ends_with("...[truncated]"));
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn normalizes_ipv4_session_context() {
        let event = AuditEvent::builder("auth.login.success")
            .session_context(SessionContext { ip_address: Some("010.001.001.001".to_string()), ..Default::default() })
            .build();
        let config = ValidatorConfig::default();
        let (_, report) = validate_and_sanitize(&event, &config);
        assert!(!report.is_valid);
    }
}
