//! Audit records for bridge membership changes.
//!
//! Every change to bridge or port membership, every policy install and every
//! rejected control handle produces one [`AuditRecord`]. Records are emitted
//! through [`audit_log!`](crate::audit_log) on the `audit` tracing target with
//! a JSON rendering attached, so a log pipeline can pick them out and parse
//! them without depending on the human-readable message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn, Level};

/// Audit event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// Bridge or port created
    ResourceCreate,
    /// Port attached or detached
    ResourceModify,
    /// Bridge or port destroyed
    ResourceDelete,
    /// Controller startup and shutdown
    SystemLifecycle,
    /// Forwarding policy installed
    SecurityPolicy,
    /// Control handle checks
    Authorization,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditCategory::ResourceCreate => write!(f, "RESOURCE_CREATE"),
            AuditCategory::ResourceModify => write!(f, "RESOURCE_MODIFY"),
            AuditCategory::ResourceDelete => write!(f, "RESOURCE_DELETE"),
            AuditCategory::SystemLifecycle => write!(f, "SYSTEM_LIFECYCLE"),
            AuditCategory::SecurityPolicy => write!(f, "SECURITY_POLICY"),
            AuditCategory::Authorization => write!(f, "AUTHORIZATION"),
        }
    }
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// Action completed successfully
    Success,
    /// Action failed
    Failure,
    /// Action is in progress
    InProgress,
    /// Action was refused (wrong control handle)
    Denied,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Failure => write!(f, "failure"),
            AuditOutcome::InProgress => write!(f, "in_progress"),
            AuditOutcome::Denied => write!(f, "denied"),
        }
    }
}

/// Structured audit record.
///
/// Built with the `with_*` methods and handed to `audit_log!`. The outcome
/// defaults to [`AuditOutcome::InProgress`] until set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// UTC timestamp
    pub timestamp: DateTime<Utc>,

    /// Event category
    pub category: AuditCategory,

    /// Component generating the event
    pub source: String,

    /// Operation performed
    pub action: String,

    /// Outcome of the action
    pub outcome: AuditOutcome,

    /// Bridge or port name affected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,

    /// "bridge", "port" or "policy"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,

    /// Additional context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Error message if outcome is failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// Create a new audit record with the current timestamp.
    pub fn new(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            details: None,
            error: None,
        }
    }

    /// Set the outcome of the action.
    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Set the object identifier affected by the action.
    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    /// Set the object type.
    pub fn with_object_type(mut self, obj_type: impl Into<String>) -> Self {
        self.object_type = Some(obj_type.into());
        self
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Set the error message and mark outcome as Failure.
    ///
    /// A record already marked [`AuditOutcome::Denied`] keeps that outcome.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        if self.outcome != AuditOutcome::Denied {
            self.outcome = AuditOutcome::Failure;
        }
        self
    }

    /// Level the record is logged at: info for successes, debug while in
    /// progress, warn for failures and denials.
    pub fn level(&self) -> Level {
        match self.outcome {
            AuditOutcome::Success => Level::INFO,
            AuditOutcome::InProgress => Level::DEBUG,
            AuditOutcome::Failure | AuditOutcome::Denied => Level::WARN,
        }
    }

    /// Logs the record on the `audit` target with the affected object as
    /// fields and the full record as `audit_json`.
    pub fn emit(&self) {
        let object_id = self.object_id.as_deref().unwrap_or("-");
        let object_type = self.object_type.as_deref().unwrap_or("-");
        let level = self.level();
        if level == Level::WARN {
            warn!(
                target: "audit",
                category = %self.category,
                source = %self.source,
                object_type,
                object_id,
                outcome = %self.outcome,
                error = self.error.as_deref().unwrap_or(""),
                audit_json = %self.to_json(),
                "{} {} {}: {}",
                self.action,
                object_type,
                object_id,
                self.outcome
            );
        } else if level == Level::DEBUG {
            debug!(
                target: "audit",
                category = %self.category,
                source = %self.source,
                object_type,
                object_id,
                "{} {} {} started",
                self.action,
                object_type,
                object_id
            );
        } else {
            info!(
                target: "audit",
                category = %self.category,
                source = %self.source,
                object_type,
                object_id,
                outcome = %self.outcome,
                audit_json = %self.to_json(),
                "{} {} {}: {}",
                self.action,
                object_type,
                object_id,
                self.outcome
            );
        }
    }

    /// Convert to JSON string for logging.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Emits an [`AuditRecord`] on the `audit` target.
///
/// # Usage
/// ```ignore
/// audit_log!(AuditRecord::new(AuditCategory::ResourceCreate, "PortRegistry", "create_port")
///     .with_outcome(AuditOutcome::Success)
///     .with_object_id("v0"));
/// ```
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        $crate::audit::AuditRecord::emit(&$record)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_defaults_in_progress() {
        let record = AuditRecord::new(AuditCategory::ResourceCreate, "PortRegistry", "create_port");
        assert_eq!(record.outcome, AuditOutcome::InProgress);
        assert!(record.object_id.is_none());
    }

    #[test]
    fn test_with_error_marks_failure() {
        let record = AuditRecord::new(AuditCategory::ResourceModify, "PortRegistry", "attach")
            .with_error("EBUSY");
        assert_eq!(record.outcome, AuditOutcome::Failure);
        assert_eq!(record.error.as_deref(), Some("EBUSY"));
    }

    #[test]
    fn test_denied_survives_error() {
        let record = AuditRecord::new(AuditCategory::Authorization, "PortRegistry", "detach")
            .with_outcome(AuditOutcome::Denied)
            .with_error("invalid control handle");
        assert_eq!(record.outcome, AuditOutcome::Denied);
    }

    #[test]
    fn test_json_skips_empty_fields() {
        let record = AuditRecord::new(AuditCategory::SystemLifecycle, "BridgeController", "startup")
            .with_outcome(AuditOutcome::Success)
            .with_object_id("vale0:")
            .with_object_type("bridge");
        let json = record.to_json();
        assert!(json.contains("\"category\":\"SYSTEM_LIFECYCLE\""));
        assert!(json.contains("\"outcome\":\"success\""));
        assert!(json.contains("\"object_id\":\"vale0:\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_level_follows_outcome() {
        let record = AuditRecord::new(AuditCategory::Authorization, "PortRegistry", "attach");
        assert_eq!(record.level(), Level::DEBUG);
        assert_eq!(
            record.clone().with_outcome(AuditOutcome::Success).level(),
            Level::INFO
        );
        assert_eq!(record.clone().with_error("ENOMEM").level(), Level::WARN);
        assert_eq!(
            record.with_outcome(AuditOutcome::Denied).level(),
            Level::WARN
        );
    }

    #[test]
    fn test_audit_log_macro_expands() {
        audit_log!(AuditRecord::new(AuditCategory::ResourceDelete, "test", "destroy_port")
            .with_outcome(AuditOutcome::Success));
        audit_log!(AuditRecord::new(AuditCategory::ResourceDelete, "test", "destroy_port")
            .with_error("ENXIO"));
    }
}
