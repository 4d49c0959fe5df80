//! Audit logging for device writes and renderer lifecycle.
//!
//! Every commit the renderer issues against a device, and every commit the
//! device-state store rejects, produces a structured [`AuditRecord`]. Records
//! are emitted through `tracing` on the `audit` target as JSON so they can be
//! shipped alongside the regular logs and filtered independently.
//!
//! # Content of a record
//!
//! - Timestamp (UTC, microsecond precision)
//! - Source component (`PortSecurity`, `GroupTable`, `RendererDaemon`, ...)
//! - Action performed and its outcome
//! - Object identifier and type (device id, table id)
//! - Error message and free-form JSON details

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Audit event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// Configuration loaded or changed
    ConfigurationChange,
    /// Records written to a device
    DeviceWrite,
    /// Records removed from a device
    ResourceDelete,
    /// Renderer startup and shutdown
    SystemLifecycle,
    /// Error and failure events
    ErrorCondition,
    /// Administrative actions
    AdminAction,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditCategory::ConfigurationChange => write!(f, "CONFIGURATION_CHANGE"),
            AuditCategory::DeviceWrite => write!(f, "DEVICE_WRITE"),
            AuditCategory::ResourceDelete => write!(f, "RESOURCE_DELETE"),
            AuditCategory::SystemLifecycle => write!(f, "SYSTEM_LIFECYCLE"),
            AuditCategory::ErrorCondition => write!(f, "ERROR_CONDITION"),
            AuditCategory::AdminAction => write!(f, "ADMIN_ACTION"),
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
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Failure => write!(f, "failure"),
            AuditOutcome::InProgress => write!(f, "in_progress"),
        }
    }
}

/// Structured audit record.
///
/// Built with the `with_*` methods and handed to [`audit_log!`](crate::audit_log).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// UTC timestamp
    pub timestamp: DateTime<Utc>,

    /// Event category
    pub category: AuditCategory,

    /// Component generating the event
    pub source: String,

    /// Action description
    pub action: String,

    /// Outcome of the action
    pub outcome: AuditOutcome,

    /// Object affected by the action, e.g. `openflow:1`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,

    /// Object type, e.g. `flow_table`, `group_table`
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
    ///
    /// The outcome defaults to InProgress until explicitly set.
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

    /// Add additional context details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Set the error message and mark outcome as Failure.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.outcome = AuditOutcome::Failure;
        self
    }

    /// Convert to a JSON string for logging.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Emits an [`AuditRecord`] on the `audit` target.
///
/// Success is logged at info, in-progress at debug, failure at warn.
///
/// # Usage
/// ```ignore
/// let record = AuditRecord::new(AuditCategory::DeviceWrite, "PortSecurity", "commit_flows")
///     .with_outcome(AuditOutcome::Success)
///     .with_object_id("openflow:1")
///     .with_object_type("flow_table");
/// audit_log!(record);
/// ```
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        let record = $record;
        match record.outcome {
            $crate::audit::AuditOutcome::Success => {
                tracing::info!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::InProgress => {
                tracing::debug!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::Failure => {
                tracing::warn!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    error = record.error.as_deref().unwrap_or(""),
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
        }
    };
}

/// Initialize the tracing subscriber with JSON output.
///
/// `log` records from the library are bridged into the same subscriber.
/// Filtering honours `RUST_LOG` and falls back to `log_level`.
pub fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .json(),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_record_creation() {
        let record = AuditRecord::new(AuditCategory::DeviceWrite, "PortSecurity", "commit_flows")
            .with_outcome(AuditOutcome::Success)
            .with_object_id("openflow:1")
            .with_object_type("flow_table");

        assert_eq!(record.category, AuditCategory::DeviceWrite);
        assert_eq!(record.source, "PortSecurity");
        assert_eq!(record.action, "commit_flows");
        assert_eq!(record.outcome, AuditOutcome::Success);
        assert_eq!(record.object_id, Some("openflow:1".to_string()));
        assert_eq!(record.object_type, Some("flow_table".to_string()));
    }

    #[test]
    fn test_audit_record_with_error() {
        let record = AuditRecord::new(AuditCategory::ErrorCondition, "GroupTable", "commit_groups")
            .with_error("commit rejected by device openflow:1");

        assert_eq!(record.outcome, AuditOutcome::Failure);
        assert_eq!(
            record.error,
            Some("commit rejected by device openflow:1".to_string())
        );
    }

    #[test]
    fn test_audit_record_json_serialization() {
        let record = AuditRecord::new(AuditCategory::DeviceWrite, "SourceMapper", "commit_flows")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "table_id": 1,
                "puts": 3
            }));

        let json = record.to_json();
        assert!(json.contains("DEVICE_WRITE"));
        assert!(json.contains("SourceMapper"));
        assert!(json.contains("\"puts\":3"));
        assert!(!json.contains("object_id"));
    }

    #[test]
    fn test_audit_display() {
        assert_eq!(AuditCategory::SystemLifecycle.to_string(), "SYSTEM_LIFECYCLE");
        assert_eq!(AuditOutcome::InProgress.to_string(), "in_progress");
    }
}
