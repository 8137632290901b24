//! Named system settings and the rules protecting the secret ones.

pub mod audit;
pub mod defaults;
pub mod gate;
pub mod migration;
pub mod sensitivity;

pub use audit::{
    audit_sensitive_configs, production_readiness, run_security_check, AuditStatus,
    OverallStatus, ReadinessIssue, SecurityAuditReport, SecurityCheck,
};
pub use defaults::{default_entries, ConfigDefault};
pub use gate::{
    ConfigGate, ConfigView, GateError, Refusal, RefusalReason, ResetOutcome, Resolved,
    SaveOutcome, SavedEntry, SENSITIVE_MARKER, UNAVAILABLE_MARKER,
};
pub use migration::{migrate_plaintext_configs, MigrationError, MigrationReport};
pub use sensitivity::SensitivityClassifier;
