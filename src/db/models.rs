use chrono::{DateTime, Utc};
use configgate_types::{ValueKind, ValueParseError};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row of `system_config`.
///
/// `config_value` is opaque here: plaintext or a cipher token, as flagged by
/// `is_encrypted`.
#[derive(Debug, Clone, FromRow)]
pub struct ConfigRow {
    pub id: i64,
    pub category: String,
    pub config_key: String,
    pub config_value: String,
    pub value_kind: String,
    pub description: Option<String>,
    pub is_encrypted: bool,
    pub is_active: bool,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConfigRow {
    pub fn kind(&self) -> Result<ValueKind, ValueParseError> {
        ValueKind::parse(&self.value_kind)
    }

    /// `"CATEGORY.key"`, the audit target for this row.
    pub fn target(&self) -> String {
        format!("{}.{}", self.category, self.config_key)
    }
}

/// A row ready to be written.
///
/// Built only by the settings gate, after classification and encryption.
#[derive(Clone)]
pub struct NewConfigEntry {
    pub category: String,
    pub key: String,
    pub stored_value: String,
    pub value_kind: ValueKind,
    pub description: Option<String>,
    pub is_encrypted: bool,
    pub updated_by: Option<String>,
}

impl std::fmt::Debug for NewConfigEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewConfigEntry")
            .field("category", &self.category)
            .field("key", &self.key)
            .field("value_kind", &self.value_kind)
            .field("is_encrypted", &self.is_encrypted)
            .finish_non_exhaustive()
    }
}

/// Admin audit log row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub actor: String,
    pub action: String,
    pub target: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// New audit record. Value summaries must already be redacted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditRecord {
    pub actor: String,
    pub action: AuditAction,
    pub target: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub details: Option<String>,
}

/// Audited configuration actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    CreateConfig,
    UpdateConfig,
    DeleteConfig,
    ResetConfigDefaults,
    ConfigWriteRefused,
    MigrateConfigEncryption,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateConfig => "CREATE_CONFIG",
            Self::UpdateConfig => "UPDATE_CONFIG",
            Self::DeleteConfig => "DELETE_CONFIG",
            Self::ResetConfigDefaults => "RESET_CONFIG_DEFAULTS",
            Self::ConfigWriteRefused => "CONFIG_WRITE_REFUSED",
            Self::MigrateConfigEncryption => "MIGRATE_CONFIG_ENCRYPTION",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
