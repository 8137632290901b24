//! The write path for settings.
//!
//! Every save is classified, encrypted when required, checked once more, and
//! only then handed to the store as a single upsert. A save ends either
//! persisted or refused. No path leaves a sensitive, non-empty value stored
//! with `is_encrypted = false`.
//!
//! Refusals are expected outcomes and come back as [`SaveOutcome::Refused`].
//! Only storage problems and internal faults are `Err`.

use crate::crypto::{mask_default, CipherBox};
use crate::db::{
    AuditAction, AuditSink, ConfigRow, ConfigStore, NewAuditRecord, NewConfigEntry, StoreError,
};
use crate::settings::defaults::ConfigDefault;
use crate::settings::SensitivityClassifier;
use chrono::{DateTime, Utc};
use configgate_types::{ConfigValue, ValueKind};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

/// Stands in for sensitive values in audit records.
pub const SENSITIVE_MARKER: &str = "[SENSITIVE]";

/// Stands in for encrypted, non-sensitive values in audit records.
pub const ENCRYPTED_MARKER: &str = "[ENCRYPTED]";

/// Display value of a setting that could not be decrypted.
pub const UNAVAILABLE_MARKER: &str = "[UNAVAILABLE]";

/// Why a write was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalReason {
    /// No working key
    CipherUnavailable,
    /// A key exists but encrypting failed
    EncryptionFailed,
    /// The final plaintext check tripped, in the gate or in the database
    PlaintextGuard,
}

impl RefusalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CipherUnavailable => "cipher_unavailable",
            Self::EncryptionFailed => "encryption_failed",
            Self::PlaintextGuard => "plaintext_guard",
        }
    }

    /// `"policy"` for deliberate refusals, `"mechanism"` when the cipher broke.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EncryptionFailed => "mechanism",
            Self::CipherUnavailable | Self::PlaintextGuard => "policy",
        }
    }
}

impl std::fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A refused write. Never carries the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Refusal {
    pub category: String,
    pub key: String,
    pub reason: RefusalReason,
}

impl Refusal {
    fn new(category: &str, key: &str, reason: RefusalReason) -> Self {
        Self {
            category: category.to_string(),
            key: key.to_string(),
            reason,
        }
    }

    pub fn target(&self) -> String {
        format!("{}.{}", self.category, self.key)
    }

    /// Message for the administrator who attempted the write.
    pub fn user_message(&self) -> &'static str {
        match self.reason {
            RefusalReason::CipherUnavailable => {
                "Security block: encryption is not available, so this sensitive setting was not saved. Configure ENCRYPTION_KEY and restart."
            }
            RefusalReason::EncryptionFailed => {
                "Security block: the value could not be encrypted and was not saved."
            }
            RefusalReason::PlaintextGuard => {
                "Security block: sensitive settings cannot be stored unencrypted."
            }
        }
    }
}

impl std::fmt::Display for Refusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "write to {} refused: {}", self.target(), self.reason)
    }
}

/// Summary of a persisted write
#[derive(Debug, Clone, Serialize)]
pub struct SavedEntry {
    pub category: String,
    pub key: String,
    pub value_kind: ValueKind,
    pub is_sensitive: bool,
    pub is_encrypted: bool,
    /// No active row existed before this write
    pub created: bool,
    pub updated_at: DateTime<Utc>,
    /// Set when a non-sensitive value could not be encrypted and was stored as is
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SaveOutcome {
    Persisted(SavedEntry),
    Refused(Refusal),
}

impl SaveOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted(_))
    }

    pub fn refusal(&self) -> Option<&Refusal> {
        match self {
            Self::Refused(refusal) => Some(refusal),
            Self::Persisted(_) => None,
        }
    }

    pub fn saved(&self) -> Option<&SavedEntry> {
        match self {
            Self::Persisted(saved) => Some(saved),
            Self::Refused(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ResetOutcome {
    Applied { count: usize },
    Refused(Refusal),
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("internal fault: {0}")]
    Fault(String),
}

/// A stored value after decryption.
#[derive(Clone, PartialEq)]
pub enum Resolved {
    Value(ConfigValue),
    /// Decryption or parsing failed; the cause is in the logs
    Unavailable,
}

impl Resolved {
    pub fn value(&self) -> Option<&ConfigValue> {
        match self {
            Self::Value(value) => Some(value),
            Self::Unavailable => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(value) => write!(f, "Value(<{}>)", value.kind()),
            Self::Unavailable => write!(f, "Unavailable"),
        }
    }
}

/// A setting as the UI sees it.
///
/// `value` is for internal use and is never serialized; clients get
/// `display_value`, which is masked for sensitive or encrypted settings.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigView {
    pub category: String,
    pub key: String,
    #[serde(skip)]
    pub value: Resolved,
    pub value_kind: String,
    pub display_value: String,
    pub is_sensitive: bool,
    pub is_encrypted: bool,
    pub description: Option<String>,
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Entry ready for the store, plus what the audit log may say about it.
struct Prepared {
    entry: NewConfigEntry,
    sensitive: bool,
    summary: String,
    warning: Option<String>,
}

/// Last check before a write reaches the store.
pub fn guard_plaintext(sensitive: bool, entry: &NewConfigEntry) -> Result<(), RefusalReason> {
    if sensitive && !entry.stored_value.is_empty() && !entry.is_encrypted {
        return Err(RefusalReason::PlaintextGuard);
    }
    Ok(())
}

/// Enforces encryption of sensitive settings on every write.
pub struct ConfigGate {
    store: Arc<dyn ConfigStore>,
    audit: Arc<dyn AuditSink>,
    cipher: Arc<CipherBox>,
    classifier: SensitivityClassifier,
    locks: DashMap<(String, String), Arc<Mutex<()>>>,
    // Single writes share it; reset takes it exclusively
    batch: RwLock<()>,
}

impl ConfigGate {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        audit: Arc<dyn AuditSink>,
        cipher: Arc<CipherBox>,
    ) -> Self {
        Self {
            store,
            audit,
            cipher,
            classifier: SensitivityClassifier::default(),
            locks: DashMap::new(),
            batch: RwLock::new(()),
        }
    }

    pub fn with_classifier(mut self, classifier: SensitivityClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn cipher(&self) -> &CipherBox {
        &self.cipher
    }

    pub fn classifier(&self) -> &SensitivityClassifier {
        &self.classifier
    }

    pub async fn save(
        &self,
        category: &str,
        key: &str,
        value: impl Into<ConfigValue>,
        actor: &str,
    ) -> Result<SaveOutcome, GateError> {
        self.save_with_description(category, key, value.into(), None, actor)
            .await
    }

    pub async fn save_with_description(
        &self,
        category: &str,
        key: &str,
        value: ConfigValue,
        description: Option<&str>,
        actor: &str,
    ) -> Result<SaveOutcome, GateError> {
        let _batch = self.batch.read().await;
        let lock = self.pair_lock(category, key);
        let outcome = {
            let _pair = lock.lock().await;
            self.save_locked(category, key, &value, description, actor).await
        };
        drop(lock);
        self.release_pair(category, key);
        outcome
    }

    async fn save_locked(
        &self,
        category: &str,
        key: &str,
        value: &ConfigValue,
        description: Option<&str>,
        actor: &str,
    ) -> Result<SaveOutcome, GateError> {
        let prepared = match self.prepare(category, key, value, description, actor) {
            Ok(prepared) => prepared,
            Err(refusal) => return Ok(SaveOutcome::Refused(self.refuse(refusal, actor).await)),
        };

        let previous = self.store.get(category, key).await?;

        let row = match self.store.put(&prepared.entry).await {
            Ok(row) => row,
            Err(e) if e.is_plaintext_block() => {
                let refusal = Refusal::new(category, key, RefusalReason::PlaintextGuard);
                return Ok(SaveOutcome::Refused(self.refuse(refusal, actor).await));
            }
            Err(e) => {
                error!(setting = %format!("{category}.{key}"), error = %e, "Failed to persist setting");
                return Err(e.into());
            }
        };

        if row.is_encrypted != prepared.entry.is_encrypted {
            error!(
                setting = %row.target(),
                expected = prepared.entry.is_encrypted,
                stored = row.is_encrypted,
                "CRITICAL: stored encryption flag differs from the one written"
            );
            return Err(GateError::Fault(format!(
                "encryption flag mismatch for {}",
                row.target()
            )));
        }

        info!(
            setting = %row.target(),
            actor,
            sensitive = prepared.sensitive,
            encrypted = row.is_encrypted,
            "Setting saved"
        );

        self.write_audit(NewAuditRecord {
            actor: actor.to_string(),
            action: if previous.is_some() {
                AuditAction::UpdateConfig
            } else {
                AuditAction::CreateConfig
            },
            target: row.target(),
            old_value: previous.as_ref().map(|r| self.summarize_row(r)),
            new_value: Some(prepared.summary),
            details: description.map(str::to_string),
        })
        .await;

        Ok(SaveOutcome::Persisted(SavedEntry {
            category: row.category,
            key: row.config_key,
            value_kind: prepared.entry.value_kind,
            is_sensitive: prepared.sensitive,
            is_encrypted: row.is_encrypted,
            created: previous.is_none(),
            updated_at: row.updated_at,
            warning: prepared.warning,
        }))
    }

    pub async fn read(&self, category: &str, key: &str) -> Result<Option<ConfigView>, GateError> {
        let row = self.store.get(category, key).await?;
        Ok(row.map(|row| self.view(row)))
    }

    /// All active settings, grouped by category.
    pub async fn read_all(&self) -> Result<BTreeMap<String, Vec<ConfigView>>, GateError> {
        let grouped = self.store.get_all().await?;
        Ok(grouped
            .into_iter()
            .map(|(category, rows)| {
                let views = rows.into_iter().map(|row| self.view(row)).collect();
                (category, views)
            })
            .collect())
    }

    /// Soft-delete a setting. Returns false when it was not active.
    pub async fn delete(&self, category: &str, key: &str, actor: &str) -> Result<bool, GateError> {
        let _batch = self.batch.read().await;
        let lock = self.pair_lock(category, key);
        let deleted = {
            let _pair = lock.lock().await;
            self.delete_locked(category, key, actor).await
        };
        drop(lock);
        self.release_pair(category, key);
        deleted
    }

    async fn delete_locked(&self, category: &str, key: &str, actor: &str) -> Result<bool, GateError> {
        let Some(previous) = self.store.get(category, key).await? else {
            return Ok(false);
        };
        if !self.store.soft_delete(category, key).await? {
            return Ok(false);
        }

        info!(setting = %previous.target(), actor, "Setting deactivated");

        self.write_audit(NewAuditRecord {
            actor: actor.to_string(),
            action: AuditAction::DeleteConfig,
            target: previous.target(),
            old_value: Some(self.summarize_row(&previous)),
            new_value: None,
            details: None,
        })
        .await;

        Ok(true)
    }

    /// Replace every setting with `defaults`.
    ///
    /// All defaults go through the same preparation as [`ConfigGate::save`];
    /// one refusal refuses the whole batch and nothing is written.
    pub async fn reset_to_defaults(
        &self,
        defaults: &[ConfigDefault],
        actor: &str,
    ) -> Result<ResetOutcome, GateError> {
        let _batch = self.batch.write().await;

        let mut entries = Vec::with_capacity(defaults.len());
        for default in defaults {
            match self.prepare(
                default.category,
                default.key,
                &default.value,
                Some(default.description),
                actor,
            ) {
                Ok(prepared) => entries.push(prepared.entry),
                Err(refusal) => {
                    return Ok(ResetOutcome::Refused(self.refuse(refusal, actor).await));
                }
            }
        }

        match self.store.reset_all_to_defaults(&entries).await {
            Ok(()) => {}
            Err(e) if e.is_plaintext_block() => {
                let refusal = Refusal::new("*", "*", RefusalReason::PlaintextGuard);
                return Ok(ResetOutcome::Refused(self.refuse(refusal, actor).await));
            }
            Err(e) => {
                error!(error = %e, "Failed to reset settings");
                return Err(e.into());
            }
        }

        info!(actor, count = entries.len(), "Settings reset to defaults");

        self.write_audit(NewAuditRecord {
            actor: actor.to_string(),
            action: AuditAction::ResetConfigDefaults,
            target: "system_config".to_string(),
            old_value: None,
            new_value: None,
            details: Some(format!("{} defaults applied", entries.len())),
        })
        .await;

        Ok(ResetOutcome::Applied {
            count: entries.len(),
        })
    }

    fn pair_lock(&self, category: &str, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((category.to_string(), key.to_string()))
            .or_default()
            .clone()
    }

    /// Drop the pair's lock once no other caller holds or waits on it.
    fn release_pair(&self, category: &str, key: &str) {
        self.locks
            .remove_if(&(category.to_string(), key.to_string()), |_, lock| {
                Arc::strong_count(lock) == 1
            });
    }

    /// Classify and encrypt. Nothing here touches the store.
    fn prepare(
        &self,
        category: &str,
        key: &str,
        value: &ConfigValue,
        description: Option<&str>,
        actor: &str,
    ) -> Result<Prepared, Refusal> {
        let plaintext = Zeroizing::new(value.to_storage_string());
        let sensitive = self.classifier.is_sensitive(category, key);
        let refuse = |reason| Refusal::new(category, key, reason);
        let mut warning = None;

        let (stored_value, is_encrypted) = if plaintext.is_empty() {
            (String::new(), false)
        } else if sensitive {
            if !self.cipher.is_available() {
                return Err(refuse(RefusalReason::CipherUnavailable));
            }
            let token = self.cipher.encrypt(&plaintext).map_err(|e| {
                debug!(error = %e, "Cipher rejected sensitive value");
                refuse(if e.is_unavailable() {
                    RefusalReason::CipherUnavailable
                } else {
                    RefusalReason::EncryptionFailed
                })
            })?;
            // A token equal to the input was not encrypted
            if token.is_empty() || token.as_str() == plaintext.as_str() {
                return Err(refuse(RefusalReason::EncryptionFailed));
            }
            (token, true)
        } else if self.classifier.should_encrypt(category, key) && self.cipher.is_available() {
            match self.cipher.encrypt(&plaintext) {
                Ok(token) => (token, true),
                Err(e) => {
                    warn!(
                        setting = %format!("{category}.{key}"),
                        error = %e,
                        "Encryption failed for non-sensitive setting, storing unencrypted"
                    );
                    warning = Some(format!("value stored unencrypted: {e}"));
                    (plaintext.to_string(), false)
                }
            }
        } else {
            (plaintext.to_string(), false)
        };

        let entry = NewConfigEntry {
            category: category.to_string(),
            key: key.to_string(),
            stored_value,
            value_kind: value.kind(),
            description: description.map(str::to_string),
            is_encrypted,
            updated_by: Some(actor.to_string()),
        };

        if let Err(reason) = guard_plaintext(sensitive, &entry) {
            error!(
                setting = %format!("{category}.{key}"),
                "CRITICAL: sensitive value reached the store path unencrypted, write aborted"
            );
            return Err(refuse(reason));
        }

        let summary = if sensitive {
            SENSITIVE_MARKER.to_string()
        } else if is_encrypted {
            ENCRYPTED_MARKER.to_string()
        } else {
            plaintext.to_string()
        };

        Ok(Prepared {
            entry,
            sensitive,
            summary,
            warning,
        })
    }

    /// Log and audit a refusal.
    async fn refuse(&self, refusal: Refusal, actor: &str) -> Refusal {
        let target = refusal.target();
        match refusal.reason {
            RefusalReason::EncryptionFailed => error!(
                setting = %target,
                actor,
                reason = "mechanism",
                cause = refusal.reason.as_str(),
                "Sensitive write refused: encryption failed"
            ),
            _ => warn!(
                setting = %target,
                actor,
                reason = "policy",
                cause = refusal.reason.as_str(),
                "Sensitive write refused"
            ),
        }

        self.write_audit(NewAuditRecord {
            actor: actor.to_string(),
            action: AuditAction::ConfigWriteRefused,
            target,
            old_value: None,
            new_value: None,
            details: Some(refusal.reason.as_str().to_string()),
        })
        .await;

        refusal
    }

    /// Audit failures are logged and never undo the write.
    async fn write_audit(&self, record: NewAuditRecord) {
        if let Err(e) = self.audit.record(&record).await {
            error!(
                action = %record.action,
                setting = %record.target,
                error = %e,
                "Failed to write audit record"
            );
        }
    }

    fn summarize_row(&self, row: &ConfigRow) -> String {
        if self.classifier.is_sensitive(&row.category, &row.config_key) {
            SENSITIVE_MARKER.to_string()
        } else if row.is_encrypted {
            ENCRYPTED_MARKER.to_string()
        } else {
            row.config_value.clone()
        }
    }

    fn resolve(&self, row: &ConfigRow) -> Resolved {
        let kind = match row.kind() {
            Ok(kind) => kind,
            Err(e) => {
                error!(setting = %row.target(), error = %e, "Stored setting has an unknown kind");
                return Resolved::Unavailable;
            }
        };

        let text = if row.is_encrypted {
            match self.cipher.decrypt(&row.config_value) {
                Ok(text) => Zeroizing::new(text),
                Err(e) => {
                    error!(
                        setting = %row.target(),
                        reason = "mechanism",
                        error = %e,
                        "Failed to decrypt setting"
                    );
                    return Resolved::Unavailable;
                }
            }
        } else {
            Zeroizing::new(row.config_value.clone())
        };

        match ConfigValue::from_storage(kind, &text) {
            Ok(value) => Resolved::Value(value),
            Err(e) => {
                error!(setting = %row.target(), error = %e, "Stored setting does not parse");
                Resolved::Unavailable
            }
        }
    }

    fn view(&self, row: ConfigRow) -> ConfigView {
        let is_sensitive = self.classifier.is_sensitive(&row.category, &row.config_key);
        let value = self.resolve(&row);
        let display_value = match &value {
            Resolved::Unavailable => UNAVAILABLE_MARKER.to_string(),
            Resolved::Value(v) => {
                let text = Zeroizing::new(v.to_storage_string());
                if is_sensitive || row.is_encrypted {
                    mask_default(&text)
                } else {
                    text.to_string()
                }
            }
        };

        ConfigView {
            category: row.category,
            key: row.config_key,
            value,
            value_kind: row.value_kind,
            display_value,
            is_sensitive,
            is_encrypted: row.is_encrypted,
            description: row.description,
            updated_by: row.updated_by,
            updated_at: row.updated_at,
        }
    }
}
