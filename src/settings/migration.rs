//! Re-encryption of sensitive settings stored in plaintext.
//!
//! Rows written before a setting was classified sensitive, or before the
//! guard triggers existed, can hold plaintext. This pass encrypts them in place.

use crate::crypto::CipherBox;
use crate::db::{AuditAction, AuditSink, ConfigStore, NewAuditRecord};
use crate::settings::gate::SENSITIVE_MARKER;
use crate::settings::SensitivityClassifier;
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct MigrationItem {
    pub category: String,
    pub key: String,
    pub detail: String,
}

impl MigrationItem {
    fn new(category: &str, key: &str, detail: impl Into<String>) -> Self {
        Self {
            category: category.to_string(),
            key: key.to_string(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub dry_run: bool,
    pub total_processed: usize,
    pub migrated: Vec<MigrationItem>,
    pub failed: Vec<MigrationItem>,
    pub skipped: Vec<MigrationItem>,
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("encryption is not available, nothing can be migrated")]
    CipherUnavailable,

    #[error("only an ephemeral key is available; migrated values would be unreadable after exit")]
    EphemeralKey,

    #[error(transparent)]
    Store(#[from] crate::db::StoreError),
}

/// Encrypt every active, sensitive, non-empty plaintext row.
///
/// With `dry_run` nothing is written; the report lists what would change.
/// A row written by someone else after the scan is left alone and reported
/// as skipped.
pub async fn migrate_plaintext_configs(
    store: &dyn ConfigStore,
    audit: &dyn AuditSink,
    cipher: &CipherBox,
    classifier: &SensitivityClassifier,
    actor: &str,
    dry_run: bool,
) -> Result<MigrationReport, MigrationError> {
    if !cipher.is_available() {
        error!("Migration refused: encryption unavailable");
        return Err(MigrationError::CipherUnavailable);
    }
    if cipher.key_source().is_ephemeral() {
        error!("Migration refused: the key dies with this process");
        return Err(MigrationError::EphemeralKey);
    }

    let rows = store.list_rows().await?;
    let mut report = MigrationReport {
        dry_run,
        total_processed: 0,
        migrated: Vec::new(),
        failed: Vec::new(),
        skipped: Vec::new(),
    };

    for row in rows.into_iter().filter(|r| r.is_active && !r.is_encrypted) {
        report.total_processed += 1;

        if !classifier.is_sensitive(&row.category, &row.config_key) {
            report
                .skipped
                .push(MigrationItem::new(&row.category, &row.config_key, "not sensitive"));
            continue;
        }
        if row.config_value.is_empty() {
            report
                .skipped
                .push(MigrationItem::new(&row.category, &row.config_key, "empty value"));
            continue;
        }

        let token = match cipher.encrypt(&row.config_value) {
            Ok(token) => token,
            Err(e) => {
                warn!(setting = %row.target(), error = %e, "Failed to encrypt during migration");
                report
                    .failed
                    .push(MigrationItem::new(&row.category, &row.config_key, e.to_string()));
                continue;
            }
        };

        if dry_run {
            report
                .migrated
                .push(MigrationItem::new(&row.category, &row.config_key, "would encrypt"));
            continue;
        }

        if !store
            .encrypt_in_place(row.id, &row.config_value, &token, actor)
            .await?
        {
            warn!(setting = %row.target(), "Setting changed during migration, left as is");
            report.skipped.push(MigrationItem::new(
                &row.category,
                &row.config_key,
                "changed concurrently",
            ));
            continue;
        }

        if let Err(e) = audit
            .record(&NewAuditRecord {
                actor: actor.to_string(),
                action: AuditAction::MigrateConfigEncryption,
                target: row.target(),
                old_value: Some(SENSITIVE_MARKER.to_string()),
                new_value: Some(SENSITIVE_MARKER.to_string()),
                details: Some("encrypted in place".to_string()),
            })
            .await
        {
            error!(setting = %row.target(), error = %e, "Failed to write audit record");
        }

        info!(setting = %row.target(), "Sensitive setting encrypted");
        report
            .migrated
            .push(MigrationItem::new(&row.category, &row.config_key, "encrypted"));
    }

    info!(
        dry_run,
        processed = report.total_processed,
        migrated = report.migrated.len(),
        failed = report.failed.len(),
        skipped = report.skipped.len(),
        "Migration complete"
    );

    Ok(report)
}
