//! Security audit of stored settings and production readiness checks.

use crate::config::AppConfig;
use crate::crypto::{CipherBox, KeySource};
use crate::db::{plaintext_guard_installed, ConfigStore, DbPool, StoreResult};
use crate::settings::SensitivityClassifier;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Outcome of [`audit_sensitive_configs`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Ok,
    /// Encrypted rows that cannot be read back
    Attention,
    /// Sensitive values stored in plaintext
    Critical,
}

/// A sensitive setting stored without encryption.
#[derive(Debug, Clone, Serialize)]
pub struct PlaintextFinding {
    pub category: String,
    pub key: String,
    pub is_active: bool,
}

/// An encrypted setting that failed to decrypt.
#[derive(Debug, Clone, Serialize)]
pub struct EncryptionIssue {
    pub category: String,
    pub key: String,
    pub issue: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityAuditReport {
    pub total_configs: usize,
    pub sensitive_configs: usize,
    pub properly_encrypted: usize,
    pub needs_encryption: Vec<PlaintextFinding>,
    pub encryption_issues: Vec<EncryptionIssue>,
}

impl SecurityAuditReport {
    pub fn status(&self) -> AuditStatus {
        if !self.needs_encryption.is_empty() {
            AuditStatus::Critical
        } else if !self.encryption_issues.is_empty() {
            AuditStatus::Attention
        } else {
            AuditStatus::Ok
        }
    }

    /// e.g. `"3/4 sensitive settings encrypted"`
    pub fn coverage(&self) -> String {
        format!(
            "{}/{} sensitive settings encrypted",
            self.properly_encrypted, self.sensitive_configs
        )
    }
}

/// Inspect every stored row, active or not.
///
/// Empty sensitive values are not findings: there is nothing to encrypt.
pub async fn audit_sensitive_configs(
    store: &dyn ConfigStore,
    cipher: &CipherBox,
    classifier: &SensitivityClassifier,
) -> StoreResult<SecurityAuditReport> {
    let rows = store.list_rows().await?;

    let mut report = SecurityAuditReport {
        total_configs: rows.len(),
        sensitive_configs: 0,
        properly_encrypted: 0,
        needs_encryption: Vec::new(),
        encryption_issues: Vec::new(),
    };

    for row in rows {
        if !classifier.is_sensitive(&row.category, &row.config_key) {
            continue;
        }
        report.sensitive_configs += 1;

        if !row.is_encrypted {
            if !row.config_value.is_empty() {
                warn!(setting = %row.target(), "Sensitive setting stored in plaintext");
                report.needs_encryption.push(PlaintextFinding {
                    category: row.category,
                    key: row.config_key,
                    is_active: row.is_active,
                });
            }
            continue;
        }

        match cipher.decrypt(&row.config_value) {
            Ok(_) => report.properly_encrypted += 1,
            Err(e) => {
                warn!(setting = %row.target(), error = %e, "Encrypted setting does not decrypt");
                report.encryption_issues.push(EncryptionIssue {
                    category: row.category,
                    key: row.config_key,
                    issue: e.to_string(),
                });
            }
        }
    }

    info!(
        total = report.total_configs,
        sensitive = report.sensitive_configs,
        encrypted = report.properly_encrypted,
        plaintext = report.needs_encryption.len(),
        issues = report.encryption_issues.len(),
        "Security audit complete"
    );

    Ok(report)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Secure,
    Attention,
    Critical,
    /// Encryption is not available at all
    Failed,
}

/// Result of [`run_security_check`]
#[derive(Debug, Clone, Serialize)]
pub struct SecurityCheck {
    pub timestamp: DateTime<Utc>,
    pub encryption_available: bool,
    pub key_source: KeySource,
    pub self_test: bool,
    pub audit: Option<SecurityAuditReport>,
    pub protection_installed: bool,
    pub overall: OverallStatus,
    pub recommendations: Vec<String>,
}

/// Cipher health, stored data and database protection together.
///
/// `Secure` only when the cipher works, the audit is clean and the plaintext
/// guard triggers are installed.
pub async fn run_security_check(
    pool: &DbPool,
    store: &dyn ConfigStore,
    cipher: &CipherBox,
    classifier: &SensitivityClassifier,
) -> StoreResult<SecurityCheck> {
    let mut check = SecurityCheck {
        timestamp: Utc::now(),
        encryption_available: cipher.is_available(),
        key_source: cipher.key_source(),
        self_test: cipher.self_test(),
        audit: None,
        protection_installed: false,
        overall: OverallStatus::Failed,
        recommendations: Vec::new(),
    };

    if !check.encryption_available || !check.self_test {
        check
            .recommendations
            .push("Configure a valid ENCRYPTION_KEY".to_string());
        return Ok(check);
    }
    if check.key_source.is_ephemeral() {
        check
            .recommendations
            .push("An ephemeral key is in use; configure ENCRYPTION_KEY".to_string());
    }

    let audit = audit_sensitive_configs(store, cipher, classifier).await?;
    check.protection_installed = plaintext_guard_installed(pool).await?;

    check.overall = match audit.status() {
        AuditStatus::Critical => {
            check
                .recommendations
                .push("Encrypt sensitive settings stored in plaintext (migrate)".to_string());
            OverallStatus::Critical
        }
        AuditStatus::Attention => {
            check
                .recommendations
                .push("Resolve settings that fail to decrypt".to_string());
            OverallStatus::Attention
        }
        AuditStatus::Ok if !check.protection_installed => OverallStatus::Attention,
        AuditStatus::Ok if check.key_source.is_ephemeral() => OverallStatus::Attention,
        AuditStatus::Ok => OverallStatus::Secure,
    };
    if !check.protection_installed {
        check
            .recommendations
            .push("Install the plaintext guard triggers (protect)".to_string());
    }
    check.audit = Some(audit);

    info!(status = ?check.overall, "Security check complete");
    Ok(check)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueLevel {
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessIssue {
    pub level: IssueLevel,
    pub area: &'static str,
    pub message: String,
}

/// Configuration problems that make a deployment unfit for production.
pub fn production_readiness(config: &AppConfig) -> Vec<ReadinessIssue> {
    let mut issues = Vec::new();
    let security = &config.security;

    if !security.has_key_material() {
        issues.push(ReadinessIssue {
            level: IssueLevel::Critical,
            area: "security",
            message: "ENCRYPTION_KEY is not set".to_string(),
        });
    }
    if !security.is_production() {
        issues.push(ReadinessIssue {
            level: IssueLevel::High,
            area: "security",
            message: format!(
                "APP_ENV is '{}'; key problems only warn outside production",
                security.environment
            ),
        });
    }
    if security.ephemeral_fallback_allowed() {
        issues.push(ReadinessIssue {
            level: IssueLevel::High,
            area: "security",
            message: "Ephemeral key fallback is enabled".to_string(),
        });
    }
    if config.database.is_in_memory() {
        issues.push(ReadinessIssue {
            level: IssueLevel::Critical,
            area: "database",
            message: "Database is in memory; settings are lost on restart".to_string(),
        });
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncryptionKey;
    use crate::db::{setup_test_db, NewConfigEntry, SqliteConfigStore};
    use crate::settings::gate::ConfigGate;
    use crate::db::SqliteAuditLog;
    use configgate_types::ValueKind;
    use std::sync::Arc;

    fn cipher(seed: u8) -> CipherBox {
        CipherBox::new(&EncryptionKey::from_bytes([seed; 32]), KeySource::Hex)
    }

    async fn legacy_plaintext(pool: &DbPool, category: &str, key: &str, value: &str) {
        sqlx::query("DROP TRIGGER IF EXISTS guard_sensitive_plaintext_insert")
            .execute(pool)
            .await
            .unwrap();
        SqliteConfigStore::new(pool.clone())
            .put(&NewConfigEntry {
                category: category.to_string(),
                key: key.to_string(),
                stored_value: value.to_string(),
                value_kind: ValueKind::Str,
                description: None,
                is_encrypted: false,
                updated_by: None,
            })
            .await
            .unwrap();
    }

    fn gate(pool: &DbPool, cipher: CipherBox) -> ConfigGate {
        ConfigGate::new(
            Arc::new(SqliteConfigStore::new(pool.clone())),
            Arc::new(SqliteAuditLog::new(pool.clone())),
            Arc::new(cipher),
        )
    }

    #[tokio::test]
    async fn test_clean_store_is_ok() {
        let pool = setup_test_db().await;
        let gate = gate(&pool, cipher(3));
        gate.save("SMTP", "smtp_password", "pw", "admin").await.unwrap();
        gate.save("SMTP", "smtp_host", "mail", "admin").await.unwrap();
        gate.save("API", "webhook_secret", "", "admin").await.unwrap();

        let store = SqliteConfigStore::new(pool);
        let report = audit_sensitive_configs(&store, &cipher(3), &SensitivityClassifier::default())
            .await
            .unwrap();
        assert_eq!(report.total_configs, 3);
        assert_eq!(report.sensitive_configs, 2);
        assert_eq!(report.properly_encrypted, 1);
        assert_eq!(report.status(), AuditStatus::Ok);
        assert_eq!(report.coverage(), "1/2 sensitive settings encrypted");
    }

    #[tokio::test]
    async fn test_plaintext_secret_is_critical() {
        let pool = setup_test_db().await;
        legacy_plaintext(&pool, "SMTP", "smtp_password", "hunter2").await;

        let store = SqliteConfigStore::new(pool);
        let report = audit_sensitive_configs(&store, &cipher(3), &SensitivityClassifier::default())
            .await
            .unwrap();
        assert_eq!(report.status(), AuditStatus::Critical);
        assert_eq!(report.needs_encryption[0].key, "smtp_password");
    }

    #[tokio::test]
    async fn test_wrong_key_needs_attention() {
        let pool = setup_test_db().await;
        gate(&pool, cipher(3))
            .save("API", "openai_api_key", "sk-1", "admin")
            .await
            .unwrap();

        let store = SqliteConfigStore::new(pool);
        let report = audit_sensitive_configs(&store, &cipher(4), &SensitivityClassifier::default())
            .await
            .unwrap();
        assert_eq!(report.status(), AuditStatus::Attention);
        assert_eq!(report.encryption_issues.len(), 1);
    }

    #[tokio::test]
    async fn test_security_check_secure() {
        let pool = setup_test_db().await;
        let store = SqliteConfigStore::new(pool.clone());
        let check = run_security_check(&pool, &store, &cipher(3), &SensitivityClassifier::default())
            .await
            .unwrap();
        assert_eq!(check.overall, OverallStatus::Secure);
        assert!(check.protection_installed);
        assert!(check.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_security_check_without_cipher_fails() {
        let pool = setup_test_db().await;
        let store = SqliteConfigStore::new(pool.clone());
        let check = run_security_check(
            &pool,
            &store,
            &CipherBox::unavailable(),
            &SensitivityClassifier::default(),
        )
        .await
        .unwrap();
        assert_eq!(check.overall, OverallStatus::Failed);
        assert!(check.audit.is_none());
    }

    #[tokio::test]
    async fn test_security_check_flags_missing_triggers() {
        let pool = setup_test_db().await;
        legacy_plaintext(&pool, "GENERAL", "app_name", "Luna").await;
        let store = SqliteConfigStore::new(pool.clone());
        let check = run_security_check(&pool, &store, &cipher(3), &SensitivityClassifier::default())
            .await
            .unwrap();
        assert!(!check.protection_installed);
        assert_eq!(check.overall, OverallStatus::Attention);
    }

    #[tokio::test]
    async fn test_security_check_with_ephemeral_key_is_not_secure() {
        let pool = setup_test_db().await;
        let store = SqliteConfigStore::new(pool.clone());
        let ephemeral = CipherBox::new(&EncryptionKey::generate(), KeySource::Ephemeral);
        let check = run_security_check(&pool, &store, &ephemeral, &SensitivityClassifier::default())
            .await
            .unwrap();
        assert_eq!(check.overall, OverallStatus::Attention);
    }

    #[test]
    fn test_production_readiness() {
        let mut config = AppConfig::default();
        let issues = production_readiness(&config);
        assert!(issues.iter().any(|i| i.level == IssueLevel::Critical && i.area == "security"));

        config.security.encryption_key = Some("x".repeat(40));
        config.security.environment = "production".to_string();
        assert!(production_readiness(&config).is_empty());

        config.database.url = "sqlite::memory:".to_string();
        let issues = production_readiness(&config);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].area, "database");
    }
}
