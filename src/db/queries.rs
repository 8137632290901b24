use crate::config::DatabaseConfig;
use crate::db::error::{StoreResult, PLAINTEXT_BLOCK_MARKER};
use crate::db::models::*;
use crate::settings::SensitivityClassifier;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub type DbPool = Pool<Sqlite>;

/// Persistence of (category, key) → value rows.
///
/// Stores exactly what it is given. It makes no encryption decisions and
/// trusts the `is_encrypted` flag of every entry.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Active row for the pair, if any
    async fn get(&self, category: &str, key: &str) -> StoreResult<Option<ConfigRow>>;

    /// All active rows grouped by category
    async fn get_all(&self) -> StoreResult<BTreeMap<String, Vec<ConfigRow>>>;

    /// Every row, active or not
    async fn list_rows(&self) -> StoreResult<Vec<ConfigRow>>;

    /// Insert or update the row for the pair in one statement and reactivate it
    async fn put(&self, entry: &NewConfigEntry) -> StoreResult<ConfigRow>;

    /// Deactivate the pair. Returns false when there was no active row.
    async fn soft_delete(&self, category: &str, key: &str) -> StoreResult<bool>;

    /// Deactivate everything and write `defaults`, all or nothing
    async fn reset_all_to_defaults(&self, defaults: &[NewConfigEntry]) -> StoreResult<()>;

    /// Replace the plaintext of row `id` with `token`, flagged encrypted.
    ///
    /// Only applies while the row is active, unencrypted and still holds
    /// `expected`. Returns false when the row changed in the meantime.
    async fn encrypt_in_place(
        &self,
        id: i64,
        expected: &str,
        token: &str,
        actor: &str,
    ) -> StoreResult<bool>;
}

/// Destination for admin audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &NewAuditRecord) -> StoreResult<()>;
}

const UPSERT_CONFIG: &str = r#"
    INSERT INTO system_config
        (category, config_key, config_value, value_kind, description, is_encrypted, is_active, updated_by, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, true, ?, ?, ?)
    ON CONFLICT(category, config_key) DO UPDATE SET
        config_value = excluded.config_value,
        value_kind = excluded.value_kind,
        description = COALESCE(excluded.description, system_config.description),
        is_encrypted = excluded.is_encrypted,
        is_active = true,
        updated_by = excluded.updated_by,
        updated_at = excluded.updated_at
"#;

/// SQLite-backed [`ConfigStore`]
#[derive(Debug, Clone)]
pub struct SqliteConfigStore {
    pool: DbPool,
}

impl SqliteConfigStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

async fn upsert<'e, E>(executor: E, entry: &NewConfigEntry) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let now = Utc::now();
    sqlx::query(UPSERT_CONFIG)
        .bind(&entry.category)
        .bind(&entry.key)
        .bind(&entry.stored_value)
        .bind(entry.value_kind.as_str())
        .bind(&entry.description)
        .bind(entry.is_encrypted)
        .bind(&entry.updated_by)
        .bind(now)
        .bind(now)
        .execute(executor)
        .await?;
    Ok(())
}

#[async_trait]
impl ConfigStore for SqliteConfigStore {
    async fn get(&self, category: &str, key: &str) -> StoreResult<Option<ConfigRow>> {
        let row = sqlx::query_as::<_, ConfigRow>(
            "SELECT * FROM system_config WHERE category = ? AND config_key = ? AND is_active = true",
        )
        .bind(category)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn get_all(&self) -> StoreResult<BTreeMap<String, Vec<ConfigRow>>> {
        let rows = sqlx::query_as::<_, ConfigRow>(
            "SELECT * FROM system_config WHERE is_active = true ORDER BY category, config_key",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: BTreeMap<String, Vec<ConfigRow>> = BTreeMap::new();
        for row in rows {
            grouped.entry(row.category.clone()).or_default().push(row);
        }
        Ok(grouped)
    }

    async fn list_rows(&self) -> StoreResult<Vec<ConfigRow>> {
        let rows = sqlx::query_as::<_, ConfigRow>(
            "SELECT * FROM system_config ORDER BY category, config_key",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn put(&self, entry: &NewConfigEntry) -> StoreResult<ConfigRow> {
        upsert(&self.pool, entry).await?;

        let row = sqlx::query_as::<_, ConfigRow>(
            "SELECT * FROM system_config WHERE category = ? AND config_key = ?",
        )
        .bind(&entry.category)
        .bind(&entry.key)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn soft_delete(&self, category: &str, key: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE system_config SET is_active = false, updated_at = ? WHERE category = ? AND config_key = ? AND is_active = true",
        )
        .bind(Utc::now())
        .bind(category)
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset_all_to_defaults(&self, defaults: &[NewConfigEntry]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE system_config SET is_active = false, updated_at = ?")
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        for entry in defaults {
            upsert(&mut *tx, entry).await?;
        }

        tx.commit().await?;
        info!(count = defaults.len(), "Configuration reset to defaults");
        Ok(())
    }

    async fn encrypt_in_place(
        &self,
        id: i64,
        expected: &str,
        token: &str,
        actor: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE system_config
            SET config_value = ?, is_encrypted = true, updated_by = ?, updated_at = ?
            WHERE id = ? AND is_active = true AND is_encrypted = false AND config_value = ?
            "#,
        )
        .bind(token)
        .bind(actor)
        .bind(Utc::now())
        .bind(id)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// SQLite-backed [`AuditSink`] over `admin_audit_logs`
#[derive(Debug, Clone)]
pub struct SqliteAuditLog {
    pool: DbPool,
}

impl SqliteAuditLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Most recent entries first
    pub async fn recent(&self, limit: i64) -> StoreResult<Vec<AuditLogEntry>> {
        let entries = sqlx::query_as::<_, AuditLogEntry>(
            "SELECT * FROM admin_audit_logs ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Entries for one `"CATEGORY.key"` target, oldest first
    pub async fn for_target(&self, target: &str) -> StoreResult<Vec<AuditLogEntry>> {
        let entries = sqlx::query_as::<_, AuditLogEntry>(
            "SELECT * FROM admin_audit_logs WHERE target = ? ORDER BY id",
        )
        .bind(target)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

#[async_trait]
impl AuditSink for SqliteAuditLog {
    async fn record(&self, record: &NewAuditRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO admin_audit_logs (actor, action, target, old_value, new_value, details, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.actor)
        .bind(record.action.as_str())
        .bind(&record.target)
        .bind(&record.old_value)
        .bind(&record.new_value)
        .bind(&record.details)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Open the pool described by `config` and run migrations.
pub async fn connect(config: &DatabaseConfig) -> StoreResult<DbPool> {
    let mut options = SqlitePoolOptions::new().max_connections(config.max_connections);
    if config.is_in_memory() {
        // Each connection to an in-memory database sees its own database,
        // and the data goes away when that connection closes
        options = options
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }
    let pool = options.connect(&config.url).await?;
    info!(url = %config.url, "Database connected");

    init_db(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
pub async fn setup_test_db() -> DbPool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    init_db(&pool).await.expect("Failed to init database");
    pool
}

/// Initialize database with migrations
pub async fn init_db(pool: &DbPool) -> StoreResult<()> {
    info!("Running database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS system_config (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category TEXT NOT NULL,
            config_key TEXT NOT NULL,
            config_value TEXT NOT NULL DEFAULT '',
            value_kind TEXT NOT NULL DEFAULT 'str',
            description TEXT,
            is_encrypted BOOLEAN NOT NULL DEFAULT false,
            is_active BOOLEAN NOT NULL DEFAULT true,
            updated_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            UNIQUE(category, config_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS admin_audit_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            target TEXT NOT NULL,
            old_value TEXT,
            new_value TEXT,
            details TEXT,
            timestamp DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_system_config_category ON system_config(category)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_target ON admin_audit_logs(target)")
        .execute(pool)
        .await?;

    install_plaintext_guard(pool, &SensitivityClassifier::default()).await?;

    info!("Database migrations complete");
    Ok(())
}

/// SQL list literal of `'CATEGORY.key'` for every sensitive pair.
fn sensitive_pairs_sql(classifier: &SensitivityClassifier) -> String {
    let pairs: Vec<String> = classifier
        .entries()
        .map(|(category, key)| format!("'{}.{}'", category.replace('\'', "''"), key.replace('\'', "''")))
        .collect();
    if pairs.is_empty() {
        "NULL".to_string()
    } else {
        pairs.join(", ")
    }
}

/// (Re)create the triggers that abort any write leaving a sensitive,
/// non-empty value with `is_encrypted = false`.
///
/// Updates that only touch `is_active` are not checked, so legacy plaintext
/// rows can still be deactivated.
pub async fn install_plaintext_guard(
    pool: &DbPool,
    classifier: &SensitivityClassifier,
) -> StoreResult<()> {
    let pairs = sensitive_pairs_sql(classifier);
    let condition = format!(
        "NEW.is_encrypted = false AND length(NEW.config_value) > 0 \
         AND (NEW.category || '.' || NEW.config_key) IN ({pairs})"
    );
    let raise = format!(
        "SELECT RAISE(ABORT, '{PLAINTEXT_BLOCK_MARKER}: sensitive configuration must be encrypted');"
    );

    sqlx::query("DROP TRIGGER IF EXISTS guard_sensitive_plaintext_insert")
        .execute(pool)
        .await?;
    sqlx::query("DROP TRIGGER IF EXISTS guard_sensitive_plaintext_update")
        .execute(pool)
        .await?;

    sqlx::query(&format!(
        "CREATE TRIGGER guard_sensitive_plaintext_insert BEFORE INSERT ON system_config \
         WHEN {condition} BEGIN {raise} END"
    ))
    .execute(pool)
    .await?;
    sqlx::query(&format!(
        "CREATE TRIGGER guard_sensitive_plaintext_update \
         BEFORE UPDATE OF config_value, is_encrypted ON system_config \
         WHEN {condition} BEGIN {raise} END"
    ))
    .execute(pool)
    .await?;

    debug!("Plaintext guard triggers installed");
    Ok(())
}

/// Whether both guard triggers are present.
pub async fn plaintext_guard_installed(pool: &DbPool) -> StoreResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM sqlite_master WHERE type = 'trigger' AND name IN \
         ('guard_sensitive_plaintext_insert', 'guard_sensitive_plaintext_update')",
    )
    .fetch_one(pool)
    .await?;

    Ok(count == 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use configgate_types::ValueKind;

    fn entry(category: &str, key: &str, value: &str, encrypted: bool) -> NewConfigEntry {
        NewConfigEntry {
            category: category.to_string(),
            key: key.to_string(),
            stored_value: value.to_string(),
            value_kind: ValueKind::Str,
            description: Some("test".to_string()),
            is_encrypted: encrypted,
            updated_by: Some("admin".to_string()),
        }
    }

    // --- SqliteConfigStore tests ---

    #[tokio::test]
    async fn test_put_inserts_new_row() {
        let store = SqliteConfigStore::new(setup_test_db().await);
        let row = store.put(&entry("GENERAL", "app_name", "Luna", false)).await.unwrap();
        assert_eq!(row.config_value, "Luna");
        assert!(row.is_active);
        assert!(!row.is_encrypted);
        assert_eq!(row.updated_by.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_put_updates_in_place() {
        let store = SqliteConfigStore::new(setup_test_db().await);
        let first = store.put(&entry("GENERAL", "app_name", "Luna", false)).await.unwrap();
        let second = store.put(&entry("GENERAL", "app_name", "Sol", false)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.config_value, "Sol");
        assert_eq!(store.list_rows().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_put_keeps_description_when_omitted() {
        let store = SqliteConfigStore::new(setup_test_db().await);
        store.put(&entry("GENERAL", "app_name", "Luna", false)).await.unwrap();
        let mut update = entry("GENERAL", "app_name", "Sol", false);
        update.description = None;
        let row = store.put(&update).await.unwrap();
        assert_eq!(row.description.as_deref(), Some("test"));
    }

    #[tokio::test]
    async fn test_get_nonexistent_returns_none() {
        let store = SqliteConfigStore::new(setup_test_db().await);
        assert!(store.get("GENERAL", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_hides_row_but_keeps_it() {
        let store = SqliteConfigStore::new(setup_test_db().await);
        store.put(&entry("GENERAL", "app_name", "Luna", false)).await.unwrap();

        assert!(store.soft_delete("GENERAL", "app_name").await.unwrap());
        assert!(store.get("GENERAL", "app_name").await.unwrap().is_none());
        assert!(!store.soft_delete("GENERAL", "app_name").await.unwrap());

        let rows = store.list_rows().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_active);
    }

    #[tokio::test]
    async fn test_put_reactivates_deleted_row() {
        let store = SqliteConfigStore::new(setup_test_db().await);
        store.put(&entry("GENERAL", "app_name", "Luna", false)).await.unwrap();
        store.soft_delete("GENERAL", "app_name").await.unwrap();
        let row = store.put(&entry("GENERAL", "app_name", "Sol", false)).await.unwrap();
        assert!(row.is_active);
    }

    #[tokio::test]
    async fn test_get_all_groups_by_category() {
        let store = SqliteConfigStore::new(setup_test_db().await);
        store.put(&entry("GENERAL", "app_name", "Luna", false)).await.unwrap();
        store.put(&entry("GENERAL", "max_file_size_mb", "10", false)).await.unwrap();
        store.put(&entry("SMTP", "smtp_host", "mail", false)).await.unwrap();
        store.put(&entry("SMTP", "smtp_port", "587", false)).await.unwrap();
        store.soft_delete("SMTP", "smtp_port").await.unwrap();

        let grouped = store.get_all().await.unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["GENERAL"].len(), 2);
        assert_eq!(grouped["SMTP"].len(), 1);
        assert_eq!(grouped["GENERAL"][0].config_key, "app_name");
    }

    #[tokio::test]
    async fn test_reset_all_to_defaults() {
        let store = SqliteConfigStore::new(setup_test_db().await);
        store.put(&entry("GENERAL", "app_name", "Luna", false)).await.unwrap();
        store.put(&entry("GENERAL", "custom", "x", false)).await.unwrap();

        store
            .reset_all_to_defaults(&[entry("GENERAL", "app_name", "Default", false)])
            .await
            .unwrap();

        assert_eq!(
            store.get("GENERAL", "app_name").await.unwrap().unwrap().config_value,
            "Default"
        );
        assert!(store.get("GENERAL", "custom").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_is_all_or_nothing() {
        let store = SqliteConfigStore::new(setup_test_db().await);
        store.put(&entry("GENERAL", "app_name", "Luna", false)).await.unwrap();

        // The second default trips the plaintext guard
        let result = store
            .reset_all_to_defaults(&[
                entry("GENERAL", "app_name", "Default", false),
                entry("SMTP", "smtp_password", "hunter2", false),
            ])
            .await;
        assert!(result.unwrap_err().is_plaintext_block());

        let row = store.get("GENERAL", "app_name").await.unwrap().unwrap();
        assert_eq!(row.config_value, "Luna");
    }

    #[tokio::test]
    async fn test_encrypt_in_place_only_when_unchanged() {
        let store = SqliteConfigStore::new(setup_test_db().await);
        let row = store.put(&entry("GENERAL", "app_name", "Luna", false)).await.unwrap();

        assert!(!store.encrypt_in_place(row.id, "Sol", "token", "migration").await.unwrap());
        let unchanged = store.get("GENERAL", "app_name").await.unwrap().unwrap();
        assert_eq!(unchanged.config_value, "Luna");
        assert!(!unchanged.is_encrypted);

        assert!(store.encrypt_in_place(row.id, "Luna", "token", "migration").await.unwrap());
        let updated = store.get("GENERAL", "app_name").await.unwrap().unwrap();
        assert_eq!(updated.config_value, "token");
        assert!(updated.is_encrypted);
        assert_eq!(updated.updated_by.as_deref(), Some("migration"));

        // Already encrypted: nothing left to replace
        assert!(!store.encrypt_in_place(row.id, "token", "again", "migration").await.unwrap());
    }

    // --- Plaintext guard tests ---

    #[tokio::test]
    async fn test_guard_blocks_sensitive_plaintext_insert() {
        let store = SqliteConfigStore::new(setup_test_db().await);
        let err = store
            .put(&entry("SMTP", "smtp_password", "hunter2", false))
            .await
            .unwrap_err();
        assert!(err.is_plaintext_block());
        assert!(store.get("SMTP", "smtp_password").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_guard_blocks_plaintext_overwrite_of_encrypted_row() {
        let store = SqliteConfigStore::new(setup_test_db().await);
        store.put(&entry("SMTP", "smtp_password", "token", true)).await.unwrap();
        let err = store
            .put(&entry("SMTP", "smtp_password", "hunter2", false))
            .await
            .unwrap_err();
        assert!(err.is_plaintext_block());
        let row = store.get("SMTP", "smtp_password").await.unwrap().unwrap();
        assert!(row.is_encrypted);
        assert_eq!(row.config_value, "token");
    }

    #[tokio::test]
    async fn test_guard_allows_empty_and_encrypted_sensitive_values() {
        let store = SqliteConfigStore::new(setup_test_db().await);
        store.put(&entry("SMTP", "smtp_password", "", false)).await.unwrap();
        store.put(&entry("API", "openai_api_key", "token", true)).await.unwrap();
        store.put(&entry("SMTP", "smtp_enabled", "true", false)).await.unwrap();
    }

    #[tokio::test]
    async fn test_guard_allows_deactivating_legacy_plaintext() {
        let pool = setup_test_db().await;
        sqlx::query("DROP TRIGGER guard_sensitive_plaintext_insert")
            .execute(&pool)
            .await
            .unwrap();
        let store = SqliteConfigStore::new(pool.clone());
        store.put(&entry("SMTP", "smtp_password", "legacy", false)).await.unwrap();
        install_plaintext_guard(&pool, &SensitivityClassifier::default()).await.unwrap();

        assert!(store.soft_delete("SMTP", "smtp_password").await.unwrap());
    }

    #[tokio::test]
    async fn test_guard_installation_is_idempotent() {
        let pool = setup_test_db().await;
        assert!(plaintext_guard_installed(&pool).await.unwrap());
        install_plaintext_guard(&pool, &SensitivityClassifier::default()).await.unwrap();
        assert!(plaintext_guard_installed(&pool).await.unwrap());
        init_db(&pool).await.unwrap();
    }

    // --- SqliteAuditLog tests ---

    #[tokio::test]
    async fn test_audit_record_and_recent() {
        let log = SqliteAuditLog::new(setup_test_db().await);
        for action in [AuditAction::CreateConfig, AuditAction::UpdateConfig] {
            log.record(&NewAuditRecord {
                actor: "admin".to_string(),
                action,
                target: "GENERAL.app_name".to_string(),
                old_value: None,
                new_value: Some("Luna".to_string()),
                details: None,
            })
            .await
            .unwrap();
        }

        let recent = log.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, "UPDATE_CONFIG");
        assert_eq!(log.for_target("GENERAL.app_name").await.unwrap().len(), 2);
        assert_eq!(log.recent(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_is_a_storage_error() {
        let pool = setup_test_db().await;
        let store = SqliteConfigStore::new(pool.clone());
        pool.close().await;
        let err = store.get("GENERAL", "app_name").await.unwrap_err();
        assert!(!err.is_plaintext_block());
    }
}
