// Command implementations for configgate-admin

use crate::{Cli, Commands};
use anyhow::{anyhow, Context as _, Result};
use configgate::{
    config::{AppConfig, SecurityConfig},
    crypto::{generate_key_material, CipherBox, KeyInput, KeyProvisioner},
    db::{self, install_plaintext_guard, DbPool, SqliteAuditLog, SqliteConfigStore},
    settings::{
        audit_sensitive_configs, default_entries, migrate_plaintext_configs,
        production_readiness, run_security_check, ConfigGate, OverallStatus, ResetOutcome,
        SaveOutcome, SecurityAuditReport, SensitivityClassifier,
    },
    sqlite_gate,
};
use configgate_types::{ConfigValue, ValueKind};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use zeroize::Zeroizing;

/// Everything a command needs once configuration is loaded
struct Context {
    config: AppConfig,
    cipher: Arc<CipherBox>,
    pool: DbPool,
    classifier: SensitivityClassifier,
}

impl Context {
    async fn open() -> Result<Self> {
        let config = AppConfig::load().context("failed to load configuration")?;
        let cipher = KeyProvisioner::resolve(&cli_key_input(&config.security))
            .context("no usable encryption key")?;
        let pool = db::connect(&config.database)
            .await
            .context("failed to open database")?;

        Ok(Self {
            config,
            cipher: Arc::new(cipher),
            pool,
            classifier: SensitivityClassifier::default(),
        })
    }

    fn store(&self) -> SqliteConfigStore {
        SqliteConfigStore::new(self.pool.clone())
    }

    fn gate(&self) -> ConfigGate {
        sqlite_gate(&self.pool, self.cipher.clone())
    }
}

/// Key input for one-shot commands. Anything encrypted under a throwaway key
/// is unreadable once the command exits, so the ephemeral fallback is off.
fn cli_key_input(security: &SecurityConfig) -> KeyInput {
    KeyInput {
        allow_ephemeral: false,
        ..KeyInput::from_config(security)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn execute(cli: Cli) -> Result<()> {
    let json = cli.json;
    match cli.command {
        // Needs no key or database: it is how a key is obtained
        Commands::Keygen => keygen(json),
        command => {
            let ctx = Context::open().await?;
            let result = run(&ctx, command, json).await;
            ctx.pool.close().await;
            result
        }
    }
}

async fn run(ctx: &Context, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Keygen => keygen(json),
        Commands::Audit => audit(ctx, json).await,
        Commands::Migrate { dry_run } => migrate(ctx, dry_run, json).await,
        Commands::Protect => protect(ctx).await,
        Commands::Check => check(ctx, json).await,
        Commands::Get { category, key, reveal } => get(ctx, &category, &key, reveal, json).await,
        Commands::Set {
            category,
            key,
            value,
            kind,
            description,
            actor,
        } => {
            set(
                ctx,
                &category,
                &key,
                value,
                kind,
                description.as_deref(),
                &actor,
                json,
            )
            .await
        }
        Commands::Delete {
            category,
            key,
            actor,
        } => delete(ctx, &category, &key, &actor).await,
        Commands::Reset { actor } => reset(ctx, &actor).await,
    }
}

fn keygen(json: bool) -> Result<()> {
    let material = Zeroizing::new(generate_key_material());
    if json {
        print_json(&serde_json::json!({ "encryption_key": material.as_str() }))
    } else {
        println!("ENCRYPTION_KEY={}", material.as_str());
        eprintln!("Store this value in your secret manager. Losing it makes encrypted settings unreadable.");
        Ok(())
    }
}

fn print_audit(report: &SecurityAuditReport) {
    println!("Total settings:        {}", report.total_configs);
    println!("Sensitive settings:    {}", report.sensitive_configs);
    println!("Properly encrypted:    {}", report.properly_encrypted);
    println!("Need encryption:       {}", report.needs_encryption.len());
    println!("Encryption issues:     {}", report.encryption_issues.len());
    println!("Coverage:              {}", report.coverage());
    println!("Status:                {:?}", report.status());
    for finding in &report.needs_encryption {
        println!(
            "  PLAINTEXT  {}.{}{}",
            finding.category,
            finding.key,
            if finding.is_active { "" } else { " (inactive)" }
        );
    }
    for issue in &report.encryption_issues {
        println!("  UNREADABLE {}.{}: {}", issue.category, issue.key, issue.issue);
    }
}

async fn audit(ctx: &Context, json: bool) -> Result<()> {
    let report = audit_sensitive_configs(&ctx.store(), &ctx.cipher, &ctx.classifier).await?;
    if json {
        print_json(&report)
    } else {
        print_audit(&report);
        Ok(())
    }
}

async fn migrate(ctx: &Context, dry_run: bool, json: bool) -> Result<()> {
    let audit_log = SqliteAuditLog::new(ctx.pool.clone());
    let report = migrate_plaintext_configs(
        &ctx.store(),
        &audit_log,
        &ctx.cipher,
        &ctx.classifier,
        "migration",
        dry_run,
    )
    .await?;

    if json {
        return print_json(&report);
    }

    println!(
        "{} processed: {}, migrated: {}, failed: {}, skipped: {}",
        if dry_run { "Dry run" } else { "Migration" },
        report.total_processed,
        report.migrated.len(),
        report.failed.len(),
        report.skipped.len()
    );
    for item in &report.migrated {
        println!("  {}.{}: {}", item.category, item.key, item.detail);
    }
    for item in &report.failed {
        println!("  FAILED {}.{}: {}", item.category, item.key, item.detail);
    }
    if dry_run {
        println!("No changes were written.");
    }
    Ok(())
}

async fn protect(ctx: &Context) -> Result<()> {
    install_plaintext_guard(&ctx.pool, &ctx.classifier).await?;
    info!("Plaintext guard installed");
    println!("Database now rejects sensitive settings stored without encryption.");
    Ok(())
}

async fn check(ctx: &Context, json: bool) -> Result<()> {
    let check = run_security_check(&ctx.pool, &ctx.store(), &ctx.cipher, &ctx.classifier).await?;
    let readiness = production_readiness(&ctx.config);

    if json {
        print_json(&serde_json::json!({ "check": check, "readiness": readiness }))?;
    } else {
        println!("Encryption available:  {}", check.encryption_available);
        println!("Key source:            {}", check.key_source);
        println!("Self-test:             {}", check.self_test);
        println!("Protection installed:  {}", check.protection_installed);
        if let Some(report) = &check.audit {
            print_audit(report);
        }
        println!("Overall:               {:?}", check.overall);
        for recommendation in &check.recommendations {
            println!("  - {}", recommendation);
        }
        for issue in &readiness {
            println!("  [{:?}] {}: {}", issue.level, issue.area, issue.message);
        }
    }

    // main turns this into exit status 1
    if check.overall != OverallStatus::Secure {
        return Err(anyhow!("security status is {:?}", check.overall));
    }
    Ok(())
}

async fn get(ctx: &Context, category: &str, key: &str, reveal: bool, json: bool) -> Result<()> {
    let view = ctx
        .gate()
        .read(category, key)
        .await?
        .ok_or_else(|| anyhow!("{}.{} is not set", category, key))?;

    let shown = if reveal {
        let value = view
            .value
            .value()
            .ok_or_else(|| anyhow!("{}.{} cannot be decrypted with the current key", category, key))?;
        Zeroizing::new(value.to_storage_string())
    } else {
        Zeroizing::new(view.display_value.clone())
    };

    if json {
        let mut body = serde_json::to_value(&view)?;
        body["display_value"] = serde_json::Value::String(shown.to_string());
        print_json(&body)
    } else {
        println!("{}", shown.as_str());
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn set(
    ctx: &Context,
    category: &str,
    key: &str,
    value: Option<String>,
    kind: ValueKind,
    description: Option<&str>,
    actor: &str,
    json: bool,
) -> Result<()> {
    let raw = match value {
        Some(value) => Zeroizing::new(value),
        None => {
            let prompt = format!("Value for {}.{}: ", category, key);
            Zeroizing::new(
                rpassword::read_password_from_tty(Some(prompt.as_str()))
                    .context("failed to read value")?,
            )
        }
    };
    let value = ConfigValue::from_storage(kind, &raw)?;

    let outcome = ctx
        .gate()
        .save_with_description(category, key, value, description, actor)
        .await?;

    match outcome {
        SaveOutcome::Persisted(saved) => {
            if json {
                print_json(&saved)?;
            } else {
                println!(
                    "Saved {}.{} ({})",
                    saved.category,
                    saved.key,
                    if saved.is_encrypted { "encrypted" } else { "plaintext" }
                );
                if let Some(warning) = &saved.warning {
                    eprintln!("Warning: {}", warning);
                }
            }
            Ok(())
        }
        SaveOutcome::Refused(refusal) => {
            if json {
                print_json(&refusal)?;
            }
            Err(anyhow!("{}", refusal.user_message()))
        }
    }
}

async fn delete(ctx: &Context, category: &str, key: &str, actor: &str) -> Result<()> {
    if ctx.gate().delete(category, key, actor).await? {
        println!("Deactivated {}.{}", category, key);
        Ok(())
    } else {
        Err(anyhow!("{}.{} is not set", category, key))
    }
}

async fn reset(ctx: &Context, actor: &str) -> Result<()> {
    match ctx.gate().reset_to_defaults(&default_entries(), actor).await? {
        ResetOutcome::Applied { count } => {
            println!("Applied {} defaults", count);
            Ok(())
        }
        ResetOutcome::Refused(refusal) => Err(anyhow!("{}", refusal.user_message())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use configgate::crypto::KeySource;

    #[test]
    fn test_missing_key_leaves_cli_without_cipher() {
        let security = SecurityConfig::default();
        assert!(security.ephemeral_fallback_allowed());

        let cipher = KeyProvisioner::resolve(&cli_key_input(&security)).unwrap();
        assert!(!cipher.is_available());
        assert_eq!(cipher.key_source(), KeySource::Unavailable);
    }

    #[test]
    fn test_configured_key_is_used_by_cli() {
        let security = SecurityConfig {
            encryption_key: Some(generate_key_material()),
            ..SecurityConfig::default()
        };
        let cipher = KeyProvisioner::resolve(&cli_key_input(&security)).unwrap();
        assert!(cipher.is_available());
        assert!(!cipher.key_source().is_ephemeral());
    }
}
