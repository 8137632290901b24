pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod settings;
pub mod web;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

use crate::crypto::CipherBox;
use crate::db::{DbPool, SqliteAuditLog, SqliteConfigStore};
use crate::settings::ConfigGate;
use std::sync::Arc;

/// A [`ConfigGate`] over the SQLite store and audit log in `pool`.
pub fn sqlite_gate(pool: &DbPool, cipher: Arc<CipherBox>) -> ConfigGate {
    ConfigGate::new(
        Arc::new(SqliteConfigStore::new(pool.clone())),
        Arc::new(SqliteAuditLog::new(pool.clone())),
        cipher,
    )
}
