use configgate::{
    config::AppConfig,
    crypto::{KeyInput, KeyProvisioner},
    db::{self, SqliteAuditLog},
    settings::production_readiness,
    sqlite_gate, web,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    // Initialize logging first
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "configgate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ConfigGate v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::init()?;
    info!(
        environment = %config.security.environment,
        production = config.security.is_production(),
        "Configuration loaded"
    );

    // Resolve the key before anything can accept a write
    let cipher = match KeyProvisioner::resolve(&KeyInput::from_config(&config.security)) {
        Ok(cipher) => Arc::new(cipher),
        Err(e) => {
            error!("Refusing to start without a valid encryption key");
            error!("Generate one with: configgate-admin keygen");
            return Err(anyhow::anyhow!("Encryption key error: {}", e));
        }
    };

    if config.security.is_production() {
        for issue in production_readiness(config) {
            warn!(level = ?issue.level, area = issue.area, "{}", issue.message);
        }
    }

    let pool = db::connect(&config.database).await?;

    let state = web::AppState {
        gate: Arc::new(sqlite_gate(&pool, cipher)),
        audit: Arc::new(SqliteAuditLog::new(pool.clone())),
    };
    let app = web::create_router(state);

    let addr = config.web.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Admin API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    info!("ConfigGate shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
