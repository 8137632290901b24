mod commands;

use clap::{Parser, Subcommand};
use configgate_types::ValueKind;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "configgate-admin")]
#[command(version, about = "Operator CLI for ConfigGate")]
pub struct Cli {
    /// Print reports and logs as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate fresh ENCRYPTION_KEY material
    Keygen,

    /// Report sensitive settings stored in plaintext or failing to decrypt
    Audit,

    /// Encrypt sensitive settings stored in plaintext
    Migrate {
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// (Re)install the database triggers that reject sensitive plaintext
    Protect,

    /// Full security check; exits with status 1 unless secure
    Check,

    /// Show one setting (masked unless --reveal)
    Get {
        category: String,
        key: String,

        /// Print the decrypted value
        #[arg(long)]
        reveal: bool,
    },

    /// Save a setting through the gate
    Set {
        category: String,
        key: String,

        /// Value to store. Prompted without echo when omitted.
        value: Option<String>,

        #[arg(long, value_parser = parse_kind, default_value = "str")]
        kind: ValueKind,

        #[arg(long)]
        description: Option<String>,

        #[arg(long, default_value = "cli")]
        actor: String,
    },

    /// Deactivate a setting
    Delete {
        category: String,
        key: String,

        #[arg(long, default_value = "cli")]
        actor: String,
    },

    /// Replace all settings with the built-in defaults
    Reset {
        #[arg(long, default_value = "cli")]
        actor: String,
    },
}

fn parse_kind(s: &str) -> Result<ValueKind, String> {
    ValueKind::parse(s).map_err(|e| e.to_string())
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "configgate=warn,configgate_admin=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout carries only reports
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.json);

    commands::execute(cli).await
}
