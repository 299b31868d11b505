//! Chain administration binary
//!
//! Usage:
//!   chain-admin verify  --tenant T --issuer NIF   - Verify a series
//!   chain-admin status  --tenant T --issuer NIF   - Print chain status
//!   chain-admin resolve --tenant T --issuer NIF --note "..."
//!   chain-admin record  --id N                    - Print one record
//!   chain-admin audit   --tenant T [--event-type CHAIN_VERIFY] [--limit N]

use anyhow::Context;
use clap::{Parser, Subcommand};
use invoice_ledger::{
    AuditEventType, AuditFilter, AuditLog, ChainVerifier, Config, Ledger, Metrics, RocksStore,
    SeriesId, SeriesKey, SystemClock, TenantId,
};
use std::path::PathBuf;
use std::sync::Arc;

/// VeriFactu invoice chain administration
#[derive(Parser)]
#[command(name = "chain-admin", version, about = "VeriFactu invoice chain administration")]
struct Cli {
    /// Path to a TOML config file (defaults come from the environment)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true, env = "VERIFACTU_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the hash chain of a series
    Verify {
        /// Tenant ID
        #[arg(long)]
        tenant: String,
        /// Issuer tax ID (series key)
        #[arg(long)]
        issuer: String,
    },

    /// Print total records, tip hash, block and last verification
    Status {
        /// Tenant ID
        #[arg(long)]
        tenant: String,
        /// Issuer tax ID (series key)
        #[arg(long)]
        issuer: String,
    },

    /// Clear the write block of a series after an incident was handled
    Resolve {
        /// Tenant ID
        #[arg(long)]
        tenant: String,
        /// Issuer tax ID (series key)
        #[arg(long)]
        issuer: String,
        /// Operator note stored in the audit log
        #[arg(long)]
        note: String,
    },

    /// Print one record
    Record {
        /// Record ID
        #[arg(long)]
        id: u64,
    },

    /// List audit events of a tenant
    Audit {
        /// Tenant ID
        #[arg(long)]
        tenant: String,
        /// Only this event type, e.g. CHAIN_BREAK_DETECTED
        #[arg(long)]
        event_type: Option<String>,
        /// Maximum events to print
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::from_env()?,
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let store = Arc::new(RocksStore::open(&config).context("opening ledger store")?);
    let clock = Arc::new(SystemClock);
    let audit = AuditLog::new(store.clone(), clock.clone(), &config.audit);
    let metrics = Arc::new(Metrics::new()?);
    let ledger = Arc::new(
        Ledger::new(store.clone(), audit.clone(), clock, config.ledger.clone())
            .with_metrics(metrics),
    );

    match cli.command {
        Commands::Verify { tenant, issuer } => {
            let series = series(&tenant, &issuer)?;
            let report = ChainVerifier::new(ledger).verify(&series)?;
            print_json(&report)?;
            if !report.is_intact() {
                std::process::exit(2);
            }
        }
        Commands::Status { tenant, issuer } => {
            let series = series(&tenant, &issuer)?;
            print_json(&ledger.chain_status(&series)?)?;
        }
        Commands::Resolve {
            tenant,
            issuer,
            note,
        } => {
            let series = series(&tenant, &issuer)?;
            ledger.resolve_incident(&series, &note)?;
            print_json(&ledger.chain_status(&series)?)?;
        }
        Commands::Record { id } => {
            print_json(&ledger.get_record(id)?)?;
        }
        Commands::Audit {
            tenant,
            event_type,
            limit,
        } => {
            let filter = match event_type {
                Some(name) => AuditFilter::event_type(parse_event_type(&name)?),
                None => AuditFilter::default(),
            };
            for event in audit.query(&TenantId::new(tenant), filter).take(limit) {
                println!("{}", serde_json::to_string(&event?)?);
            }
        }
    }

    Ok(())
}

fn series(tenant: &str, issuer: &str) -> anyhow::Result<SeriesId> {
    Ok(SeriesId::new(
        TenantId::new(tenant),
        SeriesKey::for_issuer(issuer)?,
    ))
}

fn parse_event_type(name: &str) -> anyhow::Result<AuditEventType> {
    serde_json::from_value(serde_json::Value::String(name.to_ascii_uppercase()))
        .with_context(|| format!("unknown event type {}", name))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
