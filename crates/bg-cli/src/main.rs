use anyhow::Result;
use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "bg")]
#[command(about = "Balance snapshot anomaly scanner and reconciler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// List every unique anomalous reading (read-only)
    Scan {
        #[command(flatten)]
        src: SourceArgs,
    },

    /// List suspect pairs under the looser review thresholds (read-only)
    Review {
        #[command(flatten)]
        src: SourceArgs,
    },

    /// Capped plain scan. Use `reconcile --dry-run` for the exact deletion list.
    Preview {
        #[command(flatten)]
        src: SourceArgs,

        /// Override reconcile.preview_cap
        #[arg(long)]
        cap: Option<usize>,
    },

    /// Delete anomalous readings one at a time until the series is clean
    Reconcile {
        #[command(flatten)]
        src: SourceArgs,

        /// Override reconcile.max_iterations
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Simulate deletions; the store is left untouched
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations.
    Migrate,

    /// Load readings from a CSV file into balance_snapshots (existing ids are kept).
    Import {
        #[arg(long)]
        csv: String,
    },
}

/// Where the series comes from and how to scan it.
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Read the series from a CSV file into memory instead of Postgres
    #[arg(long)]
    pub csv: Option<String>,

    /// Layered config paths in merge order
    #[arg(long = "config")]
    pub config_paths: Vec<String>,

    /// Override the metric A threshold
    #[arg(long = "threshold-a", allow_negative_numbers = true)]
    pub threshold_a: Option<f64>,

    /// Override the metric B threshold
    #[arg(long = "threshold-b", allow_negative_numbers = true)]
    pub threshold_b: Option<f64>,

    /// Print the full report as JSON instead of key=value lines
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience); production injects env vars.
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = bg_store::pg::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = bg_store::pg::status(&pool).await?;
                    println!(
                        "db_ok={} has_snapshots_table={}",
                        s.ok, s.has_snapshots_table
                    );
                }
                DbCmd::Migrate => {
                    bg_store::pg::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
                DbCmd::Import { csv } => {
                    let readings = bg_store::load_readings_csv(std::path::Path::new(&csv))?;
                    let inserted = bg_store::pg::insert_readings(&pool, &readings).await?;
                    println!("rows_read={} rows_inserted={}", readings.len(), inserted);
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = bg_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Scan { src } => commands::scan::run_scan(&src).await?,
        Commands::Review { src } => commands::scan::run_review(&src).await?,
        Commands::Preview { src, cap } => commands::scan::run_preview(&src, cap).await?,
        Commands::Reconcile {
            src,
            max_iterations,
            dry_run,
        } => commands::reconcile::run_reconcile(&src, max_iterations, dry_run).await?,
    }

    Ok(())
}
