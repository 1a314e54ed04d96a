use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use db_infra::config::db::{load_dotenv, DbConfig};
use db_infra::{
    orchestrate_evolution, orchestrate_import, orchestrate_status, Confirm, DbInfraError,
    EvolveOptions, ImportOutcome, PgLoader, Preset, TerminalConfirm,
};
use migration::{forum_consolidation, EvolutionPlan};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "migration=info,db_infra=info,sqlx=warn,sea_orm=warn";

#[derive(Parser)]
#[command(name = "migration")]
#[command(about = "Library database import and schema evolution tool")]
struct Cli {
    /// Load environment variables from this file instead of ./.env
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy the embedded metadata database into PostgreSQL, once
    Import,
    /// Add forum columns to users, backfill them and re-point forum foreign keys
    Evolve {
        /// Report what would change without changing anything
        #[arg(long)]
        dry_run: bool,
        #[command(flatten)]
        retire: RetireArgs,
    },
    /// Show pending import and evolution work
    Status,
    /// Import, then evolve
    All {
        #[command(flatten)]
        retire: RetireArgs,
    },
}

#[derive(Args)]
struct RetireArgs {
    /// Drop the legacy forum_users table without asking
    #[arg(long, conflicts_with = "keep_legacy")]
    yes_drop_legacy: bool,

    /// Keep the legacy forum_users table without asking
    #[arg(long)]
    keep_legacy: bool,
}

impl RetireArgs {
    fn confirm(&self, cancel: &CancellationToken) -> Box<dyn Confirm> {
        if self.yes_drop_legacy {
            Box::new(Preset(true))
        } else if self.keep_legacy {
            Box::new(Preset(false))
        } else {
            Box::new(TerminalConfirm::new(cancel.clone()))
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .without_time()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn plan() -> Result<EvolutionPlan, DbInfraError> {
    forum_consolidation().map_err(|e| DbInfraError::config(format!("invalid evolution plan: {e}")))
}

async fn import(config: &DbConfig, cancel: &CancellationToken) -> Result<(), DbInfraError> {
    let loader = PgLoader::new(config.loader_bin.clone());
    match orchestrate_import(config, &loader, cancel).await? {
        ImportOutcome::AlreadyPopulated { table, rows } => {
            info!("import=noop destination already holds data (table={table} rows={rows})")
        }
        ImportOutcome::Imported { database } => info!("import=complete database={database}"),
    }
    Ok(())
}

async fn evolve(
    config: &DbConfig,
    confirm: &mut dyn Confirm,
    options: EvolveOptions,
    cancel: &CancellationToken,
) -> Result<(), DbInfraError> {
    orchestrate_evolution(config, &plan()?, confirm, options, cancel).await?;
    Ok(())
}

async fn run(command: Command, cancel: CancellationToken) -> Result<(), DbInfraError> {
    let config = DbConfig::from_env()?;
    info!(config = ?config, "migrate=config");

    match command {
        Command::Import => import(&config, &cancel).await,
        Command::Evolve { dry_run, retire } => {
            evolve(&config, retire.confirm(&cancel).as_mut(), EvolveOptions { dry_run }, &cancel).await
        }
        Command::Status => {
            let status = orchestrate_status(&config, &plan()?).await?;
            status.log();
            info!("status=pending_work {}", status.has_pending_work());
            Ok(())
        }
        Command::All { retire } => {
            import(&config, &cancel).await?;
            evolve(&config, retire.confirm(&cancel).as_mut(), EvolveOptions::default(), &cancel).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = load_dotenv(cli.env_file.as_deref()) {
        eprintln!("{e}");
        std::process::exit(2);
    }
    init_tracing(cli.json);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current step");
            on_signal.cancel();
        }
    });

    if let Err(e) = run(cli.command, cancel).await {
        eprintln!("Migration failed: {e}");
        std::process::exit(1);
    }
}
