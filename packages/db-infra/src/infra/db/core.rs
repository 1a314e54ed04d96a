use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use migration::EvolutionPlan;
use sea_orm::{ConnectOptions, Database, DatabaseBackend, DatabaseConnection};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::diagnostics::migration_counters;
use super::evolve::{evolve_database, EvolveOptions};
use super::executor::StatementExecutor;
use super::import::{import_once, ImportRequest};
use super::inspector::SchemaInspector;
use super::report::{EvolutionReport, ImportOutcome};
use super::status::{inspect_status, StatusReport};
use crate::config::db::{ConnectionTarget, DbConfig};
use crate::error::{DbInfraError, FailureKind};
use crate::infra::confirm::Confirm;
use crate::infra::db_errors::connect_error;
use crate::infra::loader::BulkLoader;

pub const CONNECT_MAX_ATTEMPTS: u32 = 5;
pub const CONNECT_INTERVAL_MS: u64 = 500;

/// An open connection to one database. Closed explicitly by whoever opened it.
#[async_trait]
pub trait SchemaSession: SchemaInspector + StatementExecutor {
    fn target(&self) -> &ConnectionTarget;
    async fn close(self: Box<Self>) -> Result<(), DbInfraError>;
}

/// Opens sessions. Production uses [`SeaOrmBackend`]; tests use a fake.
#[async_trait]
pub trait SchemaBackend: Send + Sync {
    async fn open(&self, target: &ConnectionTarget) -> Result<Box<dyn SchemaSession>, DbInfraError>;
}

pub struct PgSession {
    pub(crate) conn: DatabaseConnection,
    target: ConnectionTarget,
}

impl PgSession {
    pub fn new(conn: DatabaseConnection, target: ConnectionTarget) -> Self {
        Self { conn, target }
    }

    pub(crate) fn backend(&self) -> DatabaseBackend {
        self.target.dialect.backend()
    }
}

#[async_trait]
impl SchemaSession for PgSession {
    fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    async fn close(self: Box<Self>) -> Result<(), DbInfraError> {
        let target = self.target.sanitized_url();
        self.conn
            .close()
            .await
            .map_err(|e| connect_error(target, e))
    }
}

/// Close `session`, logging rather than propagating a failure so the caller's
/// own result wins.
pub async fn release(session: Box<dyn SchemaSession>) {
    let target = session.target().sanitized_url();
    if let Err(e) = session.close().await {
        warn!(target = %target, error = %e, "failed to close session");
    }
}

/// Return `Cancelled` if the token fired. Checked only between steps.
pub fn checkpoint(cancel: &CancellationToken, after: &str) -> Result<(), DbInfraError> {
    if cancel.is_cancelled() {
        migration_counters::flow_cancelled();
        info!(after = after, "migrate=cancelled");
        return Err(DbInfraError::Cancelled {
            after: after.to_string(),
        });
    }
    Ok(())
}

/// Retry `connect_fn` while it fails with a connectivity error. Anything else
/// (bad credentials, missing database) is returned on the first attempt.
pub(crate) async fn retry_connection<T, F, Fut>(
    mut connect_fn: F,
    max_attempts: u32,
    interval_ms: u64,
) -> Result<T, DbInfraError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbInfraError>>,
{
    let mut attempt = 1;
    loop {
        match connect_fn().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        "connection_retry=success attempts={} interval_ms={}",
                        attempt, interval_ms
                    );
                }
                return Ok(result);
            }
            Err(e) if e.kind() == Some(FailureKind::Connectivity) && attempt < max_attempts => {
                warn!(
                    "connection_retry=failed attempt={} max_attempts={} interval_ms={} error={}",
                    attempt, max_attempts, interval_ms, e
                );
                migration_counters::connect_retry();
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeaOrmBackend {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl Default for SeaOrmBackend {
    fn default() -> Self {
        Self {
            max_attempts: CONNECT_MAX_ATTEMPTS,
            interval_ms: CONNECT_INTERVAL_MS,
        }
    }
}

#[async_trait]
impl SchemaBackend for SeaOrmBackend {
    async fn open(&self, target: &ConnectionTarget) -> Result<Box<dyn SchemaSession>, DbInfraError> {
        let mut opt = ConnectOptions::new(target.url());
        opt.min_connections(1)
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .sqlx_logging(true);

        let sanitized = target.sanitized_url();
        let conn = retry_connection(
            || {
                let opt = opt.clone();
                let sanitized = sanitized.clone();
                async move {
                    Database::connect(opt)
                        .await
                        .map_err(|e| connect_error(sanitized, e))
                }
            },
            self.max_attempts,
            self.interval_ms,
        )
        .await?;

        info!(target = %sanitized, "session=open");
        Ok(Box::new(PgSession::new(conn, target.clone())))
    }
}

fn finish_flow<T>(flow: &str, result: &Result<T, DbInfraError>) {
    match result {
        Ok(_) => info!("migrate=done flow={}", flow),
        Err(e) => error!("migrate=failed flow={} error={}", flow, e),
    }
    migration_counters::log_snapshot(flow);
}

/// Import the embedded source into the configured destination, once.
pub async fn orchestrate_import(
    config: &DbConfig,
    loader: &dyn BulkLoader,
    cancel: &CancellationToken,
) -> Result<ImportOutcome, DbInfraError> {
    let request = ImportRequest {
        source: config.source_path()?.to_path_buf(),
        target: config.import_target()?,
        admin: config.admin_target(),
    };
    info!("migrate=start flow=import target={}", request.target.sanitized_url());

    let result = import_once(&SeaOrmBackend::default(), loader, &request, cancel).await;
    finish_flow("import", &result);
    result
}

/// Evolve the application database. Any failed step makes the whole flow fail
/// once every independent step has had its turn.
pub async fn orchestrate_evolution(
    config: &DbConfig,
    plan: &EvolutionPlan,
    confirm: &mut dyn Confirm,
    options: EvolveOptions,
    cancel: &CancellationToken,
) -> Result<EvolutionReport, DbInfraError> {
    let target = config.app_target()?;
    info!(
        "migrate=start flow=evolve target={} dry_run={}",
        target.sanitized_url(),
        options.dry_run
    );

    let result = evolve_database(&SeaOrmBackend::default(), &target, plan, confirm, options, cancel)
        .await
        .and_then(EvolutionReport::into_result);
    finish_flow("evolve", &result);
    result
}

pub async fn orchestrate_status(
    config: &DbConfig,
    plan: &EvolutionPlan,
) -> Result<StatusReport, DbInfraError> {
    let import_target = config.import_target()?;
    let app_target = config.app_target().ok();
    info!("migrate=start flow=status");

    let result = inspect_status(
        &SeaOrmBackend::default(),
        &import_target,
        app_target.as_ref(),
        plan,
    )
    .await;
    finish_flow("status", &result);
    result
}
