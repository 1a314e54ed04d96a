//! Bring up a fresh replica of the embedded source database, exactly once.

use std::path::{Path, PathBuf};

use migration::{Ident, SchemaChange};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::core::{checkpoint, release, SchemaBackend};
use super::executor::StatementExecutor;
use super::diagnostics::migration_counters;
use super::inspector::SchemaInspector;
use super::report::{ImportOutcome, Verdict};
use crate::config::db::ConnectionTarget;
use crate::error::{DbInfraError, FailureKind};
use crate::infra::loader::{ensure_available, run_loader, sqlite_source_uri, BulkLoader};

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub source: PathBuf,
    /// Destination database, already lower-cased.
    pub target: ConnectionTarget,
    /// Used only for `CREATE DATABASE`.
    pub admin: ConnectionTarget,
}

/// Empty when there are no tables or every table has zero rows. Stops at the
/// first table holding rows.
pub async fn emptiness_verdict<I>(inspector: &I) -> Result<Verdict, DbInfraError>
where
    I: SchemaInspector + ?Sized,
{
    let tables = inspector.list_tables().await?;
    for table in &tables {
        let rows = inspector.row_count(table).await?;
        if rows > 0 {
            return Ok(Verdict::NonEmpty {
                table: table.clone(),
                rows,
            });
        }
    }
    Ok(Verdict::Empty {
        tables: tables.len(),
    })
}

/// Verdict for `target`, treating a database that does not exist yet as
/// having no tables.
pub async fn destination_verdict(
    backend: &dyn SchemaBackend,
    target: &ConnectionTarget,
) -> Result<Verdict, DbInfraError> {
    Ok(probe_destination(backend, target)
        .await?
        .unwrap_or(Verdict::Empty { tables: 0 }))
}

/// `None` when the database does not exist.
async fn probe_destination(
    backend: &dyn SchemaBackend,
    target: &ConnectionTarget,
) -> Result<Option<Verdict>, DbInfraError> {
    let session = match backend.open(target).await {
        Ok(session) => session,
        Err(e) if e.kind() == Some(FailureKind::MissingDatabase) => {
            info!(database = target.database(), "import=destination_absent");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let verdict = emptiness_verdict(session.as_ref()).await;
    release(session).await;
    verdict.map(Some)
}

fn resolve_source(path: &Path) -> Result<PathBuf, DbInfraError> {
    let resolved = path.canonicalize().map_err(|e| {
        DbInfraError::precondition(format!("source database {} is not readable: {e}", path.display()))
    })?;
    if !resolved.is_file() {
        return Err(DbInfraError::precondition(format!(
            "source database {} is not a file",
            resolved.display()
        )));
    }
    Ok(resolved)
}

async fn create_database(
    backend: &dyn SchemaBackend,
    admin: &ConnectionTarget,
    name: &str,
) -> Result<(), DbInfraError> {
    let name = Ident::new(name)
        .map_err(|e| DbInfraError::config(format!("invalid destination database name: {e}")))?;
    let change = SchemaChange::CreateDatabase { name };

    let session = backend.open(admin).await?;
    let result = session.apply(&change).await;
    release(session).await;

    match result {
        Ok(_) => {
            info!(step = %change.label(), "import=database_created");
            Ok(())
        }
        Err(e) if e.kind() == Some(FailureKind::DuplicateObject) => {
            migration_counters::idempotent_skip();
            info!(step = %change.label(), "import=database_exists");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Copy the source into the destination if, and only if, the destination
/// holds no rows right now.
pub async fn import_once(
    backend: &dyn SchemaBackend,
    loader: &dyn BulkLoader,
    request: &ImportRequest,
    cancel: &CancellationToken,
) -> Result<ImportOutcome, DbInfraError> {
    let source = resolve_source(&request.source)?;
    let database = request.target.database().to_string();
    info!(
        source = %source.display(),
        target = %request.target.sanitized_url(),
        "import=start"
    );

    let destination = probe_destination(backend, &request.target).await?;
    if let Some(Verdict::NonEmpty { table, rows }) = destination {
        migration_counters::import_fast_path_hit();
        info!(table = %table, rows = rows, "import=skipped destination_has_rows=true");
        return Ok(ImportOutcome::AlreadyPopulated { table, rows });
    }
    checkpoint(cancel, "emptiness check")?;

    ensure_available(loader).await?;
    checkpoint(cancel, "loader check")?;

    // A database we just connected to exists; creating it would only need a
    // privilege the import role may lack.
    if destination.is_none() {
        create_database(backend, &request.admin, &database).await?;
        checkpoint(cancel, "create database")?;
    }

    run_loader(loader, &sqlite_source_uri(&source), &request.target.url()).await?;
    info!(database = %database, "import=done");
    Ok(ImportOutcome::Imported { database })
}
