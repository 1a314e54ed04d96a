//! Read-only view of what `import` and `evolve` would still do.

use migration::EvolutionPlan;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::core::SchemaBackend;
use super::evolve::{evolve_database, EvolveOptions};
use super::import::destination_verdict;
use super::report::{EvolutionReport, Step, Verdict};
use crate::config::db::ConnectionTarget;
use crate::error::DbInfraError;
use crate::infra::confirm::Preset;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub import_database: String,
    pub import_verdict: Verdict,
    /// `None` when no application database is configured.
    pub evolution: Option<EvolutionReport>,
}

impl StatusReport {
    /// True when an import would run or any evolution step is pending.
    pub fn has_pending_work(&self) -> bool {
        let evolution_pending = self.evolution.as_ref().is_some_and(|r| {
            [
                Step::AddColumn,
                Step::Backfill,
                Step::RepointForeignKey,
                Step::RetireLegacy,
            ]
            .into_iter()
            .any(|s| r.pending(s) > 0)
        });
        self.import_verdict.is_empty() || evolution_pending
    }

    pub fn log(&self) {
        match &self.import_verdict {
            Verdict::Empty { tables } => info!(
                database = %self.import_database,
                tables = tables,
                "status=import_pending"
            ),
            Verdict::NonEmpty { table, rows } => info!(
                database = %self.import_database,
                table = %table,
                rows = rows,
                "status=import_done"
            ),
        }
        match &self.evolution {
            Some(report) => {
                for step in &report.steps {
                    info!("status=evolve {step}");
                }
            }
            None => info!("status=evolve skipped (no application database configured)"),
        }
    }
}

/// Never mutates: the evolution pass runs as a dry run and never prompts.
pub async fn inspect_status(
    backend: &dyn SchemaBackend,
    import_target: &ConnectionTarget,
    app_target: Option<&ConnectionTarget>,
    plan: &EvolutionPlan,
) -> Result<StatusReport, DbInfraError> {
    let import_verdict = destination_verdict(backend, import_target).await?;

    let evolution = match app_target {
        Some(target) => Some(
            evolve_database(
                backend,
                target,
                plan,
                &mut Preset(false),
                EvolveOptions { dry_run: true },
                &CancellationToken::new(),
            )
            .await?,
        ),
        None => None,
    };

    Ok(StatusReport {
        import_database: import_target.database().to_string(),
        import_verdict,
        evolution,
    })
}
