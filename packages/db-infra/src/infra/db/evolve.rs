//! Converge the live schema to an [`EvolutionPlan`], applying only what is
//! still missing.
//!
//! Order: column additions, backfill, foreign-key re-points, legacy
//! retirement. Each step re-reads the catalog first, so a pass can resume
//! after any partial run. A failure on one table skips the remaining work on
//! that table only; retirement runs only after everything else succeeded.

use std::collections::BTreeSet;

use migration::{EvolutionPlan, ForeignKeyDescriptor, SchemaChange};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::core::{checkpoint, release, SchemaBackend};
use super::diagnostics::migration_counters;
use super::executor::StatementExecutor;
use super::inspector::SchemaInspector;
use super::report::{EvolutionReport, Step, StepOutcome};
use crate::config::db::ConnectionTarget;
use crate::error::{DbInfraError, FailureKind};
use crate::infra::confirm::Confirm;

#[derive(Debug, Clone, Copy, Default)]
pub struct EvolveOptions {
    /// Inspect only; steps that would run are reported as `Pending`.
    pub dry_run: bool,
}

struct Pass<'a, S: ?Sized> {
    session: &'a S,
    plan: &'a EvolutionPlan,
    options: EvolveOptions,
    cancel: &'a CancellationToken,
    failed_tables: BTreeSet<String>,
    last_step: String,
}

impl<'a, S> Pass<'a, S>
where
    S: SchemaInspector + StatementExecutor + ?Sized,
{
    fn checkpoint(&self) -> Result<(), DbInfraError> {
        checkpoint(self.cancel, &self.last_step)
    }

    fn finish(&mut self, report: &mut EvolutionReport, step: Step, subject: String, outcome: StepOutcome) {
        self.last_step = format!("{step} {subject}");
        report.record(step, subject, outcome);
    }

    /// Apply `change`, downgrading `absorb` to already-satisfied. Fatal
    /// failures propagate; anything else becomes a failed step.
    async fn attempt(
        &self,
        change: &SchemaChange,
        absorb: Option<FailureKind>,
    ) -> Result<StepOutcome, DbInfraError> {
        if self.options.dry_run {
            return Ok(StepOutcome::Pending);
        }
        match self.session.apply(change).await {
            Ok(applied) => Ok(StepOutcome::Applied {
                rows_affected: applied.rows_affected,
            }),
            Err(e) => match e.kind() {
                Some(kind) if Some(kind) == absorb => {
                    migration_counters::idempotent_skip();
                    info!(step = %change.label(), kind = %kind, "evolve=already_satisfied");
                    Ok(StepOutcome::AlreadySatisfied)
                }
                Some(kind) if !kind.is_fatal() => Ok(StepOutcome::Failed {
                    kind,
                    message: e.to_string(),
                }),
                _ => Err(e),
            },
        }
    }

    async fn run(
        &mut self,
        report: &mut EvolutionReport,
        confirm: &mut dyn Confirm,
    ) -> Result<(), DbInfraError> {
        self.add_columns(report).await?;
        self.backfill(report).await?;
        self.repoint_foreign_keys(report).await?;
        self.retire_legacy(report, confirm).await
    }

    async fn add_columns(&mut self, report: &mut EvolutionReport) -> Result<(), DbInfraError> {
        let plan = self.plan;
        for unit in &plan.units {
            self.checkpoint()?;
            let table = unit.table.as_str();
            let outcome = if self.failed_tables.contains(table) {
                StepOutcome::Skipped {
                    reason: format!("earlier step on {table} failed"),
                }
            } else if self.session.column_exists(table, unit.column.as_str()).await? {
                migration_counters::idempotent_skip();
                StepOutcome::AlreadySatisfied
            } else {
                self.attempt(&SchemaChange::AddColumn(unit.clone()), Some(FailureKind::DuplicateObject))
                    .await?
            };
            if outcome.is_failure() {
                self.failed_tables.insert(table.to_string());
            }
            self.finish(report, Step::AddColumn, unit.label(), outcome);
        }
        Ok(())
    }

    async fn backfill(&mut self, report: &mut EvolutionReport) -> Result<(), DbInfraError> {
        self.checkpoint()?;
        let plan = self.plan;
        let target = plan.consolidated.as_str();
        let legacy = plan.legacy.table.as_str();

        let outcome = if self.failed_tables.contains(target) {
            StepOutcome::Skipped {
                reason: format!("earlier step on {target} failed"),
            }
        } else if !self.session.table_exists(legacy).await? {
            StepOutcome::Skipped {
                reason: format!("legacy table {legacy} absent"),
            }
        } else {
            self.attempt(&SchemaChange::Backfill(plan.backfill()), None).await?
        };
        if outcome.is_failure() {
            self.failed_tables.insert(target.to_string());
        }
        self.finish(report, Step::Backfill, format!("{target} <- {legacy}"), outcome);
        Ok(())
    }

    async fn repoint_one(&self, fk: &ForeignKeyDescriptor) -> Result<StepOutcome, DbInfraError> {
        let change = match self.plan.repoint(fk) {
            Ok(change) => change,
            Err(message) => {
                return Ok(StepOutcome::Failed {
                    kind: FailureKind::Other,
                    message,
                })
            }
        };
        let outcome = self.attempt(&change, None).await?;
        if let StepOutcome::Failed {
            kind: FailureKind::UndefinedObject,
            ..
        } = outcome
        {
            if self.repointed_elsewhere(fk).await? {
                migration_counters::idempotent_skip();
                info!(step = %change.label(), "evolve=already_satisfied");
                return Ok(StepOutcome::AlreadySatisfied);
            }
        }
        Ok(outcome)
    }

    /// After an undefined-object failure the statement rolled back as a whole,
    /// so the catalog decides: converged only if no constraint of that name
    /// still references the legacy table. An unreadable catalog is not
    /// convergence.
    async fn repointed_elsewhere(&self, fk: &ForeignKeyDescriptor) -> Result<bool, DbInfraError> {
        let legacy = self.plan.legacy.table.as_str();
        let current = match self.session.list_foreign_keys(&fk.table).await {
            Ok(current) => current,
            Err(e) if e.is_fatal() => return Err(e),
            Err(_) => return Ok(false),
        };
        Ok(!current
            .iter()
            .any(|c| c.constraint_name == fk.constraint_name && c.references(legacy)))
    }

    /// Each dependent table is its own unit; one failing does not stop the next.
    async fn repoint_foreign_keys(&mut self, report: &mut EvolutionReport) -> Result<(), DbInfraError> {
        let plan = self.plan;
        for dependent in &plan.legacy.dependents {
            self.checkpoint()?;
            let table = dependent.as_str();
            if !self.session.table_exists(table).await? {
                self.finish(
                    report,
                    Step::RepointForeignKey,
                    table.to_string(),
                    StepOutcome::Skipped {
                        reason: "table absent".into(),
                    },
                );
                continue;
            }

            let fks = match self.session.list_foreign_keys(table).await {
                Ok(fks) => fks,
                Err(e) if !e.is_fatal() => {
                    let kind = e.kind().unwrap_or(FailureKind::Other);
                    let message = e.to_string();
                    self.finish(report, Step::RepointForeignKey, table.to_string(), StepOutcome::Failed { kind, message });
                    continue;
                }
                Err(e) => return Err(e),
            };

            let stale = plan.stale_foreign_keys(&fks);
            if stale.is_empty() {
                migration_counters::idempotent_skip();
                self.finish(report, Step::RepointForeignKey, table.to_string(), StepOutcome::AlreadySatisfied);
                continue;
            }
            for fk in stale {
                self.checkpoint()?;
                let outcome = self.repoint_one(fk).await?;
                self.finish(
                    report,
                    Step::RepointForeignKey,
                    format!("{}.{}", fk.table, fk.constraint_name),
                    outcome,
                );
            }
        }
        Ok(())
    }

    async fn retire_legacy(
        &mut self,
        report: &mut EvolutionReport,
        confirm: &mut dyn Confirm,
    ) -> Result<(), DbInfraError> {
        self.checkpoint()?;
        let legacy = self.plan.legacy.table.clone();

        let outcome = if !report.is_success() {
            StepOutcome::Skipped {
                reason: "earlier steps failed".into(),
            }
        } else if !self.session.table_exists(legacy.as_str()).await? {
            StepOutcome::AlreadySatisfied
        } else if self.options.dry_run {
            StepOutcome::Pending
        } else {
            let agreed = confirm
                .confirm(&format!("Drop legacy table {legacy}? This cannot be undone"))
                .await;
            // An interrupt that arrived while the prompt was open wins over the answer.
            self.checkpoint()?;
            if !agreed {
                info!(table = %legacy, "evolve=retire_declined");
                StepOutcome::Declined
            } else if !self.session.table_exists(legacy.as_str()).await? {
                StepOutcome::AlreadySatisfied
            } else {
                self.attempt(
                    &SchemaChange::DropTable {
                        table: legacy.clone(),
                    },
                    Some(FailureKind::UndefinedObject),
                )
                .await?
            }
        };
        self.finish(report, Step::RetireLegacy, legacy.to_string(), outcome);
        Ok(())
    }
}

/// Run one evolution pass over an open session and return what happened.
///
/// Fatal failures (connectivity, permission, missing database) and
/// cancellation end the pass with an error; the partial report is logged.
pub async fn evolve_schema<S>(
    session: &S,
    plan: &EvolutionPlan,
    confirm: &mut dyn Confirm,
    options: EvolveOptions,
    cancel: &CancellationToken,
) -> Result<EvolutionReport, DbInfraError>
where
    S: SchemaInspector + StatementExecutor + ?Sized,
{
    plan.check().map_err(DbInfraError::precondition)?;
    if !session.table_exists(plan.consolidated.as_str()).await? {
        return Err(DbInfraError::precondition(format!(
            "consolidated table {} does not exist",
            plan.consolidated
        )));
    }
    info!(
        consolidated = %plan.consolidated,
        legacy = %plan.legacy.table,
        dry_run = options.dry_run,
        "evolve=start"
    );

    let mut pass = Pass {
        session,
        plan,
        options,
        cancel,
        failed_tables: BTreeSet::new(),
        last_step: "start".to_string(),
    };
    let mut report = EvolutionReport::default();

    let result = pass.run(&mut report, confirm).await;

    report.log_summary();
    result.map(|()| report)
}

/// Open `target`, run one pass, and close the session on every path.
pub async fn evolve_database(
    backend: &dyn SchemaBackend,
    target: &ConnectionTarget,
    plan: &EvolutionPlan,
    confirm: &mut dyn Confirm,
    options: EvolveOptions,
    cancel: &CancellationToken,
) -> Result<EvolutionReport, DbInfraError> {
    let session = backend.open(target).await?;
    let result = evolve_schema(session.as_ref(), plan, confirm, options, cancel).await;
    release(session).await;
    result
}
