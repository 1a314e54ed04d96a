//! What a flow did, step by step.

use std::fmt;

use tracing::{info, warn};

use crate::error::{DbInfraError, FailureKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    AddColumn,
    Backfill,
    RepointForeignKey,
    RetireLegacy,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::AddColumn => "add_column",
            Step::Backfill => "backfill",
            Step::RepointForeignKey => "repoint_fk",
            Step::RetireLegacy => "retire_legacy",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Applied { rows_affected: u64 },
    AlreadySatisfied,
    /// Dry run: the step would run.
    Pending,
    Declined,
    Skipped { reason: String },
    Failed { kind: FailureKind, message: String },
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Applied { rows_affected } => write!(f, "applied rows={rows_affected}"),
            StepOutcome::AlreadySatisfied => f.write_str("already_satisfied"),
            StepOutcome::Pending => f.write_str("pending"),
            StepOutcome::Declined => f.write_str("declined"),
            StepOutcome::Skipped { reason } => write!(f, "skipped ({reason})"),
            StepOutcome::Failed { kind, message } => write!(f, "failed [{kind}] {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: Step,
    /// Table, column or constraint the step acted on.
    pub subject: String,
    pub outcome: StepOutcome,
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.step, self.subject, self.outcome)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvolutionReport {
    pub steps: Vec<StepReport>,
}

impl EvolutionReport {
    pub fn record(&mut self, step: Step, subject: impl Into<String>, outcome: StepOutcome) {
        let report = StepReport {
            step,
            subject: subject.into(),
            outcome,
        };
        if report.outcome.is_failure() {
            warn!(step = %report.step, subject = %report.subject, outcome = %report.outcome, "evolve=step");
        } else {
            info!(step = %report.step, subject = %report.subject, outcome = %report.outcome, "evolve=step");
        }
        self.steps.push(report);
    }

    /// Number of `step`s that actually changed the database.
    pub fn applied(&self, step: Step) -> usize {
        self.count(step, |o| matches!(o, StepOutcome::Applied { .. }))
    }

    pub fn pending(&self, step: Step) -> usize {
        self.count(step, |o| matches!(o, StepOutcome::Pending))
    }

    fn count(&self, step: Step, pred: impl Fn(&StepOutcome) -> bool) -> usize {
        self.steps
            .iter()
            .filter(|s| s.step == step && pred(&s.outcome))
            .count()
    }

    pub fn outcome_of(&self, step: Step, subject: &str) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.step == step && s.subject == subject)
            .map(|s| &s.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| s.outcome.is_failure())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn into_result(self) -> Result<Self, DbInfraError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(DbInfraError::Evolution {
            failed: self.failures().map(|s| s.to_string()).collect(),
        })
    }

    pub fn log_summary(&self) {
        info!(
            add_column_applied = self.applied(Step::AddColumn),
            backfill_applied = self.applied(Step::Backfill),
            repoint_applied = self.applied(Step::RepointForeignKey),
            retire_applied = self.applied(Step::RetireLegacy),
            pending = self.steps.iter().filter(|s| s.outcome == StepOutcome::Pending).count(),
            failed = self.failures().count(),
            "evolve=summary"
        );
    }
}

/// Emptiness Verdict of an import destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Empty { tables: usize },
    /// First table found holding rows.
    NonEmpty { table: String, rows: u64 },
}

impl Verdict {
    pub fn is_empty(&self) -> bool {
        matches!(self, Verdict::Empty { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    AlreadyPopulated { table: String, rows: u64 },
    Imported { database: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_steps_turn_into_an_evolution_error() {
        let mut report = EvolutionReport::default();
        report.record(Step::AddColumn, "users.forum_avatar", StepOutcome::Applied { rows_affected: 0 });
        report.record(
            Step::RepointForeignKey,
            "forum_comments.forum_comments_user_id_fkey",
            StepOutcome::Failed {
                kind: FailureKind::IntegrityViolation,
                message: "violates foreign key".into(),
            },
        );

        assert_eq!(report.applied(Step::AddColumn), 1);
        assert!(!report.is_success());
        match report.into_result() {
            Err(DbInfraError::Evolution { failed }) => {
                assert_eq!(failed.len(), 1);
                assert!(failed[0].starts_with("repoint_fk forum_comments.forum_comments_user_id_fkey"));
                assert!(failed[0].contains("integrity_violation"));
            }
            other => panic!("expected evolution error, got {other:?}"),
        }
    }

    #[test]
    fn declined_and_skipped_are_not_failures() {
        let mut report = EvolutionReport::default();
        report.record(Step::RetireLegacy, "forum_users", StepOutcome::Declined);
        report.record(
            Step::Backfill,
            "users <- forum_users",
            StepOutcome::Skipped {
                reason: "legacy table absent".into(),
            },
        );
        assert!(report.clone().into_result().is_ok());
        assert_eq!(
            report.outcome_of(Step::RetireLegacy, "forum_users"),
            Some(&StepOutcome::Declined)
        );
    }
}
