use crate::change::{Backfill, BackfillColumn, SchemaChange};
use crate::foreign_key::ForeignKeyDescriptor;
use crate::ident::Ident;
use crate::unit::MigrationUnit;

/// The legacy table being folded into the consolidated one, and the tables
/// whose foreign keys may still point at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacySource {
    pub table: Ident,
    /// Column of the legacy table that dependents reference; it maps onto the
    /// consolidated key.
    pub key: Ident,
    pub join_key: Ident,
    pub backfill: Vec<BackfillColumn>,
    pub dependents: Vec<Ident>,
}

/// Target shape for an in-place schema evolution.
#[derive(Debug, Clone, PartialEq)]
pub struct EvolutionPlan {
    pub consolidated: Ident,
    /// Column on the consolidated table that re-pointed foreign keys reference.
    pub consolidated_key: Ident,
    pub units: Vec<MigrationUnit>,
    pub legacy: LegacySource,
}

impl EvolutionPlan {
    pub fn backfill(&self) -> Backfill {
        Backfill {
            target_table: self.consolidated.clone(),
            legacy_table: self.legacy.table.clone(),
            join_key: self.legacy.join_key.clone(),
            columns: self.legacy.backfill.clone(),
        }
    }

    /// Re-point `current` from the legacy key to the consolidated key.
    ///
    /// Only single-column references to the legacy key have a counterpart on
    /// the consolidated table; anything else is refused rather than re-keyed.
    pub fn repoint(&self, current: &ForeignKeyDescriptor) -> Result<SchemaChange, String> {
        if current.columns.len() != 1 || current.referenced_columns.len() != 1 {
            return Err(format!(
                "composite foreign key {current} cannot be re-pointed to {}.{}",
                self.consolidated, self.consolidated_key
            ));
        }
        if current.referenced_columns[0] != self.legacy.key.as_str() {
            return Err(format!(
                "foreign key {current} references {}.{}, which has no counterpart on {}; \
                 only references to {}.{} can be re-pointed",
                self.legacy.table,
                current.referenced_columns[0],
                self.consolidated,
                self.legacy.table,
                self.legacy.key
            ));
        }
        Ok(SchemaChange::RepointForeignKey {
            current: current.clone(),
            to_table: self.consolidated.clone(),
            to_column: self.consolidated_key.clone(),
        })
    }

    /// Foreign keys in `fks` that still reference the legacy table.
    pub fn stale_foreign_keys<'a>(
        &self,
        fks: &'a [ForeignKeyDescriptor],
    ) -> Vec<&'a ForeignKeyDescriptor> {
        fks.iter()
            .filter(|fk| fk.references(self.legacy.table.as_str()))
            .collect()
    }

    /// Backfill targets must be columns this plan adds to the consolidated
    /// table, otherwise the copy could run before its destination exists.
    pub fn check(&self) -> Result<(), String> {
        for col in &self.legacy.backfill {
            let declared = self
                .units
                .iter()
                .any(|u| u.table == self.consolidated && u.column == col.target);
            if !declared {
                return Err(format!(
                    "backfill target {}.{} is not declared by any migration unit",
                    self.consolidated, col.target
                ));
            }
        }
        if self.legacy.dependents.contains(&self.legacy.table) {
            return Err(format!(
                "legacy table {} cannot be its own dependent",
                self.legacy.table
            ));
        }
        Ok(())
    }
}
