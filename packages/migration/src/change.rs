//! The statement model the executor applies.
//!
//! Each [`SchemaChange`] renders to exactly one SQL statement, so one change is
//! one transaction. Structural DDL goes through `sea_query`; the statements it
//! cannot express (`CREATE DATABASE`, `UPDATE ... FROM`, a combined
//! drop-and-add of a constraint) are rendered by hand from validated or quoted
//! identifiers.

use sea_orm_migration::sea_orm::{DatabaseBackend, Statement};
use sea_orm_migration::sea_query::Table;

use crate::foreign_key::ForeignKeyDescriptor;
use crate::ident::{quote_ident, Ident};
use crate::unit::MigrationUnit;

/// Copy one legacy column into one consolidated column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillColumn {
    pub target: Ident,
    pub legacy: Ident,
}

/// A set-based copy from the legacy table into the consolidated table, joined
/// on a natural key present in both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backfill {
    pub target_table: Ident,
    pub legacy_table: Ident,
    pub join_key: Ident,
    pub columns: Vec<BackfillColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    CreateDatabase {
        name: Ident,
    },
    AddColumn(MigrationUnit),
    Backfill(Backfill),
    /// Drop `current` and recreate it under the same name, same columns and
    /// same actions, referencing `to_table(to_column)` instead.
    RepointForeignKey {
        current: ForeignKeyDescriptor,
        to_table: Ident,
        to_column: Ident,
    },
    DropTable {
        table: Ident,
    },
}

impl SchemaChange {
    pub fn label(&self) -> String {
        match self {
            SchemaChange::CreateDatabase { name } => format!("create_database {name}"),
            SchemaChange::AddColumn(unit) => format!("add_column {}", unit.label()),
            SchemaChange::Backfill(b) => {
                format!("backfill {} <- {}", b.target_table, b.legacy_table)
            }
            SchemaChange::RepointForeignKey {
                current, to_table, ..
            } => format!(
                "repoint_fk {}.{} -> {}",
                current.table, current.constraint_name, to_table
            ),
            SchemaChange::DropTable { table } => format!("drop_table {table}"),
        }
    }

    /// PostgreSQL refuses to run these inside a transaction block.
    pub fn requires_autocommit(&self) -> bool {
        matches!(self, SchemaChange::CreateDatabase { .. })
    }

    pub fn to_statement(&self, backend: DatabaseBackend) -> Statement {
        match self {
            SchemaChange::CreateDatabase { name } => {
                Statement::from_string(backend, format!("CREATE DATABASE {}", name.quoted()))
            }
            SchemaChange::AddColumn(unit) => {
                let stmt = Table::alter()
                    .table(unit.table.alias())
                    .add_column(&mut unit.column_def())
                    .to_owned();
                backend.build(&stmt)
            }
            SchemaChange::Backfill(b) => Statement::from_string(backend, render_backfill(b)),
            SchemaChange::RepointForeignKey {
                current,
                to_table,
                to_column,
            } => Statement::from_string(backend, render_repoint(current, to_table, to_column)),
            SchemaChange::DropTable { table } => {
                let stmt = Table::drop().table(table.alias()).to_owned();
                backend.build(&stmt)
            }
        }
    }
}

fn render_backfill(b: &Backfill) -> String {
    let assignments = b
        .columns
        .iter()
        .map(|c| {
            format!(
                "{target} = COALESCE(l.{legacy}, t.{target})",
                target = c.target.quoted(),
                legacy = c.legacy.quoted()
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    let any_value = b
        .columns
        .iter()
        .map(|c| format!("l.{} IS NOT NULL", c.legacy.quoted()))
        .collect::<Vec<_>>()
        .join(" OR ");

    format!(
        "UPDATE {target} AS t SET {assignments} FROM {legacy} AS l \
         WHERE t.{key} = l.{key} AND ({any_value})",
        target = b.target_table.quoted(),
        legacy = b.legacy_table.quoted(),
        key = b.join_key.quoted(),
    )
}

fn render_repoint(fk: &ForeignKeyDescriptor, to_table: &Ident, to_column: &Ident) -> String {
    let name = quote_ident(&fk.constraint_name);
    let columns = fk
        .columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "ALTER TABLE {table} DROP CONSTRAINT {name}, \
         ADD CONSTRAINT {name} FOREIGN KEY ({columns}) REFERENCES {to_table} ({to_column}) \
         ON DELETE {on_delete} ON UPDATE {on_update}",
        table = quote_ident(&fk.table),
        to_table = to_table.quoted(),
        to_column = to_column.quoted(),
        on_delete = fk.on_delete.as_sql(),
        on_update = fk.on_update.as_sql(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foreign_key::FkAction;
    use crate::unit::{ColumnDefault, ColumnType};

    fn ident(raw: &str) -> Ident {
        Ident::new(raw).unwrap()
    }

    fn sql(change: &SchemaChange) -> String {
        change.to_statement(DatabaseBackend::Postgres).sql
    }

    #[test]
    fn add_column_renders_type_default_and_nullability() {
        let unit = MigrationUnit::new(ident("users"), ident("forum_avatar"), ColumnType::Varchar(150))
            .default_value(ColumnDefault::Text("avatar.png".into()));
        let rendered = sql(&SchemaChange::AddColumn(unit));

        assert!(rendered.starts_with("ALTER TABLE \"users\" ADD COLUMN \"forum_avatar\""));
        assert!(rendered.contains("varchar(150)"));
        assert!(rendered.contains("DEFAULT 'avatar.png'"));
    }

    #[test]
    fn backfill_is_a_single_set_based_update() {
        let change = SchemaChange::Backfill(Backfill {
            target_table: ident("users"),
            legacy_table: ident("forum_users"),
            join_key: ident("email"),
            columns: vec![
                BackfillColumn {
                    target: ident("forum_avatar"),
                    legacy: ident("avatar"),
                },
                BackfillColumn {
                    target: ident("forum_email_verified_at"),
                    legacy: ident("email_verified_at"),
                },
            ],
        });

        assert_eq!(
            sql(&change),
            "UPDATE \"users\" AS t SET \
             \"forum_avatar\" = COALESCE(l.\"avatar\", t.\"forum_avatar\"), \
             \"forum_email_verified_at\" = COALESCE(l.\"email_verified_at\", t.\"forum_email_verified_at\") \
             FROM \"forum_users\" AS l WHERE t.\"email\" = l.\"email\" \
             AND (l.\"avatar\" IS NOT NULL OR l.\"email_verified_at\" IS NOT NULL)"
        );
    }

    #[test]
    fn repoint_keeps_name_columns_and_actions_in_one_statement() {
        let change = SchemaChange::RepointForeignKey {
            current: ForeignKeyDescriptor {
                constraint_name: "forum_threads_user_id_fkey".into(),
                table: "forum_threads".into(),
                columns: vec!["user_id".into()],
                referenced_table: "forum_users".into(),
                referenced_columns: vec!["id".into()],
                on_delete: FkAction::Cascade,
                on_update: FkAction::NoAction,
            },
            to_table: ident("users"),
            to_column: ident("id"),
        };

        assert_eq!(
            sql(&change),
            "ALTER TABLE \"forum_threads\" DROP CONSTRAINT \"forum_threads_user_id_fkey\", \
             ADD CONSTRAINT \"forum_threads_user_id_fkey\" FOREIGN KEY (\"user_id\") \
             REFERENCES \"users\" (\"id\") ON DELETE CASCADE ON UPDATE NO ACTION"
        );
    }

    #[test]
    fn create_database_needs_autocommit() {
        let change = SchemaChange::CreateDatabase {
            name: ident("metadatadb"),
        };
        assert!(change.requires_autocommit());
        assert_eq!(sql(&change), "CREATE DATABASE \"metadatadb\"");
        assert!(!SchemaChange::DropTable {
            table: ident("forum_users")
        }
        .requires_autocommit());
    }

    #[test]
    fn drop_table_does_not_cascade() {
        let rendered = sql(&SchemaChange::DropTable {
            table: ident("forum_users"),
        });
        assert!(rendered.starts_with("DROP TABLE \"forum_users\""));
        assert!(!rendered.contains("CASCADE"));
    }
}
