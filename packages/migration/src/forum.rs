//! Folding the standalone `forum_users` table into the application's `users`
//! table.

use crate::change::BackfillColumn;
use crate::ident::{Ident, IdentError};
use crate::plan::{EvolutionPlan, LegacySource};
use crate::unit::{ColumnDefault, ColumnType, MigrationUnit};

pub const DEFAULT_AVATAR: &str = "avatar.png";

pub fn forum_consolidation() -> Result<EvolutionPlan, IdentError> {
    let users = Ident::new("users")?;

    Ok(EvolutionPlan {
        consolidated: users.clone(),
        consolidated_key: Ident::new("id")?,
        units: vec![
            MigrationUnit::new(
                users.clone(),
                Ident::new("forum_avatar")?,
                ColumnType::Varchar(150),
            )
            .default_value(ColumnDefault::Text(DEFAULT_AVATAR.to_string())),
            MigrationUnit::new(
                users,
                Ident::new("forum_email_verified_at")?,
                ColumnType::Timestamp,
            ),
        ],
        legacy: LegacySource {
            table: Ident::new("forum_users")?,
            key: Ident::new("id")?,
            join_key: Ident::new("email")?,
            backfill: vec![
                BackfillColumn {
                    target: Ident::new("forum_avatar")?,
                    legacy: Ident::new("avatar")?,
                },
                BackfillColumn {
                    target: Ident::new("forum_email_verified_at")?,
                    legacy: Ident::new("email_verified_at")?,
                },
            ],
            dependents: vec![Ident::new("forum_threads")?, Ident::new("forum_comments")?],
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::SchemaChange;
    use crate::foreign_key::{FkAction, ForeignKeyDescriptor};

    #[test]
    fn forum_plan_is_consistent() {
        let plan = forum_consolidation().unwrap();
        plan.check().unwrap();
        assert_eq!(plan.units.len(), 2);
        assert!(plan.units.iter().all(|u| u.table == "users"));
    }

    #[test]
    fn check_rejects_backfill_into_undeclared_column() {
        let mut plan = forum_consolidation().unwrap();
        plan.units.pop();
        let err = plan.check().unwrap_err();
        assert!(err.contains("forum_email_verified_at"));
    }

    #[test]
    fn stale_foreign_keys_returns_every_legacy_reference() {
        let plan = forum_consolidation().unwrap();
        let fk = |name: &str, col: &str, target: &str| ForeignKeyDescriptor {
            constraint_name: name.into(),
            table: "forum_threads".into(),
            columns: vec![col.into()],
            referenced_table: target.into(),
            referenced_columns: vec!["id".into()],
            on_delete: FkAction::NoAction,
            on_update: FkAction::NoAction,
        };
        let fks = vec![
            fk("forum_threads_user_id_fkey", "user_id", "forum_users"),
            fk("forum_threads_category_id_fkey", "category_id", "forum_categories"),
            fk("forum_threads_editor_id_fkey", "editor_id", "forum_users"),
        ];

        let stale = plan.stale_foreign_keys(&fks);
        let names: Vec<_> = stale.iter().map(|fk| fk.constraint_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["forum_threads_user_id_fkey", "forum_threads_editor_id_fkey"]
        );
    }

    fn legacy_fk(columns: &[&str], referenced: &[&str]) -> ForeignKeyDescriptor {
        ForeignKeyDescriptor {
            constraint_name: "forum_comments_author_fkey".into(),
            table: "forum_comments".into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            referenced_table: "forum_users".into(),
            referenced_columns: referenced.iter().map(|c| c.to_string()).collect(),
            on_delete: FkAction::Cascade,
            on_update: FkAction::NoAction,
        }
    }

    #[test]
    fn repoint_maps_legacy_key_onto_consolidated_key() {
        let plan = forum_consolidation().unwrap();
        match plan.repoint(&legacy_fk(&["user_id"], &["id"])).unwrap() {
            SchemaChange::RepointForeignKey {
                to_table, to_column, ..
            } => {
                assert_eq!(to_table, "users");
                assert_eq!(to_column, "id");
            }
            other => panic!("unexpected change {other:?}"),
        }
    }

    #[test]
    fn repoint_refuses_reference_to_non_key_legacy_column() {
        let plan = forum_consolidation().unwrap();
        let err = plan
            .repoint(&legacy_fk(&["author_email"], &["email"]))
            .unwrap_err();
        assert!(err.contains("forum_users.email"), "{err}");
        assert!(err.contains("forum_users.id"), "{err}");
    }

    #[test]
    fn repoint_refuses_composite_keys() {
        let plan = forum_consolidation().unwrap();
        let err = plan
            .repoint(&legacy_fk(&["user_id", "site_id"], &["id", "site_id"]))
            .unwrap_err();
        assert!(err.starts_with("composite foreign key"), "{err}");
    }
}
