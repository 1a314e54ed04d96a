//! One statement, one transaction.

use async_trait::async_trait;
use migration::SchemaChange;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, ExecResult, TransactionTrait};
use tracing::{debug, warn};

use super::core::PgSession;
use super::diagnostics::migration_counters;
use crate::error::DbInfraError;
use crate::infra::db_errors::statement_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub rows_affected: u64,
}

#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Apply `change` and commit it before returning. A failure leaves nothing
    /// of this change behind; earlier changes stay committed.
    async fn apply(&self, change: &SchemaChange) -> Result<Applied, DbInfraError>;
}

async fn execute_in_transaction(
    conn: &DatabaseConnection,
    stmt: sea_orm::Statement,
) -> Result<ExecResult, DbErr> {
    let txn = conn.begin().await?;
    match txn.execute(stmt).await {
        Ok(result) => {
            txn.commit().await?;
            Ok(result)
        }
        Err(e) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "rollback after failed statement also failed");
            }
            Err(e)
        }
    }
}

#[async_trait]
impl StatementExecutor for PgSession {
    async fn apply(&self, change: &SchemaChange) -> Result<Applied, DbInfraError> {
        let label = change.label();
        let stmt = change.to_statement(self.backend());
        debug!(step = %label, sql = %stmt.sql, autocommit = change.requires_autocommit(), "apply");

        let result = if change.requires_autocommit() {
            self.conn.execute(stmt).await
        } else {
            execute_in_transaction(&self.conn, stmt).await
        };

        match result {
            Ok(done) => {
                migration_counters::statement_applied();
                Ok(Applied {
                    rows_affected: done.rows_affected(),
                })
            }
            Err(e) => {
                migration_counters::statement_failed();
                Err(statement_error(label, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use migration::{ColumnType, Ident, MigrationUnit};
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    use super::*;
    use crate::config::db::{ConnectionTarget, Dialect};
    use crate::error::FailureKind;
    use crate::infra::db_errors::testing::exec_err;

    fn target() -> ConnectionTarget {
        ConnectionTarget::new(Dialect::Postgres, "localhost", 5432, "u", "p", "app")
    }

    fn add_avatar() -> SchemaChange {
        SchemaChange::AddColumn(MigrationUnit::new(
            Ident::new("users").unwrap(),
            Ident::new("forum_avatar").unwrap(),
            ColumnType::Varchar(150),
        ))
    }

    #[tokio::test]
    async fn ddl_runs_inside_its_own_transaction() {
        let conn = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();
        let session = PgSession::new(conn, target());

        session.apply(&add_avatar()).await.unwrap();

        let log = session.conn.into_transaction_log();
        assert_eq!(log.len(), 1);
        let rendered = format!("{:?}", log[0]);
        assert!(rendered.contains("BEGIN"));
        assert!(rendered.contains("ADD COLUMN"));
        assert!(rendered.contains("COMMIT"));
    }

    #[tokio::test]
    async fn create_database_runs_in_autocommit() {
        let conn = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();
        let session = PgSession::new(conn, target());
        let change = SchemaChange::CreateDatabase {
            name: Ident::new("metadatadb").unwrap(),
        };

        session.apply(&change).await.unwrap();

        let rendered = format!("{:?}", session.conn.into_transaction_log());
        assert!(rendered.contains("CREATE DATABASE \\\"metadatadb\\\""));
        assert!(!rendered.contains("BEGIN"));
    }

    #[tokio::test]
    async fn failures_carry_step_and_classification() {
        let conn = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_errors([exec_err("42701")])
            .into_connection();
        let session = PgSession::new(conn, target());

        let err = session.apply(&add_avatar()).await.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::DuplicateObject));
        assert!(err.to_string().contains("add_column users.forum_avatar"));
    }

    #[tokio::test]
    async fn rows_affected_is_reported() {
        let conn = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 7,
            }])
            .into_connection();
        let session = PgSession::new(conn, target());
        let change = SchemaChange::Backfill(migration::forum_consolidation().unwrap().backfill());

        assert_eq!(session.apply(&change).await.unwrap().rows_affected, 7);
    }
}
