//! Read-only questions about the live target schema.
//!
//! Every query is scoped to `current_schema()` and binds names as parameters.
//! An empty schema answers "no"/zero, never an error. Nothing here retries.

use std::collections::BTreeSet;

use async_trait::async_trait;
use migration::{quote_ident, FkAction, ForeignKeyDescriptor};
use sea_orm::{ConnectionTrait, DbErr, QueryResult, Statement};

use super::core::PgSession;
use super::diagnostics::migration_counters;
use crate::error::DbInfraError;
use crate::infra::db_errors::statement_error;

#[async_trait]
pub trait SchemaInspector: Send + Sync {
    async fn table_exists(&self, table: &str) -> Result<bool, DbInfraError>;
    async fn column_exists(&self, table: &str, column: &str) -> Result<bool, DbInfraError>;
    /// Base tables in the default schema.
    async fn list_tables(&self) -> Result<BTreeSet<String>, DbInfraError>;
    /// Foreign keys owned by `table`, ordered by constraint name.
    async fn list_foreign_keys(&self, table: &str)
        -> Result<Vec<ForeignKeyDescriptor>, DbInfraError>;
    async fn row_count(&self, table: &str) -> Result<u64, DbInfraError>;
}

const TABLE_EXISTS_SQL: &str = r#"
SELECT EXISTS (
    SELECT 1 FROM information_schema.tables
    WHERE table_schema = current_schema()
      AND table_type = 'BASE TABLE'
      AND table_name = $1
) AS "exists"
"#;

const COLUMN_EXISTS_SQL: &str = r#"
SELECT EXISTS (
    SELECT 1 FROM information_schema.columns
    WHERE table_schema = current_schema()
      AND table_name = $1
      AND column_name = $2
) AS "exists"
"#;

const LIST_TABLES_SQL: &str = r#"
SELECT table_name::text AS name
FROM information_schema.tables
WHERE table_schema = current_schema()
  AND table_type = 'BASE TABLE'
ORDER BY table_name
"#;

const LIST_FOREIGN_KEYS_SQL: &str = r#"
SELECT c.conname::text AS constraint_name,
       src.relname::text AS table_name,
       string_agg(a.attname::text, ',' ORDER BY k.ord) AS columns,
       dst.relname::text AS referenced_table,
       string_agg(ra.attname::text, ',' ORDER BY k.ord) AS referenced_columns,
       c.confdeltype::text AS on_delete,
       c.confupdtype::text AS on_update
FROM pg_constraint c
JOIN pg_class src ON src.oid = c.conrelid
JOIN pg_namespace n ON n.oid = src.relnamespace
JOIN pg_class dst ON dst.oid = c.confrelid
CROSS JOIN LATERAL unnest(c.conkey, c.confkey) WITH ORDINALITY AS k(attnum, refnum, ord)
JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum
JOIN pg_attribute ra ON ra.attrelid = c.confrelid AND ra.attnum = k.refnum
WHERE c.contype = 'f'
  AND n.nspname = current_schema()
  AND src.relname = $1
GROUP BY c.conname, src.relname, dst.relname, c.confdeltype, c.confupdtype
ORDER BY c.conname
"#;

fn bound(sql: &str, values: Vec<sea_orm::Value>) -> Statement {
    Statement::from_sql_and_values(sea_orm::DatabaseBackend::Postgres, sql, values)
}

fn decode_exists(row: Option<QueryResult>) -> Result<bool, DbErr> {
    match row {
        Some(row) => row.try_get::<bool>("", "exists"),
        None => Ok(false),
    }
}

fn split_names(joined: &str) -> Vec<String> {
    joined.split(',').map(str::to_string).collect()
}

fn decode_foreign_key(row: &QueryResult) -> Result<ForeignKeyDescriptor, DbErr> {
    let action = |col: &str| -> Result<FkAction, DbErr> {
        let code = row.try_get::<String>("", col)?;
        FkAction::from_pg_code(&code)
            .ok_or_else(|| DbErr::Custom(format!("unknown referential action code '{code}'")))
    };
    Ok(ForeignKeyDescriptor {
        constraint_name: row.try_get("", "constraint_name")?,
        table: row.try_get("", "table_name")?,
        columns: split_names(&row.try_get::<String>("", "columns")?),
        referenced_table: row.try_get("", "referenced_table")?,
        referenced_columns: split_names(&row.try_get::<String>("", "referenced_columns")?),
        on_delete: action("on_delete")?,
        on_update: action("on_update")?,
    })
}

#[async_trait]
impl SchemaInspector for PgSession {
    async fn table_exists(&self, table: &str) -> Result<bool, DbInfraError> {
        migration_counters::inspection();
        let row = self
            .conn
            .query_one(bound(TABLE_EXISTS_SQL, vec![table.into()]))
            .await
            .and_then(decode_exists);
        row.map_err(|e| statement_error(format!("inspect table_exists {table}"), e))
    }

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool, DbInfraError> {
        migration_counters::inspection();
        let row = self
            .conn
            .query_one(bound(COLUMN_EXISTS_SQL, vec![table.into(), column.into()]))
            .await
            .and_then(decode_exists);
        row.map_err(|e| statement_error(format!("inspect column_exists {table}.{column}"), e))
    }

    async fn list_tables(&self) -> Result<BTreeSet<String>, DbInfraError> {
        migration_counters::inspection();
        let rows = self
            .conn
            .query_all(bound(LIST_TABLES_SQL, vec![]))
            .await
            .map_err(|e| statement_error("inspect list_tables", e))?;
        rows.iter()
            .map(|r| r.try_get::<String>("", "name"))
            .collect::<Result<_, _>>()
            .map_err(|e| statement_error("inspect list_tables", e))
    }

    async fn list_foreign_keys(
        &self,
        table: &str,
    ) -> Result<Vec<ForeignKeyDescriptor>, DbInfraError> {
        migration_counters::inspection();
        let step = || format!("inspect list_foreign_keys {table}");
        let rows = self
            .conn
            .query_all(bound(LIST_FOREIGN_KEYS_SQL, vec![table.into()]))
            .await
            .map_err(|e| statement_error(step(), e))?;
        rows.iter()
            .map(decode_foreign_key)
            .collect::<Result<_, _>>()
            .map_err(|e| statement_error(step(), e))
    }

    async fn row_count(&self, table: &str) -> Result<u64, DbInfraError> {
        migration_counters::inspection();
        // Catalog names may not pass the identifier allow-list, so quote instead.
        let sql = format!("SELECT COUNT(*) AS n FROM {}", quote_ident(table));
        let n = self
            .conn
            .query_one(Statement::from_string(self.backend(), sql))
            .await
            .and_then(|row| match row {
                Some(row) => row.try_get::<i64>("", "n"),
                None => Ok(0),
            })
            .map_err(|e| statement_error(format!("inspect row_count {table}"), e))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use sea_orm::{DatabaseBackend, MockDatabase, Value};

    use super::*;
    use crate::config::db::{ConnectionTarget, Dialect};

    fn session(db: MockDatabase) -> PgSession {
        let target = ConnectionTarget::new(Dialect::Postgres, "localhost", 5432, "u", "p", "app");
        PgSession::new(db.into_connection(), target)
    }

    fn row(pairs: &[(&'static str, Value)]) -> BTreeMap<&'static str, Value> {
        pairs.iter().cloned().collect()
    }

    #[tokio::test]
    async fn exists_queries_decode_booleans() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![row(&[("exists", Value::Bool(Some(true)))])]])
            .append_query_results([vec![row(&[("exists", Value::Bool(Some(false)))])]]);
        let s = session(db);

        assert!(s.table_exists("users").await.unwrap());
        assert!(!s.column_exists("users", "forum_avatar").await.unwrap());
    }

    #[tokio::test]
    async fn empty_schema_lists_no_tables() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<BTreeMap<&str, Value>>::new()]);
        assert!(session(db).list_tables().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tables_come_back_sorted_and_deduplicated() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([vec![
            row(&[("name", Value::from("books"))]),
            row(&[("name", Value::from("authors"))]),
        ]]);
        let tables = session(db).list_tables().await.unwrap();
        assert_eq!(tables.into_iter().collect::<Vec<_>>(), ["authors", "books"]);
    }

    #[tokio::test]
    async fn foreign_keys_keep_columns_and_actions() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([vec![row(&[
            ("constraint_name", Value::from("forum_threads_user_id_fkey")),
            ("table_name", Value::from("forum_threads")),
            ("columns", Value::from("user_id")),
            ("referenced_table", Value::from("forum_users")),
            ("referenced_columns", Value::from("id")),
            ("on_delete", Value::from("c")),
            ("on_update", Value::from("a")),
        ])]]);

        let fks = session(db).list_foreign_keys("forum_threads").await.unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].columns, ["user_id"]);
        assert!(fks[0].references("forum_users"));
        assert_eq!(fks[0].on_delete, FkAction::Cascade);
        assert_eq!(fks[0].on_update, FkAction::NoAction);
    }

    #[tokio::test]
    async fn row_count_reads_bigint() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![row(&[("n", Value::BigInt(Some(42)))])]]);
        assert_eq!(session(db).row_count("Books").await.unwrap(), 42);
    }
}
