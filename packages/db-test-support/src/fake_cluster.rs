//! A small in-memory model of a PostgreSQL server: databases, tables, rows and
//! single-column foreign keys. [`SchemaChange`]s are applied structurally with
//! the same failure classes the real server reports.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use db_infra::db::ConnectionTarget;
use db_infra::infra::db::{Applied, SchemaBackend, SchemaInspector, SchemaSession, StatementExecutor};
use db_infra::{DbInfraError, FailureKind};
use migration::{ColumnDefault, FkAction, ForeignKeyDescriptor, SchemaChange};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Null,
    Text(String),
    Int(i64),
    Bool(bool),
}

impl Cell {
    pub fn text(value: &str) -> Self {
        Cell::Text(value.to_string())
    }

    fn from_default(default: &ColumnDefault) -> Self {
        match default {
            ColumnDefault::Text(s) => Cell::Text(s.clone()),
            ColumnDefault::Bool(b) => Cell::Bool(*b),
            ColumnDefault::Int(i) => Cell::Int(*i),
            ColumnDefault::CurrentTimestamp => Cell::text("now"),
        }
    }
}

pub type Row = BTreeMap<String, Cell>;

#[derive(Debug, Clone, Default)]
pub struct FakeTable {
    pub columns: Vec<String>,
    pub defaults: BTreeMap<String, Cell>,
    pub rows: Vec<Row>,
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
}

impl FakeTable {
    pub fn with_columns(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    fn values_of(&self, column: &str) -> BTreeSet<String> {
        self.rows
            .iter()
            .filter_map(|r| match r.get(column) {
                None | Some(Cell::Null) => None,
                Some(cell) => Some(format!("{cell:?}")),
            })
            .collect()
    }
}

type Database = BTreeMap<String, FakeTable>;

#[derive(Default)]
struct State {
    databases: BTreeMap<String, Database>,
    applied: Vec<SchemaChange>,
    row_count_calls: usize,
    opened: usize,
    closed: usize,
    unreachable: bool,
    scripted_failures: Vec<(String, FailureKind)>,
}

fn failure(step: &str, kind: FailureKind, message: impl Into<String>) -> DbInfraError {
    DbInfraError::Statement {
        step: step.to_string(),
        kind,
        message: message.into(),
    }
}

/// Shared handle; clones see the same server.
#[derive(Clone)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCluster {
    /// A server holding only the administrative `postgres` database.
    pub fn new() -> Self {
        let mut state = State::default();
        state.databases.insert("postgres".into(), Database::new());
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create_database(&self, name: &str) {
        self.lock().databases.entry(name.to_string()).or_default();
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.lock().databases.contains_key(name)
    }

    pub fn create_table(&self, database: &str, table: &str, columns: &[&str]) {
        self.put_table(database, table, FakeTable::with_columns(columns));
    }

    pub fn put_table(&self, database: &str, table: &str, contents: FakeTable) {
        self.lock()
            .databases
            .entry(database.to_string())
            .or_default()
            .insert(table.to_string(), contents);
    }

    pub fn add_foreign_key(
        &self,
        database: &str,
        table: &str,
        name: &str,
        column: &str,
        referenced_table: &str,
        referenced_column: &str,
    ) {
        let fk = ForeignKeyDescriptor {
            constraint_name: name.to_string(),
            table: table.to_string(),
            columns: vec![column.to_string()],
            referenced_table: referenced_table.to_string(),
            referenced_columns: vec![referenced_column.to_string()],
            on_delete: FkAction::Cascade,
            on_update: FkAction::NoAction,
        };
        if let Some(t) = self
            .lock()
            .databases
            .get_mut(database)
            .and_then(|db| db.get_mut(table))
        {
            t.foreign_keys.push(fk);
        }
    }

    /// Insert a row the way the server would: unknown columns are rejected,
    /// missing ones take their default, and foreign keys are enforced.
    pub fn insert(&self, database: &str, table: &str, values: &[(&str, Cell)]) -> Result<(), String> {
        let mut state = self.lock();
        let db = state
            .databases
            .get_mut(database)
            .ok_or_else(|| format!("database \"{database}\" does not exist"))?;
        let target = db
            .get(table)
            .ok_or_else(|| format!("relation \"{table}\" does not exist"))?;

        let mut row = Row::new();
        for column in &target.columns {
            let cell = target.defaults.get(column).cloned().unwrap_or(Cell::Null);
            row.insert(column.clone(), cell);
        }
        for (column, cell) in values {
            if !target.has_column(column) {
                return Err(format!("column \"{column}\" of relation \"{table}\" does not exist"));
            }
            row.insert(column.to_string(), cell.clone());
        }

        for fk in &target.foreign_keys {
            let value = match row.get(&fk.columns[0]) {
                None | Some(Cell::Null) => continue,
                Some(v) => format!("{v:?}"),
            };
            let present = db
                .get(&fk.referenced_table)
                .map(|r| r.values_of(&fk.referenced_columns[0]).contains(&value))
                .unwrap_or(false);
            if !present {
                return Err(format!(
                    "insert on \"{table}\" violates foreign key constraint \"{}\"",
                    fk.constraint_name
                ));
            }
        }

        if let Some(t) = db.get_mut(table) {
            t.rows.push(row);
        }
        Ok(())
    }

    pub fn table(&self, database: &str, table: &str) -> Option<FakeTable> {
        self.lock().databases.get(database)?.get(table).cloned()
    }

    pub fn rows(&self, database: &str, table: &str) -> Vec<Row> {
        self.table(database, table).map(|t| t.rows).unwrap_or_default()
    }

    pub fn total_rows(&self, database: &str) -> usize {
        self.lock()
            .databases
            .get(database)
            .map(|db| db.values().map(|t| t.rows.len()).sum())
            .unwrap_or(0)
    }

    pub fn applied(&self) -> Vec<SchemaChange> {
        self.lock().applied.clone()
    }

    pub fn applied_matching(&self, pred: impl Fn(&SchemaChange) -> bool) -> usize {
        self.lock().applied.iter().filter(|c| pred(c)).count()
    }

    pub fn row_count_calls(&self) -> usize {
        self.lock().row_count_calls
    }

    pub fn sessions_opened(&self) -> usize {
        self.lock().opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.lock().closed
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Every change whose label equals `label` fails with `kind`.
    pub fn fail_on(&self, label: &str, kind: FailureKind) {
        self.lock().scripted_failures.push((label.to_string(), kind));
    }
}

#[async_trait]
impl SchemaBackend for FakeCluster {
    async fn open(&self, target: &ConnectionTarget) -> Result<Box<dyn SchemaSession>, DbInfraError> {
        let mut state = self.lock();
        let connect_failure = |kind, message: String| DbInfraError::Connect {
            target: target.sanitized_url(),
            kind,
            message,
        };
        if state.unreachable {
            return Err(connect_failure(
                FailureKind::Connectivity,
                "connection refused".to_string(),
            ));
        }
        if !state.databases.contains_key(target.database()) {
            return Err(connect_failure(
                FailureKind::MissingDatabase,
                format!("database \"{}\" does not exist", target.database()),
            ));
        }
        state.opened += 1;
        Ok(Box::new(FakeSession {
            cluster: self.clone(),
            target: target.clone(),
        }))
    }
}

pub struct FakeSession {
    cluster: FakeCluster,
    target: ConnectionTarget,
}

impl FakeSession {
    fn with_db<T>(&self, f: impl FnOnce(&Database) -> T) -> T {
        let state = self.cluster.lock();
        let empty = Database::new();
        f(state.databases.get(self.target.database()).unwrap_or(&empty))
    }
}

#[async_trait]
impl SchemaInspector for FakeSession {
    async fn table_exists(&self, table: &str) -> Result<bool, DbInfraError> {
        Ok(self.with_db(|db| db.contains_key(table)))
    }

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool, DbInfraError> {
        Ok(self.with_db(|db| db.get(table).is_some_and(|t| t.has_column(column))))
    }

    async fn list_tables(&self) -> Result<BTreeSet<String>, DbInfraError> {
        Ok(self.with_db(|db| db.keys().cloned().collect()))
    }

    async fn list_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDescriptor>, DbInfraError> {
        Ok(self.with_db(|db| {
            let mut fks = db.get(table).map(|t| t.foreign_keys.clone()).unwrap_or_default();
            fks.sort_by(|a, b| a.constraint_name.cmp(&b.constraint_name));
            fks
        }))
    }

    async fn row_count(&self, table: &str) -> Result<u64, DbInfraError> {
        self.cluster.lock().row_count_calls += 1;
        Ok(self.with_db(|db| db.get(table).map(|t| t.rows.len() as u64).unwrap_or(0)))
    }
}

#[async_trait]
impl StatementExecutor for FakeSession {
    async fn apply(&self, change: &SchemaChange) -> Result<Applied, DbInfraError> {
        let label = change.label();
        let mut state = self.cluster.lock();

        if let Some((_, kind)) = state.scripted_failures.iter().find(|(l, _)| *l == label) {
            return Err(failure(&label, *kind, "scripted failure"));
        }

        let rows_affected = if let SchemaChange::CreateDatabase { name } = change {
            if state.databases.contains_key(name.as_str()) {
                return Err(failure(
                    &label,
                    FailureKind::DuplicateObject,
                    format!("database \"{name}\" already exists"),
                ));
            }
            state.databases.insert(name.to_string(), Database::new());
            0
        } else {
            let db = state
                .databases
                .get_mut(self.target.database())
                .ok_or_else(|| failure(&label, FailureKind::MissingDatabase, "database vanished"))?;
            apply_to_database(db, change).map_err(|(kind, message)| failure(&label, kind, message))?
        };

        state.applied.push(change.clone());
        Ok(Applied { rows_affected })
    }
}

#[async_trait]
impl SchemaSession for FakeSession {
    fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    async fn close(self: Box<Self>) -> Result<(), DbInfraError> {
        self.cluster.lock().closed += 1;
        Ok(())
    }
}

type Failure = (FailureKind, String);

fn undefined(what: String) -> Failure {
    (FailureKind::UndefinedObject, format!("{what} does not exist"))
}

fn apply_to_database(db: &mut Database, change: &SchemaChange) -> Result<u64, Failure> {
    match change {
        SchemaChange::CreateDatabase { .. } => Ok(0),
        SchemaChange::AddColumn(unit) => {
            let table = db
                .get_mut(unit.table.as_str())
                .ok_or_else(|| undefined(format!("relation \"{}\"", unit.table)))?;
            let column = unit.column.to_string();
            if table.has_column(&column) {
                return Err((
                    FailureKind::DuplicateObject,
                    format!("column \"{column}\" of relation \"{}\" already exists", unit.table),
                ));
            }
            let fill = unit.default.as_ref().map(Cell::from_default).unwrap_or(Cell::Null);
            for row in &mut table.rows {
                row.insert(column.clone(), fill.clone());
            }
            if let Some(default) = &unit.default {
                table.defaults.insert(column.clone(), Cell::from_default(default));
            }
            table.columns.push(column);
            Ok(0)
        }
        SchemaChange::Backfill(b) => {
            let legacy = db
                .get(b.legacy_table.as_str())
                .ok_or_else(|| undefined(format!("relation \"{}\"", b.legacy_table)))?
                .clone();
            let target = db
                .get_mut(b.target_table.as_str())
                .ok_or_else(|| undefined(format!("relation \"{}\"", b.target_table)))?;
            for col in &b.columns {
                if !target.has_column(col.target.as_str()) {
                    return Err(undefined(format!("column \"{}\"", col.target)));
                }
                if !legacy.has_column(col.legacy.as_str()) {
                    return Err(undefined(format!("column l.\"{}\"", col.legacy)));
                }
            }

            let key = b.join_key.as_str();
            let mut updated = 0;
            for row in &mut target.rows {
                let Some(k) = row.get(key).filter(|c| **c != Cell::Null).cloned() else {
                    continue;
                };
                let Some(source) = legacy.rows.iter().find(|l| l.get(key) == Some(&k)) else {
                    continue;
                };
                let mut touched = false;
                for col in &b.columns {
                    match source.get(col.legacy.as_str()) {
                        None | Some(Cell::Null) => {}
                        Some(value) => {
                            row.insert(col.target.to_string(), value.clone());
                            touched = true;
                        }
                    }
                }
                if touched {
                    updated += 1;
                }
            }
            Ok(updated)
        }
        SchemaChange::RepointForeignKey {
            current,
            to_table,
            to_column,
        } => {
            let referenced_table = db
                .get(to_table.as_str())
                .ok_or_else(|| undefined(format!("relation \"{to_table}\"")))?;
            if !referenced_table.has_column(to_column.as_str()) {
                return Err(undefined(format!(
                    "column \"{to_column}\" referenced in foreign key constraint"
                )));
            }
            let referenced = referenced_table.values_of(to_column.as_str());
            let table = db
                .get_mut(&current.table)
                .ok_or_else(|| undefined(format!("relation \"{}\"", current.table)))?;
            let idx = table
                .foreign_keys
                .iter()
                .position(|fk| fk.constraint_name == current.constraint_name)
                .ok_or_else(|| undefined(format!("constraint \"{}\"", current.constraint_name)))?;

            let column = &current.columns[0];
            let orphan = table.rows.iter().any(|r| match r.get(column) {
                None | Some(Cell::Null) => false,
                Some(v) => !referenced.contains(&format!("{v:?}")),
            });
            if orphan {
                return Err((
                    FailureKind::IntegrityViolation,
                    format!(
                        "insert or update on table \"{}\" violates foreign key constraint \"{}\"",
                        current.table, current.constraint_name
                    ),
                ));
            }

            let fk = &mut table.foreign_keys[idx];
            fk.referenced_table = to_table.to_string();
            fk.referenced_columns = vec![to_column.to_string()];
            Ok(0)
        }
        SchemaChange::DropTable { table } => {
            if !db.contains_key(table.as_str()) {
                return Err(undefined(format!("table \"{table}\"")));
            }
            let dependent = db
                .iter()
                .filter(|(name, _)| name.as_str() != table.as_str())
                .flat_map(|(_, t)| &t.foreign_keys)
                .find(|fk| fk.references(table.as_str()));
            if let Some(fk) = dependent {
                return Err((
                    FailureKind::Other,
                    format!(
                        "cannot drop table {table} because constraint {} on table {} depends on it",
                        fk.constraint_name, fk.table
                    ),
                ));
            }
            db.remove(table.as_str());
            Ok(0)
        }
    }
}
