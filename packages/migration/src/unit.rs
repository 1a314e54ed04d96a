use sea_orm_migration::sea_query::{ColumnDef, Expr};

use crate::ident::Ident;

/// Column types a migration unit may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Varchar(u32),
    Text,
    Timestamp,
    TimestampTz,
    Boolean,
    Integer,
    BigInt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnDefault {
    Text(String),
    Bool(bool),
    Int(i64),
    CurrentTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nullability {
    Nullable,
    NotNull,
}

/// One additive schema change: a single new column.
///
/// Units are declared in code next to the plan that uses them; they are never
/// derived from data.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationUnit {
    pub table: Ident,
    pub column: Ident,
    pub column_type: ColumnType,
    pub default: Option<ColumnDefault>,
    pub nullability: Nullability,
}

impl MigrationUnit {
    pub fn new(table: Ident, column: Ident, column_type: ColumnType) -> Self {
        Self {
            table,
            column,
            column_type,
            default: None,
            nullability: Nullability::Nullable,
        }
    }

    pub fn default_value(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullability = Nullability::NotNull;
        self
    }

    pub fn label(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }

    pub(crate) fn column_def(&self) -> ColumnDef {
        let mut def = ColumnDef::new(self.column.alias());
        match self.column_type {
            ColumnType::Varchar(len) => def.string_len(len),
            ColumnType::Text => def.text(),
            ColumnType::Timestamp => def.timestamp(),
            ColumnType::TimestampTz => def.timestamp_with_time_zone(),
            ColumnType::Boolean => def.boolean(),
            ColumnType::Integer => def.integer(),
            ColumnType::BigInt => def.big_integer(),
        };
        match self.nullability {
            Nullability::Nullable => def.null(),
            Nullability::NotNull => def.not_null(),
        };
        match &self.default {
            Some(ColumnDefault::Text(v)) => {
                def.default(v.clone());
            }
            Some(ColumnDefault::Bool(v)) => {
                def.default(*v);
            }
            Some(ColumnDefault::Int(v)) => {
                def.default(*v);
            }
            Some(ColumnDefault::CurrentTimestamp) => {
                def.default(Expr::current_timestamp());
            }
            None => {}
        }
        def
    }
}
