//! Declarative side of the database migrations: validated identifiers,
//! migration units, the statement model and the concrete plans. Nothing in
//! this crate talks to a database.

pub mod change;
pub mod foreign_key;
pub mod forum;
pub mod ident;
pub mod plan;
pub mod unit;

pub use change::{Backfill, BackfillColumn, SchemaChange};
pub use foreign_key::{FkAction, ForeignKeyDescriptor};
pub use forum::{forum_consolidation, DEFAULT_AVATAR};
pub use ident::{quote_ident, Ident, IdentError};
pub use plan::{EvolutionPlan, LegacySource};
pub use sea_orm_migration::sea_orm::{DatabaseBackend, Statement};
pub use unit::{ColumnDefault, ColumnType, MigrationUnit, Nullability};
