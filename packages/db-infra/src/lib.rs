//! Runtime side of the database migrations: configuration, sessions, the
//! schema inspector and statement executor, the external loader, and the
//! import and evolution orchestrators. Used by the migration CLI.

pub mod config;
pub mod error;
pub mod infra;

pub use config::db;
pub use error::{DbInfraError, FailureKind};
pub use infra::confirm::{is_affirmative, Confirm, Preset, TerminalConfirm};
pub use infra::db::{
    orchestrate_evolution, orchestrate_import, orchestrate_status, EvolutionReport,
    EvolveOptions, ImportOutcome, StatusReport, Step, StepOutcome, Verdict,
};
pub use infra::loader::{BulkLoader, LoaderOutput, PgLoader};
