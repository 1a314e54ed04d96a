pub mod core;
pub mod diagnostics;
pub mod evolve;
pub mod executor;
pub mod import;
pub mod inspector;
pub mod report;
pub mod status;

pub use core::{
    checkpoint, orchestrate_evolution, orchestrate_import, orchestrate_status, release,
    PgSession, SchemaBackend, SchemaSession, SeaOrmBackend,
};
pub use diagnostics::migration_counters;
pub use evolve::{evolve_database, evolve_schema, EvolveOptions};
pub use executor::{Applied, StatementExecutor};
pub use import::{destination_verdict, emptiness_verdict, import_once, ImportRequest};
pub use inspector::SchemaInspector;
pub use report::{EvolutionReport, ImportOutcome, Step, StepOutcome, StepReport, Verdict};
pub use status::{inspect_status, StatusReport};
