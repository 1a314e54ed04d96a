//! In-memory stand-ins for the database server, the bulk loader and the
//! operator prompt, plus test logging. Lets the orchestrators run in tests
//! without PostgreSQL or pgloader.

pub mod confirm;
pub mod fake_cluster;
pub mod fake_loader;
pub mod logging;

pub use confirm::ScriptedConfirm;
pub use fake_cluster::{Cell, FakeCluster, FakeTable, Row};
pub use fake_loader::FakeLoader;
