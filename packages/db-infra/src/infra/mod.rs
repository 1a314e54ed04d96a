pub mod confirm;
pub mod db;
pub mod db_errors;
pub mod loader;
