//! SQLite persistence for the workflow engine.

pub mod pool;
pub mod workflow;

pub use pool::{default_database_url, DatabasePool, PoolSettings};
pub use workflow::SqliteWorkflowStore;
