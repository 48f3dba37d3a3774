//! Persistence for the address catalog, pingable liveness and statistics
//!
//! SQLite holds all three tables in one database file. The in-memory store
//! implements the same traits for tests and single-process dry runs.

pub mod memory;
pub mod repository;
pub mod sqlite;

use crate::config::DatabaseConfig;
use crate::error::Result;

pub use memory::MemoryStore;
pub use repository::{
    create_memory_store, create_sqlite_store, AsnRecord, CatalogRepository, CityRecord,
    PingableRepository, Repositories, ShiftOutcome, StatisticsRepository, Store,
};
pub use sqlite::SqliteStore;

/// Open the store described by the database configuration
///
/// An empty path selects the in-memory store.
pub fn open_store(config: &DatabaseConfig) -> Result<Repositories> {
    if config.sqlite_path.as_os_str().is_empty() {
        tracing::warn!("No SQLite path configured, using in-memory store");
        return Ok(Repositories::from_store(create_memory_store()));
    }

    let store = create_sqlite_store(&config.sqlite_path)?;
    Ok(Repositories::from_store(store))
}
