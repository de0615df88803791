//! Storage implementations for the orchestration engine.
//!
//! Available backends:
//! - `MemoryStore` - In-memory storage with failure injection, for tests
//! - `SqliteStore` - SQLite file-based storage (requires `sqlite` feature)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
