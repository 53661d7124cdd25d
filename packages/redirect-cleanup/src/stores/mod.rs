//! Storage backends.
//!
//! Available backends:
//! - `MemoryKvStore`, `MemoryContentStore`, `MemoryRuleSource` - in-memory (always available)
//! - `FileKvStore` - single JSON file (always available)
//! - `PostgresKvStore` - PostgreSQL (requires `postgres` feature)

pub mod file;
pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use file::FileKvStore;
pub use memory::{MemoryContentStore, MemoryKvStore, MemoryRuleSource};

#[cfg(feature = "postgres")]
pub use postgres::PostgresKvStore;
