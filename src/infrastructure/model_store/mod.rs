//! Model blob stores.
//!
//! - `FileModelStore`: one JSON file per model name, written atomically
//! - `SqliteModelStore`: `models` table keyed by name
//! - `InMemoryModelStore`: process-local, for tests and dry runs

mod file;
mod in_memory;
mod sqlite;

pub use file::FileModelStore;
pub use in_memory::InMemoryModelStore;
pub use sqlite::SqliteModelStore;
