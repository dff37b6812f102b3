//! SQLite persistence: schema plus a store implementing every repository
//! contract. Embedders with their own storage implement the `repo` traits
//! directly and skip this module.

mod schema;
mod sqlite;

pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use sqlite::SqliteStore;
