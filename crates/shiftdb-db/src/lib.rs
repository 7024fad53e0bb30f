//! Versioned schema migration for file-backed SQLite databases.
//!
//! Declare the tables an application needs as [`ModelDescriptor`]s and hand
//! them to [`Database::create`]. Tables are created, migrated record by record
//! or dropped to match, with a whole-file backup restored on failure.

pub mod backup;
pub mod database;
pub mod migrator;
pub mod model;
pub mod record;
pub mod schema;
mod table;
pub mod value;

pub use backup::Snapshot;
pub use database::{Database, DatabaseOptions, MEMORY_DATABASE, resolve_target};
pub use migrator::{DefaultMigrator, Migrator};
pub use model::{FieldDescriptor, MigrationStrategy, MigratorFactory, ModelDescriptor};
pub use record::{Record, Row};
pub use schema::{
    DiffSummary, METADATA_TABLE, PendingMigration, SchemaDiff, SchemaManager, TableInfo,
    TableUpgrade,
};
pub use value::{Value, ValueKind, coerce};
