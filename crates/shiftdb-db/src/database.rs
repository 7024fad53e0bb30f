use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use shiftdb_common::{Error, Result};
use tracing::{debug, error, info, warn};

use crate::backup::{Snapshot, sidecar_path};
use crate::model::ModelDescriptor;
use crate::schema::{DiffSummary, SchemaDiff, SchemaManager, TableInfo};
use crate::table::{create_table, drop_table, migrate_table};

/// SQLite's name for a private in-memory database. Rejected by
/// [`Database::create`]: backup and restore work on files.
pub const MEMORY_DATABASE: &str = ":memory:";

#[derive(Debug, Clone, Default)]
pub struct DatabaseOptions {
    /// Emit every executed statement at debug level on the `shiftdb::sql`
    /// target.
    pub log_sql: bool,
}

#[derive(Debug)]
enum State {
    Uninitialized,
    Ready { path: PathBuf },
}

/// A file-backed store whose tables follow a set of declared models.
///
/// `create` brings the file in line with the models exactly once per
/// instance; afterwards `open` hands out ordinary connections.
#[derive(Debug)]
pub struct Database {
    options: DatabaseOptions,
    state: State,
}

impl Default for Database {
    fn default() -> Self {
        Self::new(DatabaseOptions::default())
    }
}

impl Database {
    pub fn new(options: DatabaseOptions) -> Self {
        Self {
            options,
            state: State::Uninitialized,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready { .. })
    }

    /// Path of the database file once `create` has succeeded.
    pub fn path(&self) -> Option<&Path> {
        match &self.state {
            State::Ready { path } => Some(path),
            State::Uninitialized => None,
        }
    }

    /// Create or upgrade the database at `target` so that it holds exactly
    /// the tables of `models`.
    ///
    /// New tables are created, tables whose declared version went up are
    /// migrated row by row and tracked tables that are no longer declared are
    /// dropped. The file is backed up first; if any step fails it is restored
    /// and the error that caused the failure is returned. When nothing changed
    /// the file is not written at all.
    pub fn create(&mut self, target: &str, models: &[ModelDescriptor]) -> Result<()> {
        if let State::Ready { path } = &self.state {
            return Err(Error::Usage(format!(
                "database already initialized at {}",
                path.display()
            )));
        }

        let path = resolve_target(target)?;
        let existed = path.exists();
        info!("initializing database at {}", path.display());
        if existed {
            checkpoint_wal(&path)?;
        }

        let diff = diff_file(&path, models)?;
        if existed && !diff.has_changes() {
            info!("schema of {} is up to date", path.display());
            self.state = State::Ready { path };
            return Ok(());
        }

        let snapshot = Snapshot::take(&path)?;
        match self.apply(&path, &diff) {
            Ok(()) => {
                if let Err(e) = snapshot.discard() {
                    warn!("migration succeeded but the backup could not be removed: {e}");
                }
                info!("database at {} is ready", path.display());
                self.state = State::Ready { path };
                Ok(())
            }
            Err(e) => {
                error!("schema update of {} failed, rolling back: {e}", path.display());
                if let Err(restore_err) = snapshot.restore() {
                    error!(
                        "UNRECOVERABLE: could not restore {} after a failed migration: {restore_err}",
                        path.display()
                    );
                }
                Err(e)
            }
        }
    }

    /// A new connection to the initialized database.
    pub fn open(&self) -> Result<Connection> {
        match &self.state {
            State::Ready { path } => open_connection(path, &self.options),
            State::Uninitialized => Err(Error::Usage(
                "database opened before create was called".into(),
            )),
        }
    }

    /// Metadata of every managed table.
    pub fn tables(&self) -> Result<Vec<TableInfo>> {
        let conn = self.open()?;
        SchemaManager::new(&conn).tables()
    }

    /// Metadata of `model`'s table, `None` when it is not managed.
    pub fn table_info(&self, model: &ModelDescriptor) -> Result<Option<TableInfo>> {
        let conn = self.open()?;
        SchemaManager::new(&conn).table_info(model.table())
    }

    /// What `create` would do for `target`, without touching it. A missing
    /// file is not created.
    pub fn plan(target: &str, models: &[ModelDescriptor]) -> Result<DiffSummary> {
        let path = resolve_target(target)?;
        Ok(diff_file(&path, models)?.summary())
    }

    /// Metadata of the tables stored at `target`, read without initializing
    /// an instance.
    pub fn stored_tables(target: &str) -> Result<Vec<TableInfo>> {
        let path = resolve_target(target)?;
        if !path.exists() {
            return Err(Error::Usage(format!("no database at {}", path.display())));
        }
        let conn = open_read_only(&path)?;
        SchemaManager::new(&conn).tables()
    }

    fn apply(&self, path: &Path, diff: &SchemaDiff<'_>) -> Result<()> {
        let conn = open_connection(path, &self.options)
            .map_err(|e| Error::Migration(e.to_string()))?;
        let result = apply_changes(&conn, diff);

        // The file is about to be copied or replaced; nothing may hold it open.
        let closed = conn
            .close()
            .map_err(|(_, e)| Error::Migration(format!("failed to close database: {e}")));
        result.and(closed)
    }
}

fn apply_changes(conn: &Connection, diff: &SchemaDiff<'_>) -> Result<()> {
    let schema = SchemaManager::new(conn);
    schema
        .ensure_metadata_table()
        .map_err(|e| Error::Migration(e.to_string()))?;

    for pending in &diff.to_migrate {
        let table = pending.model.table();
        info!(
            "migrating {table} from version {} to {}",
            pending.from_version,
            pending.model.declared_version()
        );
        let rows = migrate_table(conn, pending).map_err(|e| table_error(table, e))?;
        schema
            .record_applied(pending.model)
            .map_err(|e| table_error(table, e))?;
        debug!("migrated {rows} rows of {table}");
    }

    for table in &diff.to_remove {
        info!("removing {table}");
        drop_table(conn, table).map_err(|e| table_error(table, e))?;
        schema
            .record_removed(table)
            .map_err(|e| table_error(table, e))?;
    }

    for model in &diff.to_create {
        let table = model.table();
        info!("creating {table} at version {}", model.declared_version());
        create_table(conn, model).map_err(|e| table_error(table, e))?;
        schema
            .record_applied(model)
            .map_err(|e| table_error(table, e))?;
    }
    Ok(())
}

fn table_error(table: &str, e: Error) -> Error {
    Error::Migration(format!("table `{table}`: {e}"))
}

/// Diff `models` against the file at `path`, opening it read-only. A file
/// that does not exist yet diffs as an empty database.
fn diff_file<'m>(path: &Path, models: &'m [ModelDescriptor]) -> Result<SchemaDiff<'m>> {
    let conn = if path.exists() {
        open_read_only(path)?
    } else {
        Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?
    };

    SchemaManager::new(&conn).compute_diff(models)
}

/// Fold a leftover write-ahead log into the main file so that a whole-file
/// snapshot holds every committed row.
fn checkpoint_wal(path: &Path) -> Result<()> {
    if !sidecar_path(path, "-wal").exists() {
        return Ok(());
    }

    let conn = Connection::open(path)
        .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
        .map_err(|e| Error::Database(format!("failed to checkpoint write-ahead log: {e}")))?;
    conn.close()
        .map_err(|(_, e)| Error::Database(format!("failed to close database: {e}")))?;
    debug!("checkpointed write-ahead log of {}", path.display());
    Ok(())
}

fn open_read_only(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| Error::Database(format!("failed to open database: {e}")))
}

fn open_connection(path: &Path, options: &DatabaseOptions) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;
    if options.log_sql {
        conn.trace(Some(log_statement as fn(&str)));
    }
    Ok(conn)
}

fn log_statement(sql: &str) {
    debug!(target: "shiftdb::sql", "{sql}");
}

/// Turn a path or `file:` URI into the database file path, rejecting
/// targets that are not backed by a file.
pub fn resolve_target(target: &str) -> Result<PathBuf> {
    let target = target.trim();
    if target.is_empty() {
        return Err(Error::Usage(
            "an empty target opens a temporary database; a file path is required".into(),
        ));
    }
    if target == MEMORY_DATABASE {
        return Err(Error::Usage(
            "in-memory databases are not supported; a file path is required".into(),
        ));
    }

    let Some(uri) = target.strip_prefix("file:") else {
        return Ok(PathBuf::from(target));
    };

    let (location, query) = uri.split_once('?').unwrap_or((uri, ""));
    let in_memory = query
        .split('&')
        .any(|pair| pair.eq_ignore_ascii_case("mode=memory"));
    let location = location.strip_prefix("//").unwrap_or(location);
    if in_memory || location.is_empty() || location == MEMORY_DATABASE {
        return Err(Error::Usage(format!(
            "`{target}` is an in-memory database; a file path is required"
        )));
    }
    Ok(PathBuf::from(location))
}
