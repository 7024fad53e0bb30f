use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use shiftdb_common::{Error, Result};
use tracing::debug;

use crate::model::ModelDescriptor;
use crate::value::{format_timestamp, parse_timestamp};

/// Reserved table holding one row per managed table.
pub const METADATA_TABLE: &str = "_TableMetaData";

const CREATE_METADATA_SQL: &str = "CREATE TABLE IF NOT EXISTS \"_TableMetaData\" (
    \"table\" TEXT PRIMARY KEY,
    \"version\" INTEGER NOT NULL,
    \"created\" TEXT NOT NULL,
    \"modified\" TEXT NOT NULL
)";

/// A row of the metadata table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub table: String,
    pub version: u32,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// A declared model whose stored table is older than its declaration.
#[derive(Debug, Clone)]
pub struct PendingMigration<'m> {
    pub model: &'m ModelDescriptor,
    pub from_version: u32,
}

/// What one `create` call has to do, computed before anything is written.
#[derive(Debug, Clone, Default)]
pub struct SchemaDiff<'m> {
    pub to_create: Vec<&'m ModelDescriptor>,
    pub to_migrate: Vec<PendingMigration<'m>>,
    pub to_remove: Vec<String>,
}

impl SchemaDiff<'_> {
    pub fn has_changes(&self) -> bool {
        !(self.to_create.is_empty() && self.to_migrate.is_empty() && self.to_remove.is_empty())
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            create: self
                .to_create
                .iter()
                .map(|m| m.table().to_string())
                .collect(),
            migrate: self
                .to_migrate
                .iter()
                .map(|p| TableUpgrade {
                    table: p.model.table().to_string(),
                    from: p.from_version,
                    to: p.model.declared_version(),
                })
                .collect(),
            remove: self.to_remove.clone(),
        }
    }
}

/// Owned, serializable view of a [`SchemaDiff`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub create: Vec<String>,
    pub migrate: Vec<TableUpgrade>,
    pub remove: Vec<String>,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.migrate.is_empty() && self.remove.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableUpgrade {
    pub table: String,
    pub from: u32,
    pub to: u32,
}

/// Reads and maintains the metadata table of one database.
pub struct SchemaManager<'c> {
    conn: &'c Connection,
}

impl<'c> SchemaManager<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn ensure_metadata_table(&self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_METADATA_SQL)
            .map_err(|e| Error::Database(format!("failed to create metadata table: {e}")))
    }

    fn metadata_table_exists(&self) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
                params![METADATA_TABLE],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to check metadata table: {e}")))
    }

    /// All tracked tables, ordered by name. Empty when the metadata table has
    /// not been created yet.
    pub fn tables(&self) -> Result<Vec<TableInfo>> {
        if !self.metadata_table_exists()? {
            return Ok(Vec::new());
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT \"table\", \"version\", \"created\", \"modified\"
                 FROM \"_TableMetaData\"
                 ORDER BY \"table\" ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], read_table_info)
            .map_err(|e| Error::Database(format!("failed to query metadata: {e}")))?;

        let mut tables = Vec::new();
        for row in rows {
            let raw =
                row.map_err(|e| Error::Database(format!("failed to read metadata row: {e}")))?;
            tables.push(raw.into_table_info()?);
        }
        Ok(tables)
    }

    pub fn table_info(&self, table: &str) -> Result<Option<TableInfo>> {
        if !self.metadata_table_exists()? {
            return Ok(None);
        }

        let raw = self
            .conn
            .query_row(
                "SELECT \"table\", \"version\", \"created\", \"modified\"
                 FROM \"_TableMetaData\" WHERE \"table\" = ?1",
                params![table],
                read_table_info,
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to read metadata for {table}: {e}")))?;

        raw.map(RawTableInfo::into_table_info).transpose()
    }

    /// Sort the declared models into tables to create, migrate and remove.
    ///
    /// Never writes. Fails with `VersionConflict` when a stored table is newer
    /// than its declaration and with `Usage` when the declarations are
    /// malformed or name the same table twice.
    pub fn compute_diff<'m>(&self, models: &'m [ModelDescriptor]) -> Result<SchemaDiff<'m>> {
        let mut declared = HashSet::new();
        for model in models {
            model.validate()?;
            if !declared.insert(model.table().to_ascii_lowercase()) {
                return Err(Error::Usage(format!(
                    "table `{}` is declared more than once",
                    model.table()
                )));
            }
        }

        // SQLite table names are case-insensitive.
        let tracked = self.tables()?;
        let stored: HashMap<String, &TableInfo> = tracked
            .iter()
            .map(|t| (t.table.to_ascii_lowercase(), t))
            .collect();

        let mut diff = SchemaDiff::default();
        for model in models {
            let declared_version = model.declared_version();
            match stored.get(&model.table().to_ascii_lowercase()) {
                None => diff.to_create.push(model),
                Some(info) if info.table != model.table() => {
                    return Err(Error::Usage(format!(
                        "table `{}` is stored as `{}`; declare it with the stored name",
                        model.table(),
                        info.table
                    )));
                }
                Some(info) if info.version < declared_version => {
                    diff.to_migrate.push(PendingMigration {
                        model,
                        from_version: info.version,
                    });
                }
                Some(info) if info.version > declared_version => {
                    return Err(Error::VersionConflict {
                        table: model.table().to_string(),
                        stored: info.version,
                        declared: declared_version,
                    });
                }
                Some(_) => {}
            }
        }

        diff.to_remove = tracked
            .iter()
            .filter(|t| !declared.contains(&t.table.to_ascii_lowercase()))
            .map(|t| t.table.clone())
            .collect();

        debug!(
            "schema diff: {} to create, {} to migrate, {} to remove",
            diff.to_create.len(),
            diff.to_migrate.len(),
            diff.to_remove.len()
        );
        Ok(diff)
    }

    /// Record that `model`'s table now exists at its declared version.
    pub fn record_applied(&self, model: &ModelDescriptor) -> Result<()> {
        let now = format_timestamp(&Utc::now());
        self.conn
            .execute(
                "INSERT INTO \"_TableMetaData\" (\"table\", \"version\", \"created\", \"modified\")
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(\"table\") DO UPDATE SET
                     \"version\" = excluded.\"version\",
                     \"modified\" = excluded.\"modified\"",
                params![model.table(), model.declared_version(), now],
            )
            .map_err(|e| {
                Error::Database(format!(
                    "failed to record metadata for {}: {e}",
                    model.table()
                ))
            })?;
        Ok(())
    }

    pub fn record_removed(&self, table: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM \"_TableMetaData\" WHERE \"table\" = ?1",
                params![table],
            )
            .map_err(|e| Error::Database(format!("failed to remove metadata for {table}: {e}")))?;
        Ok(())
    }
}

struct RawTableInfo {
    table: String,
    version: i64,
    created: String,
    modified: String,
}

impl RawTableInfo {
    fn into_table_info(self) -> Result<TableInfo> {
        let version = u32::try_from(self.version).map_err(|_| {
            Error::Database(format!(
                "metadata for {} holds invalid version {}",
                self.table, self.version
            ))
        })?;
        let created = parse_metadata_timestamp(&self.table, &self.created)?;
        let modified = parse_metadata_timestamp(&self.table, &self.modified)?;
        Ok(TableInfo {
            table: self.table,
            version,
            created,
            modified,
        })
    }
}

fn read_table_info(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTableInfo> {
    Ok(RawTableInfo {
        table: row.get(0)?,
        version: row.get(1)?,
        created: row.get(2)?,
        modified: row.get(3)?,
    })
}

fn parse_metadata_timestamp(table: &str, raw: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(raw).ok_or_else(|| {
        Error::Database(format!("metadata for {table} holds invalid timestamp `{raw}`"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldDescriptor;
    use crate::value::ValueKind;

    fn model(table: &str, version: u32) -> ModelDescriptor {
        ModelDescriptor::new(table)
            .version(version)
            .field(FieldDescriptor::id("id"))
            .field(FieldDescriptor::nullable("value", ValueKind::Text))
    }

    fn conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn diff_without_metadata_creates_everything() {
        let conn = conn();
        let schema = SchemaManager::new(&conn);
        let models = [model("a", 1), model("b", 2)];

        let diff = schema.compute_diff(&models).unwrap();
        assert!(diff.has_changes());
        assert_eq!(diff.summary().create, vec!["a", "b"]);
        assert!(diff.to_migrate.is_empty());
        assert!(diff.to_remove.is_empty());
    }

    #[test]
    fn diffing_does_not_create_the_metadata_table() {
        let conn = conn();
        let schema = SchemaManager::new(&conn);
        schema.compute_diff(&[model("a", 1)]).unwrap();
        assert!(!schema.metadata_table_exists().unwrap());
    }

    #[test]
    fn diff_sorts_models_into_create_migrate_and_remove() {
        let conn = conn();
        let schema = SchemaManager::new(&conn);
        schema.ensure_metadata_table().unwrap();
        schema.record_applied(&model("kept", 1)).unwrap();
        schema.record_applied(&model("upgraded", 1)).unwrap();
        schema.record_applied(&model("dropped", 1)).unwrap();

        let models = [model("kept", 1), model("upgraded", 3), model("fresh", 1)];
        let summary = schema.compute_diff(&models).unwrap().summary();

        assert_eq!(summary.create, vec!["fresh"]);
        assert_eq!(
            summary.migrate,
            vec![TableUpgrade {
                table: "upgraded".into(),
                from: 1,
                to: 3
            }]
        );
        assert_eq!(summary.remove, vec!["dropped"]);
    }

    #[test]
    fn unchanged_models_have_no_changes() {
        let conn = conn();
        let schema = SchemaManager::new(&conn);
        schema.ensure_metadata_table().unwrap();
        schema.record_applied(&model("a", 2)).unwrap();

        let models = [model("a", 2)];
        let diff = schema.compute_diff(&models).unwrap();
        assert!(!diff.has_changes());
        assert!(diff.summary().is_empty());
    }

    #[test]
    fn older_declaration_is_a_version_conflict() {
        let conn = conn();
        let schema = SchemaManager::new(&conn);
        schema.ensure_metadata_table().unwrap();
        schema.record_applied(&model("ModelB", 2)).unwrap();

        let err = schema.compute_diff(&[model("ModelB", 1)]).unwrap_err();
        assert!(matches!(
            err,
            Error::VersionConflict {
                stored: 2,
                declared: 1,
                ..
            }
        ));
    }

    #[test]
    fn stored_name_with_other_case_is_rejected() {
        let conn = conn();
        let schema = SchemaManager::new(&conn);
        schema.ensure_metadata_table().unwrap();
        schema.record_applied(&model("Notes", 1)).unwrap();

        let err = schema.compute_diff(&[model("notes", 2)]).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
        assert!(err.to_string().contains("stored as `Notes`"));

        let models = [model("Notes", 2)];
        let diff = schema.compute_diff(&models).unwrap();
        assert_eq!(diff.to_migrate.len(), 1);
        assert!(diff.to_remove.is_empty());
    }

    #[test]
    fn duplicate_declarations_are_rejected() {
        let conn = conn();
        let schema = SchemaManager::new(&conn);
        let err = schema
            .compute_diff(&[model("a", 1), model("A", 2)])
            .unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn record_applied_upserts_and_keeps_created() {
        let conn = conn();
        let schema = SchemaManager::new(&conn);
        schema.ensure_metadata_table().unwrap();

        schema.record_applied(&model("a", 1)).unwrap();
        let first = schema.table_info("a").unwrap().unwrap();
        assert_eq!(first.version, 1);

        schema.record_applied(&model("a", 2)).unwrap();
        let second = schema.table_info("a").unwrap().unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.created, first.created);
        assert!(second.modified >= first.modified);
        assert_eq!(schema.tables().unwrap().len(), 1);
    }

    #[test]
    fn record_removed_deletes_the_row() {
        let conn = conn();
        let schema = SchemaManager::new(&conn);
        schema.ensure_metadata_table().unwrap();
        schema.record_applied(&model("a", 1)).unwrap();

        schema.record_removed("a").unwrap();
        assert!(schema.table_info("a").unwrap().is_none());
        assert!(schema.tables().unwrap().is_empty());
    }
}
