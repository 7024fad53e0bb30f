use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use shiftdb_common::{Error, Result};

use crate::migrator::{DefaultMigrator, Migrator};
use crate::schema::METADATA_TABLE;
use crate::value::ValueKind;

/// One column of a declared model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: ValueKind,
    pub nullable: bool,
    pub primary_key: bool,
}

impl FieldDescriptor {
    /// A required (NOT NULL) field.
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            primary_key: false,
        }
    }

    pub fn nullable(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, kind)
        }
    }

    /// An integer primary key; the store assigns one when none is supplied.
    pub fn id(name: impl Into<String>) -> Self {
        Self {
            primary_key: true,
            ..Self::new(name, ValueKind::Integer)
        }
    }

    fn column_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.kind.sql_type());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.kind == ValueKind::Integer {
                sql.push_str(" AUTOINCREMENT");
            }
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        sql
    }
}

/// Builds a fresh migrator for one table migration.
pub type MigratorFactory = Arc<dyn Fn() -> Box<dyn Migrator> + Send + Sync>;

/// How records of a model are carried over when its version changes.
#[derive(Clone, Default)]
pub enum MigrationStrategy {
    #[default]
    Default,
    Custom(MigratorFactory),
}

impl MigrationStrategy {
    /// A new migrator instance; each table migration gets its own.
    pub fn migrator(&self) -> Box<dyn Migrator> {
        match self {
            MigrationStrategy::Default => Box::new(DefaultMigrator::new()),
            MigrationStrategy::Custom(factory) => factory(),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, MigrationStrategy::Custom(_))
    }
}

impl fmt::Debug for MigrationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationStrategy::Default => f.write_str("Default"),
            MigrationStrategy::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// The resolved shape of a declared model: table name, version and fields.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    table: String,
    version: u32,
    fields: Vec<FieldDescriptor>,
    strategy: MigrationStrategy,
}

impl ModelDescriptor {
    /// A version 1 model with no fields.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            version: 1,
            fields: Vec::new(),
            strategy: MigrationStrategy::Default,
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Use `factory` instead of the default migrator when this model's table
    /// is migrated.
    pub fn with_migrator<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Migrator> + Send + Sync + 'static,
    {
        self.strategy = MigrationStrategy::Custom(Arc::new(factory));
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn declared_version(&self) -> u32 {
        self.version
    }

    pub fn field_list(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn strategy(&self) -> &MigrationStrategy {
        &self.strategy
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Reject descriptors that could never be applied. An empty field list is
    /// not rejected here; the store refuses to create such a table.
    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(Error::Usage("model table name cannot be empty".into()));
        }
        if self.table.eq_ignore_ascii_case(METADATA_TABLE) {
            return Err(Error::Usage(format!(
                "table name `{}` is reserved for schema metadata",
                self.table
            )));
        }
        if self.version == 0 {
            return Err(Error::Usage(format!(
                "model `{}` declares version 0; versions start at 1",
                self.table
            )));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(Error::Usage(format!(
                    "model `{}` has a field with an empty name",
                    self.table
                )));
            }
            if !seen.insert(field.name.to_ascii_lowercase()) {
                return Err(Error::Usage(format!(
                    "model `{}` declares field `{}` twice",
                    self.table, field.name
                )));
            }
        }

        if self.fields.iter().filter(|f| f.primary_key).count() > 1 {
            return Err(Error::Usage(format!(
                "model `{}` declares more than one primary key",
                self.table
            )));
        }
        Ok(())
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this model under
    /// `table_name`. An existing table of that name is adopted as is.
    pub fn create_table_sql(&self, table_name: &str) -> String {
        let columns: Vec<String> = self.fields.iter().map(FieldDescriptor::column_sql).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table_name),
            columns.join(", ")
        )
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
