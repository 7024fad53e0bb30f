use std::collections::HashMap;

use shiftdb_common::{Error, Result};

use crate::model::ModelDescriptor;
use crate::record::{Record, Row};
use crate::value::coerce;

/// Converts rows of an old table version into records of the new one.
///
/// One instance serves exactly one table migration: `begin_migration` is
/// called once, then `migrate_record` once per stored row.
pub trait Migrator: Send {
    fn begin_migration(&mut self, from_version: u32, target: &ModelDescriptor) -> Result<()>;

    fn migrate_record(&mut self, source: &Row) -> Result<Record>;
}

/// Copies every source column onto the target field of the same name,
/// converting the value to the field's kind. Columns without a matching
/// field are dropped and fields without a matching column keep their zero
/// value, which covers added fields, removed fields and compatible type
/// changes.
#[derive(Debug, Default)]
pub struct DefaultMigrator {
    target: Option<ModelDescriptor>,
    lookup: HashMap<String, usize>,
    from_version: u32,
}

impl DefaultMigrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version of the table being migrated, set by `begin_migration`.
    pub fn from_version(&self) -> u32 {
        self.from_version
    }
}

impl Migrator for DefaultMigrator {
    fn begin_migration(&mut self, from_version: u32, target: &ModelDescriptor) -> Result<()> {
        self.lookup = target
            .field_list()
            .iter()
            .enumerate()
            .map(|(index, field)| (field.name.clone(), index))
            .collect();
        self.target = Some(target.clone());
        self.from_version = from_version;
        Ok(())
    }

    fn migrate_record(&mut self, source: &Row) -> Result<Record> {
        let target = self.target.as_ref().ok_or_else(|| {
            Error::Usage("migrate_record called before begin_migration".into())
        })?;

        let mut record = Record::blank(target);
        for (name, value) in source.iter() {
            let Some(&index) = self.lookup.get(name) else {
                continue;
            };
            let field = &target.field_list()[index];

            if value.is_null() && !field.nullable && !field.primary_key {
                return Err(Error::Coercion(format!(
                    "field `{}` of `{}` is required but the stored value is null",
                    field.name,
                    target.table()
                )));
            }

            let converted = coerce(value.clone(), field.kind).map_err(|e| match e {
                Error::Coercion(msg) => Error::Coercion(format!(
                    "field `{}` of `{}`: {msg}",
                    field.name,
                    target.table()
                )),
                other => other,
            })?;
            record.set_at(index, converted);
        }
        Ok(record)
    }
}
