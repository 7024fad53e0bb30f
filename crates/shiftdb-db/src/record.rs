use shiftdb_common::{Error, Result};

use crate::model::ModelDescriptor;
use crate::value::Value;

/// A row as it was read from the table being migrated, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.columns.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A record in the shape of a target model, ready to be inserted.
///
/// The column set is fixed at construction: one entry per target field, in
/// declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Vec<(String, Value)>,
}

impl Record {
    /// Every field at its zero value: `Null` for nullable fields and primary
    /// keys, the kind's zero otherwise.
    pub fn blank(model: &ModelDescriptor) -> Self {
        let columns = model
            .field_list()
            .iter()
            .map(|field| {
                let value = if field.nullable || field.primary_key {
                    Value::Null
                } else {
                    field.kind.zero()
                };
                (field.name.clone(), value)
            })
            .collect();
        Self { columns }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    /// Assign a field. Values are stored as given; coercion is the migrator's
    /// job.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        match self.columns.iter_mut().find(|(column, _)| column == name) {
            Some((_, slot)) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(Error::Usage(format!("record has no field `{name}`"))),
        }
    }

    pub(crate) fn set_at(&mut self, index: usize, value: Value) {
        if let Some((_, slot)) = self.columns.get_mut(index) {
            *slot = value;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
