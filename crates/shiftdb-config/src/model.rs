use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use shiftdb_common::{Error, Result};
use shiftdb_db::{FieldDescriptor, ModelDescriptor, ValueKind};

/// Contents of a model file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database file. Relative paths are resolved against the directory of
    /// the model file by [`crate::ConfigLoader::load`].
    #[serde(default)]
    pub database: Option<PathBuf>,

    #[serde(default)]
    pub log_sql: bool,

    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

impl AppConfig {
    /// Descriptors for every declared model, in declaration order.
    pub fn descriptors(&self) -> Result<Vec<ModelDescriptor>> {
        self.models.iter().map(ModelConfig::to_descriptor).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub table: String,

    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

fn default_version() -> u32 {
    1
}

impl ModelConfig {
    pub fn to_descriptor(&self) -> Result<ModelDescriptor> {
        let descriptor = ModelDescriptor::new(&self.table)
            .version(self.version)
            .fields(self.fields.iter().map(FieldConfig::to_descriptor));
        descriptor
            .validate()
            .map_err(|e| Error::Config(format!("model `{}`: {e}", self.table)))?;
        Ok(descriptor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: ValueKind,

    #[serde(default)]
    pub nullable: bool,

    #[serde(default)]
    pub primary_key: bool,
}

impl FieldConfig {
    pub fn to_descriptor(&self) -> FieldDescriptor {
        FieldDescriptor {
            name: self.name.clone(),
            kind: self.kind,
            nullable: self.nullable,
            primary_key: self.primary_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, kind: ValueKind) -> FieldConfig {
        FieldConfig {
            name: name.into(),
            kind,
            nullable: false,
            primary_key: false,
        }
    }

    #[test]
    fn model_config_builds_descriptor() {
        let config = ModelConfig {
            table: "notes".into(),
            version: 3,
            fields: vec![
                FieldConfig {
                    primary_key: true,
                    ..field("id", ValueKind::Integer)
                },
                FieldConfig {
                    nullable: true,
                    ..field("body", ValueKind::Text)
                },
            ],
        };

        let descriptor = config.to_descriptor().unwrap();
        assert_eq!(descriptor.table(), "notes");
        assert_eq!(descriptor.declared_version(), 3);
        assert_eq!(descriptor.field_list().len(), 2);
        assert!(descriptor.find_field("id").unwrap().primary_key);
        assert!(descriptor.find_field("body").unwrap().nullable);
    }

    #[test]
    fn invalid_model_is_a_config_error() {
        let config = ModelConfig {
            table: "dup".into(),
            version: 1,
            fields: vec![field("a", ValueKind::Text), field("a", ValueKind::Text)],
        };
        assert!(matches!(config.to_descriptor(), Err(Error::Config(_))));
    }
}
