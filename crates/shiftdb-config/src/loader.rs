use std::path::Path;

use shiftdb_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

/// Model file formats, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "yml" | "yaml" => Ok(ConfigFormat::Yaml),
            "toml" => Ok(ConfigFormat::Toml),
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Read a model file. A relative `database` path is resolved against the
    /// file's directory.
    pub fn load(path: &Path) -> Result<AppConfig> {
        let format = ConfigFormat::from_path(path)?;
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let mut config = Self::parse(&contents, format)?;
        config.database = config.database.take().map(|database| match path.parent() {
            Some(dir) if database.is_relative() => dir.join(database),
            _ => database,
        });

        info!(
            "loaded {} model(s) from {}",
            config.models.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn parse(contents: &str, format: ConfigFormat) -> Result<AppConfig> {
        debug!("parsing {format:?} model file");
        match format {
            ConfigFormat::Yaml => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            ConfigFormat::Toml => {
                toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
            }
        }
    }
}
