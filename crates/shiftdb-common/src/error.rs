use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The API was used in a way it does not support: a second `create`,
    /// an in-memory target, `open` before `create`, or a malformed model.
    #[error("usage error: {0}")]
    Usage(String),

    /// The stored table is newer than the declared model. Raised while
    /// diffing, before anything is written.
    #[error(
        "version conflict on table `{table}`: stored version {stored} is newer than declared version {declared}"
    )]
    VersionConflict {
        table: String,
        stored: u32,
        declared: u32,
    },

    /// Applying the schema changes failed; the database file was rolled back.
    #[error("migration failed: {0}")]
    Migration(String),

    #[error("cannot convert value: {0}")]
    Coercion(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the database file may have been touched before this error was
    /// raised. Usage and version errors are detected before any write.
    pub fn is_rolled_back(&self) -> bool {
        matches!(self, Error::Migration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn error_display_includes_context() {
        let e = Error::Usage("create called twice".into());
        assert_eq!(e.to_string(), "usage error: create called twice");

        let e = Error::Migration("table `notes`: boom".into());
        assert_eq!(e.to_string(), "migration failed: table `notes`: boom");

        let e = Error::Coercion("text `abc` is not an integer".into());
        assert_eq!(e.to_string(), "cannot convert value: text `abc` is not an integer");
    }

    #[test]
    fn version_conflict_names_both_versions() {
        let e = Error::VersionConflict {
            table: "ModelB".into(),
            stored: 2,
            declared: 1,
        };
        assert_eq!(
            e.to_string(),
            "version conflict on table `ModelB`: stored version 2 is newer than declared version 1"
        );
        assert!(!e.is_rolled_back());
        assert!(Error::Migration("x".into()).is_rolled_back());
    }
}
