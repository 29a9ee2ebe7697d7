//! Error types for the migration model.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Error produced while scanning, reading, or parsing migration files.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A file or directory could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration script could not be split into statements.
    #[error("failed to parse CQL statements in {file}: {message}")]
    Parse { file: String, message: String },

    /// Two files in the directory claim the same (type, version) slot.
    #[error("duplicate migration version {version}: {first} and {second}")]
    DuplicateVersion {
        version: String,
        first: String,
        second: String,
    },

    /// Two repeatable files share a description, which would collide on the
    /// `R_<description>` metadata row key.
    #[error("duplicate repeatable migration description '{description}': {first} and {second}")]
    DuplicateDescription {
        description: String,
        first: String,
        second: String,
    },
}

impl CoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
