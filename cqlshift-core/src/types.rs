//! Migration value types.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three migration kinds, dispatched on everywhere by tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationType {
    Versioned,
    Undo,
    Repeatable,
}

impl MigrationType {
    /// The literal stored in the `type` column of `schema_migrations`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationType::Versioned => "versioned",
            MigrationType::Undo => "undo",
            MigrationType::Repeatable => "repeatable",
        }
    }
}

impl fmt::Display for MigrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A migration script discovered on disk.
///
/// `scan_dir` fills only the identity fields; `parse_migration` reads the
/// file and fills `raw_content`, `checksum`, and `statements`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Digit token from the filename, leading zeros preserved. `"R"` for
    /// repeatables.
    pub version: String,
    /// Filename slug with underscores replaced by spaces.
    pub description: String,
    pub migration_type: MigrationType,
    pub filename: String,
    pub file_path: PathBuf,
    /// File content with the UTF-8 BOM stripped and CRLF normalized to LF.
    /// Empty until parsed.
    pub raw_content: String,
    /// Lowercase hex SHA-256 of `raw_content`. Empty until parsed.
    pub checksum: String,
    /// Trimmed statements with comments removed. Empty until parsed.
    pub statements: Vec<String>,
}

impl Migration {
    pub fn new(
        version: impl Into<String>,
        description: impl Into<String>,
        migration_type: MigrationType,
        filename: impl Into<String>,
        file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            version: version.into(),
            description: description.into(),
            migration_type,
            filename: filename.into(),
            file_path: file_path.into(),
            raw_content: String::new(),
            checksum: String::new(),
            statements: Vec::new(),
        }
    }

    /// The primary key used for this migration's `schema_migrations` row:
    /// the digit token for versioned/undo, `R_<description>` for repeatables.
    pub fn effective_version(&self) -> String {
        match self.migration_type {
            MigrationType::Repeatable => format!("{}_{}", self.version, self.description),
            _ => self.version.clone(),
        }
    }

    /// Whether `parse_migration` has run on this instance.
    pub fn is_parsed(&self) -> bool {
        !self.checksum.is_empty()
    }
}

/// A row of the `schema_migrations` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    /// Effective version key (see [`Migration::effective_version`]).
    pub version: String,
    pub description: String,
    /// `"versioned"`, `"undo"`, or `"repeatable"` as stored in the row.
    pub migration_type: String,
    /// Source filename recorded at apply time.
    pub script: String,
    pub checksum: String,
    pub applied_by: String,
    pub applied_at: DateTime<Utc>,
    pub execution_time_ms: i32,
    pub success: bool,
}
