//! Migration directory scanning.
//!
//! `scan_dir` enumerates a flat directory, classifies filenames against the
//! migration grammar, and returns migrations in execution order. File
//! contents are not read here; parsing is deferred to [`crate::parser`].

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CoreError, CoreResult};
use crate::types::{Migration, MigrationType};
use crate::version::compare_versions;

static VERSIONED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^V(\d+)__(.+)\.(cql|sql)$").unwrap());
static UNDO: Lazy<Regex> = Lazy::new(|| Regex::new(r"^U(\d+)__(.+)\.(cql|sql)$").unwrap());
static REPEATABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^R__(.+)\.(cql|sql)$").unwrap());

/// Classify a filename against the migration grammar. Returns `None` for
/// files that are not migrations.
pub fn classify_filename(filename: &str, full_path: &Path) -> Option<Migration> {
    if let Some(caps) = VERSIONED.captures(filename) {
        return Some(Migration::new(
            &caps[1],
            humanize(&caps[2]),
            MigrationType::Versioned,
            filename,
            full_path,
        ));
    }
    if let Some(caps) = UNDO.captures(filename) {
        return Some(Migration::new(
            &caps[1],
            humanize(&caps[2]),
            MigrationType::Undo,
            filename,
            full_path,
        ));
    }
    if let Some(caps) = REPEATABLE.captures(filename) {
        return Some(Migration::new(
            "R",
            humanize(&caps[1]),
            MigrationType::Repeatable,
            filename,
            full_path,
        ));
    }
    None
}

fn humanize(slug: &str) -> String {
    slug.replace('_', " ")
}

/// Enumerate `dir` non-recursively and return migrations in execution order:
/// versioned and undo first (numeric version ascending, versioned before
/// undo at the same version), then repeatables by description.
///
/// Hidden files, directories, and non-matching filenames are skipped.
/// Duplicate (type, version) pairs and duplicate repeatable descriptions are
/// rejected because they would collide on the metadata row key.
pub fn scan_dir(dir: &Path) -> CoreResult<Vec<Migration>> {
    let entries = fs::read_dir(dir).map_err(|e| CoreError::io(dir, e))?;

    let mut migrations: Vec<Migration> = Vec::new();
    let mut seen_versions: HashMap<(MigrationType, String), String> = HashMap::new();
    let mut seen_descriptions: HashMap<String, String> = HashMap::new();

    for entry in entries {
        let entry = entry.map_err(|e| CoreError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| CoreError::io(entry.path(), e))?;
        if file_type.is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        // .gitkeep, .DS_Store and friends.
        if name.starts_with('.') {
            continue;
        }

        let Some(mig) = classify_filename(&name, &entry.path()) else {
            continue;
        };

        match mig.migration_type {
            MigrationType::Repeatable => {
                if let Some(first) =
                    seen_descriptions.insert(mig.description.clone(), mig.filename.clone())
                {
                    return Err(CoreError::DuplicateDescription {
                        description: mig.description,
                        first,
                        second: mig.filename,
                    });
                }
            }
            _ => {
                let key = (mig.migration_type, mig.version.clone());
                if let Some(first) = seen_versions.insert(key, mig.filename.clone()) {
                    return Err(CoreError::DuplicateVersion {
                        version: mig.version,
                        first,
                        second: mig.filename,
                    });
                }
            }
        }

        migrations.push(mig);
    }

    migrations.sort_by(scan_order);
    Ok(migrations)
}

fn scan_order(a: &Migration, b: &Migration) -> Ordering {
    let a_rep = a.migration_type == MigrationType::Repeatable;
    let b_rep = b.migration_type == MigrationType::Repeatable;
    match (a_rep, b_rep) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => a.description.cmp(&b.description),
        (false, false) => compare_versions(&a.version, &b.version)
            .then_with(|| type_rank(a.migration_type).cmp(&type_rank(b.migration_type))),
    }
}

// Versioned sorts before undo at the same version.
fn type_rank(t: MigrationType) -> u8 {
    match t {
        MigrationType::Versioned => 0,
        MigrationType::Undo => 1,
        MigrationType::Repeatable => 2,
    }
}

/// Next free version number: `1 + max` over versioned and undo filenames in
/// `dir`, or 1 when the directory is empty or missing.
pub fn next_version(dir: &Path) -> CoreResult<u32> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(1),
        Err(e) => return Err(CoreError::io(dir, e)),
    };

    let mut max_version = 0u32;
    for entry in entries {
        let entry = entry.map_err(|e| CoreError::io(dir, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        for pattern in [&*VERSIONED, &*UNDO] {
            if let Some(caps) = pattern.captures(&name) {
                if let Ok(v) = caps[1].parse::<u32>() {
                    max_version = max_version.max(v);
                }
            }
        }
    }

    Ok(max_version + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"-- test\n").unwrap();
    }

    #[test]
    fn classifies_the_three_filename_shapes() {
        let cases = [
            ("V001__create_users_table.cql", "001", MigrationType::Versioned, "create users table"),
            ("U001__drop_users_table.cql", "001", MigrationType::Undo, "drop users table"),
            ("R__refresh_views.cql", "R", MigrationType::Repeatable, "refresh views"),
            ("V002__add_index.sql", "002", MigrationType::Versioned, "add index"),
        ];
        for (filename, version, migration_type, description) in cases {
            let mig = classify_filename(filename, Path::new("/test").join(filename).as_path())
                .unwrap_or_else(|| panic!("{filename} should classify"));
            assert_eq!(mig.version, version, "{filename}");
            assert_eq!(mig.migration_type, migration_type, "{filename}");
            assert_eq!(mig.description, description, "{filename}");
        }
    }

    #[test]
    fn non_migration_filenames_are_rejected() {
        for name in ["readme.txt", "V__missing_version.cql", "V001_single_underscore.cql", "V001__bad_ext.txt", "X001__wrong_prefix.cql"] {
            assert!(
                classify_filename(name, Path::new(name)).is_none(),
                "{name} should not classify"
            );
        }
    }

    #[test]
    fn scan_orders_versioned_then_undo_then_repeatable() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "R__c.cql");
        touch(tmp.path(), "V002__b.cql");
        touch(tmp.path(), "U001__a_down.cql");
        touch(tmp.path(), "V001__a.cql");
        touch(tmp.path(), "R__a.cql");
        touch(tmp.path(), "V010__j.cql");
        touch(tmp.path(), "V009__i.cql");

        let migs = scan_dir(tmp.path()).unwrap();
        let order: Vec<(&str, MigrationType)> = migs
            .iter()
            .map(|m| (m.version.as_str(), m.migration_type))
            .collect();
        assert_eq!(
            order,
            vec![
                ("001", MigrationType::Versioned),
                ("001", MigrationType::Undo),
                ("002", MigrationType::Versioned),
                ("009", MigrationType::Versioned),
                ("010", MigrationType::Versioned),
                ("R", MigrationType::Repeatable),
                ("R", MigrationType::Repeatable),
            ]
        );
        // Repeatables sort by description.
        assert_eq!(migs[5].description, "a");
        assert_eq!(migs[6].description, "c");
    }

    #[test]
    fn scan_skips_hidden_files_directories_and_strays() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "V001__real.cql");
        touch(tmp.path(), ".gitkeep");
        touch(tmp.path(), "notes.md");
        fs::create_dir(tmp.path().join("V002__subdir.cql")).unwrap();

        let migs = scan_dir(tmp.path()).unwrap();
        assert_eq!(migs.len(), 1);
        assert_eq!(migs[0].filename, "V001__real.cql");
    }

    #[test]
    fn scan_of_empty_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(scan_dir(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn scan_of_missing_dir_is_an_io_error() {
        let err = scan_dir(Path::new("/nonexistent/migrations")).unwrap_err();
        assert!(matches!(err, CoreError::Io { .. }));
    }

    #[test]
    fn duplicate_versions_are_rejected() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "V001__one.cql");
        touch(tmp.path(), "V001__other.sql");
        let err = scan_dir(tmp.path()).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateVersion { ref version, .. } if version == "001"));
    }

    #[test]
    fn same_version_for_versioned_and_undo_is_fine() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "V001__up.cql");
        touch(tmp.path(), "U001__down.cql");
        assert_eq!(scan_dir(tmp.path()).unwrap().len(), 2);
    }

    #[test]
    fn duplicate_repeatable_descriptions_are_rejected() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "R__refresh.cql");
        touch(tmp.path(), "R__refresh.sql");
        let err = scan_dir(tmp.path()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::DuplicateDescription { ref description, .. } if description == "refresh"
        ));
    }

    #[test]
    fn next_version_counts_versioned_and_undo_files() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(next_version(tmp.path()).unwrap(), 1);

        touch(tmp.path(), "V001__first.cql");
        touch(tmp.path(), "V003__third.cql");
        assert_eq!(next_version(tmp.path()).unwrap(), 4);

        touch(tmp.path(), "U005__orphan_undo.cql");
        assert_eq!(next_version(tmp.path()).unwrap(), 6);

        // Repeatables carry no version.
        touch(tmp.path(), "R__views.cql");
        assert_eq!(next_version(tmp.path()).unwrap(), 6);
    }

    #[test]
    fn next_version_of_missing_dir_is_one() {
        assert_eq!(next_version(Path::new("/nonexistent/migrations")).unwrap(), 1);
    }
}
