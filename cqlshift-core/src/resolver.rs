//! Diffing scanned migrations against applied records.

use std::collections::HashMap;

use crate::error::CoreResult;
use crate::parser::parse_migration;
use crate::types::{AppliedMigration, Migration, MigrationType};
use crate::version::compare_versions;

/// Resolves the pending set, validates checksums, and locates undo partners
/// for a scanned migration list.
pub struct Resolver {
    migrations: Vec<Migration>,
}

impl Resolver {
    pub fn new(migrations: Vec<Migration>) -> Self {
        Self { migrations }
    }

    /// The scanned migrations, in scanner order.
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Compute the pending set in scanner order.
    ///
    /// Versioned migrations are pending when no successful applied row
    /// exists for their version. Repeatables are always parsed and are
    /// pending when absent or when their checksum differs from the recorded
    /// one. Undo migrations are never pending.
    pub fn get_pending(&mut self, applied: &[AppliedMigration]) -> CoreResult<Vec<Migration>> {
        let applied_map = applied_map(applied);

        let mut pending = Vec::new();
        for mig in &mut self.migrations {
            match mig.migration_type {
                MigrationType::Versioned => {
                    if !applied_map.contains_key(mig.version.as_str()) {
                        parse_migration(mig)?;
                        pending.push(mig.clone());
                    }
                }
                MigrationType::Repeatable => {
                    parse_migration(mig)?;
                    let key = mig.effective_version();
                    match applied_map.get(key.as_str()) {
                        None => pending.push(mig.clone()),
                        Some(row) if row.checksum != mig.checksum => pending.push(mig.clone()),
                        Some(_) => {}
                    }
                }
                MigrationType::Undo => {}
            }
        }

        Ok(pending)
    }

    /// Check that every successfully applied versioned migration still has a
    /// file on disk with an unchanged checksum. Returns human-readable error
    /// strings; empty means clean. Repeatables are exempt since their
    /// content is expected to change.
    pub fn validate_applied_checksums(&mut self, applied: &[AppliedMigration]) -> Vec<String> {
        let mut by_version: HashMap<String, usize> = HashMap::new();
        for (i, mig) in self.migrations.iter().enumerate() {
            if mig.migration_type == MigrationType::Versioned {
                by_version.insert(mig.version.clone(), i);
            }
        }

        let mut errors = Vec::new();
        for row in applied {
            if !row.success || row.migration_type != "versioned" {
                continue;
            }

            let Some(&idx) = by_version.get(row.version.as_str()) else {
                errors.push(format!(
                    "applied migration V{} ({}) has no corresponding file",
                    row.version, row.description
                ));
                continue;
            };

            let mig = &mut self.migrations[idx];
            if let Err(e) = parse_migration(mig) {
                errors.push(format!(
                    "failed to parse V{} ({}): {}",
                    row.version, row.description, e
                ));
                continue;
            }

            if mig.checksum != row.checksum {
                errors.push(format!(
                    "checksum mismatch for V{} ({}): recorded={}, current={}",
                    row.version, row.description, row.checksum, mig.checksum
                ));
            }
        }

        errors
    }

    /// The undo migration matching `version`, if one exists on disk.
    pub fn get_undo(&self, version: &str) -> Option<Migration> {
        self.migrations
            .iter()
            .find(|m| m.migration_type == MigrationType::Undo && m.version == version)
            .cloned()
    }

    /// Keep every repeatable plus the versioned/undo migrations whose
    /// version compares at or below `target`.
    pub fn filter_up_to_target(migrations: Vec<Migration>, target: &str) -> Vec<Migration> {
        migrations
            .into_iter()
            .filter(|m| {
                m.migration_type == MigrationType::Repeatable
                    || compare_versions(&m.version, target) != std::cmp::Ordering::Greater
            })
            .collect()
    }
}

/// Successful applied rows keyed by effective version. Undo rows never make
/// it into the map.
fn applied_map(applied: &[AppliedMigration]) -> HashMap<&str, &AppliedMigration> {
    applied
        .iter()
        .filter(|a| a.success && a.migration_type != "undo")
        .map(|a| (a.version.as_str(), a))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn applied_row(version: &str, migration_type: &str, checksum: &str, success: bool) -> AppliedMigration {
        AppliedMigration {
            version: version.to_string(),
            description: "test".to_string(),
            migration_type: migration_type.to_string(),
            script: String::new(),
            checksum: checksum.to_string(),
            applied_by: "host".to_string(),
            applied_at: Utc::now(),
            execution_time_ms: 1,
            success,
        }
    }

    fn sample_dir() -> TempDir {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "V001__a.cql", "CREATE TABLE a (id UUID PRIMARY KEY);");
        write(tmp.path(), "V002__b.cql", "CREATE TABLE b (id UUID PRIMARY KEY);");
        write(tmp.path(), "R__c.cql", "CREATE TABLE IF NOT EXISTS c (id UUID PRIMARY KEY);");
        tmp
    }

    fn resolver_for(dir: &TempDir) -> Resolver {
        Resolver::new(crate::scanner::scan_dir(dir.path()).unwrap())
    }

    #[test]
    fn everything_is_pending_with_no_applied_rows() {
        let tmp = sample_dir();
        let mut resolver = resolver_for(&tmp);
        let pending = resolver.get_pending(&[]).unwrap();
        let versions: Vec<&str> = pending.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(versions, vec!["001", "002", "R"]);
        assert!(pending.iter().all(|m| m.is_parsed()));
    }

    #[test]
    fn applied_versioned_rows_are_excluded() {
        let tmp = sample_dir();
        let mut resolver = resolver_for(&tmp);

        let checksum = crate::checksum::checksum_bytes(
            fs::read(tmp.path().join("V001__a.cql")).unwrap().as_slice(),
        );
        let applied = vec![applied_row("001", "versioned", &checksum, true)];
        let pending = resolver.get_pending(&applied).unwrap();
        let versions: Vec<&str> = pending.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(versions, vec!["002", "R"]);
    }

    #[test]
    fn failed_rows_do_not_count_as_applied() {
        let tmp = sample_dir();
        let mut resolver = resolver_for(&tmp);
        let applied = vec![applied_row("001", "versioned", "whatever", false)];
        let pending = resolver.get_pending(&applied).unwrap();
        assert_eq!(pending.len(), 3);
    }

    #[test]
    fn unchanged_repeatable_is_not_pending() {
        let tmp = sample_dir();
        let mut resolver = resolver_for(&tmp);

        let checksum = crate::checksum::checksum_bytes(
            fs::read(tmp.path().join("R__c.cql")).unwrap().as_slice(),
        );
        let mut row = applied_row("R_c", "repeatable", &checksum, true);
        row.description = "c".to_string();

        let applied = vec![
            applied_row("001", "versioned", "x", true),
            applied_row("002", "versioned", "y", true),
            row,
        ];
        let pending = resolver.get_pending(&applied).unwrap();
        assert!(pending.is_empty());
    }

    #[test]
    fn edited_repeatable_becomes_pending_again() {
        let tmp = sample_dir();
        let applied = vec![
            applied_row("001", "versioned", "x", true),
            applied_row("002", "versioned", "y", true),
            applied_row("R_c", "repeatable", "stale-checksum", true),
        ];
        let mut resolver = resolver_for(&tmp);
        let pending = resolver.get_pending(&applied).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].version, "R");
        assert_eq!(pending[0].description, "c");
    }

    #[test]
    fn undo_files_are_never_pending() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "V001__create.cql", "CREATE TABLE t (id UUID PRIMARY KEY);");
        write(tmp.path(), "U001__drop.cql", "DROP TABLE t;");
        let mut resolver = resolver_for(&tmp);
        let pending = resolver.get_pending(&[]).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].migration_type, MigrationType::Versioned);
    }

    #[test]
    fn checksum_validation_flags_edited_files() {
        let tmp = sample_dir();
        let mut resolver = resolver_for(&tmp);
        let applied = vec![applied_row("001", "versioned", "0000recorded", true)];

        let errors = resolver.validate_applied_checksums(&applied);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("checksum mismatch for V001"));
        assert!(errors[0].contains("recorded=0000recorded"));
    }

    #[test]
    fn checksum_validation_passes_on_clean_files() {
        let tmp = sample_dir();
        let mut resolver = resolver_for(&tmp);
        let checksum = crate::checksum::checksum_bytes(
            fs::read(tmp.path().join("V001__a.cql")).unwrap().as_slice(),
        );
        let applied = vec![applied_row("001", "versioned", &checksum, true)];
        assert!(resolver.validate_applied_checksums(&applied).is_empty());
    }

    #[test]
    fn checksum_validation_reports_missing_files() {
        let tmp = sample_dir();
        let mut resolver = resolver_for(&tmp);
        let applied = vec![applied_row("042", "versioned", "abc", true)];
        let errors = resolver.validate_applied_checksums(&applied);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("applied migration V042"));
        assert!(errors[0].contains("has no corresponding file"));
    }

    #[test]
    fn checksum_validation_ignores_failed_and_repeatable_rows() {
        let tmp = sample_dir();
        let mut resolver = resolver_for(&tmp);
        let applied = vec![
            applied_row("099", "versioned", "abc", false),
            applied_row("R_c", "repeatable", "changed-is-fine", true),
        ];
        assert!(resolver.validate_applied_checksums(&applied).is_empty());
    }

    #[test]
    fn undo_lookup_by_version() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "V001__create.cql", "CREATE TABLE t (id UUID PRIMARY KEY);");
        write(tmp.path(), "U001__drop.cql", "DROP TABLE t;");
        let resolver = resolver_for(&tmp);

        let undo = resolver.get_undo("001").unwrap();
        assert_eq!(undo.migration_type, MigrationType::Undo);
        assert_eq!(undo.filename, "U001__drop.cql");
        assert!(resolver.get_undo("999").is_none());
    }

    #[test]
    fn filter_keeps_repeatables_and_versions_up_to_target() {
        let migs = vec![
            Migration::new("001", "a", MigrationType::Versioned, "V001__a.cql", "/x/V001__a.cql"),
            Migration::new("002", "b", MigrationType::Versioned, "V002__b.cql", "/x/V002__b.cql"),
            Migration::new("003", "c", MigrationType::Versioned, "V003__c.cql", "/x/V003__c.cql"),
            Migration::new("R", "d", MigrationType::Repeatable, "R__d.cql", "/x/R__d.cql"),
        ];
        let filtered = Resolver::filter_up_to_target(migs, "002");
        let versions: Vec<&str> = filtered.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(versions, vec!["001", "002", "R"]);
    }
}
