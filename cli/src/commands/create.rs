//! `cqlshift create`: scaffold new migration files.

use std::path::PathBuf;

use anyhow::Context;
use chrono::Local;
use tracing::info;

use cqlshift_core::next_version;

use crate::config::Config;

pub fn run(
    config: Config,
    name: &str,
    with_undo: bool,
    repeatable: bool,
) -> anyhow::Result<()> {
    let migrations_dir = &config.migrations_dir;
    std::fs::create_dir_all(migrations_dir).context("failed to create migrations directory")?;

    let sanitized = sanitize_name(name);
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let mut files: Vec<PathBuf> = Vec::new();

    if repeatable {
        let filename = format!("R__{sanitized}.cql");
        let path = migrations_dir.join(&filename);
        let content = format!(
            "-- Repeatable Migration: {name}\n\
             -- Created: {timestamp}\n\
             --\n\
             -- This migration runs every time its content changes.\n\
             -- Write idempotent CQL statements below.\n\n"
        );
        std::fs::write(&path, content)
            .with_context(|| format!("failed to create {}", path.display()))?;
        files.push(path);
    } else {
        let version = next_version(migrations_dir)?;

        let filename = format!("V{version:03}__{sanitized}.cql");
        let path = migrations_dir.join(&filename);
        let content = format!(
            "-- Migration: {name}\n\
             -- Version: {version:03}\n\
             -- Created: {timestamp}\n\n"
        );
        std::fs::write(&path, content)
            .with_context(|| format!("failed to create {}", path.display()))?;
        files.push(path);

        if with_undo {
            let undo_filename = format!("U{version:03}__{sanitized}.cql");
            let undo_path = migrations_dir.join(&undo_filename);
            let undo_content = format!(
                "-- Undo Migration: {name}\n\
                 -- Version: {version:03}\n\
                 -- Created: {timestamp}\n\
                 --\n\
                 -- This script reverses the changes made by V{version:03}__{sanitized}.cql\n\n"
            );
            std::fs::write(&undo_path, undo_content)
                .with_context(|| format!("failed to create {}", undo_path.display()))?;
            files.push(undo_path);
        }
    }

    for file in &files {
        info!(file = %file.display(), "created migration file");
    }

    Ok(())
}

/// Lowercase, spaces and dashes to underscores, everything else
/// non-alphanumeric dropped.
fn sanitize_name(name: &str) -> String {
    name.to_lowercase()
        .replace([' ', '-'], "_")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}
