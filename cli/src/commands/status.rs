//! `cqlshift status`: one row per scanned migration.

use std::collections::HashMap;

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;

use cqlshift_core::{parse_migration, scan_dir, AppliedMigration, MigrationType};

use crate::config::Config;
use crate::context::ExecutionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusFormat {
    Table,
    Json,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct StatusEntry {
    version: String,
    description: String,
    #[serde(rename = "type")]
    migration_type: String,
    status: String,
    applied_at: String,
    checksum_match: String,
}

pub async fn run(config: Config, format: StatusFormat) -> anyhow::Result<()> {
    let mut ctx = ExecutionContext::new(config, false).await?;
    let result = status(&mut ctx, format).await;
    ctx.close().await;
    result
}

async fn status(ctx: &mut ExecutionContext, format: StatusFormat) -> anyhow::Result<()> {
    let mut scanned = scan_dir(&ctx.config.migrations_dir)?;
    let applied = ctx.metadata.get_applied(&mut ctx.session).await?;

    // Checksums come from the files; a file that no longer parses just
    // shows up without one.
    for mig in &mut scanned {
        let _ = parse_migration(mig);
    }

    let entries = build_entries(&scanned, &applied);
    let applied_count = entries.iter().filter(|e| e.status == "Applied").count();
    let pending_count = entries.iter().filter(|e| e.status == "Pending").count();

    match format {
        StatusFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        StatusFormat::Table => {
            print_table(&entries);
            println!(
                "\nTotal: {} | Applied: {} | Pending: {}",
                entries.len(),
                applied_count,
                pending_count
            );
        }
    }

    Ok(())
}

fn build_entries(
    scanned: &[cqlshift_core::Migration],
    applied: &[AppliedMigration],
) -> Vec<StatusEntry> {
    let applied_map: HashMap<&str, &AppliedMigration> =
        applied.iter().map(|a| (a.version.as_str(), a)).collect();

    scanned
        .iter()
        .map(|mig| {
            let key = mig.effective_version();
            match applied_map.get(key.as_str()) {
                Some(row) => StatusEntry {
                    version: mig.version.clone(),
                    description: mig.description.clone(),
                    migration_type: mig.migration_type.to_string(),
                    status: if row.success { "Applied" } else { "Failed" }.to_string(),
                    applied_at: row.applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    checksum_match: if mig.checksum == row.checksum {
                        "OK"
                    } else {
                        "MISMATCH"
                    }
                    .to_string(),
                },
                None => StatusEntry {
                    version: mig.version.clone(),
                    description: mig.description.clone(),
                    migration_type: mig.migration_type.to_string(),
                    status: if mig.migration_type == MigrationType::Undo {
                        "Available"
                    } else {
                        "Pending"
                    }
                    .to_string(),
                    applied_at: "-".to_string(),
                    checksum_match: "-".to_string(),
                },
            }
        })
        .collect()
}

fn print_table(entries: &[StatusEntry]) {
    let headers = ["VERSION", "DESCRIPTION", "TYPE", "STATUS", "APPLIED AT", "CHECKSUM"];
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for entry in entries {
        let cells = entry_cells(entry);
        for (w, cell) in widths.iter_mut().zip(cells) {
            *w = (*w).max(cell.len());
        }
    }

    let header_line: Vec<String> = headers
        .iter()
        .zip(widths.iter().copied())
        .map(|(h, w)| format!("{h:<w$}"))
        .collect();
    println!("{}", header_line.join("  ").bold());

    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    println!("{}", rule.join("  "));

    for entry in entries {
        let cells = entry_cells(entry);
        let padded: Vec<String> = cells
            .iter()
            .zip(widths.iter().copied())
            .map(|(c, w)| format!("{c:<w$}"))
            .collect();

        let status = match entry.status.as_str() {
            "Applied" => padded[3].green().to_string(),
            "Failed" => padded[3].red().to_string(),
            "Pending" => padded[3].yellow().to_string(),
            _ => padded[3].dimmed().to_string(),
        };
        let checksum = if entry.checksum_match == "MISMATCH" {
            padded[5].red().to_string()
        } else {
            padded[5].clone()
        };

        println!(
            "{}  {}  {}  {}  {}  {}",
            padded[0], padded[1], padded[2], status, padded[4], checksum
        );
    }
}

fn entry_cells(entry: &StatusEntry) -> [&str; 6] {
    [
        &entry.version,
        &entry.description,
        &entry.migration_type,
        &entry.status,
        &entry.applied_at,
        &entry.checksum_match,
    ]
}
