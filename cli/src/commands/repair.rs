//! `cqlshift repair`: fix migration metadata.

use std::collections::HashMap;

use anyhow::bail;
use tracing::{error, info, warn};

use cqlshift_core::{parse_migration, scan_dir, Migration, MigrationType};

use crate::config::Config;
use crate::context::ExecutionContext;

pub async fn run(
    config: Config,
    recalculate_checksums: bool,
    remove_failed: bool,
) -> anyhow::Result<()> {
    if !recalculate_checksums && !remove_failed {
        bail!("specify at least one repair action: --recalculate-checksums or --remove-failed");
    }

    let mut ctx = ExecutionContext::new(config, false).await?;
    let result = repair(&mut ctx, recalculate_checksums, remove_failed).await;
    ctx.close().await;
    result
}

async fn repair(
    ctx: &mut ExecutionContext,
    recalculate_checksums: bool,
    remove_failed: bool,
) -> anyhow::Result<()> {
    if recalculate_checksums {
        info!("recalculating checksums for applied migrations");

        let scanned = scan_dir(&ctx.config.migrations_dir)?;
        let mut files: HashMap<String, Migration> = HashMap::new();
        for mut mig in scanned {
            if mig.migration_type != MigrationType::Versioned {
                continue;
            }
            if let Err(e) = parse_migration(&mut mig) {
                warn!(file = %mig.filename, error = %e, "failed to parse, skipping");
                continue;
            }
            files.insert(mig.version.clone(), mig);
        }

        let applied = ctx.metadata.get_applied(&mut ctx.session).await?;
        let mut updated = 0;
        for row in &applied {
            if !row.success || row.migration_type != "versioned" {
                continue;
            }
            let Some(mig) = files.get(&row.version) else {
                warn!(version = %row.version, "no file found for applied migration, skipping");
                continue;
            };
            if mig.checksum != row.checksum {
                if let Err(e) = ctx
                    .metadata
                    .update_checksum(&mut ctx.session, &row.version, &mig.checksum)
                    .await
                {
                    error!(version = %row.version, error = %e, "failed to update checksum");
                    continue;
                }
                info!(
                    version = %row.version,
                    old = %row.checksum,
                    new = %mig.checksum,
                    "updated checksum"
                );
                updated += 1;
            }
        }

        info!(updated, "checksum recalculation complete");
    }

    if remove_failed {
        info!("removing failed migration records");

        let failed = ctx.metadata.get_failed(&mut ctx.session).await?;
        let mut removed = 0;
        for row in &failed {
            if let Err(e) = ctx.metadata.remove(&mut ctx.session, &row.version).await {
                error!(version = %row.version, error = %e, "failed to remove record");
                continue;
            }
            info!(
                version = %row.version,
                description = %row.description,
                "removed failed migration record"
            );
            removed += 1;
        }

        info!(removed, "failed migration cleanup complete");
    }

    Ok(())
}
