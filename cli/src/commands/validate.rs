//! `cqlshift validate`: verify applied checksums against the files on disk.

use anyhow::bail;
use tracing::{error, info};

use cqlshift_core::{scan_dir, Resolver};

use crate::config::Config;
use crate::context::ExecutionContext;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let mut ctx = ExecutionContext::new(config, false).await?;
    let result = validate(&mut ctx).await;
    ctx.close().await;
    result
}

async fn validate(ctx: &mut ExecutionContext) -> anyhow::Result<()> {
    let scanned = scan_dir(&ctx.config.migrations_dir)?;
    let applied = ctx.metadata.get_applied(&mut ctx.session).await?;

    let mut resolver = Resolver::new(scanned);
    let errors = resolver.validate_applied_checksums(&applied);

    if !errors.is_empty() {
        error!("validation failed:");
        for e in &errors {
            error!("  {e}");
        }
        bail!(
            "found {} validation error(s): run 'cqlshift repair --recalculate-checksums' to fix",
            errors.len()
        );
    }

    info!(checked = applied.len(), "all migration checksums are valid");
    Ok(())
}
