//! `cqlshift migrate`: apply pending migrations.

use std::panic::AssertUnwindSafe;

use anyhow::bail;
use futures::FutureExt;
use tracing::{error, info};

use cqlshift_core::{scan_dir, Resolver};

use crate::config::Config;
use crate::context::ExecutionContext;
use crate::executor::Executor;

pub async fn run(config: Config, target: Option<String>, dry_run: bool) -> anyhow::Result<()> {
    let mut ctx = ExecutionContext::new(config, dry_run).await?;
    let result = run_with_lock(&mut ctx, target).await;
    ctx.close().await;
    result
}

/// Take the lock (skipped for dry runs), do the work, and release in a
/// guarded finalizer. Release failures are logged but never mask the
/// primary error; panics release the lock before propagating.
async fn run_with_lock(ctx: &mut ExecutionContext, target: Option<String>) -> anyhow::Result<()> {
    if !ctx.dry_run {
        info!("acquiring migration lock");
        ctx.lock
            .acquire(&mut ctx.session, ctx.config.lock_timeout)
            .await?;
    }

    let outcome = AssertUnwindSafe(apply_pending(ctx, target)).catch_unwind().await;

    if !ctx.dry_run {
        if let Err(e) = ctx.lock.release(&mut ctx.session).await {
            error!(error = %e, "failed to release migration lock");
        }
    }

    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

async fn apply_pending(ctx: &mut ExecutionContext, target: Option<String>) -> anyhow::Result<()> {
    let scanned = scan_dir(&ctx.config.migrations_dir)?;
    if scanned.is_empty() {
        info!(dir = %ctx.config.migrations_dir.display(), "no migration files found");
        return Ok(());
    }

    let applied = ctx.metadata.get_applied(&mut ctx.session).await?;

    let mut resolver = Resolver::new(scanned);
    let checksum_errors = resolver.validate_applied_checksums(&applied);
    if !checksum_errors.is_empty() {
        error!("checksum validation failed:");
        for e in &checksum_errors {
            error!("  {e}");
        }
        bail!(
            "checksum validation failed: run 'cqlshift validate' for details or 'cqlshift repair' to fix"
        );
    }

    let mut pending = resolver.get_pending(&applied)?;
    if let Some(target) = target {
        pending = Resolver::filter_up_to_target(pending, &target);
    }

    if pending.is_empty() {
        info!("schema is up to date, no pending migrations");
        return Ok(());
    }

    let dry_run = ctx.dry_run;
    let total = pending.len();
    let mut executor = Executor::new(ctx);
    let applied_count = executor.execute_all(&pending).await?;

    if dry_run {
        info!(count = total, "dry run complete, no changes applied");
    } else {
        info!(count = applied_count, "all migrations applied successfully");
    }
    Ok(())
}
