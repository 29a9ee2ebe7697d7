//! `cqlshift rollback`: revert applied migrations using undo scripts.
//!
//! Undo executions are deliberately not recorded in `schema_migrations`: a
//! rollback's only trace is the removal of the original versioned row.

use std::cmp::Ordering;
use std::panic::AssertUnwindSafe;

use anyhow::bail;
use colored::Colorize;
use futures::FutureExt;
use tracing::{error, info, warn};

use cqlshift_core::{compare_versions, is_ddl, parse_migration, scan_dir, AppliedMigration, Resolver};

use crate::config::Config;
use crate::context::ExecutionContext;
use crate::executor::Executor;
use crate::util::confirm;

pub async fn run(
    config: Config,
    to: Option<String>,
    steps: Option<usize>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let mut ctx = ExecutionContext::new(config, dry_run).await?;
    let result = run_with_lock(&mut ctx, to, steps).await;
    ctx.close().await;
    result
}

async fn run_with_lock(
    ctx: &mut ExecutionContext,
    to: Option<String>,
    steps: Option<usize>,
) -> anyhow::Result<()> {
    if !ctx.dry_run {
        info!("acquiring migration lock");
        ctx.lock
            .acquire(&mut ctx.session, ctx.config.lock_timeout)
            .await?;
    }

    let outcome = AssertUnwindSafe(rollback(ctx, to, steps)).catch_unwind().await;

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

async fn rollback(
    ctx: &mut ExecutionContext,
    to: Option<String>,
    steps: Option<usize>,
) -> anyhow::Result<()> {
    let applied = ctx.metadata.get_applied(&mut ctx.session).await?;
    let targets = select_rollback_targets(&applied, to.as_deref(), steps);

    if targets.is_empty() {
        info!("no migrations to rollback");
        return Ok(());
    }

    // Every target needs an undo script before anything runs.
    let scanned = scan_dir(&ctx.config.migrations_dir)?;
    let resolver = Resolver::new(scanned);

    let mut undos = Vec::with_capacity(targets.len());
    for target in &targets {
        let Some(mut undo) = resolver.get_undo(&target.version) else {
            bail!(
                "no undo migration file found for version {} ({}): expected U{}__*.cql",
                target.version,
                target.description,
                target.version
            );
        };
        parse_migration(&mut undo)?;
        undos.push(undo);
    }

    if ctx.dry_run {
        let mut executor = Executor::new(ctx);
        for undo in &undos {
            executor.execute(undo).await?;
        }
        info!(count = targets.len(), "dry run complete, no changes applied");
        return Ok(());
    }

    println!("\nAbout to rollback {} migration(s):", targets.len());
    for target in &targets {
        println!(
            "  {} {}",
            format!("V{}:", target.version).yellow(),
            target.description
        );
    }
    println!();
    if !confirm("Continue?")? {
        info!("rollback cancelled");
        return Ok(());
    }

    for (undo, target) in undos.iter().zip(&targets) {
        info!(
            version = %undo.version,
            description = %undo.description,
            "rolling back migration"
        );

        for (i, stmt) in undo.statements.iter().enumerate() {
            if let Err(e) = ctx.session.execute(stmt, &[]).await {
                bail!(
                    "rollback failed at version {}, statement {}: {}",
                    undo.version,
                    i + 1,
                    e
                );
            }
            if is_ddl(stmt) {
                // During rollback an agreement timeout is survivable; the
                // operator is already unwinding state by hand.
                let timeout = ctx.config.schema_agreement_timeout;
                if let Err(e) = ctx.session.await_schema_agreement(timeout).await {
                    warn!(error = %e, "schema agreement timeout during rollback");
                }
            }
        }

        ctx.metadata.remove(&mut ctx.session, &target.version).await?;
        info!(version = %undo.version, "rollback applied");
    }

    info!(count = targets.len(), "rollback completed successfully");
    Ok(())
}

/// Pick the successful versioned rows to roll back, newest first: either
/// everything above `to`, or the first `steps` rows.
fn select_rollback_targets(
    applied: &[AppliedMigration],
    to: Option<&str>,
    steps: Option<usize>,
) -> Vec<AppliedMigration> {
    let mut versioned: Vec<AppliedMigration> = applied
        .iter()
        .filter(|a| a.success && a.migration_type == "versioned")
        .cloned()
        .collect();
    versioned.sort_by(|a, b| compare_versions(&b.version, &a.version));

    match to {
        Some(target) => versioned
            .into_iter()
            .filter(|a| compare_versions(&a.version, target) == Ordering::Greater)
            .collect(),
        None => {
            let steps = steps.unwrap_or(1).max(1).min(versioned.len());
            versioned.truncate(steps);
            versioned
        }
    }
}
