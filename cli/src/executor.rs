//! Migration execution.
//!
//! Statements run sequentially in file order; every DDL is followed by a
//! schema-agreement barrier. Each attempt records an outcome row, so a
//! failure mid-migration is visible to `status` and `repair`. There is no
//! partial-progress tracking: a retry re-executes the whole file, which is
//! why migrations are expected to use IF NOT EXISTS / IF EXISTS guards.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use anyhow::bail;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use cqlshift_core::{is_ddl, Migration};

use crate::context::ExecutionContext;
use crate::metadata::MigrationRecord;
use crate::util::truncate;

pub struct Executor<'a> {
    ctx: &'a mut ExecutionContext,
}

impl<'a> Executor<'a> {
    pub fn new(ctx: &'a mut ExecutionContext) -> Self {
        Self { ctx }
    }

    /// Apply a single migration and record the outcome.
    pub async fn execute(&mut self, mig: &Migration) -> anyhow::Result<()> {
        let start = Instant::now();
        let rec = MigrationRecord::from_migration(mig);

        if self.ctx.dry_run {
            info!(
                version = %mig.version,
                description = %mig.description,
                migration_type = %mig.migration_type,
                statements = mig.statements.len(),
                "[dry run] would apply migration"
            );
            for (i, stmt) in mig.statements.iter().enumerate() {
                info!(statement = i + 1, cql = %truncate(stmt, 120), "[dry run] would execute");
            }
            return Ok(());
        }

        if mig.statements.is_empty() {
            warn!(
                version = %mig.version,
                file = %mig.filename,
                "migration file contains no executable statements"
            );
        }

        info!(
            version = %mig.version,
            description = %mig.description,
            statements = mig.statements.len(),
            "applying migration"
        );

        // A panic mid-migration still records a failure row before
        // propagating.
        let outcome = AssertUnwindSafe(self.run_statements(mig, &rec, start))
            .catch_unwind()
            .await;
        match outcome {
            Ok(result) => result,
            Err(panic) => {
                let _ = self.record(&rec, start, false).await;
                std::panic::resume_unwind(panic);
            }
        }
    }

    async fn run_statements(
        &mut self,
        mig: &Migration,
        rec: &MigrationRecord,
        start: Instant,
    ) -> anyhow::Result<()> {
        let total = mig.statements.len();
        for (i, stmt) in mig.statements.iter().enumerate() {
            debug!(statement = i + 1, total, "executing statement");

            if let Err(e) = self.ctx.session.execute(stmt, &[]).await {
                let _ = self.record(rec, start, false).await;
                bail!(
                    "failed to execute statement {} in {}: {}",
                    i + 1,
                    mig.filename,
                    e
                );
            }

            if is_ddl(stmt) {
                debug!("waiting for schema agreement after DDL");
                let timeout = self.ctx.config.schema_agreement_timeout;
                if let Err(e) = self.ctx.session.await_schema_agreement(timeout).await {
                    let _ = self.record(rec, start, false).await;
                    bail!(
                        "schema agreement timeout after statement {} in {}: {}",
                        i + 1,
                        mig.filename,
                        e
                    );
                }
            }
        }

        let elapsed = start.elapsed();
        if let Err(e) = self.record(rec, start, true).await {
            bail!(
                "migration {} executed successfully but failed to record metadata (run 'cqlshift repair' once the cluster recovers): {}",
                mig.filename,
                e
            );
        }

        info!(
            version = %mig.version,
            description = %mig.description,
            duration_ms = elapsed.as_millis() as u64,
            "migration applied"
        );
        Ok(())
    }

    async fn record(
        &mut self,
        rec: &MigrationRecord,
        start: Instant,
        success: bool,
    ) -> anyhow::Result<()> {
        self.ctx
            .metadata
            .record(
                &mut self.ctx.session,
                rec,
                start.elapsed(),
                success,
                &self.ctx.hostname,
            )
            .await
    }

    /// Apply migrations in order, stopping at the first failure. Returns the
    /// number applied before the failure.
    pub async fn execute_all(&mut self, migrations: &[Migration]) -> anyhow::Result<usize> {
        let total = migrations.len();
        for (i, mig) in migrations.iter().enumerate() {
            info!(current = i + 1, total, version = %mig.version, "processing migration");
            if let Err(e) = self.execute(mig).await {
                error!(applied = i, total, "migration run stopped");
                return Err(e);
            }
        }
        Ok(total)
    }
}
