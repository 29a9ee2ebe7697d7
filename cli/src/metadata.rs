//! Metadata keyspace: bootstrap and the applied-migrations table.

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use cqlshift_core::{compare_versions, AppliedMigration, Migration};
use cqlshift_cql::{CqlValue, Row, Session};

use crate::config::Config;

/// Idempotently create the metadata keyspace and its two tables, waiting for
/// schema agreement after each DDL. Agreement timeouts are fatal here: the
/// engine cannot run against half-created metadata.
pub async fn initialize_metadata(session: &mut Session, config: &Config) -> anyhow::Result<()> {
    let keyspace = &config.metadata_keyspace;
    let replication = config.replication_cql();
    debug!(keyspace = %keyspace, replication = %replication, "initializing metadata keyspace");

    session
        .execute(&create_keyspace_cql(keyspace, &replication), &[])
        .await
        .context("failed to create metadata keyspace")?;
    session
        .await_schema_agreement(config.schema_agreement_timeout)
        .await
        .context("schema agreement timeout after creating keyspace")?;

    session
        .execute(&create_migrations_table_cql(keyspace), &[])
        .await
        .context("failed to create schema_migrations table")?;
    session
        .await_schema_agreement(config.schema_agreement_timeout)
        .await
        .context("schema agreement timeout after creating migrations table")?;

    session
        .execute(&create_lock_table_cql(keyspace), &[])
        .await
        .context("failed to create schema_lock table")?;
    session
        .await_schema_agreement(config.schema_agreement_timeout)
        .await
        .context("schema agreement timeout after creating lock table")?;

    info!(keyspace = %keyspace, "metadata tables initialized");
    Ok(())
}

fn create_keyspace_cql(keyspace: &str, replication: &str) -> String {
    format!(
        "CREATE KEYSPACE IF NOT EXISTS {keyspace} WITH replication = {replication} AND durable_writes = true"
    )
}

fn create_migrations_table_cql(keyspace: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {keyspace}.schema_migrations (\n\
         \tversion TEXT,\n\
         \tdescription TEXT,\n\
         \ttype TEXT,\n\
         \tscript TEXT,\n\
         \tchecksum TEXT,\n\
         \tapplied_by TEXT,\n\
         \tapplied_at TIMESTAMP,\n\
         \texecution_time_ms INT,\n\
         \tsuccess BOOLEAN,\n\
         \tPRIMARY KEY (version)\n\
         ) WITH comment = 'cqlshift: tracks applied schema migrations'"
    )
}

fn create_lock_table_cql(keyspace: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {keyspace}.schema_lock (\n\
         \tlock_id TEXT PRIMARY KEY,\n\
         \tlocked_by TEXT,\n\
         \tlocked_at TIMESTAMP,\n\
         \texpires_at TIMESTAMP\n\
         ) WITH comment = 'cqlshift: distributed lock for migration execution'\n\
         \u{20}\u{20}AND default_time_to_live = 3600"
    )
}

/// What the executor knows about a migration when it records an outcome.
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub version: String,
    pub description: String,
    pub migration_type: String,
    pub filename: String,
    pub checksum: String,
}

impl MigrationRecord {
    pub fn from_migration(mig: &Migration) -> Self {
        Self {
            version: mig.effective_version(),
            description: mig.description.clone(),
            migration_type: mig.migration_type.as_str().to_string(),
            filename: mig.filename.clone(),
            checksum: mig.checksum.clone(),
        }
    }
}

/// Reads and writes `schema_migrations` rows.
pub struct MetadataStore {
    keyspace: String,
}

impl MetadataStore {
    pub fn new(keyspace: &str) -> Self {
        Self {
            keyspace: keyspace.to_string(),
        }
    }

    /// Every recorded row, failed ones included, sorted by version.
    pub async fn get_applied(&self, session: &mut Session) -> anyhow::Result<Vec<AppliedMigration>> {
        let query = format!(
            "SELECT version, description, type, script, checksum, applied_by, applied_at, execution_time_ms, success \
             FROM {}.schema_migrations",
            self.keyspace
        );
        let rows = session
            .query_rows(&query, &[])
            .await
            .context("failed to query applied migrations")?;

        let mut applied: Vec<AppliedMigration> = rows.iter().map(row_to_applied).collect();
        applied.sort_by(|a, b| compare_versions(&a.version, &b.version));
        Ok(applied)
    }

    /// Upsert the outcome row for one migration attempt.
    pub async fn record(
        &self,
        session: &mut Session,
        rec: &MigrationRecord,
        duration: Duration,
        success: bool,
        hostname: &str,
    ) -> anyhow::Result<()> {
        let query = format!(
            "INSERT INTO {}.schema_migrations \
             (version, description, type, script, checksum, applied_by, applied_at, execution_time_ms, success) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.keyspace
        );
        session
            .execute(
                &query,
                &[
                    CqlValue::Text(rec.version.clone()),
                    CqlValue::Text(rec.description.clone()),
                    CqlValue::Text(rec.migration_type.clone()),
                    CqlValue::Text(rec.filename.clone()),
                    CqlValue::Text(rec.checksum.clone()),
                    CqlValue::Text(hostname.to_string()),
                    CqlValue::Timestamp(Utc::now()),
                    CqlValue::Int(duration.as_millis().min(i32::MAX as u128) as i32),
                    CqlValue::Boolean(success),
                ],
            )
            .await
            .with_context(|| format!("failed to record migration {}", rec.version))
    }

    /// Delete a row by version key. Used by rollback and repair.
    pub async fn remove(&self, session: &mut Session, version: &str) -> anyhow::Result<()> {
        let query = format!(
            "DELETE FROM {}.schema_migrations WHERE version = ?",
            self.keyspace
        );
        session
            .execute(&query, &[CqlValue::Text(version.to_string())])
            .await
            .with_context(|| format!("failed to remove migration record {version}"))
    }

    pub async fn update_checksum(
        &self,
        session: &mut Session,
        version: &str,
        checksum: &str,
    ) -> anyhow::Result<()> {
        let query = format!(
            "UPDATE {}.schema_migrations SET checksum = ? WHERE version = ?",
            self.keyspace
        );
        session
            .execute(
                &query,
                &[
                    CqlValue::Text(checksum.to_string()),
                    CqlValue::Text(version.to_string()),
                ],
            )
            .await
            .with_context(|| format!("failed to update checksum for {version}"))
    }

    /// Highest successfully applied versioned migration.
    pub async fn last_applied_version(
        &self,
        session: &mut Session,
    ) -> anyhow::Result<Option<String>> {
        let applied = self.get_applied(session).await?;
        Ok(applied
            .into_iter()
            .filter(|a| a.success && a.migration_type == "versioned")
            .map(|a| a.version)
            .max_by(|a, b| compare_versions(a, b)))
    }

    pub async fn get_failed(&self, session: &mut Session) -> anyhow::Result<Vec<AppliedMigration>> {
        Ok(self
            .get_applied(session)
            .await?
            .into_iter()
            .filter(|a| !a.success)
            .collect())
    }
}

fn row_to_applied(row: &Row) -> AppliedMigration {
    AppliedMigration {
        version: row.get_str("version").unwrap_or_default(),
        description: row.get_str("description").unwrap_or_default(),
        migration_type: row.get_str("type").unwrap_or_default(),
        script: row.get_str("script").unwrap_or_default(),
        checksum: row.get_str("checksum").unwrap_or_default(),
        applied_by: row.get_str("applied_by").unwrap_or_default(),
        applied_at: row
            .get_timestamp("applied_at")
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        execution_time_ms: row.get_i32("execution_time_ms").unwrap_or(0),
        success: row.get_bool("success").unwrap_or(false),
    }
}
