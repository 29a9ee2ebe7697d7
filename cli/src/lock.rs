//! Cluster-wide migration lock.
//!
//! A single row in `schema_lock`, taken with a lightweight transaction so at
//! most one operator holds it at a time. Liveness comes from the server-side
//! TTL (lock timeout + 60s); the `expires_at` column only feeds the stealing
//! heuristic. A crashed holder therefore never blocks migrations for good.

use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cqlshift_cql::{CqlResult, CqlValue, Session};

pub const MIGRATION_LOCK_ID: &str = "migration_lock";

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// The current `schema_lock` row.
#[derive(Debug, Clone)]
pub struct LockInfo {
    pub locked_by: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Acquires and releases the migration lock on behalf of one process.
pub struct LockManager {
    keyspace: String,
    owner: String,
}

impl LockManager {
    /// The owner token is `<hostname>-<8hex>`, unique per manager instance.
    pub fn new(keyspace: &str, hostname: &str) -> Self {
        let nonce = Uuid::new_v4().to_string();
        Self {
            keyspace: keyspace.to_string(),
            owner: format!("{hostname}-{}", &nonce[..8]),
        }
    }

    /// Try to take the lock until `timeout` elapses.
    ///
    /// Backs off exponentially (1s doubling to 10s) while the lock is held
    /// by a live owner. An expired lock is deleted and retried immediately,
    /// as is a row that vanished between the insert and the read.
    pub async fn acquire(&self, session: &mut Session, timeout: Duration) -> anyhow::Result<()> {
        debug!(owner = %self.owner, ?timeout, "attempting to acquire migration lock");

        let deadline = Instant::now() + timeout;
        let ttl = timeout.as_secs() + 60;
        let mut backoff = INITIAL_BACKOFF;

        let insert = format!(
            "INSERT INTO {}.schema_lock (lock_id, locked_by, locked_at, expires_at) \
             VALUES (?, ?, ?, ?) IF NOT EXISTS USING TTL {}",
            self.keyspace, ttl
        );

        while Instant::now() < deadline {
            let now = Utc::now();
            let expires_at = now
                + chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(60));
            let (applied, _) = session
                .execute_cas(
                    &insert,
                    &[
                        CqlValue::Text(MIGRATION_LOCK_ID.to_string()),
                        CqlValue::Text(self.owner.clone()),
                        CqlValue::Timestamp(now),
                        CqlValue::Timestamp(expires_at),
                    ],
                )
                .await
                .context("failed to execute lock query")?;

            if applied {
                info!(owner = %self.owner, "migration lock acquired");
                return Ok(());
            }

            match self.current_lock(session).await {
                Ok(Some(lock)) if Utc::now() > lock.expires_at => {
                    warn!(
                        held_by = %lock.locked_by,
                        expired_at = %lock.expires_at,
                        "found expired lock, stealing"
                    );
                    if let Err(e) = self.force_release(session).await {
                        warn!(error = %e, "failed to delete expired lock");
                    }
                    continue;
                }
                Ok(Some(lock)) => {
                    debug!(
                        held_by = %lock.locked_by,
                        locked_at = %lock.locked_at,
                        expires_at = %lock.expires_at,
                        "lock held by another process, waiting"
                    );
                }
                Ok(None) => {
                    // The holder's TTL fired between our insert and read.
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "failed to check current lock, retrying");
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = next_backoff(backoff);
        }

        bail!(
            "failed to acquire migration lock within {:?}: another migration may be in progress",
            timeout
        )
    }

    /// Release the lock if we still hold it. Losing the race (stolen or
    /// expired lock) is not an error; there is nothing left to release.
    pub async fn release(&self, session: &mut Session) -> anyhow::Result<()> {
        debug!(owner = %self.owner, "releasing migration lock");

        let delete = format!(
            "DELETE FROM {}.schema_lock WHERE lock_id = ? IF locked_by = ?",
            self.keyspace
        );
        match session
            .execute_cas(
                &delete,
                &[
                    CqlValue::Text(MIGRATION_LOCK_ID.to_string()),
                    CqlValue::Text(self.owner.clone()),
                ],
            )
            .await
        {
            Ok((true, _)) => {
                info!("migration lock released");
                Ok(())
            }
            Ok((false, _)) => {
                warn!("lock was not released: it may have been stolen or expired");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "conditional release failed, attempting force release");
                match self.force_release(session).await {
                    Ok(()) => {
                        info!("migration lock force-released");
                        Ok(())
                    }
                    Err(force_err) => {
                        bail!("failed to release lock (conditional: {e}, force: {force_err})")
                    }
                }
            }
        }
    }

    /// Unconditional delete. Only used to steal an expired lock or as the
    /// release fallback.
    async fn force_release(&self, session: &mut Session) -> CqlResult<()> {
        let delete = format!(
            "DELETE FROM {}.schema_lock WHERE lock_id = ?",
            self.keyspace
        );
        session
            .execute(&delete, &[CqlValue::Text(MIGRATION_LOCK_ID.to_string())])
            .await
    }

    /// Read the current lock row, if any.
    pub async fn current_lock(&self, session: &mut Session) -> CqlResult<Option<LockInfo>> {
        let query = format!(
            "SELECT locked_by, locked_at, expires_at FROM {}.schema_lock WHERE lock_id = ?",
            self.keyspace
        );
        let row = session
            .query_one(&query, &[CqlValue::Text(MIGRATION_LOCK_ID.to_string())])
            .await?;

        Ok(row.map(|row| LockInfo {
            locked_by: row.get_str("locked_by").unwrap_or_default(),
            locked_at: row
                .get_timestamp("locked_at")
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            expires_at: row
                .get_timestamp("expires_at")
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        }))
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}
