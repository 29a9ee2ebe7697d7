//! Per-operation execution context.
//!
//! Every command builds one of these at entry and tears it down on exit:
//! a connected session, the metadata store, and the lock manager, bundled so
//! nothing lives in process-wide state.

use anyhow::Context as _;
use cqlshift_cql::Session;

use crate::config::Config;
use crate::lock::LockManager;
use crate::metadata::{self, MetadataStore};
use crate::util;

pub struct ExecutionContext {
    pub session: Session,
    pub config: Config,
    pub metadata: MetadataStore,
    pub lock: LockManager,
    pub hostname: String,
    pub dry_run: bool,
}

impl ExecutionContext {
    /// Connect to the cluster and bootstrap the metadata keyspace.
    pub async fn new(config: Config, dry_run: bool) -> anyhow::Result<Self> {
        let session_config = config.session_config()?;
        let mut session = Session::connect(session_config)
            .await
            .context("failed to connect to cluster")?;

        if let Err(e) = metadata::initialize_metadata(&mut session, &config).await {
            session.close().await;
            return Err(e.context("failed to initialize metadata"));
        }

        let hostname = util::hostname();
        let metadata = MetadataStore::new(&config.metadata_keyspace);
        let lock = LockManager::new(&config.metadata_keyspace, &hostname);

        Ok(Self {
            session,
            config,
            metadata,
            lock,
            hostname,
            dry_run,
        })
    }

    pub async fn close(self) {
        self.session.close().await;
    }
}
