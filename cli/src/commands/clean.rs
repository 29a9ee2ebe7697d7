//! `cqlshift clean`: drop the target and metadata keyspaces.
//!
//! Destructive. Requires `--force` plus typing the keyspace name back.

use anyhow::{bail, Context};
use colored::Colorize;
use tracing::{info, warn};

use cqlshift_cql::Session;

use crate::config::Config;
use crate::util::prompt_line;

pub async fn run(config: Config, force: bool) -> anyhow::Result<()> {
    if !force {
        bail!("this is a destructive operation: use --force to proceed");
    }

    println!(
        "{} This will DROP keyspace '{}' and ALL its data!",
        "WARNING:".red().bold(),
        config.keyspace
    );
    println!(
        "It will also DROP the metadata keyspace '{}'.\n",
        config.metadata_keyspace
    );

    let response = prompt_line(&format!(
        "Type the keyspace name '{}' to confirm: ",
        config.keyspace
    ))?;
    if response != config.keyspace {
        bail!("keyspace name does not match: aborting");
    }

    let mut session = Session::connect(config.session_config()?)
        .await
        .context("failed to connect to cluster")?;
    let result = drop_keyspaces(&mut session, &config).await;
    session.close().await;
    result
}

async fn drop_keyspaces(session: &mut Session, config: &Config) -> anyhow::Result<()> {
    for keyspace in [&config.keyspace, &config.metadata_keyspace] {
        warn!(keyspace = %keyspace, "dropping keyspace");
        session
            .execute(&format!("DROP KEYSPACE IF EXISTS {keyspace}"), &[])
            .await
            .with_context(|| format!("failed to drop keyspace {keyspace}"))?;
        if let Err(e) = session
            .await_schema_agreement(config.schema_agreement_timeout)
            .await
        {
            warn!(error = %e, "schema agreement timeout after dropping keyspace");
        }
        info!(keyspace = %keyspace, "keyspace dropped");
    }

    info!("clean complete, all migration data has been removed");
    Ok(())
}
