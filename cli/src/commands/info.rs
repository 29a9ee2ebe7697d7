//! `cqlshift info`: cluster and migration summary.

use colored::Colorize;
use tracing::warn;

use crate::config::{duration_str::format_duration, Config};
use crate::context::ExecutionContext;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let mut ctx = ExecutionContext::new(config, false).await?;
    let result = info(&mut ctx).await;
    ctx.close().await;
    result
}

async fn info(ctx: &mut ExecutionContext) -> anyhow::Result<()> {
    let metadata = match ctx.session.cluster_metadata().await {
        Ok(meta) => Some(meta),
        Err(e) => {
            warn!(error = %e, "failed to get cluster metadata");
            None
        }
    };

    let last_version = ctx
        .metadata
        .last_applied_version(&mut ctx.session)
        .await
        .ok()
        .flatten();
    let current = match last_version {
        Some(v) => format!("V{v}"),
        None => "none".to_string(),
    };

    println!("cqlshift {}\n", env!("CARGO_PKG_VERSION"));

    println!("{}", "Cluster:".bold());
    if let Some(meta) = &metadata {
        println!("  Name:           {}", meta.cluster_name);
        println!("  Schema Version: {}", meta.schema_version);
        println!("  Keyspaces:      {}", meta.keyspaces.len());
    }
    println!("  Hosts:          {}", ctx.config.hosts.join(", "));
    println!("  Keyspace:       {}", ctx.config.keyspace);

    println!("\n{}", "Migration:".bold());
    println!("  Directory:      {}", ctx.config.migrations_dir.display());
    println!("  Metadata:       {}", ctx.config.metadata_keyspace);
    println!("  Current:        {current}");

    println!("\n{}", "Settings:".bold());
    println!("  Consistency:    {}", ctx.config.consistency);
    println!("  Timeout:        {}", format_duration(ctx.config.timeout));
    println!(
        "  Lock Timeout:   {}",
        format_duration(ctx.config.lock_timeout)
    );
    println!(
        "  Schema Agree:   {}",
        format_duration(ctx.config.schema_agreement_timeout)
    );
    println!("  SSL:            {}", ctx.config.ssl.enabled);

    Ok(())
}
