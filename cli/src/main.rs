//! cqlshift: schema migration tool for ScyllaDB and Apache Cassandra.

mod commands;
mod config;
mod context;
mod executor;
mod lock;
mod metadata;
mod util;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::status::StatusFormat;
use config::Config;

#[derive(Parser, Debug)]
#[command(name = "cqlshift", version)]
#[command(about = "Schema migration tool for ScyllaDB and Apache Cassandra")]
#[command(long_about = "cqlshift applies versioned CQL migration scripts to a keyspace, tracks \
what has been applied in a metadata keyspace, and serializes operators \
through a cluster-backed lock.

Migration file naming convention:
  V<version>__<description>.cql    Versioned migration
  U<version>__<description>.cql    Undo (rollback) migration
  R__<description>.cql             Repeatable migration")]
struct Cli {
    /// Config file (default: ./cqlshift.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cluster hosts (comma-separated host:port)
    #[arg(long, global = true, value_delimiter = ',')]
    hosts: Option<Vec<String>>,

    /// Target keyspace
    #[arg(long, global = true)]
    keyspace: Option<String>,

    /// Migrations directory (default: ./migrations)
    #[arg(long = "migrations-dir", global = true)]
    migrations_dir: Option<PathBuf>,

    /// Authentication username
    #[arg(long, global = true)]
    username: Option<String>,

    /// Authentication password
    #[arg(long, global = true)]
    password: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long = "log-level", global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a cqlshift project
    Init,
    /// Create new migration files
    Create {
        /// Migration name (will be sanitized for the filename)
        name: String,
        /// Also create an undo migration file
        #[arg(long)]
        with_undo: bool,
        /// Create a repeatable migration (no version number)
        #[arg(long, conflicts_with = "with_undo")]
        repeatable: bool,
    },
    /// Apply pending migrations
    Migrate {
        /// Highest version to migrate to (e.g. 003)
        #[arg(long)]
        target: Option<String>,
        /// Show migrations without applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Rollback migrations using undo scripts
    Rollback {
        /// Rollback everything above this version (exclusive)
        #[arg(long, conflicts_with = "steps")]
        to: Option<String>,
        /// Number of migrations to rollback
        #[arg(long)]
        steps: Option<usize>,
        /// Show the rollback plan without executing
        #[arg(long)]
        dry_run: bool,
    },
    /// Show migration status
    Status {
        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: StatusFormat,
    },
    /// Validate migration checksums
    Validate,
    /// Repair migration metadata
    Repair {
        /// Recalculate checksums for applied migrations
        #[arg(long)]
        recalculate_checksums: bool,
        /// Remove failed migration records
        #[arg(long)]
        remove_failed: bool,
    },
    /// Show cluster and migration info
    Info,
    /// Drop the target keyspace and all migration metadata
    Clean {
        /// Required flag to confirm the destructive operation
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Init => commands::init::run(),
        Command::Create {
            ref name,
            with_undo,
            repeatable,
        } => {
            let name = name.clone();
            let config = load_config(&cli)?;
            commands::create::run(config, &name, with_undo, repeatable)
        }
        Command::Migrate {
            ref target,
            dry_run,
        } => {
            let target = target.clone();
            let config = load_config(&cli)?;
            commands::migrate::run(config, target, dry_run).await
        }
        Command::Rollback {
            ref to,
            steps,
            dry_run,
        } => {
            let to = to.clone();
            let config = load_config(&cli)?;
            commands::rollback::run(config, to, steps, dry_run).await
        }
        Command::Status { format } => {
            let config = load_config(&cli)?;
            commands::status::run(config, format).await
        }
        Command::Validate => {
            let config = load_config(&cli)?;
            commands::validate::run(config).await
        }
        Command::Repair {
            recalculate_checksums,
            remove_failed,
        } => {
            let config = load_config(&cli)?;
            commands::repair::run(config, recalculate_checksums, remove_failed).await
        }
        Command::Info => {
            let config = load_config(&cli)?;
            commands::info::run(config).await
        }
        Command::Clean { force } => {
            let config = load_config(&cli)?;
            commands::clean::run(config, force).await
        }
    }
}

/// File config, then environment, then command-line flags; validated last.
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(hosts) = &cli.hosts {
        config.hosts = hosts.clone();
    }
    if let Some(keyspace) = &cli.keyspace {
        config.keyspace = keyspace.clone();
    }
    if let Some(dir) = &cli.migrations_dir {
        config.migrations_dir = dir.clone();
    }
    if let Some(username) = &cli.username {
        config.username = username.clone();
    }
    if let Some(password) = &cli.password {
        config.password = password.clone();
    }

    config.validate()?;
    Ok(config)
}
