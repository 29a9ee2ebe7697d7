//! `cqlshift init`: scaffold a project.

use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use tracing::{info, warn};

use crate::config::DEFAULT_CONFIG_FILE;

const CONFIG_TEMPLATE: &str = r#"# cqlshift configuration

# ScyllaDB / Cassandra cluster hosts
hosts:
  - "localhost:9042"

# Target keyspace for migrations
keyspace: "my_keyspace"

# Directory containing migration files
migrations_dir: "./migrations"

# Authentication (optional)
username: ""
password: ""

# SSL/TLS configuration (optional)
ssl:
  enabled: false
  ca_cert: ""
  client_cert: ""
  client_key: ""
  skip_verify: false

# Consistency level for migration operations
# Options: any, one, two, three, quorum, all, local_quorum, each_quorum, local_one
consistency: "quorum"

# Connection timeout
connection_timeout: "10s"

# Query execution timeout
timeout: "30s"

# Lock acquisition timeout for preventing concurrent migrations
lock_timeout: "60s"

# Time to wait for schema agreement across the cluster after DDL statements
schema_agreement_timeout: "30s"

# Keyspace used to store migration metadata and locks
metadata_keyspace: "cqlshift"

# Replication strategy for the metadata keyspace
metadata_replication:
  class: "SimpleStrategy"
  replication_factor: 1
  # For production with NetworkTopologyStrategy:
  # class: "NetworkTopologyStrategy"
  # datacenters:
  #   dc1: 3
  #   dc2: 3

# Maximum retry attempts for failed operations
max_retries: 3

# CQL native protocol version
protocol_version: 4
"#;

const EXAMPLE_MIGRATION: &str = r#"-- Example Migration
-- Delete or modify this file, then run: cqlshift migrate
--
-- This creates a sample table. Replace with your own schema.

CREATE TABLE IF NOT EXISTS my_keyspace.example_users (
    id UUID PRIMARY KEY,
    email TEXT,
    name TEXT,
    created_at TIMESTAMP
);
"#;

pub fn run() -> anyhow::Result<()> {
    let migrations_dir = Path::new("./migrations");
    std::fs::create_dir_all(migrations_dir).context("failed to create migrations directory")?;
    info!(path = %migrations_dir.display(), "created migrations directory");

    let config_path = Path::new(DEFAULT_CONFIG_FILE);
    if config_path.exists() {
        warn!(path = %config_path.display(), "config file already exists, skipping");
    } else {
        std::fs::write(config_path, CONFIG_TEMPLATE).context("failed to create config file")?;
        info!(path = %config_path.display(), "created config file");
    }

    let example_path = migrations_dir.join("V001__example_migration.cql");
    if example_path.exists() {
        warn!(path = %example_path.display(), "example migration already exists, skipping");
    } else {
        std::fs::write(&example_path, EXAMPLE_MIGRATION)
            .context("failed to create example migration")?;
        info!(path = %example_path.display(), "created example migration");
    }

    println!("\n{}", "Initialization complete! Next steps:".bold());
    println!("  1. Edit {} with your cluster settings", DEFAULT_CONFIG_FILE.cyan());
    println!("  2. Edit or replace migrations/V001__example_migration.cql");
    println!("  3. Create more migrations: {}", "cqlshift create <name>".cyan());
    println!("  4. Apply migrations:       {}", "cqlshift migrate".cyan());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn config_template_parses_and_validates() {
        let config: Config = serde_yaml::from_str(CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.keyspace, "my_keyspace");
        assert_eq!(config.metadata_keyspace, "cqlshift");
        config.validate().unwrap();
    }

    #[test]
    fn example_migration_splits_into_one_ddl_statement() {
        let statements = cqlshift_core::split_statements(EXAMPLE_MIGRATION).unwrap();
        assert_eq!(statements.len(), 1);
        assert!(cqlshift_core::is_ddl(&statements[0]));
    }

    #[test]
    fn example_migration_filename_classifies_as_versioned() {
        let mig = cqlshift_core::scanner::classify_filename(
            "V001__example_migration.cql",
            Path::new("V001__example_migration.cql"),
        )
        .unwrap();
        assert_eq!(mig.version, "001");
    }
}
