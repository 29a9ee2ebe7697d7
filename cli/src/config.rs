//! Configuration loading, merging, and validation.
//!
//! Options come from a YAML file (`cqlshift.yaml` in the working directory,
//! `$HOME/.cqlshift/`, or `/etc/cqlshift/`), are overridden by `CQLSHIFT_*`
//! environment variables, and finally by command-line flags. Validation runs
//! before any I/O so configuration mistakes never reach the cluster.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cqlshift_cql::{Consistency, SessionConfig, TlsSettings};

pub const DEFAULT_CONFIG_FILE: &str = "cqlshift.yaml";

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub hosts: Vec<String>,
    pub keyspace: String,
    pub migrations_dir: PathBuf,
    pub username: String,
    pub password: String,
    pub ssl: SslConfig,
    pub consistency: String,
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    #[serde(with = "duration_str")]
    pub connection_timeout: Duration,
    #[serde(with = "duration_str")]
    pub lock_timeout: Duration,
    #[serde(with = "duration_str")]
    pub schema_agreement_timeout: Duration,
    pub metadata_keyspace: String,
    pub metadata_replication: ReplicationConfig,
    pub max_retries: u32,
    pub protocol_version: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SslConfig {
    pub enabled: bool,
    pub ca_cert: String,
    pub client_cert: String,
    pub client_key: String,
    pub skip_verify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub class: String,
    pub replication_factor: u32,
    pub datacenters: BTreeMap<String, u32>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            class: "SimpleStrategy".to_string(),
            replication_factor: 1,
            datacenters: BTreeMap::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hosts: vec!["localhost:9042".to_string()],
            keyspace: String::new(),
            migrations_dir: PathBuf::from("./migrations"),
            username: String::new(),
            password: String::new(),
            ssl: SslConfig::default(),
            consistency: "quorum".to_string(),
            timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            lock_timeout: Duration::from_secs(60),
            schema_agreement_timeout: Duration::from_secs(30),
            metadata_keyspace: "cqlshift".to_string(),
            metadata_replication: ReplicationConfig::default(),
            max_retries: 3,
            protocol_version: 4,
        }
    }
}

impl Config {
    /// Load from an explicit file, or from the first discovered config file,
    /// or defaults. Environment overrides apply afterwards.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => discover_config_file(),
        };

        let mut config = match path {
            Some(path) => {
                debug!(path = %path.display(), "loading config file");
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                serde_yaml::from_str(&contents)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            None => {
                debug!("no config file found, using defaults");
                Config::default()
            }
        };

        config.apply_env();
        Ok(config)
    }

    /// Apply `CQLSHIFT_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(hosts) = std::env::var("CQLSHIFT_HOSTS") {
            let hosts: Vec<String> = hosts
                .split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect();
            if !hosts.is_empty() {
                self.hosts = hosts;
            }
        }
        if let Ok(keyspace) = std::env::var("CQLSHIFT_KEYSPACE") {
            if !keyspace.is_empty() {
                self.keyspace = keyspace;
            }
        }
        if let Ok(dir) = std::env::var("CQLSHIFT_MIGRATIONS_DIR") {
            if !dir.is_empty() {
                self.migrations_dir = PathBuf::from(dir);
            }
        }
        if let Ok(username) = std::env::var("CQLSHIFT_USERNAME") {
            if !username.is_empty() {
                self.username = username;
            }
        }
        if let Ok(password) = std::env::var("CQLSHIFT_PASSWORD") {
            if !password.is_empty() {
                self.password = password;
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.hosts.is_empty() {
            bail!("at least one host must be specified");
        }

        if self.keyspace.is_empty() {
            bail!("keyspace must be specified");
        }
        if !IDENTIFIER.is_match(&self.keyspace) {
            bail!(
                "keyspace name {:?} contains invalid characters (must be alphanumeric/underscore, starting with a letter)",
                self.keyspace
            );
        }

        if self.migrations_dir.as_os_str().is_empty() {
            bail!("migrations_dir must be specified");
        }

        if self.metadata_keyspace.is_empty() {
            bail!("metadata_keyspace must be specified");
        }
        if !IDENTIFIER.is_match(&self.metadata_keyspace) {
            bail!(
                "metadata_keyspace name {:?} contains invalid characters",
                self.metadata_keyspace
            );
        }

        for (name, value) in [
            ("timeout", self.timeout),
            ("connection_timeout", self.connection_timeout),
            ("lock_timeout", self.lock_timeout),
            ("schema_agreement_timeout", self.schema_agreement_timeout),
        ] {
            if value.is_zero() {
                bail!("{name} must be positive");
            }
        }

        if !(1..=5).contains(&self.protocol_version) {
            bail!("protocol_version must be between 1 and 5");
        }

        self.consistency()?;

        if self.ssl.enabled {
            if self.ssl.ca_cert.is_empty() {
                bail!("ssl.ca_cert must be specified when SSL is enabled");
            }
            if self.ssl.client_cert.is_empty() != self.ssl.client_key.is_empty() {
                bail!("ssl.client_cert and ssl.client_key must both be specified or both omitted");
            }
        }

        Ok(())
    }

    pub fn consistency(&self) -> anyhow::Result<Consistency> {
        Consistency::parse(&self.consistency)
            .with_context(|| format!("unsupported consistency level: {}", self.consistency))
    }

    /// Replication map literal for `CREATE KEYSPACE`.
    pub fn replication_cql(&self) -> String {
        let replication = &self.metadata_replication;
        if replication.class == "NetworkTopologyStrategy" && !replication.datacenters.is_empty() {
            let mut cql = String::from("{'class': 'NetworkTopologyStrategy'");
            for (dc, rf) in &replication.datacenters {
                cql.push_str(&format!(", '{dc}': {rf}"));
            }
            cql.push('}');
            return cql;
        }

        let rf = replication.replication_factor.max(1);
        format!("{{'class': 'SimpleStrategy', 'replication_factor': {rf}}}")
    }

    /// Driver settings derived from this configuration.
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let tls = if self.ssl.enabled {
            Some(TlsSettings {
                ca_cert: PathBuf::from(&self.ssl.ca_cert),
                client_cert: non_empty_path(&self.ssl.client_cert),
                client_key: non_empty_path(&self.ssl.client_key),
                skip_verify: self.ssl.skip_verify,
            })
        } else {
            None
        };

        Ok(SessionConfig {
            hosts: self.hosts.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            consistency: self.consistency()?,
            timeout: self.timeout,
            connect_timeout: self.connection_timeout,
            protocol_version: self.protocol_version,
            max_retries: self.max_retries,
            tls,
        })
    }
}

fn non_empty_path(s: &str) -> Option<PathBuf> {
    if s.is_empty() {
        None
    } else {
        Some(PathBuf::from(s))
    }
}

fn discover_config_file() -> Option<PathBuf> {
    let mut candidates = vec![PathBuf::from(DEFAULT_CONFIG_FILE)];
    if let Some(home) = std::env::var_os("HOME") {
        candidates.push(
            PathBuf::from(home)
                .join(".cqlshift")
                .join(DEFAULT_CONFIG_FILE),
        );
    }
    candidates.push(PathBuf::from("/etc/cqlshift").join(DEFAULT_CONFIG_FILE));

    candidates.into_iter().find(|p| p.is_file())
}

/// Serde adapter for humane duration strings: "500ms", "30s", "5m", "1h".
/// A bare integer is taken as seconds.
pub(crate) mod duration_str {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        parse_duration(&raw).map_err(de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration".to_string());
        }
        if let Ok(secs) = s.parse::<u64>() {
            return Ok(Duration::from_secs(secs));
        }

        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .expect("non-numeric string has a non-digit");
        let (number, unit) = s.split_at(split);
        let value: u64 = number
            .parse()
            .map_err(|_| format!("invalid duration {s:?}"))?;

        match unit {
            "ms" => Ok(Duration::from_millis(value)),
            "s" => Ok(Duration::from_secs(value)),
            "m" => Ok(Duration::from_secs(value * 60)),
            "h" => Ok(Duration::from_secs(value * 3600)),
            _ => Err(format!("invalid duration unit {unit:?} in {s:?}")),
        }
    }

    pub fn format_duration(d: Duration) -> String {
        let millis = d.as_millis();
        if millis % 1000 != 0 {
            return format!("{millis}ms");
        }
        let secs = d.as_secs();
        if secs != 0 && secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs != 0 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::duration_str::{format_duration, parse_duration};
    use super::*;

    fn valid_config() -> Config {
        Config {
            keyspace: "my_app".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn defaults_mirror_the_documented_values() {
        let config = Config::default();
        assert_eq!(config.hosts, vec!["localhost:9042"]);
        assert_eq!(config.migrations_dir, PathBuf::from("./migrations"));
        assert_eq!(config.consistency, "quorum");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
        assert_eq!(config.lock_timeout, Duration::from_secs(60));
        assert_eq!(config.schema_agreement_timeout, Duration::from_secs(30));
        assert_eq!(config.metadata_keyspace, "cqlshift");
        assert_eq!(config.metadata_replication.class, "SimpleStrategy");
        assert_eq!(config.metadata_replication.replication_factor, 1);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.protocol_version, 4);
    }

    #[test]
    fn yaml_round_trip() {
        let yaml = r#"
hosts:
  - "db1:9042"
  - "db2:9042"
keyspace: "orders"
consistency: "local_quorum"
timeout: "45s"
lock_timeout: "2m"
schema_agreement_timeout: "500ms"
metadata_replication:
  class: "NetworkTopologyStrategy"
  datacenters:
    dc1: 3
    dc2: 2
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.hosts, vec!["db1:9042", "db2:9042"]);
        assert_eq!(config.keyspace, "orders");
        assert_eq!(config.consistency, "local_quorum");
        assert_eq!(config.timeout, Duration::from_secs(45));
        assert_eq!(config.lock_timeout, Duration::from_secs(120));
        assert_eq!(
            config.schema_agreement_timeout,
            Duration::from_millis(500)
        );
        // Unspecified fields keep their defaults.
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
        assert_eq!(config.metadata_keyspace, "cqlshift");
        config.validate().unwrap();
    }

    #[test]
    fn validate_accepts_a_complete_config() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_configs() {
        let cases: Vec<(&str, Box<dyn Fn(&mut Config)>)> = vec![
            ("no hosts", Box::new(|c| c.hosts.clear())),
            ("empty keyspace", Box::new(|c| c.keyspace.clear())),
            ("keyspace starts with digit", Box::new(|c| c.keyspace = "1bad".into())),
            ("keyspace with dash", Box::new(|c| c.keyspace = "bad-name".into())),
            ("empty migrations dir", Box::new(|c| c.migrations_dir = PathBuf::new())),
            ("empty metadata keyspace", Box::new(|c| c.metadata_keyspace.clear())),
            ("bad metadata keyspace", Box::new(|c| c.metadata_keyspace = "meta space".into())),
            ("zero timeout", Box::new(|c| c.timeout = Duration::ZERO)),
            ("zero connection timeout", Box::new(|c| c.connection_timeout = Duration::ZERO)),
            ("zero lock timeout", Box::new(|c| c.lock_timeout = Duration::ZERO)),
            ("zero agreement timeout", Box::new(|c| c.schema_agreement_timeout = Duration::ZERO)),
            ("protocol too low", Box::new(|c| c.protocol_version = 0)),
            ("protocol too high", Box::new(|c| c.protocol_version = 6)),
            ("unknown consistency", Box::new(|c| c.consistency = "eventual".into())),
            ("ssl without ca", Box::new(|c| c.ssl.enabled = true)),
            (
                "ssl with cert but no key",
                Box::new(|c| {
                    c.ssl.enabled = true;
                    c.ssl.ca_cert = "/certs/ca.pem".into();
                    c.ssl.client_cert = "/certs/client.pem".into();
                }),
            ),
        ];

        for (name, mutate) in cases {
            let mut config = valid_config();
            mutate(&mut config);
            assert!(config.validate().is_err(), "{name} should fail validation");
        }
    }

    #[test]
    fn mutual_tls_config_is_valid() {
        let mut config = valid_config();
        config.ssl.enabled = true;
        config.ssl.ca_cert = "/certs/ca.pem".into();
        config.ssl.client_cert = "/certs/client.pem".into();
        config.ssl.client_key = "/certs/client-key.pem".into();
        config.validate().unwrap();

        let session = config.session_config().unwrap();
        let tls = session.tls.unwrap();
        assert_eq!(tls.ca_cert, PathBuf::from("/certs/ca.pem"));
        assert!(tls.client_cert.is_some());
        assert!(tls.client_key.is_some());
        assert!(!tls.skip_verify);
    }

    #[test]
    fn replication_cql_simple_strategy() {
        let config = valid_config();
        assert_eq!(
            config.replication_cql(),
            "{'class': 'SimpleStrategy', 'replication_factor': 1}"
        );

        let mut zero_rf = valid_config();
        zero_rf.metadata_replication.replication_factor = 0;
        assert_eq!(
            zero_rf.replication_cql(),
            "{'class': 'SimpleStrategy', 'replication_factor': 1}"
        );
    }

    #[test]
    fn replication_cql_network_topology() {
        let mut config = valid_config();
        config.metadata_replication.class = "NetworkTopologyStrategy".to_string();
        config.metadata_replication.datacenters =
            [("dc1".to_string(), 3), ("dc2".to_string(), 2)].into();
        assert_eq!(
            config.replication_cql(),
            "{'class': 'NetworkTopologyStrategy', 'dc1': 3, 'dc2': 2}"
        );
    }

    #[test]
    fn network_topology_without_datacenters_falls_back_to_simple() {
        let mut config = valid_config();
        config.metadata_replication.class = "NetworkTopologyStrategy".to_string();
        assert!(config.replication_cql().contains("SimpleStrategy"));
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration(" 10s ").unwrap(), Duration::from_secs(10));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(300)), "5m");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("CQLSHIFT_HOSTS", "a:9042, b:9042");
        std::env::set_var("CQLSHIFT_KEYSPACE", "from_env");
        let mut config = Config::default();
        config.apply_env();
        std::env::remove_var("CQLSHIFT_HOSTS");
        std::env::remove_var("CQLSHIFT_KEYSPACE");

        assert_eq!(config.hosts, vec!["a:9042", "b:9042"]);
        assert_eq!(config.keyspace, "from_env");
    }
}
