//! Cluster session: async I/O over the wire protocol.
//!
//! One connection, strictly sequential requests on stream 0. The migration
//! engine never runs queries concurrently, so a single socket is all the
//! pooling this client needs.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info, warn};

use crate::error::{CqlError, CqlResult};
use crate::protocol::encoder::CqlEncoder;
use crate::protocol::frame::{parse_authenticate, parse_error, parse_result, Frame, QueryResult};
use crate::protocol::{error_code, opcode, Consistency, CqlValue, Row};
use crate::tls;

const SCHEMA_POLL_INTERVAL: Duration = Duration::from_millis(500);
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_CAP: Duration = Duration::from_secs(5);
const DEFAULT_PORT: u16 = 9042;

/// Connection settings for [`Session::connect`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `host:port` contact points, tried in order.
    pub hosts: Vec<String>,
    /// Empty username disables authentication.
    pub username: String,
    pub password: String,
    pub consistency: Consistency,
    /// Per-request timeout.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub protocol_version: u8,
    /// Transient query failures are retried up to this many times.
    pub max_retries: u32,
    pub tls: Option<TlsSettings>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hosts: vec![format!("localhost:{DEFAULT_PORT}")],
            username: String::new(),
            password: String::new(),
            consistency: Consistency::Quorum,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            protocol_version: 4,
            max_retries: 3,
            tls: None,
        }
    }
}

/// TLS material for an encrypted transport.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub ca_cert: PathBuf,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub skip_verify: bool,
}

/// Basic cluster facts for the `info` command.
#[derive(Debug, Clone)]
pub struct ClusterMetadata {
    pub cluster_name: String,
    pub schema_version: String,
    pub keyspaces: Vec<String>,
}

enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Transport::Plain(s) => s.write_all(buf).await,
            Transport::Tls(s) => s.write_all(buf).await,
        }
    }

    async fn read_buf(&mut self, buf: &mut BytesMut) -> std::io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read_buf(buf).await,
            Transport::Tls(s) => s.read_buf(buf).await,
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            Transport::Plain(s) => s.shutdown().await,
            Transport::Tls(s) => s.shutdown().await,
        }
    }
}

/// A connected CQL session.
pub struct Session {
    transport: Transport,
    buffer: BytesMut,
    config: SessionConfig,
}

impl Session {
    /// Connect to the first reachable contact point and complete the
    /// startup/authentication handshake.
    pub async fn connect(config: SessionConfig) -> CqlResult<Session> {
        if config.hosts.is_empty() {
            return Err(CqlError::Connection("no hosts configured".to_string()));
        }
        // v1/v2 use a different frame header; this client speaks v3+.
        if config.protocol_version < 3 {
            return Err(CqlError::Protocol(format!(
                "protocol version {} is not supported by this client (minimum 3)",
                config.protocol_version
            )));
        }

        let mut last_err = None;
        for host in &config.hosts {
            match Self::connect_host(host, &config).await {
                Ok(session) => {
                    info!(host = %host, "connected to cluster");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(host = %host, error = %e, "contact point unreachable");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap())
    }

    async fn connect_host(host: &str, config: &SessionConfig) -> CqlResult<Session> {
        let (hostname, port) = split_host_port(host);
        let addr = format!("{hostname}:{port}");

        let tcp = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr.as_str()))
            .await
            .map_err(|_| {
                CqlError::Connection(format!(
                    "timed out connecting to {addr} after {:?}",
                    config.connect_timeout
                ))
            })?
            .map_err(|e| CqlError::Connection(format!("failed to connect to {addr}: {e}")))?;

        let transport = match &config.tls {
            Some(settings) => Transport::Tls(Box::new(tls::connect(hostname, tcp, settings).await?)),
            None => Transport::Plain(tcp),
        };

        let mut session = Session {
            transport,
            buffer: BytesMut::with_capacity(8192),
            config: config.clone(),
        };
        session.handshake().await?;
        Ok(session)
    }

    /// Drive STARTUP until the server reports READY or AUTH_SUCCESS.
    async fn handshake(&mut self) -> CqlResult<()> {
        let startup = CqlEncoder::startup(self.config.protocol_version);
        self.send(&startup).await?;

        loop {
            let frame = self.recv_within(self.config.connect_timeout).await?;
            match frame.opcode {
                opcode::READY | opcode::AUTH_SUCCESS => return Ok(()),
                opcode::AUTHENTICATE => {
                    let class = parse_authenticate(&frame.body)?;
                    if self.config.username.is_empty() {
                        return Err(CqlError::Auth(format!(
                            "cluster requires authentication ({class}) but no username is configured"
                        )));
                    }
                    debug!(authenticator = %class, "answering authentication challenge");
                    let response = CqlEncoder::auth_response(
                        self.config.protocol_version,
                        &self.config.username,
                        &self.config.password,
                    );
                    self.send(&response).await?;
                }
                opcode::AUTH_CHALLENGE => {
                    return Err(CqlError::Auth(
                        "server sent an auth challenge; only SASL PLAIN is supported".to_string(),
                    ));
                }
                opcode::ERROR => {
                    let (code, message) = parse_error(&frame.body)?;
                    return Err(CqlError::Auth(format!(
                        "startup rejected (code 0x{code:04X}): {message}"
                    )));
                }
                other => {
                    return Err(CqlError::Protocol(format!(
                        "unexpected opcode 0x{other:02X} during startup"
                    )));
                }
            }
        }
    }

    /// Execute a statement, discarding any result rows.
    pub async fn execute(&mut self, statement: &str, values: &[CqlValue]) -> CqlResult<()> {
        debug!(query = %truncate(statement, 200), "executing query");
        self.run_with_retry(statement, values).await.map(|_| ())
    }

    /// Execute a statement and collect the result rows.
    pub async fn query_rows(&mut self, statement: &str, values: &[CqlValue]) -> CqlResult<Vec<Row>> {
        debug!(query = %truncate(statement, 200), "executing query");
        Ok(self.run_with_retry(statement, values).await?.into_rows())
    }

    /// Execute a statement and return the first result row, if any.
    pub async fn query_one(
        &mut self,
        statement: &str,
        values: &[CqlValue],
    ) -> CqlResult<Option<Row>> {
        Ok(self.query_rows(statement, values).await?.into_iter().next())
    }

    /// Execute a lightweight transaction. Returns whether the condition
    /// applied, plus the previous row when it did not.
    ///
    /// Never retried: re-running a conditional write after an ambiguous
    /// failure could report a win that belongs to someone else.
    pub async fn execute_cas(
        &mut self,
        statement: &str,
        values: &[CqlValue],
    ) -> CqlResult<(bool, Option<Row>)> {
        debug!(query = %truncate(statement, 200), "executing LWT");
        let rows = self.run_query(statement, values).await?.into_rows();
        let Some(row) = rows.into_iter().next() else {
            return Err(CqlError::Protocol(
                "LWT result contained no rows".to_string(),
            ));
        };
        let applied = row.get_bool("[applied]").unwrap_or(false);
        if applied {
            Ok((true, None))
        } else {
            Ok((false, Some(row)))
        }
    }

    /// Poll `system.local` and `system.peers` until every reachable node
    /// reports the same schema version, bounded by `timeout`.
    pub async fn await_schema_agreement(&mut self, timeout: Duration) -> CqlResult<()> {
        debug!(?timeout, "waiting for schema agreement");
        let deadline = Instant::now() + timeout;

        loop {
            match self.schema_versions().await {
                Ok(versions) if versions.len() <= 1 => {
                    debug!("schema agreement reached");
                    return Ok(());
                }
                Ok(versions) => {
                    debug!(distinct = versions.len(), "schema versions still diverge");
                }
                Err(e) => {
                    warn!(error = %e, "schema version probe failed, retrying");
                }
            }

            if Instant::now() + SCHEMA_POLL_INTERVAL > deadline {
                return Err(CqlError::SchemaAgreement(timeout));
            }
            tokio::time::sleep(SCHEMA_POLL_INTERVAL).await;
        }
    }

    async fn schema_versions(&mut self) -> CqlResult<HashSet<String>> {
        let mut versions = HashSet::new();

        if let Some(row) = self
            .query_one(
                "SELECT schema_version FROM system.local WHERE key='local'",
                &[],
            )
            .await?
        {
            if let Some(v) = row.get_uuid("schema_version") {
                versions.insert(v.to_string());
            }
        }

        // Peers with a null schema_version are down; they cannot hold up
        // agreement.
        for row in self
            .query_rows("SELECT schema_version FROM system.peers", &[])
            .await?
        {
            if let Some(v) = row.get_uuid("schema_version") {
                versions.insert(v.to_string());
            }
        }

        Ok(versions)
    }

    /// Cluster name, schema version, and keyspace list from the system
    /// tables. Individual probe failures degrade to "unknown".
    pub async fn cluster_metadata(&mut self) -> CqlResult<ClusterMetadata> {
        let mut meta = ClusterMetadata {
            cluster_name: "unknown".to_string(),
            schema_version: "unknown".to_string(),
            keyspaces: Vec::new(),
        };

        match self
            .query_one(
                "SELECT cluster_name, schema_version FROM system.local WHERE key='local'",
                &[],
            )
            .await
        {
            Ok(Some(row)) => {
                if let Some(name) = row.get_str("cluster_name") {
                    meta.cluster_name = name;
                }
                if let Some(version) = row.get_uuid("schema_version") {
                    meta.schema_version = version.to_string();
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to read system.local"),
        }

        match self
            .query_rows("SELECT keyspace_name FROM system_schema.keyspaces", &[])
            .await
        {
            Ok(rows) => {
                meta.keyspaces = rows
                    .iter()
                    .filter_map(|r| r.get_str("keyspace_name"))
                    .collect();
            }
            Err(e) => warn!(error = %e, "failed to list keyspaces"),
        }

        Ok(meta)
    }

    pub async fn keyspace_exists(&mut self, keyspace: &str) -> CqlResult<bool> {
        let row = self
            .query_one(
                "SELECT keyspace_name FROM system_schema.keyspaces WHERE keyspace_name = ?",
                &[CqlValue::Text(keyspace.to_string())],
            )
            .await?;
        Ok(row.is_some())
    }

    /// The session's configured default consistency.
    pub fn consistency(&self) -> Consistency {
        self.config.consistency
    }

    /// Shut the connection down. CQL has no goodbye message; closing the
    /// socket is the protocol.
    pub async fn close(mut self) {
        if let Err(e) = self.transport.shutdown().await {
            debug!(error = %e, "error shutting down connection");
        }
        debug!("session closed");
    }

    async fn run_with_retry(
        &mut self,
        statement: &str,
        values: &[CqlValue],
    ) -> CqlResult<QueryResult> {
        let mut attempt = 0u32;
        loop {
            match self.run_query(statement, values).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < self.config.max_retries && is_transient(&e) => {
                    attempt += 1;
                    let backoff = retry_backoff(attempt);
                    warn!(
                        attempt,
                        max = self.config.max_retries,
                        error = %e,
                        "transient query failure, retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_query(&mut self, statement: &str, values: &[CqlValue]) -> CqlResult<QueryResult> {
        let request = CqlEncoder::query(
            self.config.protocol_version,
            statement,
            self.config.consistency,
            values,
        );
        self.send(&request).await?;

        let frame = self.recv_within(self.config.timeout).await?;
        match frame.opcode {
            opcode::RESULT => parse_result(&frame.body),
            opcode::ERROR => {
                let (code, message) = parse_error(&frame.body)?;
                Err(CqlError::Query { code, message })
            }
            other => Err(CqlError::Protocol(format!(
                "unexpected opcode 0x{other:02X} in response to QUERY"
            ))),
        }
    }

    async fn send(&mut self, frame: &[u8]) -> CqlResult<()> {
        self.transport.write_all(frame).await?;
        Ok(())
    }

    async fn recv_within(&mut self, timeout: Duration) -> CqlResult<Frame> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| CqlError::Timeout(timeout))?
    }

    async fn recv(&mut self) -> CqlResult<Frame> {
        loop {
            if let Some(frame) = Frame::decode(&mut self.buffer)? {
                return Ok(frame);
            }
            let n = self.transport.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(CqlError::Connection(
                    "connection closed by server".to_string(),
                ));
            }
        }
    }
}

fn split_host_port(host: &str) -> (&str, u16) {
    match host.rsplit_once(':') {
        Some((name, port)) => match port.parse() {
            Ok(port) => (name, port),
            Err(_) => (host, DEFAULT_PORT),
        },
        None => (host, DEFAULT_PORT),
    }
}

fn is_transient(err: &CqlError) -> bool {
    matches!(
        err,
        CqlError::Query { code, .. } if matches!(
            *code,
            error_code::UNAVAILABLE
                | error_code::OVERLOADED
                | error_code::READ_TIMEOUT
                | error_code::WRITE_TIMEOUT
        )
    )
}

fn retry_backoff(attempt: u32) -> Duration {
    RETRY_BASE
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(RETRY_CAP)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
