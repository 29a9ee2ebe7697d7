//! Minimal CQL native-protocol (v4) client.
//!
//! Layered like a classic wire driver: `protocol` is pure, synchronous
//! encoding/decoding of frames; `session` owns the socket and drives the
//! async I/O. The surface is intentionally small: the migration engine needs
//! plain queries with bound values, lightweight transactions, and
//! schema-agreement polling, nothing more.

pub mod error;
pub mod protocol;
pub mod session;
mod tls;

pub use error::{CqlError, CqlResult};
pub use protocol::{Consistency, CqlValue, Row};
pub use session::{ClusterMetadata, Session, SessionConfig, TlsSettings};
