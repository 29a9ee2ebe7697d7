//! CQL native protocol constants and value types.
//!
//! Reference: the CQL binary protocol v4 specification
//! (native_protocol_v4.spec in the Cassandra tree).

pub mod encoder;
pub mod frame;

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Request/response opcodes.
pub mod opcode {
    pub const ERROR: u8 = 0x00;
    pub const STARTUP: u8 = 0x01;
    pub const READY: u8 = 0x02;
    pub const AUTHENTICATE: u8 = 0x03;
    pub const OPTIONS: u8 = 0x05;
    pub const SUPPORTED: u8 = 0x06;
    pub const QUERY: u8 = 0x07;
    pub const RESULT: u8 = 0x08;
    pub const AUTH_CHALLENGE: u8 = 0x0E;
    pub const AUTH_RESPONSE: u8 = 0x0F;
    pub const AUTH_SUCCESS: u8 = 0x10;
}

/// Server error codes the engine cares about.
pub mod error_code {
    pub const UNAVAILABLE: i32 = 0x1000;
    pub const OVERLOADED: i32 = 0x1001;
    pub const WRITE_TIMEOUT: i32 = 0x1100;
    pub const READ_TIMEOUT: i32 = 0x1200;
}

/// Column type ids from the RESULT rows metadata.
pub mod cql_type {
    pub const CUSTOM: u16 = 0x0000;
    pub const ASCII: u16 = 0x0001;
    pub const BIGINT: u16 = 0x0002;
    pub const BLOB: u16 = 0x0003;
    pub const BOOLEAN: u16 = 0x0004;
    pub const COUNTER: u16 = 0x0005;
    pub const DECIMAL: u16 = 0x0006;
    pub const DOUBLE: u16 = 0x0007;
    pub const FLOAT: u16 = 0x0008;
    pub const INT: u16 = 0x0009;
    pub const TIMESTAMP: u16 = 0x000B;
    pub const UUID: u16 = 0x000C;
    pub const VARCHAR: u16 = 0x000D;
    pub const VARINT: u16 = 0x000E;
    pub const TIMEUUID: u16 = 0x000F;
    pub const INET: u16 = 0x0010;
    pub const DATE: u16 = 0x0011;
    pub const TIME: u16 = 0x0012;
    pub const SMALLINT: u16 = 0x0013;
    pub const TINYINT: u16 = 0x0014;
    pub const LIST: u16 = 0x0020;
    pub const MAP: u16 = 0x0021;
    pub const SET: u16 = 0x0022;
    pub const UDT: u16 = 0x0030;
    pub const TUPLE: u16 = 0x0031;
}

/// Map a column type id to a human-readable name.
pub fn type_name(id: u16) -> &'static str {
    match id {
        cql_type::CUSTOM => "custom",
        cql_type::ASCII => "ascii",
        cql_type::BIGINT => "bigint",
        cql_type::BLOB => "blob",
        cql_type::BOOLEAN => "boolean",
        cql_type::COUNTER => "counter",
        cql_type::DECIMAL => "decimal",
        cql_type::DOUBLE => "double",
        cql_type::FLOAT => "float",
        cql_type::INT => "int",
        cql_type::TIMESTAMP => "timestamp",
        cql_type::UUID => "uuid",
        cql_type::VARCHAR => "varchar",
        cql_type::VARINT => "varint",
        cql_type::TIMEUUID => "timeuuid",
        cql_type::INET => "inet",
        cql_type::DATE => "date",
        cql_type::TIME => "time",
        cql_type::SMALLINT => "smallint",
        cql_type::TINYINT => "tinyint",
        cql_type::LIST => "list",
        cql_type::MAP => "map",
        cql_type::SET => "set",
        cql_type::UDT => "udt",
        cql_type::TUPLE => "tuple",
        _ => "unknown",
    }
}

/// Consistency levels the tool accepts in its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
}

impl Consistency {
    /// Wire code for the QUERY message.
    pub fn code(self) -> u16 {
        match self {
            Consistency::Any => 0x0000,
            Consistency::One => 0x0001,
            Consistency::Two => 0x0002,
            Consistency::Three => 0x0003,
            Consistency::Quorum => 0x0004,
            Consistency::All => 0x0005,
            Consistency::LocalQuorum => 0x0006,
            Consistency::EachQuorum => 0x0007,
            Consistency::LocalOne => 0x000A,
        }
    }

    /// Parse a configuration name such as `"local_quorum"`.
    pub fn parse(name: &str) -> Option<Consistency> {
        match name {
            "any" => Some(Consistency::Any),
            "one" => Some(Consistency::One),
            "two" => Some(Consistency::Two),
            "three" => Some(Consistency::Three),
            "quorum" => Some(Consistency::Quorum),
            "all" => Some(Consistency::All),
            "local_quorum" => Some(Consistency::LocalQuorum),
            "each_quorum" => Some(Consistency::EachQuorum),
            "local_one" => Some(Consistency::LocalOne),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Consistency::Any => "any",
            Consistency::One => "one",
            Consistency::Two => "two",
            Consistency::Three => "three",
            Consistency::Quorum => "quorum",
            Consistency::All => "all",
            Consistency::LocalQuorum => "local_quorum",
            Consistency::EachQuorum => "each_quorum",
            Consistency::LocalOne => "local_one",
        }
    }
}

/// A value bound into a QUERY message.
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    Text(String),
    Int(i32),
    BigInt(i64),
    Boolean(bool),
    /// Millisecond-precision timestamp.
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

impl CqlValue {
    /// Serialized body of the value, without the length prefix.
    pub fn body(&self) -> Vec<u8> {
        match self {
            CqlValue::Text(s) => s.as_bytes().to_vec(),
            CqlValue::Int(v) => v.to_be_bytes().to_vec(),
            CqlValue::BigInt(v) => v.to_be_bytes().to_vec(),
            CqlValue::Boolean(v) => vec![u8::from(*v)],
            CqlValue::Timestamp(ts) => ts.timestamp_millis().to_be_bytes().to_vec(),
            CqlValue::Uuid(u) => u.as_bytes().to_vec(),
        }
    }
}

/// Column metadata from a RESULT rows frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub type_id: u16,
}

/// A decoded result row. Cells are raw bytes; accessors decode on demand and
/// return `None` for nulls, missing columns, and malformed cells.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[ColumnSpec]>,
    cells: Vec<Option<Vec<u8>>>,
}

impl Row {
    pub fn new(columns: Arc<[ColumnSpec]>, cells: Vec<Option<Vec<u8>>>) -> Self {
        Self { columns, cells }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    fn cell(&self, name: &str) -> Option<&[u8]> {
        let idx = self.columns.iter().position(|c| c.name == name)?;
        self.cells.get(idx)?.as_deref()
    }

    pub fn get_str(&self, name: &str) -> Option<String> {
        self.cell(name)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn get_i32(&self, name: &str) -> Option<i32> {
        let bytes: [u8; 4] = self.cell(name)?.try_into().ok()?;
        Some(i32::from_be_bytes(bytes))
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        let bytes: [u8; 8] = self.cell(name)?.try_into().ok()?;
        Some(i64::from_be_bytes(bytes))
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        let cell = self.cell(name)?;
        Some(cell.first().copied()? != 0)
    }

    pub fn get_timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        let millis = self.get_i64(name)?;
        Utc.timestamp_millis_opt(millis).single()
    }

    pub fn get_uuid(&self, name: &str) -> Option<Uuid> {
        Uuid::from_slice(self.cell(name)?).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(columns: Vec<ColumnSpec>, cells: Vec<Option<Vec<u8>>>) -> Row {
        Row::new(columns.into(), cells)
    }

    #[test]
    fn test_type_name() {
        assert_eq!(type_name(cql_type::VARCHAR), "varchar");
        assert_eq!(type_name(cql_type::UUID), "uuid");
        assert_eq!(type_name(cql_type::TIMESTAMP), "timestamp");
        assert_eq!(type_name(0x7777), "unknown");
    }

    #[test]
    fn consistency_round_trips_config_names() {
        for name in [
            "any",
            "one",
            "two",
            "three",
            "quorum",
            "all",
            "local_quorum",
            "each_quorum",
            "local_one",
        ] {
            let level = Consistency::parse(name).unwrap_or_else(|| panic!("{name} should parse"));
            assert_eq!(level.as_str(), name);
        }
        assert!(Consistency::parse("serial").is_none());
        assert!(Consistency::parse("QUORUM").is_none());
    }

    #[test]
    fn consistency_wire_codes() {
        assert_eq!(Consistency::Any.code(), 0x0000);
        assert_eq!(Consistency::Quorum.code(), 0x0004);
        assert_eq!(Consistency::LocalOne.code(), 0x000A);
    }

    #[test]
    fn value_bodies_are_big_endian() {
        assert_eq!(CqlValue::Int(1).body(), vec![0, 0, 0, 1]);
        assert_eq!(CqlValue::BigInt(-1).body(), vec![0xFF; 8]);
        assert_eq!(CqlValue::Boolean(true).body(), vec![1]);
        assert_eq!(CqlValue::Text("ok".into()).body(), b"ok".to_vec());
        let ts = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        assert_eq!(
            CqlValue::Timestamp(ts).body(),
            1_700_000_000_000i64.to_be_bytes().to_vec()
        );
    }

    #[test]
    fn row_accessors_decode_cells() {
        let r = row(
            vec![
                ColumnSpec { name: "name".into(), type_id: cql_type::VARCHAR },
                ColumnSpec { name: "count".into(), type_id: cql_type::INT },
                ColumnSpec { name: "ok".into(), type_id: cql_type::BOOLEAN },
                ColumnSpec { name: "at".into(), type_id: cql_type::TIMESTAMP },
                ColumnSpec { name: "gone".into(), type_id: cql_type::VARCHAR },
            ],
            vec![
                Some(b"users".to_vec()),
                Some(7i32.to_be_bytes().to_vec()),
                Some(vec![1]),
                Some(1_700_000_000_000i64.to_be_bytes().to_vec()),
                None,
            ],
        );

        assert_eq!(r.get_str("name").as_deref(), Some("users"));
        assert_eq!(r.get_i32("count"), Some(7));
        assert_eq!(r.get_bool("ok"), Some(true));
        assert_eq!(
            r.get_timestamp("at").map(|t| t.timestamp_millis()),
            Some(1_700_000_000_000)
        );
        assert_eq!(r.get_str("gone"), None);
        assert_eq!(r.get_str("missing_column"), None);
    }

    #[test]
    fn row_uuid_accessor() {
        let id = Uuid::new_v4();
        let r = row(
            vec![ColumnSpec { name: "schema_version".into(), type_id: cql_type::UUID }],
            vec![Some(id.as_bytes().to_vec())],
        );
        assert_eq!(r.get_uuid("schema_version"), Some(id));
    }
}
