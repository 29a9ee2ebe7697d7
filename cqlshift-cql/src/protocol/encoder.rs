//! Request frame encoding.
//!
//! Pure, synchronous computation: build the bytes, hand them to the session.
//! Every request uses stream id 0 because the engine is strictly sequential
//! on one connection.
//!
//! Frame layout (v4):
//! - version (1 byte, request = protocol version)
//! - flags (1 byte, always 0: no compression, no tracing)
//! - stream (2 bytes, big-endian)
//! - opcode (1 byte)
//! - body length (4 bytes, big-endian)
//! - body

use bytes::{BufMut, BytesMut};

use super::{opcode, Consistency, CqlValue};

/// CQL request encoder.
pub struct CqlEncoder;

impl CqlEncoder {
    /// STARTUP with the CQL version string map.
    pub fn startup(version: u8) -> BytesMut {
        let mut body = BytesMut::new();
        write_string_map(&mut body, &[("CQL_VERSION", "3.0.0")]);
        frame(version, opcode::STARTUP, &body)
    }

    /// OPTIONS (used as a liveness probe).
    pub fn options(version: u8) -> BytesMut {
        frame(version, opcode::OPTIONS, &[])
    }

    /// AUTH_RESPONSE carrying a SASL PLAIN token.
    pub fn auth_response(version: u8, username: &str, password: &str) -> BytesMut {
        let mut token = Vec::with_capacity(username.len() + password.len() + 2);
        token.push(0);
        token.extend_from_slice(username.as_bytes());
        token.push(0);
        token.extend_from_slice(password.as_bytes());

        let mut body = BytesMut::new();
        write_bytes(&mut body, &token);
        frame(version, opcode::AUTH_RESPONSE, &body)
    }

    /// QUERY with an optional list of bound values.
    pub fn query(
        version: u8,
        statement: &str,
        consistency: Consistency,
        values: &[CqlValue],
    ) -> BytesMut {
        const FLAG_VALUES: u8 = 0x01;

        let mut body = BytesMut::new();
        write_long_string(&mut body, statement);
        body.put_u16(consistency.code());

        if values.is_empty() {
            body.put_u8(0);
        } else {
            body.put_u8(FLAG_VALUES);
            body.put_u16(values.len() as u16);
            for value in values {
                write_bytes(&mut body, &value.body());
            }
        }

        frame(version, opcode::QUERY, &body)
    }
}

fn frame(version: u8, op: u8, body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(9 + body.len());
    buf.put_u8(version);
    buf.put_u8(0); // flags
    buf.put_i16(0); // stream
    buf.put_u8(op);
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(body);
    buf
}

/// [string]: u16 length + UTF-8 bytes.
fn write_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.extend_from_slice(s.as_bytes());
}

/// [long string]: u32 length + UTF-8 bytes.
fn write_long_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

/// [string map]: u16 pair count + [string] keys and values.
fn write_string_map(buf: &mut BytesMut, pairs: &[(&str, &str)]) {
    buf.put_u16(pairs.len() as u16);
    for (k, v) in pairs {
        write_string(buf, k);
        write_string(buf, v);
    }
}

/// [bytes]: i32 length + raw bytes.
fn write_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_i32(bytes.len() as i32);
    buf.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_layout() {
        let buf = CqlEncoder::options(4);
        assert_eq!(buf[0], 0x04); // version
        assert_eq!(buf[1], 0x00); // flags
        assert_eq!(&buf[2..4], &[0, 0]); // stream
        assert_eq!(buf[4], opcode::OPTIONS);
        assert_eq!(&buf[5..9], &[0, 0, 0, 0]); // empty body
        assert_eq!(buf.len(), 9);
    }

    #[test]
    fn startup_carries_the_cql_version() {
        let buf = CqlEncoder::startup(4);
        assert_eq!(buf[4], opcode::STARTUP);
        let body = &buf[9..];
        // One pair: "CQL_VERSION" -> "3.0.0".
        assert_eq!(&body[0..2], &[0, 1]);
        assert_eq!(&body[2..4], &[0, 11]);
        assert_eq!(&body[4..15], b"CQL_VERSION");
        assert_eq!(&body[15..17], &[0, 5]);
        assert_eq!(&body[17..22], b"3.0.0");
        let declared = u32::from_be_bytes(buf[5..9].try_into().unwrap()) as usize;
        assert_eq!(declared, body.len());
    }

    #[test]
    fn auth_response_encodes_sasl_plain() {
        let buf = CqlEncoder::auth_response(4, "cassandra", "secret");
        assert_eq!(buf[4], opcode::AUTH_RESPONSE);
        let body = &buf[9..];
        let len = i32::from_be_bytes(body[0..4].try_into().unwrap()) as usize;
        let token = &body[4..4 + len];
        assert_eq!(token, b"\0cassandra\0secret");
    }

    #[test]
    fn query_without_values_has_empty_flags() {
        let buf = CqlEncoder::query(4, "SELECT 1", Consistency::Quorum, &[]);
        assert_eq!(buf[4], opcode::QUERY);
        let body = &buf[9..];
        let stmt_len = u32::from_be_bytes(body[0..4].try_into().unwrap()) as usize;
        assert_eq!(&body[4..4 + stmt_len], b"SELECT 1");
        let rest = &body[4 + stmt_len..];
        assert_eq!(&rest[0..2], &Consistency::Quorum.code().to_be_bytes());
        assert_eq!(rest[2], 0x00); // no flags
        assert_eq!(rest.len(), 3);
    }

    #[test]
    fn query_with_values_sets_the_values_flag() {
        let values = vec![CqlValue::Text("migration_lock".into()), CqlValue::Int(9)];
        let buf = CqlEncoder::query(4, "SELECT * FROM t WHERE id = ?", Consistency::One, &values);
        let body = &buf[9..];
        let stmt_len = u32::from_be_bytes(body[0..4].try_into().unwrap()) as usize;
        let rest = &body[4 + stmt_len..];
        assert_eq!(rest[2], 0x01); // values flag
        assert_eq!(&rest[3..5], &[0, 2]); // two values
        // First value: length-prefixed text.
        let v1_len = i32::from_be_bytes(rest[5..9].try_into().unwrap()) as usize;
        assert_eq!(&rest[9..9 + v1_len], b"migration_lock");
        // Second value: 4-byte big-endian int.
        let after = &rest[9 + v1_len..];
        assert_eq!(&after[0..4], &[0, 0, 0, 4]);
        assert_eq!(&after[4..8], &9i32.to_be_bytes());
    }
}
