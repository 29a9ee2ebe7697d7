//! Response frame decoding.
//!
//! Pure, synchronous: the session feeds accumulated bytes in, complete
//! frames come out. Only the response shapes the engine actually receives
//! are decoded; anything else is a protocol error.

use std::sync::Arc;

use bytes::BytesMut;

use crate::error::{CqlError, CqlResult};

use super::{cql_type, ColumnSpec, Row};

const HEADER_LEN: usize = 9;
const FLAG_COMPRESSED: u8 = 0x01;

/// A complete response frame.
#[derive(Debug)]
pub struct Frame {
    pub opcode: u8,
    pub body: Vec<u8>,
}

impl Frame {
    /// Try to decode one frame from the front of `buf`. Returns `None` when
    /// more bytes are needed; consumes the frame from `buf` on success.
    pub fn decode(buf: &mut BytesMut) -> CqlResult<Option<Frame>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let flags = buf[1];
        if flags & FLAG_COMPRESSED != 0 {
            return Err(CqlError::Protocol(
                "server sent a compressed frame but compression was not negotiated".to_string(),
            ));
        }

        let body_len = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) as usize;
        if buf.len() < HEADER_LEN + body_len {
            return Ok(None);
        }

        let header = buf.split_to(HEADER_LEN);
        let body = buf.split_to(body_len).to_vec();
        Ok(Some(Frame {
            opcode: header[4],
            body,
        }))
    }
}

/// Decoded RESULT frame.
#[derive(Debug)]
pub enum QueryResult {
    Void,
    Rows(Vec<Row>),
    SetKeyspace(String),
    SchemaChange,
}

impl QueryResult {
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            QueryResult::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }
}

/// Parse an ERROR body into (code, message).
pub fn parse_error(body: &[u8]) -> CqlResult<(i32, String)> {
    let mut cur = Cursor::new(body);
    let code = cur.read_i32()?;
    let message = cur.read_string()?;
    Ok((code, message))
}

/// Parse an AUTHENTICATE body into the authenticator class name.
pub fn parse_authenticate(body: &[u8]) -> CqlResult<String> {
    Cursor::new(body).read_string()
}

/// Parse a RESULT body.
pub fn parse_result(body: &[u8]) -> CqlResult<QueryResult> {
    const KIND_VOID: i32 = 0x0001;
    const KIND_ROWS: i32 = 0x0002;
    const KIND_SET_KEYSPACE: i32 = 0x0003;
    const KIND_PREPARED: i32 = 0x0004;
    const KIND_SCHEMA_CHANGE: i32 = 0x0005;

    let mut cur = Cursor::new(body);
    match cur.read_i32()? {
        KIND_VOID => Ok(QueryResult::Void),
        KIND_ROWS => parse_rows(&mut cur),
        KIND_SET_KEYSPACE => Ok(QueryResult::SetKeyspace(cur.read_string()?)),
        KIND_SCHEMA_CHANGE => Ok(QueryResult::SchemaChange),
        KIND_PREPARED => Err(CqlError::Protocol(
            "unexpected prepared result; this client never prepares statements".to_string(),
        )),
        kind => Err(CqlError::Protocol(format!("unknown result kind {kind}"))),
    }
}

fn parse_rows(cur: &mut Cursor<'_>) -> CqlResult<QueryResult> {
    const FLAG_GLOBAL_TABLES_SPEC: i32 = 0x0001;
    const FLAG_HAS_MORE_PAGES: i32 = 0x0002;
    const FLAG_NO_METADATA: i32 = 0x0004;

    let flags = cur.read_i32()?;
    let columns_count = cur.read_i32()?;

    if flags & FLAG_HAS_MORE_PAGES != 0 {
        // Paging state; the engine's result sets are small enough that it is
        // read and dropped.
        cur.read_bytes()?;
    }
    if flags & FLAG_NO_METADATA != 0 {
        return Err(CqlError::Protocol(
            "rows metadata missing; skip_metadata was not requested".to_string(),
        ));
    }

    let global = flags & FLAG_GLOBAL_TABLES_SPEC != 0;
    if global {
        cur.read_string()?; // keyspace
        cur.read_string()?; // table
    }

    let mut columns = Vec::with_capacity(columns_count.max(0) as usize);
    for _ in 0..columns_count {
        if !global {
            cur.read_string()?;
            cur.read_string()?;
        }
        let name = cur.read_string()?;
        let type_id = read_type(cur)?;
        columns.push(ColumnSpec { name, type_id });
    }
    let columns: Arc<[ColumnSpec]> = columns.into();

    let rows_count = cur.read_i32()?;
    let mut rows = Vec::with_capacity(rows_count.max(0) as usize);
    for _ in 0..rows_count {
        let mut cells = Vec::with_capacity(columns.len());
        for _ in 0..columns.len() {
            cells.push(cur.read_bytes()?.map(<[u8]>::to_vec));
        }
        rows.push(Row::new(Arc::clone(&columns), cells));
    }

    Ok(QueryResult::Rows(rows))
}

/// Read a type option, descending into collection element types so the
/// cursor ends up past the whole spec. Returns the outermost type id.
fn read_type(cur: &mut Cursor<'_>) -> CqlResult<u16> {
    let id = cur.read_u16()?;
    match id {
        cql_type::CUSTOM => {
            cur.read_string()?;
        }
        cql_type::LIST | cql_type::SET => {
            read_type(cur)?;
        }
        cql_type::MAP => {
            read_type(cur)?;
            read_type(cur)?;
        }
        cql_type::UDT => {
            cur.read_string()?; // keyspace
            cur.read_string()?; // type name
            let fields = cur.read_u16()?;
            for _ in 0..fields {
                cur.read_string()?;
                read_type(cur)?;
            }
        }
        cql_type::TUPLE => {
            let members = cur.read_u16()?;
            for _ in 0..members {
                read_type(cur)?;
            }
        }
        _ => {}
    }
    Ok(id)
}

/// Bounds-checked reader over a response body.
struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> CqlResult<&'a [u8]> {
        if self.buf.len() < n {
            return Err(CqlError::Protocol(format!(
                "truncated frame body: wanted {n} bytes, {} left",
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn read_u16(&mut self) -> CqlResult<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> CqlResult<i32> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_string(&mut self) -> CqlResult<String> {
        let len = self.read_u16()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    /// [bytes]: i32 length, negative means null.
    fn read_bytes(&mut self) -> CqlResult<Option<&'a [u8]>> {
        let len = self.read_i32()?;
        if len < 0 {
            return Ok(None);
        }
        Ok(Some(self.take(len as usize)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn push_string(buf: &mut Vec<u8>, s: &str) {
        buf.put_u16(s.len() as u16);
        buf.extend_from_slice(s.as_bytes());
    }

    fn push_cell(buf: &mut Vec<u8>, cell: Option<&[u8]>) {
        match cell {
            Some(bytes) => {
                buf.put_i32(bytes.len() as i32);
                buf.extend_from_slice(bytes);
            }
            None => buf.put_i32(-1),
        }
    }

    fn frame_bytes(opcode: u8, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u8(0x84);
        buf.put_u8(0);
        buf.put_i16(0);
        buf.put_u8(opcode);
        buf.put_u32(body.len() as u32);
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn decode_waits_for_a_complete_frame() {
        let full = frame_bytes(super::super::opcode::READY, &[]);

        let mut partial = BytesMut::from(&full[..5]);
        assert!(Frame::decode(&mut partial).unwrap().is_none());

        let mut whole = BytesMut::from(full.as_slice());
        let frame = Frame::decode(&mut whole).unwrap().unwrap();
        assert_eq!(frame.opcode, super::super::opcode::READY);
        assert!(frame.body.is_empty());
        assert!(whole.is_empty());
    }

    #[test]
    fn decode_leaves_following_frames_in_the_buffer() {
        let mut bytes = frame_bytes(super::super::opcode::READY, &[]);
        bytes.extend_from_slice(&frame_bytes(super::super::opcode::AUTH_SUCCESS, &[0, 0, 0, 0]));
        let mut buf = BytesMut::from(bytes.as_slice());

        let first = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.opcode, super::super::opcode::READY);
        let second = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.opcode, super::super::opcode::AUTH_SUCCESS);
        assert!(buf.is_empty());
    }

    #[test]
    fn compressed_frames_are_rejected() {
        let mut bytes = frame_bytes(super::super::opcode::RESULT, &[]);
        bytes[1] = 0x01;
        let mut buf = BytesMut::from(bytes.as_slice());
        assert!(matches!(
            Frame::decode(&mut buf),
            Err(CqlError::Protocol(_))
        ));
    }

    #[test]
    fn parse_error_reads_code_and_message() {
        let mut body = Vec::new();
        body.put_i32(0x1000);
        push_string(&mut body, "Cannot achieve consistency level QUORUM");
        let (code, message) = parse_error(&body).unwrap();
        assert_eq!(code, 0x1000);
        assert!(message.contains("QUORUM"));
    }

    #[test]
    fn parse_result_void() {
        let mut body = Vec::new();
        body.put_i32(1);
        assert!(matches!(parse_result(&body).unwrap(), QueryResult::Void));
    }

    fn rows_body() -> Vec<u8> {
        // Two columns (global table spec), two rows; second row has a null.
        let mut body = Vec::new();
        body.put_i32(2); // kind = rows
        body.put_i32(0x0001); // global tables spec
        body.put_i32(2); // column count
        push_string(&mut body, "migrate_meta");
        push_string(&mut body, "schema_migrations");
        push_string(&mut body, "version");
        body.put_u16(cql_type::VARCHAR);
        push_string(&mut body, "success");
        body.put_u16(cql_type::BOOLEAN);
        body.put_i32(2); // row count
        push_cell(&mut body, Some(b"001"));
        push_cell(&mut body, Some(&[1]));
        push_cell(&mut body, Some(b"002"));
        push_cell(&mut body, None);
        body
    }

    #[test]
    fn parse_result_rows_with_global_spec_and_nulls() {
        let rows = match parse_result(&rows_body()).unwrap() {
            QueryResult::Rows(rows) => rows,
            other => panic!("expected rows, got {other:?}"),
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_str("version").as_deref(), Some("001"));
        assert_eq!(rows[0].get_bool("success"), Some(true));
        assert_eq!(rows[1].get_str("version").as_deref(), Some("002"));
        assert_eq!(rows[1].get_bool("success"), None);
    }

    #[test]
    fn parse_result_rows_with_per_column_spec() {
        let mut body = Vec::new();
        body.put_i32(2);
        body.put_i32(0); // no global spec
        body.put_i32(1);
        push_string(&mut body, "system");
        push_string(&mut body, "local");
        push_string(&mut body, "cluster_name");
        body.put_u16(cql_type::VARCHAR);
        body.put_i32(1);
        push_cell(&mut body, Some(b"Test Cluster"));

        let rows = parse_result(&body).unwrap().into_rows();
        assert_eq!(rows[0].get_str("cluster_name").as_deref(), Some("Test Cluster"));
    }

    #[test]
    fn collection_typed_columns_are_skipped_correctly() {
        // One map<varchar, varchar> column followed by a varchar column;
        // a naive type reader would desync on the element types.
        let mut body = Vec::new();
        body.put_i32(2);
        body.put_i32(0x0001);
        body.put_i32(2);
        push_string(&mut body, "ks");
        push_string(&mut body, "t");
        push_string(&mut body, "replication");
        body.put_u16(cql_type::MAP);
        body.put_u16(cql_type::VARCHAR);
        body.put_u16(cql_type::VARCHAR);
        push_string(&mut body, "name");
        body.put_u16(cql_type::VARCHAR);
        body.put_i32(1);
        push_cell(&mut body, Some(b"\x00\x00"));
        push_cell(&mut body, Some(b"ks1"));

        let rows = parse_result(&body).unwrap().into_rows();
        assert_eq!(rows[0].get_str("name").as_deref(), Some("ks1"));
        assert_eq!(rows[0].columns()[0].type_id, cql_type::MAP);
    }

    #[test]
    fn truncated_bodies_are_protocol_errors() {
        let body = rows_body();
        assert!(matches!(
            parse_result(&body[..body.len() - 3]),
            Err(CqlError::Protocol(_))
        ));
    }

    #[test]
    fn parse_set_keyspace() {
        let mut body = Vec::new();
        body.put_i32(3);
        push_string(&mut body, "migrate_meta");
        match parse_result(&body).unwrap() {
            QueryResult::SetKeyspace(ks) => assert_eq!(ks, "migrate_meta"),
            other => panic!("expected set keyspace, got {other:?}"),
        }
    }
}
