use bytes::{Buf, BufMut, Bytes, BytesMut};
use postgres_types::Oid;

use super::{Message, codec};
use crate::error::{GaussWireError, GaussWireResult};

/// Messages made of a type byte and a length only.
macro_rules! empty_message {
    ($(#[$doc:meta])* $name:ident, $type_const:ident, $type_byte:expr) => {
        $(#[$doc])*
        #[derive(PartialEq, Eq, Debug, Default, new)]
        pub struct $name;

        pub const $type_const: u8 = $type_byte;

        impl Message for $name {
            #[inline]
            fn message_type() -> Option<u8> {
                Some($type_const)
            }

            #[inline]
            fn message_length(&self) -> usize {
                4
            }

            #[inline]
            fn encode_body(&self, _buf: &mut BytesMut) -> GaussWireResult<()> {
                Ok(())
            }

            #[inline]
            fn decode_body(_buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
                Ok($name)
            }
        }
    };
}

/// Request from frontend to parse a prepared query string
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, new)]
pub struct Parse {
    pub name: Option<String>,
    pub query: String,
    pub type_oids: Vec<Oid>,
}

pub const MESSAGE_TYPE_BYTE_PARSE: u8 = b'P';

impl Message for Parse {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_PARSE)
    }

    fn message_length(&self) -> usize {
        4 + codec::option_string_len(&self.name) // name
            + (1 + self.query.len()) // query
            + 2 + (4 * self.type_oids.len()) // type oids
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        codec::put_option_cstring(buf, &self.name);
        codec::put_cstring(buf, &self.query);

        buf.put_i16(self.type_oids.len() as i16);
        for oid in &self.type_oids {
            buf.put_u32(*oid);
        }

        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        let name = codec::get_cstring(buf)?;
        let query = codec::get_cstring_or_empty(buf)?;
        codec::ensure_remaining(buf, 2, "Parse")?;
        let type_oid_count = buf.get_i16().max(0) as usize;

        codec::ensure_remaining(buf, type_oid_count * 4, "Parse")?;
        let type_oids = (0..type_oid_count).map(|_| buf.get_u32()).collect();

        Ok(Parse {
            name,
            query,
            type_oids,
        })
    }
}

empty_message!(
    /// Response for Parse command, sent from backend to frontend
    ParseComplete,
    MESSAGE_TYPE_BYTE_PARSE_COMPLETE,
    b'1'
);

/// Closing the prepared statement or portal
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, new)]
pub struct Close {
    pub target_type: u8,
    pub name: Option<String>,
}

pub const TARGET_TYPE_BYTE_STATEMENT: u8 = b'S';
pub const TARGET_TYPE_BYTE_PORTAL: u8 = b'P';

pub const MESSAGE_TYPE_BYTE_CLOSE: u8 = b'C';

impl Message for Close {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_CLOSE)
    }

    fn message_length(&self) -> usize {
        4 + 1 + codec::option_string_len(&self.name)
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        buf.put_u8(self.target_type);
        codec::put_option_cstring(buf, &self.name);
        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        codec::ensure_remaining(buf, 1, "Close")?;
        let target_type = buf.get_u8();
        let name = codec::get_cstring(buf)?;

        Ok(Close { target_type, name })
    }
}

empty_message!(
    /// Response for Close command, sent from backend to frontend
    CloseComplete,
    MESSAGE_TYPE_BYTE_CLOSE_COMPLETE,
    b'3'
);

fn values_length(values: &[Option<Bytes>]) -> usize {
    values
        .iter()
        .map(|p| 4 + p.as_ref().map(|data| data.len()).unwrap_or(0))
        .sum::<usize>()
}

fn put_values(buf: &mut BytesMut, values: &[Option<Bytes>]) {
    for v in values {
        if let Some(v) = v {
            buf.put_i32(v.len() as i32);
            buf.put_slice(v.as_ref());
        } else {
            buf.put_i32(-1);
        }
    }
}

fn get_values(
    buf: &mut BytesMut,
    count: usize,
    what: &'static str,
) -> GaussWireResult<Vec<Option<Bytes>>> {
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        codec::ensure_remaining(buf, 4, what)?;
        let data_len = buf.get_i32();
        if data_len >= 0 {
            codec::ensure_remaining(buf, data_len as usize, what)?;
            values.push(Some(buf.split_to(data_len as usize).freeze()));
        } else {
            values.push(None);
        }
    }
    Ok(values)
}

fn get_format_codes(buf: &mut BytesMut, what: &'static str) -> GaussWireResult<Vec<i16>> {
    codec::ensure_remaining(buf, 2, what)?;
    let len = buf.get_i16().max(0) as usize;
    codec::ensure_remaining(buf, len * 2, what)?;
    Ok((0..len).map(|_| buf.get_i16()).collect())
}

/// Bind command, for executing prepared statement
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, new)]
pub struct Bind {
    pub portal_name: Option<String>,
    pub statement_name: Option<String>,
    pub parameter_format_codes: Vec<i16>,
    // None for Null data
    pub parameters: Vec<Option<Bytes>>,

    pub result_column_format_codes: Vec<i16>,
}

pub const MESSAGE_TYPE_BYTE_BIND: u8 = b'B';

impl Message for Bind {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_BIND)
    }

    fn message_length(&self) -> usize {
        4 + codec::option_string_len(&self.portal_name) + codec::option_string_len(&self.statement_name)
            + 2 // parameter_format_code len
            + (2 * self.parameter_format_codes.len()) // parameter_format_codes
            + 2 // parameters len
            + values_length(&self.parameters) // parameters
            + 2 // result_format_code len
            + (2 * self.result_column_format_codes.len()) // result_format_codes
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        codec::put_option_cstring(buf, &self.portal_name);
        codec::put_option_cstring(buf, &self.statement_name);

        buf.put_i16(self.parameter_format_codes.len() as i16);
        for c in &self.parameter_format_codes {
            buf.put_i16(*c);
        }

        buf.put_i16(self.parameters.len() as i16);
        put_values(buf, &self.parameters);

        buf.put_i16(self.result_column_format_codes.len() as i16);
        for c in &self.result_column_format_codes {
            buf.put_i16(*c);
        }

        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        let portal_name = codec::get_cstring(buf)?;
        let statement_name = codec::get_cstring(buf)?;

        let parameter_format_codes = get_format_codes(buf, "Bind")?;

        codec::ensure_remaining(buf, 2, "Bind")?;
        // more than i16::MAX parameters are sent as an unsigned count
        let parameter_len = buf.get_u16() as usize;
        let parameters = get_values(buf, parameter_len, "Bind")?;

        let result_column_format_codes = get_format_codes(buf, "Bind")?;

        Ok(Bind {
            portal_name,
            statement_name,
            parameter_format_codes,
            parameters,
            result_column_format_codes,
        })
    }
}

/// openGauss batch bind, binds and executes many parameter rows of one
/// prepared statement in a single frame.
///
/// Layout: i32 batch count, empty portal name, statement name, i16 column
/// count, one format code per column, i16 0, i16 column count, the values
/// row by row, then an embedded execute (`E`, empty portal, i32 0).
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, new)]
pub struct BatchBind {
    pub statement_name: String,
    pub column_format_codes: Vec<i16>,
    // row major, `column_format_codes.len()` values per row
    pub values: Vec<Option<Bytes>>,
}

pub const MESSAGE_TYPE_BYTE_BATCH_BIND: u8 = b'U';

/// Largest frame the server accepts for a batch bind.
pub const MAX_BATCH_BIND_LENGTH: u64 = 0x3fffffff;

impl BatchBind {
    pub fn batch_count(&self) -> usize {
        if self.column_format_codes.is_empty() {
            0
        } else {
            self.values.len() / self.column_format_codes.len()
        }
    }

    /// Frame length computed without allocating, checked against
    /// [`MAX_BATCH_BIND_LENGTH`] before sending.
    pub fn frame_length(&self) -> u64 {
        self.message_length() as u64
    }
}

impl Message for BatchBind {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_BATCH_BIND)
    }

    fn message_length(&self) -> usize {
        let ncols = self.column_format_codes.len();
        4 + 4 // length, batch count
            + 1 // empty portal name
            + self.statement_name.len() + 1
            + 2 + ncols * 2 // format codes
            + 2 + 2 // zero, column count
            + values_length(&self.values)
            + 1 + 1 + 4 // embedded execute
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        let ncols = self.column_format_codes.len();

        buf.put_i32(self.batch_count() as i32);
        buf.put_u8(b'\0');
        codec::put_cstring(buf, &self.statement_name);

        buf.put_i16(ncols as i16);
        for c in &self.column_format_codes {
            buf.put_i16(*c);
        }
        buf.put_i16(0);
        buf.put_i16(ncols as i16);

        put_values(buf, &self.values);

        buf.put_u8(MESSAGE_TYPE_BYTE_EXECUTE);
        buf.put_u8(b'\0');
        buf.put_i32(0);

        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        codec::ensure_remaining(buf, 4, "BatchBind")?;
        let batch_count = buf.get_i32().max(0) as usize;
        // portal name is always empty
        codec::get_cstring(buf)?;
        let statement_name = codec::get_cstring_or_empty(buf)?;

        let column_format_codes = get_format_codes(buf, "BatchBind")?;
        codec::ensure_remaining(buf, 4, "BatchBind")?;
        buf.advance(2);
        let ncols = buf.get_i16().max(0) as usize;
        if ncols != column_format_codes.len() {
            return Err(GaussWireError::MalformedMessage("BatchBind"));
        }

        let values = get_values(buf, batch_count * ncols, "BatchBind")?;

        codec::ensure_remaining(buf, 6, "BatchBind")?;
        if buf.get_u8() != MESSAGE_TYPE_BYTE_EXECUTE {
            return Err(GaussWireError::MalformedMessage("BatchBind"));
        }
        buf.advance(5);

        Ok(BatchBind {
            statement_name,
            column_format_codes,
            values,
        })
    }
}

empty_message!(
    /// Success response for `Bind`
    BindComplete,
    MESSAGE_TYPE_BYTE_BIND_COMPLETE,
    b'2'
);

/// Describe command fron frontend to backend. For getting information of
/// particular portal or statement
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, new)]
pub struct Describe {
    pub target_type: u8,
    pub name: Option<String>,
}

pub const MESSAGE_TYPE_BYTE_DESCRIBE: u8 = b'D';

impl Message for Describe {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_DESCRIBE)
    }

    fn message_length(&self) -> usize {
        4 + 1 + codec::option_string_len(&self.name)
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        buf.put_u8(self.target_type);
        codec::put_option_cstring(buf, &self.name);
        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        codec::ensure_remaining(buf, 1, "Describe")?;
        let target_type = buf.get_u8();
        let name = codec::get_cstring(buf)?;

        Ok(Describe { target_type, name })
    }
}

/// Parameter types of a described statement
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, Default, new)]
pub struct ParameterDescription {
    pub types: Vec<Oid>,
}

pub const MESSAGE_TYPE_BYTE_PARAMETER_DESCRITION: u8 = b't';

impl Message for ParameterDescription {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_PARAMETER_DESCRITION)
    }

    fn message_length(&self) -> usize {
        4 + 2 + self.types.len() * 4
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        buf.put_u16(self.types.len() as u16);
        for t in &self.types {
            buf.put_u32(*t);
        }
        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        codec::ensure_remaining(buf, 2, "ParameterDescription")?;
        // unsigned, statements may take up to 65535 parameters
        let count = buf.get_u16() as usize;
        codec::ensure_remaining(buf, count * 4, "ParameterDescription")?;
        let types = (0..count).map(|_| buf.get_u32()).collect();
        Ok(ParameterDescription { types })
    }
}

empty_message!(
    /// The described statement or portal returns no rows
    NoData,
    MESSAGE_TYPE_BYTE_NO_DATA,
    b'n'
);

/// Execute portal by its name
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, new)]
pub struct Execute {
    pub name: Option<String>,
    pub max_rows: i32,
}

pub const MESSAGE_TYPE_BYTE_EXECUTE: u8 = b'E';

impl Message for Execute {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_EXECUTE)
    }

    fn message_length(&self) -> usize {
        4 + codec::option_string_len(&self.name) + 4
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        codec::put_option_cstring(buf, &self.name);
        buf.put_i32(self.max_rows);
        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        let name = codec::get_cstring(buf)?;
        codec::ensure_remaining(buf, 4, "Execute")?;
        let max_rows = buf.get_i32();

        Ok(Execute { name, max_rows })
    }
}

empty_message!(Flush, MESSAGE_TYPE_BYTE_FLUSH, b'H');

empty_message!(
    /// End of an extended query cycle, answered by `ReadyForQuery`
    Sync,
    MESSAGE_TYPE_BYTE_SYNC,
    b'S'
);

empty_message!(PortalSuspended, MESSAGE_TYPE_BYTE_PORTAL_SUSPENDED, b's');

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_bind_layout() {
        let batch = BatchBind::new(
            "gs_1".to_owned(),
            vec![0, 1],
            vec![
                Some(Bytes::from_static(b"7")),
                Some(Bytes::from_static(b"\xde\xad")),
                Some(Bytes::from_static(b"8")),
                None,
            ],
        );

        let mut buf = BytesMut::new();
        batch.encode(&mut buf).unwrap();

        let mut expected = BytesMut::new();
        expected.put_u8(b'U');
        expected.put_i32(4 + 4 + 1 + 5 + 2 + 4 + 2 + 2 + (5 + 6 + 5 + 4) + 6);
        expected.put_i32(2);
        expected.put_u8(0);
        expected.put_slice(b"gs_1\0");
        expected.put_i16(2);
        expected.put_i16(0);
        expected.put_i16(1);
        expected.put_i16(0);
        expected.put_i16(2);
        expected.put_i32(1);
        expected.put_slice(b"7");
        expected.put_i32(2);
        expected.put_slice(b"\xde\xad");
        expected.put_i32(1);
        expected.put_slice(b"8");
        expected.put_i32(-1);
        expected.put_u8(b'E');
        expected.put_u8(0);
        expected.put_i32(0);

        assert_eq!(expected, buf);
        assert_eq!(buf.len() as u64 - 1, batch.frame_length());
    }

    #[test]
    fn test_parse_without_name() {
        let parse = Parse::new(None, "select 1".to_owned(), vec![]);
        let mut buf = BytesMut::new();
        parse.encode(&mut buf).unwrap();
        assert_eq!(&b"P\0\0\0\x10\0select 1\0\0\0"[..], &buf[..]);
    }
}
