use bytes::{Buf, BufMut, BytesMut};
use postgres_types::Oid;

use super::Message;
use super::codec;
use crate::error::{GaussWireError, GaussWireResult};

pub const FORMAT_CODE_TEXT: i16 = 0;
pub const FORMAT_CODE_BINARY: i16 = 1;

#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, Default, Clone, new)]
pub struct FieldDescription {
    // the field name
    pub name: String,
    // the object ID of table, default to 0 if not a table
    pub table_id: i32,
    // the attribute number of the column, default to 0 if not a column from table
    pub column_id: i16,
    // the object ID of the data type
    pub type_id: Oid,
    // the size of data type, negative values denote variable-width types
    pub type_size: i16,
    // the type modifier, encrypted columns carry the plain type oid here
    pub type_modifier: i32,
    // the format code being used for the filed, will be 0 or 1 for now
    pub format_code: i16,
}

#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, Default, new)]
pub struct RowDescription {
    pub fields: Vec<FieldDescription>,
}

pub const MESSAGE_TYPE_BYTE_ROW_DESCRITION: u8 = b'T';

impl Message for RowDescription {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_ROW_DESCRITION)
    }

    fn message_length(&self) -> usize {
        4 + 2
            + self
                .fields
                .iter()
                .map(|f| f.name.len() + 1 + 4 + 2 + 4 + 2 + 4 + 2)
                .sum::<usize>()
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        buf.put_i16(self.fields.len() as i16);

        for field in &self.fields {
            codec::put_cstring(buf, &field.name);
            buf.put_i32(field.table_id);
            buf.put_i16(field.column_id);
            buf.put_u32(field.type_id);
            buf.put_i16(field.type_size);
            buf.put_i32(field.type_modifier);
            buf.put_i16(field.format_code);
        }

        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        codec::ensure_remaining(buf, 2, "RowDescription")?;
        let fields_len = buf.get_i16().max(0) as usize;
        let mut fields = Vec::with_capacity(fields_len);

        for _ in 0..fields_len {
            let name = codec::get_cstring_or_empty(buf)?;
            codec::ensure_remaining(buf, 18, "RowDescription")?;
            let field = FieldDescription {
                name,
                table_id: buf.get_i32(),
                column_id: buf.get_i16(),
                type_id: buf.get_u32(),
                type_size: buf.get_i16(),
                type_modifier: buf.get_i32(),
                format_code: buf.get_i16(),
            };

            fields.push(field);
        }

        Ok(RowDescription { fields })
    }
}

/// Data structure for postgresql wire protocol `DataRow` message.
///
/// Data can be represented as text or binary format as specified by format
/// codes from previous `RowDescription` message. `data` holds the raw column
/// values, each prefixed by its i32 length, -1 for NULL.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, Default, Clone, new)]
pub struct DataRow {
    pub field_count: usize,
    pub data: BytesMut,
}

impl DataRow {
    /// Split the row into its column values, `None` for NULL.
    pub fn into_values(mut self) -> GaussWireResult<Vec<Option<BytesMut>>> {
        let mut values = Vec::with_capacity(self.field_count);
        for _ in 0..self.field_count {
            codec::ensure_remaining(&self.data, 4, "DataRow")?;
            let len = self.data.get_i32();
            if len < 0 {
                values.push(None);
            } else {
                let len = len as usize;
                if self.data.remaining() < len {
                    return Err(GaussWireError::MalformedMessage("DataRow"));
                }
                values.push(Some(self.data.split_to(len)));
            }
        }
        Ok(values)
    }
}

pub const MESSAGE_TYPE_BYTE_DATA_ROW: u8 = b'D';

impl Message for DataRow {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_DATA_ROW)
    }

    fn message_length(&self) -> usize {
        4 + 2 + self.data.len()
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        buf.put_i16(self.field_count as i16);
        buf.put_slice(&self.data);

        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, msg_len: usize) -> GaussWireResult<Self> {
        codec::ensure_remaining(buf, 2, "DataRow")?;
        let field_count = buf.get_i16().max(0) as usize;
        // minus packet_len and field count i16
        let data = buf.split_to(msg_len - 6);

        Ok(DataRow { field_count, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_row_values() {
        let mut row = DataRow::default();
        row.data.put_i32(2);
        row.data.put_slice(b"42");
        row.data.put_i32(-1);
        row.data.put_i32(0);
        row.field_count = 3;

        let values = row.into_values().unwrap();
        assert_eq!(3, values.len());
        assert_eq!(Some(&b"42"[..]), values[0].as_deref());
        assert!(values[1].is_none());
        assert_eq!(Some(&b""[..]), values[2].as_deref());
    }

    #[test]
    fn test_truncated_data_row() {
        let mut row = DataRow::default();
        row.data.put_i32(10);
        row.data.put_slice(b"abc");
        row.field_count = 1;
        assert!(row.into_values().is_err());
    }
}
