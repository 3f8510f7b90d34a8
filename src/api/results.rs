use postgres_types::{Oid, Type};

use crate::messages::data::{FORMAT_CODE_BINARY, FORMAT_CODE_TEXT, FieldDescription};
use crate::types::oids;

/// Parsed `CommandComplete` tag.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct Tag {
    command: String,
    oid: Option<Oid>,
    rows: Option<usize>,
}

impl Tag {
    pub fn new(command: &str) -> Tag {
        Tag {
            command: command.to_owned(),
            oid: None,
            rows: None,
        }
    }

    pub fn with_rows(mut self, rows: usize) -> Tag {
        self.rows = Some(rows);
        self
    }

    pub fn with_oid(mut self, oid: Oid) -> Tag {
        self.oid = Some(oid);
        self
    }

    /// The command verb, `INSERT`, `SELECT`, `CREATE TABLE` ...
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Rows affected, only reported by commands that count rows.
    pub fn rows(&self) -> Option<usize> {
        self.rows
    }

    pub fn oid(&self) -> Option<Oid> {
        self.oid
    }
}

/// Describe encoding of a data field.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Default)]
pub enum FieldFormat {
    #[default]
    Text,
    Binary,
}

impl FieldFormat {
    /// Get format code for the encoding.
    pub fn value(&self) -> i16 {
        match self {
            Self::Text => FORMAT_CODE_TEXT,
            Self::Binary => FORMAT_CODE_BINARY,
        }
    }

    /// Parse FieldFormat from format code.
    ///
    /// 0 for text format, 1 for binary format. If the input is neither 0 nor 1,
    /// here we return text as default value.
    pub fn from(code: i16) -> Self {
        if code == FORMAT_CODE_BINARY {
            FieldFormat::Binary
        } else {
            FieldFormat::Text
        }
    }
}

/// A result column.
#[derive(Debug, new, Eq, PartialEq, Clone)]
pub struct FieldInfo {
    name: String,
    table_id: Option<i32>,
    column_id: Option<i16>,
    datatype: Type,
    type_modifier: i32,
    format: FieldFormat,
}

impl FieldInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_id(&self) -> Option<i32> {
        self.table_id
    }

    pub fn column_id(&self) -> Option<i16> {
        self.column_id
    }

    pub fn datatype(&self) -> &Type {
        &self.datatype
    }

    /// For encrypted columns this is the oid of the plain type.
    pub fn type_modifier(&self) -> i32 {
        self.type_modifier
    }

    pub fn format(&self) -> FieldFormat {
        self.format
    }

    pub(crate) fn set_format(&mut self, format: FieldFormat) {
        self.format = format;
    }

    pub fn is_encrypted(&self) -> bool {
        oids::is_encrypted(self.datatype.oid())
    }
}

impl From<FieldDescription> for FieldInfo {
    fn from(value: FieldDescription) -> Self {
        FieldInfo::new(
            value.name,
            (value.table_id != 0).then_some(value.table_id),
            (value.column_id != 0).then_some(value.column_id),
            oids::type_for_oid(value.type_id),
            value.type_modifier,
            FieldFormat::from(value.format_code),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_info_from_description() {
        let desc = FieldDescription::new("c".to_owned(), 0, 0, 4403, -1, 23, 1);
        let field = FieldInfo::from(desc);
        assert_eq!(None, field.table_id());
        assert!(field.is_encrypted());
        assert_eq!(23, field.type_modifier());
        assert_eq!(FieldFormat::Binary, field.format());
    }
}
