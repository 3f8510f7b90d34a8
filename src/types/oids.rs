//! openGauss specific type oids and the per-column decisions driven by them.
use postgres_types::{Kind, Oid, Type};

use crate::api::results::FieldFormat;

pub const RAW: Oid = 86;
pub const BLOB: Oid = 88;
pub const CLOB: Oid = 90;
pub const INT16: Oid = 34;
pub const ABSTIME: Oid = 702;
pub const RELTIME: Oid = 703;
pub const TINTERVAL: Oid = 704;
pub const NVARCHAR2: Oid = 3969;
pub const INT1: Oid = 5545;
pub const SMALLDATETIME: Oid = 9003;

// client side encrypted columns, the type modifier carries the plain type
pub const BYTEA_WITHOUT_ORDER_WITH_EQUAL_COL: Oid = 4402;
pub const BYTEA_WITHOUT_ORDER_COL: Oid = 4403;
pub const BYTEA_WITHOUT_ORDER_WITH_EQUAL_COL_ARRAY: Oid = 4404;
pub const BYTEA_WITHOUT_ORDER_COL_ARRAY: Oid = 4405;

/// Whether values of this column are ciphertext produced by the client
/// logic engine.
pub fn is_encrypted(oid: Oid) -> bool {
    matches!(
        oid,
        BYTEA_WITHOUT_ORDER_WITH_EQUAL_COL
            | BYTEA_WITHOUT_ORDER_COL
            | BYTEA_WITHOUT_ORDER_WITH_EQUAL_COL_ARRAY
            | BYTEA_WITHOUT_ORDER_COL_ARRAY
    )
}

/// Result columns of these types are requested in binary format from
/// prepared statements.
pub fn is_binary_result(oid: Oid) -> bool {
    is_encrypted(oid)
        || oid == Type::BYTEA.oid()
        || oid == Type::INT8.oid()
        || oid == Type::INT4.oid()
        || oid == Type::INT2.oid()
        || oid == Type::UUID.oid()
}

/// Decide the result format of each column of a prepared statement.
///
/// Returns the formats to decode with and the format codes to put in
/// `Bind`: no code for all text, a single `1` for all binary, otherwise one
/// code per column.
pub fn result_formats(columns: &[Oid], force_text: bool) -> (Vec<FieldFormat>, Vec<i16>) {
    if force_text || columns.is_empty() {
        return (vec![FieldFormat::Text; columns.len()], vec![]);
    }

    let formats: Vec<FieldFormat> = columns
        .iter()
        .map(|oid| {
            if is_binary_result(*oid) {
                FieldFormat::Binary
            } else {
                FieldFormat::Text
            }
        })
        .collect();

    let codes = if formats.iter().all(|f| *f == FieldFormat::Binary) {
        vec![FieldFormat::Binary.value()]
    } else if formats.iter().all(|f| *f == FieldFormat::Text) {
        vec![]
    } else {
        formats.iter().map(FieldFormat::value).collect()
    };
    (formats, codes)
}

/// Resolve an oid to a `Type`, openGauss specific types get a synthetic
/// entry so their oid survives.
pub fn type_for_oid(oid: Oid) -> Type {
    Type::from_oid(oid).unwrap_or_else(|| {
        let name = match oid {
            RAW => "raw",
            BLOB => "blob",
            CLOB => "clob",
            INT16 => "int16",
            NVARCHAR2 => "nvarchar2",
            INT1 => "int1",
            SMALLDATETIME => "smalldatetime",
            BYTEA_WITHOUT_ORDER_WITH_EQUAL_COL => "byteawithoutorderwithequalcol",
            BYTEA_WITHOUT_ORDER_COL => "byteawithoutordercol",
            BYTEA_WITHOUT_ORDER_WITH_EQUAL_COL_ARRAY => "_byteawithoutorderwithequalcol",
            BYTEA_WITHOUT_ORDER_COL_ARRAY => "_byteawithoutordercol",
            _ => "unknown",
        };
        Type::new(name.to_owned(), oid, Kind::Simple, "pg_catalog".to_owned())
    })
}

/// Coarse class of a parameter value, used to validate batch rows before
/// they are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    Bool,
    Bytes,
    Text,
    Int,
    Float,
    Time,
}

fn is_char_like(oid: Oid) -> bool {
    oid == Type::CHAR.oid()
        || oid == Type::VARCHAR.oid()
        || oid == Type::BPCHAR.oid()
        || oid == Type::TEXT.oid()
        || oid == NVARCHAR2
}

fn is_time_like(oid: Oid) -> bool {
    oid == Type::DATE.oid()
        || oid == Type::TIME.oid()
        || oid == Type::TIMETZ.oid()
        || oid == Type::TIMESTAMP.oid()
        || oid == Type::TIMESTAMPTZ.oid()
        || oid == Type::INTERVAL.oid()
        || matches!(oid, ABSTIME | RELTIME | TINTERVAL | SMALLDATETIME)
}

/// Whether a value of `class` may be bound to a parameter of type `oid`.
pub fn class_accepts(class: ValueClass, oid: Oid) -> bool {
    // ciphertext columns take any plain value, the engine encrypts it
    if is_encrypted(oid) {
        return true;
    }

    match class {
        ValueClass::Bool => oid == Type::BOOL.oid() || is_char_like(oid),
        ValueClass::Bytes => oid == Type::BYTEA.oid(),
        ValueClass::Text => {
            !(oid == Type::BOOL.oid()
                || oid == Type::FLOAT4.oid()
                || oid == Type::FLOAT8.oid()
                || oid == Type::NUMERIC.oid()
                || oid == Type::OID.oid()
                || (is_time_like(oid) && oid != Type::INTERVAL.oid()))
        }
        ValueClass::Int => {
            is_char_like(oid)
                || oid == Type::INT2.oid()
                || oid == Type::INT4.oid()
                || oid == Type::INT8.oid()
                || oid == Type::NUMERIC.oid()
                || oid == Type::MONEY.oid()
                || oid == Type::OID.oid()
                || oid == Type::FLOAT4.oid()
                || oid == Type::FLOAT8.oid()
                || matches!(oid, INT1 | INT16 | CLOB)
        }
        ValueClass::Float => {
            is_char_like(oid)
                || oid == Type::FLOAT4.oid()
                || oid == Type::FLOAT8.oid()
                || oid == Type::NUMERIC.oid()
                || oid == Type::MONEY.oid()
                || oid == CLOB
        }
        ValueClass::Time => is_time_like(oid),
    }
}
