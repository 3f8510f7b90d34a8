use std::error::Error;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres_types::{FromSql, IsNull, Type};

use super::from_sql_text::to_str;
use super::oids::ValueClass;
use super::{FromSqlText, ToSqlText};
use crate::error::{GaussWireError, GaussWireResult};

/// A dynamically typed parameter or column value.
///
/// Parameters are always given as `Value`s so they can be inspected before a
/// batch is sent, and handed to the client logic hook for encryption.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytea(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Coarse class used to validate batch rows, `None` for NULL.
    pub fn class(&self) -> Option<ValueClass> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueClass::Bool),
            Value::Int2(_) | Value::Int4(_) | Value::Int8(_) => Some(ValueClass::Int),
            Value::Float4(_) | Value::Float8(_) => Some(ValueClass::Float),
            Value::Text(_) => Some(ValueClass::Text),
            Value::Bytea(_) => Some(ValueClass::Bytes),
            Value::Date(_) | Value::Time(_) | Value::Timestamp(_) | Value::TimestampTz(_) => {
                Some(ValueClass::Time)
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Encode in text format, `None` for NULL.
    pub(crate) fn encode_text(&self, ty: &Type) -> GaussWireResult<Option<Bytes>> {
        let mut buf = BytesMut::new();
        match self
            .to_sql_text(ty, &mut buf)
            .map_err(GaussWireError::ToSqlError)?
        {
            IsNull::Yes => Ok(None),
            IsNull::No => Ok(Some(buf.freeze())),
        }
    }

    /// Encode a parameter whose format code is `binary`. Only bytea values
    /// are ever sent in binary, as their raw bytes.
    pub(crate) fn encode(&self, ty: &Type, binary: bool) -> GaussWireResult<Option<Bytes>> {
        match self {
            Value::Bytea(b) if binary => Ok(Some(Bytes::copy_from_slice(b))),
            _ => self.encode_text(ty),
        }
    }
}

impl ToSqlText for Value {
    fn to_sql_text(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => v.to_sql_text(ty, out),
            Value::Int2(v) => v.to_sql_text(ty, out),
            Value::Int4(v) => v.to_sql_text(ty, out),
            Value::Int8(v) => v.to_sql_text(ty, out),
            Value::Float4(v) => v.to_sql_text(ty, out),
            Value::Float8(v) => v.to_sql_text(ty, out),
            Value::Text(v) => v.to_sql_text(ty, out),
            Value::Bytea(v) => v.to_sql_text(ty, out),
            Value::Date(v) => v.to_sql_text(ty, out),
            Value::Time(v) => v.to_sql_text(ty, out),
            Value::Timestamp(v) => v.to_sql_text(ty, out),
            Value::TimestampTz(v) => v.to_sql_text(&Type::TIMESTAMPTZ, out),
        }
    }
}

fn format_uuid(raw: &[u8]) -> Result<String, Box<dyn Error + Sync + Send>> {
    if raw.len() != 16 {
        return Err(format!("invalid uuid length {}", raw.len()).into());
    }
    let h = hex::encode(raw);
    Ok(format!(
        "{}-{}-{}-{}-{}",
        &h[0..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..32]
    ))
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let value = match *ty {
            Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => Value::Int2(i16::from_sql(ty, raw)?),
            Type::INT4 => Value::Int4(i32::from_sql(ty, raw)?),
            Type::INT8 => Value::Int8(i64::from_sql(ty, raw)?),
            Type::FLOAT4 => Value::Float4(f32::from_sql(ty, raw)?),
            Type::FLOAT8 => Value::Float8(f64::from_sql(ty, raw)?),
            Type::BYTEA => Value::Bytea(raw.to_vec()),
            Type::DATE => Value::Date(NaiveDate::from_sql(ty, raw)?),
            Type::TIME => Value::Time(NaiveTime::from_sql(ty, raw)?),
            Type::TIMESTAMP => Value::Timestamp(NaiveDateTime::from_sql(ty, raw)?),
            Type::TIMESTAMPTZ => Value::TimestampTz(DateTime::<Utc>::from_sql(ty, raw)?),
            Type::UUID => Value::Text(format_uuid(raw)?),
            _ => match std::str::from_utf8(raw) {
                Ok(s) => Value::Text(s.to_owned()),
                Err(_) => Value::Bytea(raw.to_vec()),
            },
        };
        Ok(value)
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Value::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

impl FromSqlText for Value {
    fn from_sql_text(ty: &Type, input: &[u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let value = match *ty {
            Type::BOOL => Value::Bool(bool::from_sql_text(ty, input)?),
            Type::INT2 => Value::Int2(i16::from_sql_text(ty, input)?),
            Type::INT4 => Value::Int4(i32::from_sql_text(ty, input)?),
            Type::INT8 => Value::Int8(i64::from_sql_text(ty, input)?),
            Type::FLOAT4 => Value::Float4(f32::from_sql_text(ty, input)?),
            Type::FLOAT8 => Value::Float8(f64::from_sql_text(ty, input)?),
            Type::BYTEA => Value::Bytea(Vec::<u8>::from_sql_text(ty, input)?),
            Type::DATE => Value::Date(NaiveDate::from_sql_text(ty, input)?),
            Type::TIME => Value::Time(NaiveTime::from_sql_text(ty, input)?),
            Type::TIMESTAMP => Value::Timestamp(NaiveDateTime::from_sql_text(ty, input)?),
            Type::TIMESTAMPTZ => Value::TimestampTz(DateTime::<Utc>::from_sql_text(ty, input)?),
            _ => Value::Text(to_str(input)?.to_owned()),
        };
        Ok(value)
    }
}

macro_rules! impl_from_for_value {
    ($t:ty, $variant:ident) => {
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$variant(v)
            }
        }
    };
}

impl_from_for_value!(bool, Bool);
impl_from_for_value!(i16, Int2);
impl_from_for_value!(i32, Int4);
impl_from_for_value!(i64, Int8);
impl_from_for_value!(f32, Float4);
impl_from_for_value!(f64, Float8);
impl_from_for_value!(String, Text);
impl_from_for_value!(Vec<u8>, Bytea);
impl_from_for_value!(NaiveDate, Date);
impl_from_for_value!(NaiveTime, Time);
impl_from_for_value!(NaiveDateTime, Timestamp);
impl_from_for_value!(DateTime<Utc>, TimestampTz);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytea(v.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
