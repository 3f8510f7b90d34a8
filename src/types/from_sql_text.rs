use std::error::Error;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres_types::Type;

pub trait FromSqlText: fmt::Debug + Sized {
    /// Converts value from postgres text format to rust.
    ///
    /// This trait is modelled after `FromSql` from postgres-types, which is
    /// for binary encoding.
    fn from_sql_text(ty: &Type, input: &[u8]) -> Result<Self, Box<dyn Error + Sync + Send>>;
}

pub(crate) fn to_str(f: &[u8]) -> Result<&str, Box<dyn Error + Sync + Send>> {
    std::str::from_utf8(f).map_err(Into::into)
}

impl FromSqlText for bool {
    fn from_sql_text(_ty: &Type, input: &[u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        match input {
            b"t" | b"true" | b"1" => Ok(true),
            b"f" | b"false" | b"0" => Ok(false),
            _ => Err("Invalid text value for bool".into()),
        }
    }
}

impl FromSqlText for String {
    fn from_sql_text(_ty: &Type, input: &[u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        to_str(input).map(|s| s.to_owned())
    }
}

macro_rules! impl_from_sql_text {
    ($t:ty) => {
        impl FromSqlText for $t {
            fn from_sql_text(
                _ty: &Type,
                input: &[u8],
            ) -> Result<Self, Box<dyn Error + Sync + Send>> {
                to_str(input).and_then(|s| s.trim().parse::<$t>().map_err(Into::into))
            }
        }
    };
}

impl_from_sql_text!(i8);
impl_from_sql_text!(i16);
impl_from_sql_text!(i32);
impl_from_sql_text!(i64);
impl_from_sql_text!(u32);
impl_from_sql_text!(f32);
impl_from_sql_text!(f64);

impl FromSqlText for Vec<u8> {
    fn from_sql_text(_ty: &Type, input: &[u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        match input.strip_prefix(b"\\x") {
            Some(data) => hex::decode(data).map_err(|e| e.to_string().into()),
            None => unescape_bytea(input),
        }
    }
}

/// Decode the legacy `escape` bytea output, `\\` and `\nnn` octal escapes.
fn unescape_bytea(input: &[u8]) -> Result<Vec<u8>, Box<dyn Error + Sync + Send>> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] != b'\\' {
            out.push(input[i]);
            i += 1;
        } else if input.get(i + 1) == Some(&b'\\') {
            out.push(b'\\');
            i += 2;
        } else {
            let octal = input
                .get(i + 1..i + 4)
                .and_then(|d| std::str::from_utf8(d).ok())
                .and_then(|d| u8::from_str_radix(d, 8).ok())
                .ok_or("invalid bytea escape")?;
            out.push(octal);
            i += 4;
        }
    }
    Ok(out)
}

impl FromSqlText for NaiveDate {
    fn from_sql_text(_ty: &Type, value: &[u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let s = to_str(value)?;
        // A compatible databases report date columns with a time part
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").map(|d| d.date()))
            .map_err(Into::into)
    }
}

impl FromSqlText for NaiveTime {
    fn from_sql_text(_ty: &Type, value: &[u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let time = NaiveTime::parse_from_str(to_str(value)?, "%H:%M:%S%.f")?;
        Ok(time)
    }
}

impl FromSqlText for NaiveDateTime {
    fn from_sql_text(_ty: &Type, value: &[u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let datetime = NaiveDateTime::parse_from_str(to_str(value)?, "%Y-%m-%d %H:%M:%S%.f")?;
        Ok(datetime)
    }
}

impl FromSqlText for DateTime<FixedOffset> {
    fn from_sql_text(ty: &Type, value: &[u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        match *ty {
            Type::TIMESTAMP | Type::DATE => {
                let datetime = NaiveDateTime::from_sql_text(ty, value)?;
                Ok(datetime.and_utc().fixed_offset())
            }
            _ => {
                let datetime =
                    DateTime::parse_from_str(to_str(value)?, "%Y-%m-%d %H:%M:%S%.f%#z")?;
                Ok(datetime)
            }
        }
    }
}

impl FromSqlText for DateTime<Utc> {
    fn from_sql_text(ty: &Type, value: &[u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        DateTime::<FixedOffset>::from_sql_text(ty, value).map(|d| d.with_timezone(&Utc))
    }
}

impl<T> FromSqlText for Option<T>
where
    T: FromSqlText,
{
    fn from_sql_text(ty: &Type, input: &[u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        if input.is_empty() {
            Ok(None)
        } else {
            T::from_sql_text(ty, input).map(Some)
        }
    }
}
