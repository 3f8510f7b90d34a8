use std::error::Error;
use std::fmt;

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use postgres_types::{IsNull, Type};

pub trait ToSqlText: fmt::Debug {
    /// Converts value to text format of Postgres type.
    ///
    /// This trait is modelled after `ToSql` from postgres-types, which is
    /// for binary encoding.
    fn to_sql_text(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>>;
}

impl<T> ToSqlText for &T
where
    T: ToSqlText + ?Sized,
{
    fn to_sql_text(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        (*self).to_sql_text(ty, out)
    }
}

impl<T: ToSqlText> ToSqlText for Option<T> {
    fn to_sql_text(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match *self {
            Some(ref val) => val.to_sql_text(ty, out),
            None => Ok(IsNull::Yes),
        }
    }
}

impl ToSqlText for bool {
    fn to_sql_text(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        out.put_slice(if *self { b"t" } else { b"f" });
        Ok(IsNull::No)
    }
}

impl ToSqlText for String {
    fn to_sql_text(
        &self,
        ty: &Type,
        w: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        self.as_str().to_sql_text(ty, w)
    }
}

impl ToSqlText for str {
    fn to_sql_text(
        &self,
        _ty: &Type,
        w: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        w.put_slice(self.as_bytes());
        Ok(IsNull::No)
    }
}

macro_rules! impl_to_sql_text {
    ($t:ty) => {
        impl ToSqlText for $t {
            fn to_sql_text(
                &self,
                _ty: &Type,
                w: &mut BytesMut,
            ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
                use std::fmt::Write;
                write!(w, "{}", self)?;
                Ok(IsNull::No)
            }
        }
    };
}

impl_to_sql_text!(i8);
impl_to_sql_text!(i16);
impl_to_sql_text!(i32);
impl_to_sql_text!(i64);
impl_to_sql_text!(u32);

macro_rules! impl_float_to_sql_text {
    ($t:ty) => {
        impl ToSqlText for $t {
            fn to_sql_text(
                &self,
                _ty: &Type,
                w: &mut BytesMut,
            ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
                use std::fmt::Write;
                // server spelling of the special values
                if self.is_nan() {
                    w.put_slice(b"NaN");
                } else if self.is_infinite() {
                    w.put_slice(if self.is_sign_positive() {
                        &b"Infinity"[..]
                    } else {
                        &b"-Infinity"[..]
                    });
                } else {
                    write!(w, "{}", self)?;
                }
                Ok(IsNull::No)
            }
        }
    };
}

impl_float_to_sql_text!(f32);
impl_float_to_sql_text!(f64);

impl ToSqlText for [u8] {
    fn to_sql_text(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        out.put_slice(b"\\x");
        out.put_slice(hex::encode(self).as_bytes());
        Ok(IsNull::No)
    }
}

impl ToSqlText for Vec<u8> {
    fn to_sql_text(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        self.as_slice().to_sql_text(ty, out)
    }
}

impl ToSqlText for NaiveDate {
    fn to_sql_text(
        &self,
        _ty: &Type,
        w: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        use std::fmt::Write;
        write!(w, "{}", self.format("%Y-%m-%d"))?;
        Ok(IsNull::No)
    }
}

impl ToSqlText for NaiveTime {
    fn to_sql_text(
        &self,
        _ty: &Type,
        w: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        use std::fmt::Write;
        write!(w, "{}", self.format("%H:%M:%S%.f"))?;
        Ok(IsNull::No)
    }
}

impl ToSqlText for NaiveDateTime {
    fn to_sql_text(
        &self,
        _ty: &Type,
        w: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        use std::fmt::Write;
        write!(w, "{}", self.format("%Y-%m-%d %H:%M:%S%.f"))?;
        Ok(IsNull::No)
    }
}

impl<Tz: TimeZone> ToSqlText for DateTime<Tz>
where
    Tz::Offset: fmt::Display,
{
    fn to_sql_text(
        &self,
        ty: &Type,
        w: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        use std::fmt::Write;
        match *ty {
            Type::DATE => write!(w, "{}", self.format("%Y-%m-%d"))?,
            Type::TIME => write!(w, "{}", self.format("%H:%M:%S%.f"))?,
            Type::TIMESTAMP => write!(w, "{}", self.format("%Y-%m-%d %H:%M:%S%.f"))?,
            _ => write!(w, "{}", self.format("%Y-%m-%d %H:%M:%S%.f%:z"))?,
        }
        Ok(IsNull::No)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn text<T: ToSqlText>(v: T, ty: &Type) -> String {
        let mut buf = BytesMut::new();
        v.to_sql_text(ty, &mut buf).unwrap();
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn test_null() {
        let mut buf = BytesMut::new();
        let r = None::<i32>.to_sql_text(&Type::INT4, &mut buf).unwrap();
        assert!(matches!(r, IsNull::Yes));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_scalars() {
        assert_eq!("t", text(true, &Type::BOOL));
        assert_eq!("-42", text(-42i64, &Type::INT8));
        assert_eq!("1.5", text(1.5f64, &Type::FLOAT8));
        assert_eq!("Infinity", text(f64::INFINITY, &Type::FLOAT8));
        assert_eq!("NaN", text(f32::NAN, &Type::FLOAT4));
        assert_eq!("\\xdeadbeef", text(vec![0xde, 0xad, 0xbe, 0xef], &Type::BYTEA));
    }

    #[test]
    fn test_date_time_format() {
        let date = NaiveDate::from_ymd_opt(2023, 2, 1).unwrap();
        assert_eq!("2023-02-01", text(date, &Type::DATE));

        let datetime = date.and_hms_micro_opt(12, 30, 45, 500000).unwrap();
        assert_eq!("2023-02-01 12:30:45.500", text(datetime, &Type::TIMESTAMP));

        let utc = Utc.from_utc_datetime(&datetime);
        assert_eq!(
            "2023-02-01 12:30:45.500+00:00",
            text(utc, &Type::TIMESTAMPTZ)
        );
    }
}
