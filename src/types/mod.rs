//! Value conversion between rust and the server's text and binary formats.
//!
//! Binary conversions come from `postgres-types`. The text format, used for
//! most parameters and result columns, is handled by [`ToSqlText`] and
//! [`FromSqlText`].
mod from_sql_text;
pub mod oids;
mod to_sql_text;
mod value;

pub use from_sql_text::FromSqlText;
pub use to_sql_text::ToSqlText;
pub use value::Value;

#[cfg(test)]
mod roundtrip_tests {
    use super::*;
    use bytes::BytesMut;
    use chrono::{NaiveDate, NaiveDateTime};
    use postgres_types::Type;

    macro_rules! test_roundtrip {
        ($ty:ty, $value:expr, $pg_type:expr) => {
            let mut buf = BytesMut::new();
            let original: $ty = $value;
            original.to_sql_text(&$pg_type, &mut buf).unwrap();
            let decoded = <$ty>::from_sql_text(&$pg_type, &buf).unwrap();
            assert_eq!(original, decoded);
        };
    }

    #[test]
    fn test_text_roundtrip() {
        test_roundtrip!(bool, false, Type::BOOL);
        test_roundtrip!(i16, i16::MIN, Type::INT2);
        test_roundtrip!(i64, 9_007_199_254_740_993, Type::INT8);
        test_roundtrip!(f64, 0.1, Type::FLOAT8);
        test_roundtrip!(String, "tab\there".to_owned(), Type::TEXT);
        test_roundtrip!(Vec<u8>, vec![0, 92, 255], Type::BYTEA);
        test_roundtrip!(
            NaiveDateTime,
            NaiveDate::from_ymd_opt(1999, 12, 31)
                .unwrap()
                .and_hms_milli_opt(23, 59, 59, 999)
                .unwrap(),
            Type::TIMESTAMP
        );
        test_roundtrip!(
            Value,
            Value::Date(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
            Type::DATE
        );
    }
}
