use std::sync::Arc;

use bytes::Bytes;
use postgres_types::{FromSqlOwned, Oid};

use crate::api::results::{FieldFormat, FieldInfo};
use crate::error::{GaussWireError, GaussWireResult};
use crate::messages::data::DataRow;
use crate::types::{FromSqlText, Value, oids};

use super::hook::ClientLogicHook;

/// One row of a result set.
///
/// Values of encrypted columns are decrypted when the row is read, they are
/// then decoded as text of the plain type carried in the column's type
/// modifier.
#[derive(Debug, Clone)]
pub struct Row {
    fields: Arc<Vec<FieldInfo>>,
    values: Vec<Option<Bytes>>,
    decrypted: bool,
}

impl Row {
    pub(crate) fn decode(
        fields: Arc<Vec<FieldInfo>>,
        row: DataRow,
        hook: Option<&dyn ClientLogicHook>,
    ) -> GaussWireResult<Row> {
        let raw = row.into_values()?;
        if raw.len() != fields.len() {
            return Err(GaussWireError::MalformedMessage("DataRow"));
        }

        let mut values = Vec::with_capacity(raw.len());
        for (field, value) in fields.iter().zip(raw) {
            let value = match (value, hook) {
                (Some(v), Some(hook)) if field.is_encrypted() => Some(Bytes::from(
                    hook.decrypt_column(&v, field.type_modifier() as Oid)?,
                )),
                (v, _) => v.map(|v| v.freeze()),
            };
            values.push(value);
        }

        Ok(Row {
            fields,
            values,
            decrypted: hook.is_some(),
        })
    }

    /// Get the value of column `idx`, `None` for NULL.
    pub fn get<T>(&self, idx: usize) -> GaussWireResult<Option<T>>
    where
        T: FromSqlOwned + FromSqlText,
    {
        let field = self
            .fields
            .get(idx)
            .ok_or(GaussWireError::DataRowIndexOutOfBounds(idx))?;
        let Some(bytes) = &self.values[idx] else {
            return Ok(None);
        };

        let decoded = if self.decrypted && field.is_encrypted() {
            let plain_type = oids::type_for_oid(field.type_modifier() as Oid);
            T::from_sql_text(&plain_type, bytes)
        } else if field.format() == FieldFormat::Text {
            T::from_sql_text(field.datatype(), bytes)
        } else {
            T::from_sql(field.datatype(), bytes)
        };
        decoded.map(Some).map_err(GaussWireError::FromSqlError)
    }

    /// Get column `idx` as a dynamically typed [`Value`].
    pub fn value(&self, idx: usize) -> GaussWireResult<Value> {
        self.get::<Value>(idx).map(Option::unwrap_or_default)
    }

    /// All values of the row.
    pub fn values(&self) -> GaussWireResult<Vec<Value>> {
        (0..self.len()).map(|i| self.value(i)).collect()
    }

    /// Raw bytes of column `idx` as received, or decrypted.
    pub fn raw(&self, idx: usize) -> Option<&[u8]> {
        self.values.get(idx).and_then(|v| v.as_deref())
    }

    /// Position of the first column called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
