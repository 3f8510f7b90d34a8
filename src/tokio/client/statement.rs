use std::borrow::Cow;
use std::sync::Arc;

use log::debug;
use postgres_types::{Oid, Type};

use super::Connection;
use crate::api::client::query::rewrite_placeholders;
use crate::api::client::{ExecResult, Row};
use crate::api::results::{FieldInfo, Tag};
use crate::error::{ErrorInfo, GaussWireError, GaussWireResult};
use crate::messages::extendedquery::{
    BatchBind, Bind, Close, Describe, Execute, MAX_BATCH_BIND_LENGTH, Parse, Sync,
    TARGET_TYPE_BYTE_PORTAL, TARGET_TYPE_BYTE_STATEMENT,
};
use crate::messages::{BackendMessage, FrontendMessage};
use crate::types::{Value, oids};

/// More parameters than this cannot be counted in a `Bind` message.
const MAX_PARAMETERS: usize = 65535;

/// A statement prepared on the server.
///
/// It belongs to the connection that prepared it. When the client logic
/// cache turns out to be stale the connection prepares it again and swaps
/// the new statement in place.
#[derive(Debug)]
pub struct Statement {
    name: String,
    query: String,
    param_types: Vec<Oid>,
    fields: Arc<Vec<FieldInfo>>,
    result_codes: Vec<i16>,
    closed: bool,
}

impl Statement {
    /// Server side name, empty for the unnamed statement.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn param_types(&self) -> &[Oid] {
        &self.param_types
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn name_opt(name: &str) -> Option<String> {
    (!name.is_empty()).then(|| name.to_owned())
}

/// bytea parameters of a batch or of the binary parameter mode are sent
/// as raw bytes.
fn is_bytea(oid: Oid) -> bool {
    oid == Type::BYTEA.oid() || oid == Type::BYTEA_ARRAY.oid()
}

/// How the parameters of a prepared statement are bound.
#[derive(Debug, PartialEq, Eq)]
enum BindPlan {
    Single,
    Batch,
}

/// Decide between a single bind and a batch, validating the parameter
/// count against the statement before anything is sent.
fn bind_plan(
    stmt: &Statement,
    params: &[Value],
    client_logic: bool,
) -> GaussWireResult<BindPlan> {
    let n = stmt.param_types.len();
    let given = params.len();

    if given == 0 && n == 0 {
        return Ok(BindPlan::Single);
    }
    if given != 0 && n != 0 && given % n == 0 {
        if given == n {
            return Ok(BindPlan::Single);
        }
        if !stmt.fields.is_empty() {
            return Err(GaussWireError::ParameterCountMismatch { given, expected: n });
        }
        // only the first parameter type is checked for ciphertext
        if client_logic && oids::is_encrypted(stmt.param_types[0]) {
            return Err(GaussWireError::ParameterCountMismatch { given, expected: n });
        }
        check_column_types(&stmt.param_types, params)?;
        return Ok(BindPlan::Batch);
    }
    if n == 0 {
        return Err(GaussWireError::ParameterCountMismatch { given, expected: 0 });
    }
    Err(GaussWireError::ParameterCountMismatch {
        given,
        expected: given - given % n + n,
    })
}

/// Every batch value must fit the type of its column, NULL fits anywhere.
fn check_column_types(types: &[Oid], params: &[Value]) -> GaussWireResult<()> {
    for (i, value) in params.iter().enumerate() {
        let column = i % types.len();
        if let Some(class) = value.class()
            && !oids::class_accepts(class, types[column])
        {
            return Err(GaussWireError::ColumnTypeMismatch {
                row: i / types.len(),
                column,
            });
        }
    }
    Ok(())
}

fn batch_bind(stmt: &Statement, params: &[Value]) -> GaussWireResult<BatchBind> {
    let formats: Vec<i16> = stmt
        .param_types
        .iter()
        .map(|oid| i16::from(is_bytea(*oid)))
        .collect();
    let types: Vec<Type> = stmt
        .param_types
        .iter()
        .map(|oid| oids::type_for_oid(*oid))
        .collect();

    let values = params
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let column = i % types.len();
            value.encode(&types[column], formats[column] == 1)
        })
        .collect::<GaussWireResult<Vec<_>>>()?;

    let bind = BatchBind::new(stmt.name.clone(), formats, values);
    let length = bind.frame_length();
    if length > MAX_BATCH_BIND_LENGTH {
        return Err(GaussWireError::BindMessageTooLong(length));
    }
    Ok(bind)
}

impl Connection {
    /// Prepare a named statement. `?` placeholders are rewritten to `$N`.
    pub async fn prepare(&mut self, query: &str) -> GaussWireResult<Statement> {
        self.ensure_usable().await?;
        let name = self.next_statement_name();
        let mut result = self.prepare_to(query, name).await;
        if let Some(hook) = self.stale_hook(&result) {
            if hook.pre_check_resend() {
                debug!("client logic cache was stale, preparing again");
                let name = self.next_statement_name();
                result = self.prepare_to(query, name).await;
            }
            hook.post_check_resend();
        }
        self.check(result)
    }

    /// Execute a prepared statement.
    ///
    /// `params` may hold a multiple of the statement's parameter count, the
    /// rows are then sent as one batch. Batches are refused for statements
    /// returning rows.
    pub async fn execute_prepared(
        &mut self,
        stmt: &mut Statement,
        params: &[Value],
    ) -> GaussWireResult<ExecResult> {
        self.ensure_usable().await?;
        let mut result = self.execute_statement(stmt, params).await;
        if let Some(hook) = self.stale_hook(&result) {
            if hook.pre_check_resend() {
                debug!("client logic cache was stale, executing {} again", stmt.name);
                result = match self.reprepare(stmt).await {
                    Ok(()) => self.execute_statement(stmt, params).await,
                    Err(e) => Err(e),
                };
            }
            hook.post_check_resend();
        }
        self.check(result)
    }

    /// Execute a prepared statement and stream its rows.
    pub async fn query_prepared(
        &mut self,
        stmt: &mut Statement,
        params: &[Value],
    ) -> GaussWireResult<RowStream<'_>> {
        self.ensure_usable().await?;
        let mut result = self.start_statement(stmt, params).await;
        if let Some(hook) = self.stale_hook(&result) {
            if hook.pre_check_resend() {
                debug!("client logic cache was stale, querying {} again", stmt.name);
                result = match self.reprepare(stmt).await {
                    Ok(()) => self.start_statement(stmt, params).await,
                    Err(e) => Err(e),
                };
            }
            hook.post_check_resend();
        }
        self.check(result)?;
        Ok(RowStream::new(self, Some(stmt.fields.clone())))
    }

    /// Close a prepared statement. Closing it twice does nothing.
    pub async fn close_statement(&mut self, stmt: &mut Statement) -> GaussWireResult<()> {
        if stmt.closed {
            return Ok(());
        }
        stmt.closed = true;
        self.ensure_usable().await?;
        let result = self.close_statement_once(&stmt.name).await;
        self.check(result)
    }

    /// Execute a statement, discarding any rows.
    ///
    /// Without parameters the simple protocol is used, otherwise the query
    /// goes through the unnamed statement.
    pub async fn execute(&mut self, query: &str, params: &[Value]) -> GaussWireResult<ExecResult> {
        self.ensure_usable().await?;
        let mut result = self.execute_once(query, params).await;
        if let Some(hook) = self.stale_hook(&result) {
            if hook.pre_check_resend() {
                debug!("client logic cache was stale, executing again");
                result = self.execute_once(query, params).await;
            }
            hook.post_check_resend();
        }
        self.check(result)
    }

    /// Run a query and stream its rows.
    pub async fn query(&mut self, query: &str, params: &[Value]) -> GaussWireResult<RowStream<'_>> {
        self.ensure_usable().await?;
        let mut result = self.query_once(query, params).await;
        if let Some(hook) = self.stale_hook(&result) {
            if hook.pre_check_resend() {
                debug!("client logic cache was stale, querying again");
                result = self.query_once(query, params).await;
            }
            hook.post_check_resend();
        }
        let fields = self.check(result)?;
        Ok(RowStream::new(self, fields))
    }

    async fn execute_once(&mut self, query: &str, params: &[Value]) -> GaussWireResult<ExecResult> {
        if params.is_empty() {
            return self.simple_exec(query).await;
        }
        if self.config.binary_parameters {
            self.send_binary_mode_query(query, params).await?;
            return self.read_execute_response().await;
        }
        let stmt = self.prepare_to(query, String::new()).await?;
        self.execute_statement(&stmt, params).await
    }

    /// Start a query, returning the row description when it is known
    /// before the first row arrives.
    async fn query_once(
        &mut self,
        query: &str,
        params: &[Value],
    ) -> GaussWireResult<Option<Arc<Vec<FieldInfo>>>> {
        if params.is_empty() {
            let message = self.query_message(query)?;
            self.send_messages([message]).await?;
            return Ok(None);
        }
        if self.config.binary_parameters {
            let fields = self.send_binary_mode_query(query, params).await?;
            return Ok(Some(fields));
        }
        let stmt = self.prepare_to(query, String::new()).await?;
        self.start_statement(&stmt, params).await?;
        Ok(Some(stmt.fields))
    }

    async fn prepare_to(&mut self, query: &str, name: String) -> GaussWireResult<Statement> {
        let text = match self.hook() {
            Some(hook) => Cow::Owned(hook.prepare_query(&name, query)?),
            None => Cow::Borrowed(query),
        };
        let text = rewrite_placeholders(&text);

        self.send_messages([
            FrontendMessage::Parse(Parse::new(name_opt(&name), text, vec![])),
            FrontendMessage::Describe(Describe::new(TARGET_TYPE_BYTE_STATEMENT, name_opt(&name))),
            FrontendMessage::Sync(Sync::new()),
        ])
        .await?;

        self.read_parse_response().await?;
        let (param_types, mut fields) = self.read_statement_describe_response().await?;
        let column_types: Vec<Oid> = fields.iter().map(|f| f.datatype().oid()).collect();
        let (formats, result_codes) =
            oids::result_formats(&column_types, self.config.disable_prepared_binary_result);
        for (field, format) in fields.iter_mut().zip(formats) {
            field.set_format(format);
        }
        self.read_ready_for_query().await?;

        Ok(Statement {
            name,
            query: query.to_owned(),
            param_types,
            fields: Arc::new(fields),
            result_codes,
            closed: false,
        })
    }

    /// Prepare `stmt` again under a new name and close the old one.
    async fn reprepare(&mut self, stmt: &mut Statement) -> GaussWireResult<()> {
        let name = if stmt.name.is_empty() {
            String::new()
        } else {
            self.next_statement_name()
        };
        let fresh = self.prepare_to(&stmt.query, name).await?;
        let old = std::mem::replace(stmt, fresh);
        if !old.name.is_empty()
            && let Err(e) = self.close_statement_once(&old.name).await
        {
            debug!("failed to close stale statement {}: {e}", old.name);
        }
        Ok(())
    }

    async fn close_statement_once(&mut self, name: &str) -> GaussWireResult<()> {
        self.send_messages([
            FrontendMessage::Close(Close::new(TARGET_TYPE_BYTE_STATEMENT, name_opt(name))),
            FrontendMessage::Sync(Sync::new()),
        ])
        .await?;
        match self.recv().await? {
            BackendMessage::CloseComplete(_) => self.read_ready_for_query().await,
            BackendMessage::ErrorResponse(e) => {
                self.read_ready_for_query().await?;
                Err(ErrorInfo::from(e).into())
            }
            other => Err(self.unexpected(&other, "closing statement")),
        }
    }

    async fn execute_statement(
        &mut self,
        stmt: &Statement,
        params: &[Value],
    ) -> GaussWireResult<ExecResult> {
        self.start_statement(stmt, params).await?;
        self.read_execute_response().await
    }

    /// Bind and execute `stmt`, leaving its results unread.
    async fn start_statement(&mut self, stmt: &Statement, params: &[Value]) -> GaussWireResult<()> {
        let plan = bind_plan(stmt, params, self.hook().is_some())?;
        let messages = match plan {
            BindPlan::Single => vec![
                FrontendMessage::Bind(self.single_bind(stmt, params)?),
                FrontendMessage::Execute(Execute::new(None, 0)),
                FrontendMessage::Sync(Sync::new()),
            ],
            BindPlan::Batch => {
                let bind = batch_bind(stmt, params)?;
                debug!(
                    "batch of {} rows on statement {:?}",
                    bind.batch_count(),
                    stmt.name
                );
                vec![
                    FrontendMessage::BatchBind(bind),
                    FrontendMessage::Sync(Sync::new()),
                ]
            }
        };
        self.send_messages(messages).await?;
        self.read_bind_response().await?;
        self.post_execute_workaround().await
    }

    fn single_bind(&self, stmt: &Statement, params: &[Value]) -> GaussWireResult<Bind> {
        if params.len() > MAX_PARAMETERS {
            return Err(GaussWireError::TooManyParameters(params.len()));
        }
        let params = match self.hook() {
            Some(hook) => Cow::Owned(hook.prepare_params(&stmt.name, &stmt.param_types, params)?),
            None => Cow::Borrowed(params),
        };
        let values = params
            .iter()
            .zip(&stmt.param_types)
            .map(|(value, oid)| value.encode_text(&oids::type_for_oid(*oid)))
            .collect::<GaussWireResult<Vec<_>>>()?;

        Ok(Bind::new(
            None,
            name_opt(&stmt.name),
            vec![],
            values,
            stmt.result_codes.clone(),
        ))
    }

    /// Parse, bind, describe and execute the unnamed statement in one round
    /// trip. bytea parameters are sent as binary, others as text, results
    /// are always text.
    async fn send_binary_mode_query(
        &mut self,
        query: &str,
        params: &[Value],
    ) -> GaussWireResult<Arc<Vec<FieldInfo>>> {
        if params.len() > MAX_PARAMETERS {
            return Err(GaussWireError::TooManyParameters(params.len()));
        }
        let (text, params) = match self.hook() {
            Some(hook) => (
                Cow::Owned(hook.prepare_query("", query)?),
                Cow::Owned(hook.prepare_params("", &[], params)?),
            ),
            None => (Cow::Borrowed(query), Cow::Borrowed(params)),
        };

        let binary: Vec<bool> = params.iter().map(|v| matches!(v, Value::Bytea(_))).collect();
        let formats = if binary.iter().any(|b| *b) {
            binary.iter().map(|b| i16::from(*b)).collect()
        } else {
            vec![]
        };
        let values = params
            .iter()
            .zip(&binary)
            .map(|(value, binary)| value.encode(&Type::UNKNOWN, *binary))
            .collect::<GaussWireResult<Vec<_>>>()?;

        self.send_messages([
            FrontendMessage::Parse(Parse::new(None, rewrite_placeholders(&text), vec![])),
            FrontendMessage::Bind(Bind::new(None, None, formats, values, vec![])),
            FrontendMessage::Describe(Describe::new(TARGET_TYPE_BYTE_PORTAL, None)),
            FrontendMessage::Execute(Execute::new(None, 0)),
            FrontendMessage::Sync(Sync::new()),
        ])
        .await?;

        self.read_parse_response().await?;
        self.read_bind_response().await?;
        let fields = self.read_portal_describe_response().await?;
        self.post_execute_workaround().await?;
        Ok(Arc::new(fields))
    }

    /// On `ErrorResponse`, wait for `ReadyForQuery` and return the error.
    async fn error_then_ready<T>(&mut self, error: ErrorInfo) -> GaussWireResult<T> {
        self.read_ready_for_query().await?;
        Err(error.into())
    }

    async fn read_parse_response(&mut self) -> GaussWireResult<()> {
        match self.recv().await? {
            BackendMessage::ParseComplete(_) => Ok(()),
            BackendMessage::ErrorResponse(e) => self.error_then_ready(e.into()).await,
            other => Err(self.unexpected(&other, "reading parse response")),
        }
    }

    async fn read_statement_describe_response(
        &mut self,
    ) -> GaussWireResult<(Vec<Oid>, Vec<FieldInfo>)> {
        let mut param_types = Vec::new();
        loop {
            match self.recv().await? {
                BackendMessage::ParameterDescription(description) => {
                    param_types = description.types;
                }
                BackendMessage::NoData(_) => return Ok((param_types, vec![])),
                BackendMessage::RowDescription(description) => {
                    let fields = description.fields.into_iter().map(FieldInfo::from).collect();
                    return Ok((param_types, fields));
                }
                BackendMessage::ErrorResponse(e) => return self.error_then_ready(e.into()).await,
                other => return Err(self.unexpected(&other, "describing statement")),
            }
        }
    }

    async fn read_portal_describe_response(&mut self) -> GaussWireResult<Vec<FieldInfo>> {
        match self.recv().await? {
            BackendMessage::RowDescription(description) => {
                Ok(description.fields.into_iter().map(FieldInfo::from).collect())
            }
            BackendMessage::NoData(_) => Ok(vec![]),
            BackendMessage::ErrorResponse(e) => self.error_then_ready(e.into()).await,
            other => Err(self.unexpected(&other, "describing portal")),
        }
    }

    async fn read_bind_response(&mut self) -> GaussWireResult<()> {
        match self.recv().await? {
            BackendMessage::BindComplete(_) => Ok(()),
            BackendMessage::ErrorResponse(e) => self.error_then_ready(e.into()).await,
            other => Err(self.unexpected(&other, "reading bind response")),
        }
    }

    /// The server may report an execution error right after `BindComplete`.
    /// Any other first message of the result is kept for the reader.
    async fn post_execute_workaround(&mut self) -> GaussWireResult<()> {
        match self.recv().await? {
            BackendMessage::ErrorResponse(e) => self.error_then_ready(e.into()).await,
            message @ (BackendMessage::CommandComplete(_)
            | BackendMessage::DataRow(_)
            | BackendMessage::EmptyQueryResponse(_)) => {
                self.save_message(message);
                Ok(())
            }
            other => Err(self.unexpected(&other, "waiting for execution")),
        }
    }

    /// Read up to `ReadyForQuery`, summing the rows of every
    /// `CommandComplete` of a batch.
    async fn read_execute_response(&mut self) -> GaussWireResult<ExecResult> {
        let mut tag: Option<Tag> = None;
        let mut rows = 0u64;
        let mut error: Option<GaussWireError> = None;
        loop {
            match self.recv().await? {
                BackendMessage::CommandComplete(complete) => match complete.tag.parse::<Tag>() {
                    Ok(t) => {
                        rows += t.rows().unwrap_or(0) as u64;
                        tag = Some(t);
                    }
                    Err(e) => {
                        error.get_or_insert(e);
                    }
                },
                BackendMessage::ErrorResponse(e) => {
                    error.get_or_insert(ErrorInfo::from(e).into());
                }
                BackendMessage::RowDescription(_)
                | BackendMessage::DataRow(_)
                | BackendMessage::EmptyQueryResponse(_) => {}
                BackendMessage::ReadyForQuery(_) => {
                    return match error {
                        Some(e) => Err(e),
                        None => Ok(ExecResult::new(tag, rows)),
                    };
                }
                other => return Err(self.unexpected(&other, "reading execute response")),
            }
        }
    }
}

/// Rows of a running query.
///
/// The stream borrows its connection. Dropping it before the end leaves
/// the rest of the response to be skipped by the next operation.
pub struct RowStream<'a> {
    conn: &'a mut Connection,
    fields: Option<Arc<Vec<FieldInfo>>>,
    next_fields: Option<Arc<Vec<FieldInfo>>>,
    tag: Option<Tag>,
    error: Option<GaussWireError>,
    done: bool,
}

impl<'a> RowStream<'a> {
    fn new(conn: &'a mut Connection, fields: Option<Arc<Vec<FieldInfo>>>) -> RowStream<'a> {
        RowStream {
            conn,
            fields,
            next_fields: None,
            tag: None,
            error: None,
            done: false,
        }
    }

    /// Columns of the current result set, `None` until they are known.
    pub fn fields(&self) -> Option<&[FieldInfo]> {
        self.fields.as_deref().map(Vec::as_slice)
    }

    /// Tag of the last completed command.
    pub fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    /// Next row of the current result set, `None` at its end.
    ///
    /// A server error is reported once the response is complete, rows
    /// already returned stay valid.
    pub async fn next(&mut self) -> GaussWireResult<Option<Row>> {
        if self.done || self.next_fields.is_some() {
            return Ok(None);
        }
        let result = self.next_row().await;
        self.conn.check(result)
    }

    async fn next_row(&mut self) -> GaussWireResult<Option<Row>> {
        loop {
            let message = match self.conn.recv().await {
                Ok(message) => message,
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            };
            match message {
                BackendMessage::DataRow(row) => {
                    let Some(fields) = &self.fields else {
                        self.done = true;
                        return Err(self.conn.unexpected(
                            &BackendMessage::DataRow(row),
                            "reading rows without a row description",
                        ));
                    };
                    let hook = self.conn.hook().cloned();
                    return Row::decode(fields.clone(), row, hook.as_deref()).map(Some);
                }
                BackendMessage::RowDescription(description) => {
                    let fields = Arc::new(
                        description
                            .fields
                            .into_iter()
                            .map(FieldInfo::from)
                            .collect::<Vec<_>>(),
                    );
                    if self.fields.is_none() {
                        self.fields = Some(fields);
                    } else {
                        self.next_fields = Some(fields);
                        return Ok(None);
                    }
                }
                BackendMessage::CommandComplete(complete) => match complete.tag.parse::<Tag>() {
                    Ok(tag) => self.tag = Some(tag),
                    Err(e) => {
                        self.error.get_or_insert(e);
                    }
                },
                BackendMessage::EmptyQueryResponse(_) => {}
                BackendMessage::ErrorResponse(e) => {
                    self.error.get_or_insert(ErrorInfo::from(e).into());
                }
                BackendMessage::ReadyForQuery(_) => {
                    self.done = true;
                    return match self.error.take() {
                        Some(e) => Err(e),
                        None => Ok(None),
                    };
                }
                other => {
                    self.done = true;
                    return Err(self.conn.unexpected(&other, "reading rows"));
                }
            }
        }
    }

    /// Skip the rest of the current result set and move to the next one of
    /// a multi statement query. Returns false when there is none.
    pub async fn next_result_set(&mut self) -> GaussWireResult<bool> {
        while self.next_fields.is_none() && !self.done {
            self.next().await?;
        }
        match self.next_fields.take() {
            Some(fields) => {
                self.fields = Some(fields);
                self.tag = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Collect the remaining rows of the current result set.
    pub async fn collect(mut self) -> GaussWireResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

impl Drop for RowStream<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.conn.unfinished = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::BytesMut;
    use futures::StreamExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::messages::data::DataRow;
    use crate::messages::extendedquery::{
        BindComplete, CloseComplete, NoData, ParameterDescription, ParseComplete,
    };
    use crate::messages::response::{ErrorResponse, TransactionStatus};
    use crate::tokio::client::connection::tests::*;

    fn stmt(param_types: Vec<Oid>, fields: Vec<FieldInfo>) -> Statement {
        Statement {
            name: "1".to_owned(),
            query: "insert into t values (?, ?)".to_owned(),
            param_types,
            fields: Arc::new(fields),
            result_codes: vec![],
            closed: false,
        }
    }

    fn ints(n: i32) -> Vec<Value> {
        (0..n).map(Value::Int4).collect()
    }

    #[test]
    fn test_bind_plan() {
        let int4 = Type::INT4.oid();
        let insert = stmt(vec![int4, int4], vec![]);

        assert_eq!(BindPlan::Single, bind_plan(&insert, &ints(2), false).unwrap());
        assert_eq!(BindPlan::Batch, bind_plan(&insert, &ints(6), false).unwrap());
        assert!(matches!(
            bind_plan(&insert, &ints(7), false),
            Err(GaussWireError::ParameterCountMismatch {
                given: 7,
                expected: 8
            })
        ));
        assert!(matches!(
            bind_plan(&insert, &[], false),
            Err(GaussWireError::ParameterCountMismatch {
                given: 0,
                expected: 2
            })
        ));

        let no_params = stmt(vec![], vec![]);
        assert_eq!(BindPlan::Single, bind_plan(&no_params, &[], false).unwrap());
        assert!(matches!(
            bind_plan(&no_params, &ints(1), false),
            Err(GaussWireError::ParameterCountMismatch {
                given: 1,
                expected: 0
            })
        ));

        let select = stmt(
            vec![int4],
            vec![FieldInfo::new(
                "id".to_owned(),
                None,
                None,
                Type::INT4,
                -1,
                Default::default(),
            )],
        );
        assert!(bind_plan(&select, &ints(3), false).is_err());

        let encrypted = stmt(vec![oids::BYTEA_WITHOUT_ORDER_COL, int4], vec![]);
        assert!(bind_plan(&encrypted, &ints(4), true).is_err());
        assert_eq!(BindPlan::Batch, bind_plan(&encrypted, &ints(4), false).unwrap());
    }

    #[test]
    fn test_check_column_types() {
        let types = [Type::INT4.oid(), Type::BYTEA.oid()];
        let ok = vec![
            Value::Int4(1),
            Value::Bytea(vec![1]),
            Value::Null,
            Value::Null,
        ];
        assert!(check_column_types(&types, &ok).is_ok());

        let bad = vec![
            Value::Int4(1),
            Value::Bytea(vec![1]),
            Value::Int4(2),
            Value::Bool(true),
        ];
        assert!(matches!(
            check_column_types(&types, &bad),
            Err(GaussWireError::ColumnTypeMismatch { row: 1, column: 1 })
        ));
    }

    #[test]
    fn test_batch_bind_formats() {
        let insert = stmt(vec![Type::INT4.oid(), Type::BYTEA.oid()], vec![]);
        let bind = batch_bind(
            &insert,
            &[
                Value::Int4(1),
                Value::Bytea(vec![0xde, 0xad]),
                Value::Int4(2),
                Value::Null,
            ],
        )
        .unwrap();
        assert_eq!(vec![0, 1], bind.column_format_codes);
        assert_eq!(2, bind.batch_count());
        assert_eq!(Some(&b"1"[..]), bind.values[0].as_deref());
        assert_eq!(Some(&[0xde, 0xad][..]), bind.values[1].as_deref());
        assert_eq!(None, bind.values[3]);
    }

    fn describe_insert() -> Vec<BackendMessage> {
        vec![
            BackendMessage::ParseComplete(ParseComplete::new()),
            BackendMessage::ParameterDescription(ParameterDescription::new(vec![
                Type::INT4.oid(),
                Type::TEXT.oid(),
            ])),
            BackendMessage::NoData(NoData::new()),
            ready(TransactionStatus::Idle),
        ]
    }

    #[tokio::test]
    async fn test_prepared_batch_execution() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut socket = accept(&listener).await;

            let FrontendMessage::Parse(parse) = recv(&mut socket).await else {
                panic!("expected parse");
            };
            assert_eq!(Some("1"), parse.name.as_deref());
            assert_eq!("insert into t values ($1, $2)", parse.query);
            assert!(matches!(recv(&mut socket).await, FrontendMessage::Describe(_)));
            assert!(matches!(recv(&mut socket).await, FrontendMessage::Sync(_)));
            send(&mut socket, describe_insert()).await;

            let FrontendMessage::BatchBind(bind) = recv(&mut socket).await else {
                panic!("expected batch bind");
            };
            assert_eq!(3, bind.batch_count());
            assert_eq!("1", bind.statement_name);
            assert!(matches!(recv(&mut socket).await, FrontendMessage::Sync(_)));
            send(
                &mut socket,
                vec![
                    BackendMessage::BindComplete(BindComplete::new()),
                    complete("INSERT 0 1"),
                    complete("INSERT 0 1"),
                    complete("INSERT 0 1"),
                    ready(TransactionStatus::Idle),
                ],
            )
            .await;

            assert!(matches!(recv(&mut socket).await, FrontendMessage::Close(_)));
            assert!(matches!(recv(&mut socket).await, FrontendMessage::Sync(_)));
            send(
                &mut socket,
                vec![
                    BackendMessage::CloseComplete(CloseComplete::new()),
                    ready(TransactionStatus::Idle),
                ],
            )
            .await;
        });

        let mut conn = connect_to(addr).await;
        let mut stmt = conn.prepare("insert into t values (?, ?)").await.unwrap();
        assert_eq!(&[Type::INT4.oid(), Type::TEXT.oid()], stmt.param_types());

        let rows: Vec<Value> = (0..3)
            .flat_map(|i| [Value::Int4(i), Value::Text(format!("row {i}"))])
            .collect();
        let result = conn.execute_prepared(&mut stmt, &rows).await.unwrap();
        assert_eq!(3, result.rows_affected());

        // 7 values never reach the server
        let mut seven = rows.clone();
        seven.push(Value::Int4(3));
        assert!(matches!(
            conn.execute_prepared(&mut stmt, &seven).await,
            Err(GaussWireError::ParameterCountMismatch {
                given: 7,
                expected: 8
            })
        ));
        assert!(!conn.is_bad());

        conn.close_statement(&mut stmt).await.unwrap();
        conn.close_statement(&mut stmt).await.unwrap();
        assert!(stmt.is_closed());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_query_stream_and_drain() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut socket = accept(&listener).await;

            assert!(matches!(recv(&mut socket).await, FrontendMessage::Query(_)));
            let row = |v: &[u8]| {
                let mut data = BytesMut::new();
                data.extend_from_slice(&(v.len() as i32).to_be_bytes());
                data.extend_from_slice(v);
                BackendMessage::DataRow(DataRow::new(1, data))
            };
            send(
                &mut socket,
                vec![
                    text_columns(&["a"]),
                    row(b"1"),
                    row(b"2"),
                    complete("SELECT 2"),
                    text_columns(&["b"]),
                    row(b"3"),
                    complete("SELECT 1"),
                    ready(TransactionStatus::Idle),
                ],
            )
            .await;

            assert!(matches!(recv(&mut socket).await, FrontendMessage::Query(_)));
            send(
                &mut socket,
                vec![
                    text_columns(&["c"]),
                    row(b"4"),
                    row(b"5"),
                    complete("SELECT 2"),
                    ready(TransactionStatus::Idle),
                ],
            )
            .await;

            // the abandoned stream is drained before this query
            assert!(matches!(recv(&mut socket).await, FrontendMessage::Query(_)));
            send(
                &mut socket,
                vec![complete("CREATE TABLE"), ready(TransactionStatus::Idle)],
            )
            .await;
        });

        let mut conn = connect_to(addr).await;
        {
            let mut rows = conn.query("select 1; select 2", &[]).await.unwrap();
            let first = rows.next().await.unwrap().unwrap();
            assert_eq!(Some(1), first.get::<i32>(0).unwrap());
            assert!(rows.next_result_set().await.unwrap());
            assert_eq!("b", rows.fields().unwrap()[0].name());
            let third = rows.next().await.unwrap().unwrap();
            assert_eq!(Some(3), third.get::<i64>(0).unwrap());
            assert!(rows.next().await.unwrap().is_none());
            assert_eq!(Some(1), rows.tag().and_then(Tag::rows));
            assert!(!rows.next_result_set().await.unwrap());
        }
        {
            let mut rows = conn.query("select c from t", &[]).await.unwrap();
            assert!(rows.next().await.unwrap().is_some());
        }
        let result = conn.execute("create table t2 (id int)", &[]).await.unwrap();
        assert_eq!(Some("CREATE TABLE"), result.tag().map(Tag::command));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_with_params_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut socket = accept(&listener).await;
            for _ in 0..3 {
                recv(&mut socket).await;
            }
            send(&mut socket, describe_insert()).await;

            let FrontendMessage::Bind(bind) = recv(&mut socket).await else {
                panic!("expected bind");
            };
            assert_eq!(None, bind.statement_name);
            assert_eq!(Some(&b"1"[..]), bind.parameters[0].as_deref());
            assert!(matches!(recv(&mut socket).await, FrontendMessage::Execute(_)));
            assert!(matches!(recv(&mut socket).await, FrontendMessage::Sync(_)));
            send(
                &mut socket,
                vec![
                    BackendMessage::BindComplete(BindComplete::new()),
                    error("23505", "duplicate key value violates unique constraint"),
                    ready(TransactionStatus::Idle),
                ],
            )
            .await;
        });

        let mut conn = connect_to(addr).await;
        let err = conn
            .execute(
                "insert into t values ($1, $2)",
                &[Value::Int4(1), Value::Text("a".to_owned())],
            )
            .await
            .unwrap_err();
        assert_eq!("23505", err.server_error().unwrap().code);
        assert!(!conn.is_bad());
        assert_eq!(TransactionStatus::Idle, conn.transaction_status());
        server.await.unwrap();
    }

    fn describe_int4() -> Vec<BackendMessage> {
        vec![
            BackendMessage::ParseComplete(ParseComplete::new()),
            BackendMessage::ParameterDescription(ParameterDescription::new(vec![
                Type::INT4.oid(),
            ])),
            BackendMessage::NoData(NoData::new()),
            ready(TransactionStatus::Idle),
        ]
    }

    #[tokio::test]
    async fn test_stale_cache_reprepares_once() {
        use std::sync::atomic::Ordering;

        use crate::api::client::hook::tests::MockHook;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut socket = accept(&listener).await;

            let FrontendMessage::Parse(parse) = recv(&mut socket).await else {
                panic!("expected parse");
            };
            assert_eq!(Some("1"), parse.name.as_deref());
            recv(&mut socket).await;
            recv(&mut socket).await;
            send(&mut socket, describe_int4()).await;

            // the first execution fails on stale key metadata
            for _ in 0..3 {
                recv(&mut socket).await;
            }
            send(
                &mut socket,
                vec![
                    error("XX000", "cached column encryption key is out of date"),
                    ready(TransactionStatus::Idle),
                ],
            )
            .await;

            let FrontendMessage::Parse(parse) = recv(&mut socket).await else {
                panic!("expected parse");
            };
            assert_eq!(Some("2"), parse.name.as_deref());
            recv(&mut socket).await;
            recv(&mut socket).await;
            send(&mut socket, describe_int4()).await;

            let FrontendMessage::Close(close) = recv(&mut socket).await else {
                panic!("expected close");
            };
            assert_eq!(Some("1"), close.name.as_deref());
            recv(&mut socket).await;
            send(
                &mut socket,
                vec![
                    BackendMessage::CloseComplete(CloseComplete::new()),
                    ready(TransactionStatus::Idle),
                ],
            )
            .await;

            let FrontendMessage::Bind(bind) = recv(&mut socket).await else {
                panic!("expected bind");
            };
            assert_eq!(Some("2"), bind.statement_name.as_deref());
            recv(&mut socket).await;
            recv(&mut socket).await;
            send(
                &mut socket,
                vec![
                    BackendMessage::BindComplete(BindComplete::new()),
                    complete("INSERT 0 1"),
                    ready(TransactionStatus::Idle),
                ],
            )
            .await;
        });

        let hook = Arc::new(MockHook::default());
        let mut conn = Connection::connect(
            &test_config(addr),
            &plain_candidate(addr),
            None,
            Some(hook.clone()),
        )
        .await
        .unwrap();

        let mut stmt = conn.prepare("insert into t values (?)").await.unwrap();
        hook.stale.store(1, Ordering::SeqCst);
        let result = conn
            .execute_prepared(&mut stmt, &[Value::Int4(1)])
            .await
            .unwrap();
        assert_eq!(1, result.rows_affected());
        assert_eq!("2", stmt.name());
        assert_eq!("insert into t values (?)", stmt.query());
        assert_eq!(1, hook.post_checks.load(Ordering::SeqCst));
        assert_eq!(vec!["1", "2"], *hook.prepared.lock().unwrap());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_simple_protocol_rewritten_by_hook() {
        use crate::api::client::hook::tests::MockHook;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut socket = accept(&listener).await;

            let FrontendMessage::Query(query) = recv(&mut socket).await else {
                panic!("expected query");
            };
            assert_eq!("update t set card = 'cipher'", query.query);
            send(
                &mut socket,
                vec![complete("UPDATE 2"), ready(TransactionStatus::Idle)],
            )
            .await;

            let FrontendMessage::Query(query) = recv(&mut socket).await else {
                panic!("expected query");
            };
            assert_eq!("select cipher from t", query.query);
            send(
                &mut socket,
                vec![
                    text_columns(&["cipher"]),
                    complete("SELECT 0"),
                    ready(TransactionStatus::Idle),
                ],
            )
            .await;

            let FrontendMessage::Query(query) = recv(&mut socket).await else {
                panic!("expected query");
            };
            assert_eq!("delete from t where card = 'cipher'", query.query);
            send(
                &mut socket,
                vec![complete("DELETE 0"), ready(TransactionStatus::Idle)],
            )
            .await;
        });

        let hook = Arc::new(MockHook::default());
        let mut conn = Connection::connect(
            &test_config(addr),
            &plain_candidate(addr),
            None,
            Some(hook.clone()),
        )
        .await
        .unwrap();

        let result = conn
            .execute("update t set card = 'plain'", &[])
            .await
            .unwrap();
        assert_eq!(2, result.rows_affected());
        assert!(
            conn.query("select plain from t", &[])
                .await
                .unwrap()
                .collect()
                .await
                .unwrap()
                .is_empty()
        );
        conn.simple_query("delete from t where card = 'plain'")
            .await
            .unwrap();

        assert_eq!(vec!["", "", ""], *hook.prepared.lock().unwrap());
        assert_eq!(
            vec![
                "update t set card = 'plain'",
                "select plain from t",
                "delete from t where card = 'plain'"
            ],
            *hook.queries.lock().unwrap()
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_error_mid_query_poisons_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut socket = accept(&listener).await;

            assert!(matches!(recv(&mut socket).await, FrontendMessage::Query(_)));
            let mut data = BytesMut::new();
            data.extend_from_slice(&5i32.to_be_bytes());
            data.extend_from_slice(b"gauss");
            send(
                &mut socket,
                vec![
                    text_columns(&["name"]),
                    BackendMessage::DataRow(DataRow::new(1, data)),
                    BackendMessage::ErrorResponse(ErrorResponse::from(ErrorInfo::new(
                        "FATAL".to_owned(),
                        "57P01".to_owned(),
                        "terminating connection due to administrator command".to_owned(),
                    ))),
                ],
            )
            .await;

            // nothing else may reach the server
            assert!(
                tokio::time::timeout(Duration::from_millis(100), socket.next())
                    .await
                    .is_err()
            );
        });

        let mut conn = Connection::connect(&test_config(addr), &plain_candidate(addr), None, None)
            .await
            .unwrap();
        {
            let mut rows = conn.query("select name from t", &[]).await.unwrap();
            let row = rows.next().await.unwrap().unwrap();
            assert_eq!(Some("gauss".to_owned()), row.get::<String>(0).unwrap());

            let err = rows.next().await.unwrap_err();
            assert_eq!("FATAL", err.server_error().unwrap().severity);
        }
        assert!(conn.is_bad());
        assert!(matches!(
            conn.execute("select 1", &[]).await,
            Err(GaussWireError::BadConnection)
        ));
        server.await.unwrap();
    }
}
