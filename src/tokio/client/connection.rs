use std::collections::BTreeMap;
use std::fmt;
use std::io::{Error as IOError, ErrorKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::{ClientCodec, ClientSocket, open_socket};
use crate::api::client::auth::authentication_response;
use crate::api::client::config::{Config, TargetSessionAttrs};
use crate::api::client::hook::{ClientLogicHook, ClientLogicSession, Handle};
use crate::api::client::query::SimpleQueryCollector;
use crate::api::client::{ExecResult, ReadyState, Response};
use crate::api::results::Tag;
use crate::error::{ErrorInfo, GaussWireError, GaussWireResult};
use crate::messages::cancel::CancelRequest;
use crate::messages::response::{
    ErrorResponse, NotificationResponse, ReadyForQuery, TransactionStatus,
};
use crate::messages::simplequery::Query;
use crate::messages::startup::{Authentication, ParameterStatus, Startup};
use crate::messages::terminate::Terminate;
use crate::messages::{BackendMessage, FrontendMessage, Message};
use crate::tokio::TlsConnector;
use crate::tokio::dialer::Candidate;

pub(super) type Reader = FramedRead<ReadHalf<ClientSocket>, ClientCodec>;
pub(super) type Writer = FramedWrite<WriteHalf<ClientSocket>, ClientCodec>;

/// Callback for `NoticeResponse` messages.
pub type NoticeHandler = Arc<dyn Fn(&ErrorInfo) + Send + Sync>;
/// Callback for `NotificationResponse` messages raised by `NOTIFY`.
pub type NotificationHandler = Arc<dyn Fn(&NotificationResponse) + Send + Sync>;

/// Outcome of checking a fresh session against `target_session_attrs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionCheck {
    Accepted,
    /// A primary found while looking for a standby, kept as fallback.
    PrimaryFallback,
    Rejected,
}

/// One authenticated session on a coordinator node.
///
/// A connection serves one request at a time. Transport errors, protocol
/// violations and `FATAL` server errors mark it bad, after which every
/// operation fails with [`GaussWireError::BadConnection`] without touching
/// the socket.
pub struct Connection {
    pub(super) reader: Option<Reader>,
    pub(super) writer: Writer,
    pub(super) config: Config,
    candidate: Candidate,
    tls_connector: Option<TlsConnector>,
    pub(super) bad: Arc<AtomicBool>,
    closed: bool,
    pub(super) in_copy: bool,
    pub(super) txn_status: TransactionStatus,
    pending: Option<BackendMessage>,
    pub(super) unfinished: bool,
    parameters: BTreeMap<String, String>,
    server_version: Option<u32>,
    backend_key: Option<(i32, i32)>,
    pub(super) notice_handler: Option<NoticeHandler>,
    pub(super) notification_handler: Option<NotificationHandler>,
    client_logic: Option<ClientLogicSession>,
    statement_counter: u64,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.candidate.host)
            .field("tls", &self.candidate.tls)
            .field("bad", &self.is_bad())
            .field("closed", &self.closed)
            .field("txn_status", &self.txn_status)
            .field("client_logic", &self.client_logic)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Open a socket to `candidate`, then run startup and authentication.
    pub(crate) async fn connect(
        config: &Config,
        candidate: &Candidate,
        tls_connector: Option<&TlsConnector>,
        hook: Option<Arc<dyn ClientLogicHook>>,
    ) -> GaussWireResult<Connection> {
        let socket = open_socket(candidate, tls_connector).await?;
        let (read_half, write_half) = tokio::io::split(socket);

        let mut conn = Connection {
            reader: Some(FramedRead::with_capacity(
                read_half,
                ClientCodec,
                config.min_read_buffer_size,
            )),
            writer: FramedWrite::new(write_half, ClientCodec),
            config: config.clone(),
            candidate: candidate.clone(),
            tls_connector: tls_connector.cloned(),
            bad: Arc::new(AtomicBool::new(false)),
            closed: false,
            in_copy: false,
            txn_status: TransactionStatus::Idle,
            pending: None,
            unfinished: false,
            parameters: BTreeMap::new(),
            server_version: None,
            backend_key: None,
            notice_handler: None,
            notification_handler: None,
            client_logic: hook.map(ClientLogicSession::register),
            statement_counter: 0,
        };

        conn.startup().await?;
        info!(
            "connected to {} (tls: {}, server_version: {:?})",
            conn.candidate.host, conn.candidate.tls, conn.server_version
        );
        Ok(conn)
    }

    fn startup_message(&self) -> Startup {
        let mut startup = Startup::new();
        for (k, v) in &self.config.runtime_params {
            startup.parameters.insert(k.clone(), v.clone());
        }
        if let Some(database) = &self.config.database {
            startup
                .parameters
                .insert("database".to_owned(), database.clone());
        }
        startup
            .parameters
            .insert("user".to_owned(), self.config.user.clone());
        if let (Some(level), Some(_)) = (self.config.client_encryption, &self.client_logic) {
            startup
                .parameters
                .insert("enable_full_encryption".to_owned(), level.as_str().to_owned());
        }
        startup
    }

    async fn startup(&mut self) -> GaussWireResult<()> {
        let startup = self.startup_message();
        self.send_messages([FrontendMessage::Startup(startup)])
            .await?;

        // one password per session, the next request must be Ok
        let mut password_sent = false;
        loop {
            match self.recv().await? {
                BackendMessage::BackendKeyData(key) => {
                    self.backend_key = Some((key.pid, key.secret_key));
                }
                BackendMessage::Authentication(request) => {
                    debug!("authentication request {}", request.code());
                    if password_sent && request != Authentication::Ok {
                        return Err(self.poison(
                            GaussWireError::UnexpectedAuthenticationResponse(request.code()),
                        ));
                    }
                    let password = self.config.password.as_deref();
                    if let Some(response) =
                        authentication_response(&request, &self.config.user, password)?
                    {
                        self.send_messages([FrontendMessage::Password(response)])
                            .await?;
                        password_sent = true;
                    }
                }
                BackendMessage::ReadyForQuery(_) => return Ok(()),
                BackendMessage::ErrorResponse(error) => {
                    return Err(ErrorInfo::from(error).into());
                }
                other => return Err(self.unexpected(&other, "starting up")),
            }
        }
    }

    /// Check the server role against `target_session_attrs`.
    pub(crate) async fn validate_session(&mut self) -> GaussWireResult<SessionCheck> {
        let attrs = self.config.target_session_attrs;
        match attrs {
            TargetSessionAttrs::Any => Ok(SessionCheck::Accepted),
            TargetSessionAttrs::ReadWrite | TargetSessionAttrs::ReadOnly => {
                let value = self
                    .first_value("show transaction_read_only", 1)
                    .await?
                    .remove(0);
                debug!("transaction_read_only of {} is {value}", self.candidate.host);
                let read_only = value.eq_ignore_ascii_case("on");
                if read_only == (attrs == TargetSessionAttrs::ReadOnly) {
                    Ok(SessionCheck::Accepted)
                } else {
                    Ok(SessionCheck::Rejected)
                }
            }
            TargetSessionAttrs::Master
            | TargetSessionAttrs::Slave
            | TargetSessionAttrs::PreferSlave => {
                let values = self
                    .first_value(
                        "select local_role,db_state from pg_stat_get_stream_replications()",
                        2,
                    )
                    .await?;
                debug!(
                    "local_role of {} is {}, db_state {}",
                    self.candidate.host, values[0], values[1]
                );
                let primary = values[0].eq_ignore_ascii_case("Primary")
                    && values[1].eq_ignore_ascii_case("Normal");
                Ok(match (attrs, primary) {
                    (TargetSessionAttrs::Master, true) => SessionCheck::Accepted,
                    (TargetSessionAttrs::PreferSlave, true) => SessionCheck::PrimaryFallback,
                    (TargetSessionAttrs::Slave | TargetSessionAttrs::PreferSlave, false) => {
                        SessionCheck::Accepted
                    }
                    _ => SessionCheck::Rejected,
                })
            }
        }
    }

    /// First `columns` text values of the first row of `query`.
    async fn first_value(&mut self, query: &str, columns: usize) -> GaussWireResult<Vec<String>> {
        let responses = self.simple_query(query).await?;
        let row = responses
            .into_iter()
            .flat_map(Response::into_rows)
            .next()
            .ok_or_else(|| GaussWireError::SessionAttrsMismatch(query.to_owned()))?;
        (0..columns)
            .map(|i| {
                row.get::<String>(i)?
                    .ok_or_else(|| GaussWireError::SessionAttrsMismatch(query.to_owned()))
            })
            .collect()
    }

    pub(super) fn hook(&self) -> Option<&Arc<dyn ClientLogicHook>> {
        self.client_logic.as_ref().map(ClientLogicSession::hook)
    }

    /// `Query` message for `query`, rewritten by the client logic hook when
    /// one is active.
    pub(super) fn query_message(&self, query: &str) -> GaussWireResult<FrontendMessage> {
        let text = match self.hook() {
            Some(hook) => hook.prepare_query("", query)?,
            None => query.to_owned(),
        };
        Ok(FrontendMessage::Query(Query::new(text)))
    }

    /// Handle of this connection's client logic session.
    pub fn client_logic_handle(&self) -> Option<Handle> {
        self.client_logic.as_ref().map(ClientLogicSession::handle)
    }

    /// Mark the connection bad and hand the error back.
    pub(super) fn poison(&self, e: GaussWireError) -> GaussWireError {
        if !self.bad.swap(true, Ordering::AcqRel) {
            warn!("connection to {} is unusable: {e}", self.candidate.host);
        }
        e
    }

    pub(super) fn unexpected(&self, message: &BackendMessage, state: &'static str) -> GaussWireError {
        self.poison(GaussWireError::UnexpectedMessage {
            message: message.message_type() as char,
            state,
        })
    }

    /// Poison the connection if `result` failed in a way that leaves the
    /// protocol state unknown.
    pub(super) fn check<T>(&self, result: GaussWireResult<T>) -> GaussWireResult<T> {
        result.map_err(|e| {
            if e.poisons_connection() {
                self.poison(e)
            } else {
                e
            }
        })
    }

    pub(super) async fn send_messages<I>(&mut self, messages: I) -> GaussWireResult<()>
    where
        I: IntoIterator<Item = FrontendMessage>,
    {
        for message in messages {
            if let Err(e) = self.writer.feed(message).await {
                return Err(self.poison(e));
            }
        }
        if let Err(e) = self.writer.flush().await {
            return Err(self.poison(e));
        }
        Ok(())
    }

    /// Receive the next message the caller must handle.
    ///
    /// Notices, notifications and parameter status are consumed here.
    /// `ReadyForQuery` updates the transaction status before it is returned.
    pub(super) async fn recv(&mut self) -> GaussWireResult<BackendMessage> {
        if let Some(message) = self.pending.take() {
            return Ok(message);
        }

        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Err(GaussWireError::CopyInProgress);
            };
            let message = match reader.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(self.poison(e)),
                None => {
                    return Err(self.poison(GaussWireError::IoError(IOError::new(
                        ErrorKind::UnexpectedEof,
                        "server closed the connection",
                    ))));
                }
            };

            match message {
                BackendMessage::NoticeResponse(notice) => {
                    let notice = ErrorInfo::from(notice);
                    match &self.notice_handler {
                        Some(handler) => handler(&notice),
                        None => debug!("notice from {}: {notice}", self.candidate.host),
                    }
                }
                BackendMessage::NotificationResponse(notification) => {
                    if let Some(handler) = &self.notification_handler {
                        handler(&notification);
                    }
                }
                BackendMessage::ParameterStatus(status) => self.on_parameter_status(status),
                BackendMessage::ReadyForQuery(ready) => {
                    self.on_ready_for_query(&ready);
                    return Ok(BackendMessage::ReadyForQuery(ready));
                }
                // no ReadyForQuery follows, the server ends the session
                BackendMessage::ErrorResponse(error) if is_fatal_response(&error) => {
                    return Err(self.poison(ErrorInfo::from(error).into()));
                }
                other => return Ok(other),
            }
        }
    }

    /// Push a message back to be returned by the next `recv`.
    pub(super) fn save_message(&mut self, message: BackendMessage) {
        self.pending = Some(message);
    }

    pub(super) fn on_ready_for_query(&mut self, ready: &ReadyForQuery) {
        self.txn_status = ready.status;
        if let Some(hook) = self.hook() {
            hook.on_ready_for_query(ready.refresh);
        }
    }

    pub(super) fn on_parameter_status(&mut self, status: ParameterStatus) {
        if status.name == "server_version" {
            self.server_version = parse_server_version(&status.value);
        }
        self.parameters.insert(status.name, status.value);
    }

    pub(super) async fn read_ready_for_query(&mut self) -> GaussWireResult<()> {
        match self.recv().await? {
            BackendMessage::ReadyForQuery(_) => Ok(()),
            other => Err(self.unexpected(&other, "waiting for ReadyForQuery")),
        }
    }

    /// Skip everything up to the next `ReadyForQuery`.
    async fn drain_to_ready(&mut self) -> GaussWireResult<()> {
        debug!("draining unfinished response");
        while !matches!(self.recv().await?, BackendMessage::ReadyForQuery(_)) {}
        Ok(())
    }

    /// Fail fast on a closed or bad connection, finishing the response of an
    /// abandoned row stream first.
    pub(super) async fn ensure_usable(&mut self) -> GaussWireResult<()> {
        if self.closed {
            return Err(GaussWireError::ConnectionClosed);
        }
        if self.is_bad() {
            return Err(GaussWireError::BadConnection);
        }
        if self.in_copy {
            return Err(GaussWireError::CopyInProgress);
        }
        if self.unfinished {
            self.drain_to_ready().await?;
            self.unfinished = false;
        }
        Ok(())
    }

    pub(super) fn next_statement_name(&mut self) -> String {
        self.statement_counter += 1;
        self.statement_counter.to_string()
    }

    /// Hook to consult for a single resend after `result` failed because
    /// the client logic key cache was out of date.
    pub(super) fn stale_hook<T>(
        &self,
        result: &GaussWireResult<T>,
    ) -> Option<Arc<dyn ClientLogicHook>> {
        match result {
            Err(e) if !e.poisons_connection() && !self.is_bad() => {
                self.hook().filter(|hook| hook.was_cache_stale()).cloned()
            }
            _ => None,
        }
    }

    /// Run one statement with the simple protocol, discarding rows.
    pub(super) async fn simple_exec(&mut self, query: &str) -> GaussWireResult<ExecResult> {
        let message = self.query_message(query)?;
        self.send_messages([message]).await?;

        let mut result = ExecResult::default();
        let mut error: Option<GaussWireError> = None;
        loop {
            match self.recv().await? {
                BackendMessage::CommandComplete(complete) => match complete.tag.parse::<Tag>() {
                    Ok(tag) => result = ExecResult::from_tag(tag),
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
                        None => Ok(result),
                    };
                }
                other => return Err(self.unexpected(&other, "reading simple query response")),
            }
        }
    }

    /// Run a query string that may hold several statements, collecting
    /// every result in memory.
    pub async fn simple_query(&mut self, query: &str) -> GaussWireResult<Vec<Response>> {
        self.ensure_usable().await?;
        let result = self.simple_query_once(query).await;
        self.check(result)
    }

    async fn simple_query_once(&mut self, query: &str) -> GaussWireResult<Vec<Response>> {
        let message = self.query_message(query)?;
        self.send_messages([message]).await?;

        let mut collector = SimpleQueryCollector::new(self.hook().cloned());
        loop {
            let message = self.recv().await?;
            let ready = matches!(message, BackendMessage::ReadyForQuery(_));
            match collector.on_message(message) {
                Ok(ReadyState::Pending) => {}
                Ok(ReadyState::Ready(responses)) => return Ok(responses),
                Err(e) => {
                    if !ready {
                        self.unfinished = true;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Whether the tracked status is inside a transaction block, failed or
    /// not.
    pub(super) fn in_transaction(&self) -> bool {
        matches!(
            self.txn_status,
            TransactionStatus::Transaction | TransactionStatus::Error
        )
    }

    fn expect_in_transaction(&self, expected: bool) -> GaussWireResult<()> {
        if self.in_transaction() == expected {
            return Ok(());
        }
        Err(self.poison(GaussWireError::TransactionStatusMismatch {
            actual: self.txn_status,
            expected: if expected {
                TransactionStatus::Transaction
            } else {
                TransactionStatus::Idle
            },
        }))
    }

    fn expect_tag(&self, result: &ExecResult, expected: &'static str) -> GaussWireResult<()> {
        let command = result.tag().map(Tag::command).unwrap_or_default();
        if command == expected {
            Ok(())
        } else {
            Err(self.poison(GaussWireError::UnexpectedCommandTag(
                command.to_owned(),
                expected,
            )))
        }
    }

    pub async fn begin(&mut self) -> GaussWireResult<()> {
        self.ensure_usable().await?;
        let result = self.begin_once().await;
        self.check(result)
    }

    async fn begin_once(&mut self) -> GaussWireResult<()> {
        self.expect_in_transaction(false)?;
        let result = self.simple_exec("BEGIN").await?;
        self.expect_tag(&result, "BEGIN")?;
        if self.txn_status != TransactionStatus::Transaction {
            return Err(self.poison(GaussWireError::TransactionStatusMismatch {
                actual: self.txn_status,
                expected: TransactionStatus::Transaction,
            }));
        }
        Ok(())
    }

    /// Commit the current transaction.
    ///
    /// A failed transaction is rolled back and
    /// [`GaussWireError::InFailedTransaction`] is returned.
    pub async fn commit(&mut self) -> GaussWireResult<()> {
        self.ensure_usable().await?;
        let result = self.commit_once().await;
        self.check(result)
    }

    async fn commit_once(&mut self) -> GaussWireResult<()> {
        self.expect_in_transaction(true)?;
        if self.txn_status == TransactionStatus::Error {
            self.rollback_once().await?;
            return Err(GaussWireError::InFailedTransaction);
        }
        self.finish_transaction("COMMIT").await
    }

    pub async fn rollback(&mut self) -> GaussWireResult<()> {
        self.ensure_usable().await?;
        let result = self.rollback_once().await;
        self.check(result)
    }

    async fn rollback_once(&mut self) -> GaussWireResult<()> {
        self.expect_in_transaction(true)?;
        self.finish_transaction("ROLLBACK").await
    }

    async fn finish_transaction(&mut self, command: &'static str) -> GaussWireResult<()> {
        let result = match self.simple_exec(command).await {
            Ok(result) => result,
            Err(e) if self.in_transaction() => return Err(self.poison(e)),
            Err(e) => return Err(e),
        };
        self.expect_tag(&result, command)?;
        self.expect_in_transaction(false)
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.txn_status
    }

    pub fn is_bad(&self) -> bool {
        self.bad.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_in_copy(&self) -> bool {
        self.in_copy
    }

    /// Runtime parameter reported by the server with `ParameterStatus`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// `server_version` as an integer, `90204` for `9.2.4`.
    pub fn server_version(&self) -> Option<u32> {
        self.server_version
    }

    pub fn process_id(&self) -> Option<i32> {
        self.backend_key.map(|(pid, _)| pid)
    }

    /// The node this connection is bound to.
    pub fn host(&self) -> &crate::api::client::config::Host {
        &self.candidate.host
    }

    pub fn is_secure(&self) -> bool {
        self.candidate.tls
    }

    pub fn on_notice<F>(&mut self, handler: F)
    where
        F: Fn(&ErrorInfo) + Send + Sync + 'static,
    {
        self.notice_handler = Some(Arc::new(handler));
    }

    pub fn on_notification<F>(&mut self, handler: F)
    where
        F: Fn(&NotificationResponse) + Send + Sync + 'static,
    {
        self.notification_handler = Some(Arc::new(handler));
    }

    /// A token able to cancel the query running on this connection from
    /// another task.
    pub fn cancel_token(&self) -> Option<CancelToken> {
        self.backend_key.map(|(pid, secret_key)| CancelToken {
            candidate: self.candidate.clone(),
            tls_connector: self.tls_connector.clone(),
            pid,
            secret_key,
        })
    }

    /// Send `Terminate` and release the client logic session. Closing a
    /// closed connection does nothing.
    pub async fn close(&mut self) -> GaussWireResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.client_logic = None;

        let result = if self.is_bad() {
            Ok(())
        } else {
            self.send_messages([FrontendMessage::Terminate(Terminate::new())])
                .await
        };
        if let Err(e) = self.writer.get_mut().shutdown().await {
            debug!("shutdown of {} failed: {e}", self.candidate.host);
        }
        result
    }
}

fn is_fatal_response(error: &ErrorResponse) -> bool {
    error.fields.iter().any(|(code, value)| {
        matches!(code, b'S' | b'V') && matches!(value.as_str(), "FATAL" | "PANIC")
    })
}

/// Parse `server_version` into `major * 10000 + minor * 100 + patch`, or
/// `major * 10000 + minor` for versions from 10 on.
pub(crate) fn parse_server_version(version: &str) -> Option<u32> {
    let numeric = version
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .next()?;
    let mut parts = numeric.split('.').map(|p| p.parse::<u32>());
    let major = parts.next()?.ok()?;
    let minor = parts.next().and_then(Result::ok).unwrap_or(0);
    let patch = parts.next().and_then(Result::ok).unwrap_or(0);
    if major >= 10 {
        Some(major * 10000 + minor)
    } else {
        Some(major * 10000 + minor * 100 + patch)
    }
}

/// Cancels the running query of a connection over a separate socket.
#[derive(Clone)]
pub struct CancelToken {
    candidate: Candidate,
    tls_connector: Option<TlsConnector>,
    pid: i32,
    secret_key: i32,
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("host", &self.candidate.host)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl CancelToken {
    /// Send `CancelRequest`. Success means the request was delivered, not
    /// that a query was cancelled.
    pub async fn cancel_query(&self) -> GaussWireResult<()> {
        let mut socket = open_socket(&self.candidate, self.tls_connector.as_ref()).await?;
        let mut buf = BytesMut::new();
        CancelRequest::new(self.pid, self.secret_key).encode(&mut buf)?;
        socket.write_all(&buf).await?;
        socket.flush().await?;

        // the server closes the socket once it has read the request
        let mut rest = Vec::new();
        socket.read_to_end(&mut rest).await?;
        debug!("cancel request sent for backend {}", self.pid);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::net::SocketAddr;

    use futures::{SinkExt, StreamExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::codec::{Decoder, Encoder, Framed};

    use super::*;
    use crate::api::client::config::Host;
    use crate::messages::data::{FieldDescription, RowDescription};
    use crate::messages::response::{CommandComplete, ErrorResponse, NoticeResponse};
    use crate::messages::startup::{Authentication, BackendKeyData, Sha256Challenge};

    /// Server side codec of the test server.
    pub(crate) struct ServerCodec {
        pub started: bool,
    }

    impl Decoder for ServerCodec {
        type Item = FrontendMessage;
        type Error = GaussWireError;

        fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
            if !self.started {
                let startup = Startup::decode(src)?;
                if startup.is_some() {
                    self.started = true;
                }
                return Ok(startup.map(FrontendMessage::Startup));
            }
            FrontendMessage::decode(src)
        }
    }

    impl Encoder<BackendMessage> for ServerCodec {
        type Error = GaussWireError;

        fn encode(&mut self, item: BackendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
            item.encode(dst)
        }
    }

    pub(crate) type ServerSocket = Framed<TcpStream, ServerCodec>;

    pub(crate) async fn recv(socket: &mut ServerSocket) -> FrontendMessage {
        socket.next().await.unwrap().unwrap()
    }

    pub(crate) async fn send(socket: &mut ServerSocket, messages: Vec<BackendMessage>) {
        for message in messages {
            socket.feed(message).await.unwrap();
        }
        socket.flush().await.unwrap();
    }

    pub(crate) fn ready(status: TransactionStatus) -> BackendMessage {
        BackendMessage::ReadyForQuery(ReadyForQuery::new(status, None))
    }

    pub(crate) fn complete(tag: &str) -> BackendMessage {
        BackendMessage::CommandComplete(CommandComplete::new(tag.to_owned()))
    }

    pub(crate) fn error(code: &str, message: &str) -> BackendMessage {
        BackendMessage::ErrorResponse(ErrorResponse::from(ErrorInfo::new(
            "ERROR".to_owned(),
            code.to_owned(),
            message.to_owned(),
        )))
    }

    pub(crate) fn text_columns(names: &[&str]) -> BackendMessage {
        BackendMessage::RowDescription(RowDescription::new(
            names
                .iter()
                .map(|name| FieldDescription::new((*name).to_owned(), 0, 0, 25, -1, -1, 0))
                .collect(),
        ))
    }

    /// Accept one client and answer startup with trust authentication.
    pub(crate) async fn accept(listener: &TcpListener) -> ServerSocket {
        let (socket, _) = listener.accept().await.unwrap();
        let mut socket = Framed::new(socket, ServerCodec { started: false });
        assert!(matches!(recv(&mut socket).await, FrontendMessage::Startup(_)));
        send(
            &mut socket,
            vec![
                BackendMessage::Authentication(Authentication::Ok),
                BackendMessage::ParameterStatus(ParameterStatus::new(
                    "server_version".to_owned(),
                    "9.2.4".to_owned(),
                )),
                BackendMessage::BackendKeyData(BackendKeyData::new(42, 7)),
                ready(TransactionStatus::Idle),
            ],
        )
        .await;
        socket
    }

    pub(crate) fn test_config(addr: SocketAddr) -> Config {
        let mut config = Config::new();
        config
            .user("omm")
            .password("Gauss@123")
            .dbname("postgres")
            .host(addr.ip().to_string(), addr.port());
        config
    }

    pub(crate) fn plain_candidate(addr: SocketAddr) -> Candidate {
        Candidate {
            host: Host::new(addr.ip().to_string(), addr.port()),
            addr: Some(addr),
            tls: false,
        }
    }

    pub(crate) async fn connect_to(addr: SocketAddr) -> Connection {
        Connection::connect(&test_config(addr), &plain_candidate(addr), None, None)
            .await
            .unwrap()
    }

    #[test]
    fn test_parse_server_version() {
        assert_eq!(Some(90204), parse_server_version("9.2.4"));
        assert_eq!(Some(90204), parse_server_version("9.2.4 (openGauss 5.0.0)"));
        assert_eq!(Some(100003), parse_server_version("10.3"));
        assert_eq!(Some(140000), parse_server_version("14beta1"));
        assert_eq!(None, parse_server_version("devel"));
    }

    #[tokio::test]
    async fn test_startup_with_sha256_auth() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = Framed::new(socket, ServerCodec { started: false });
            let FrontendMessage::Startup(startup) = recv(&mut socket).await else {
                panic!("expected startup");
            };
            assert_eq!(Some("omm"), startup.parameters.get("user").map(String::as_str));
            assert_eq!(
                Some("postgres"),
                startup.parameters.get("database").map(String::as_str)
            );
            assert!(!startup.parameters.contains_key("enable_full_encryption"));

            send(
                &mut socket,
                vec![BackendMessage::Authentication(Authentication::Sha256(
                    Sha256Challenge::Rfc5802 {
                        random64code: "0123456789abcdef".repeat(4),
                        token: "a1b2c3d4".to_owned(),
                        iteration: 4096,
                    },
                ))],
            )
            .await;
            let FrontendMessage::Password(password) = recv(&mut socket).await else {
                panic!("expected password");
            };
            assert_eq!(
                crate::api::client::auth::rfc5802_response(
                    "Gauss@123",
                    &"0123456789abcdef".repeat(4),
                    "a1b2c3d4",
                    4096
                )
                .unwrap(),
                password.password
            );
            send(
                &mut socket,
                vec![
                    BackendMessage::Authentication(Authentication::Ok),
                    BackendMessage::NoticeResponse(NoticeResponse::from(ErrorInfo::new(
                        "NOTICE".to_owned(),
                        "00000".to_owned(),
                        "welcome".to_owned(),
                    ))),
                    BackendMessage::ParameterStatus(ParameterStatus::new(
                        "server_version".to_owned(),
                        "9.2.4".to_owned(),
                    )),
                    BackendMessage::BackendKeyData(BackendKeyData::new(42, 7)),
                    ready(TransactionStatus::Idle),
                ],
            )
            .await;
            assert!(matches!(recv(&mut socket).await, FrontendMessage::Terminate(_)));
        });

        let mut conn =
            Connection::connect(&test_config(addr), &plain_candidate(addr), None, None)
                .await
                .unwrap();
        assert_eq!(Some(90204), conn.server_version());
        assert_eq!(Some("9.2.4"), conn.parameter("server_version"));
        assert_eq!(Some(42), conn.process_id());
        assert!(conn.cancel_token().is_some());
        assert_eq!(TransactionStatus::Idle, conn.transaction_status());

        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(conn.is_closed());
        assert!(matches!(
            conn.simple_query("select 1").await,
            Err(GaussWireError::ConnectionClosed)
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = Framed::new(socket, ServerCodec { started: false });
            recv(&mut socket).await;
            send(
                &mut socket,
                vec![BackendMessage::ErrorResponse(ErrorResponse::from(
                    ErrorInfo::new(
                        "FATAL".to_owned(),
                        "28P01".to_owned(),
                        "Invalid username/password,login denied.".to_owned(),
                    ),
                ))],
            )
            .await;
        });

        let err = Connection::connect(&test_config(addr), &plain_candidate(addr), None, None)
            .await
            .unwrap_err();
        assert!(err.is_auth_failure());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_second_challenge_after_password() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let challenge = || {
            BackendMessage::Authentication(Authentication::Sha256(Sha256Challenge::Rfc5802 {
                random64code: "0123456789abcdef".repeat(4),
                token: "a1b2c3d4".to_owned(),
                iteration: 4096,
            }))
        };

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = Framed::new(socket, ServerCodec { started: false });
            recv(&mut socket).await;
            send(&mut socket, vec![challenge()]).await;
            assert!(matches!(recv(&mut socket).await, FrontendMessage::Password(_)));
            send(&mut socket, vec![challenge()]).await;
            // no second password, the client hangs up
            assert!(socket.next().await.is_none_or(|m| m.is_err()));
        });

        let err = Connection::connect(&test_config(addr), &plain_candidate(addr), None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GaussWireError::UnexpectedAuthenticationResponse(10)
        ));
        assert!(err.is_auth_failure());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_simple_query_and_transactions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut socket = accept(&listener).await;

            assert!(matches!(recv(&mut socket).await, FrontendMessage::Query(_)));
            send(
                &mut socket,
                vec![
                    text_columns(&["name"]),
                    BackendMessage::DataRow(crate::messages::data::DataRow::new(
                        1,
                        BytesMut::from(&b"\x00\x00\x00\x03omm"[..]),
                    )),
                    complete("SELECT 1"),
                    ready(TransactionStatus::Idle),
                ],
            )
            .await;

            // begin
            recv(&mut socket).await;
            send(
                &mut socket,
                vec![complete("BEGIN"), ready(TransactionStatus::Transaction)],
            )
            .await;
            // failing statement
            recv(&mut socket).await;
            send(
                &mut socket,
                vec![
                    error("42P01", "relation \"t\" does not exist"),
                    ready(TransactionStatus::Error),
                ],
            )
            .await;
            // commit of a failed transaction rolls back
            let FrontendMessage::Query(query) = recv(&mut socket).await else {
                panic!("expected query");
            };
            assert_eq!("ROLLBACK", query.query);
            send(
                &mut socket,
                vec![complete("ROLLBACK"), ready(TransactionStatus::Idle)],
            )
            .await;
        });

        let mut conn = connect_to(addr).await;
        let responses = conn.simple_query("select current_user").await.unwrap();
        assert_eq!(1, responses.len());
        let rows = responses.into_iter().next().unwrap().into_rows();
        assert_eq!(Some("omm".to_owned()), rows[0].get::<String>(0).unwrap());

        conn.begin().await.unwrap();
        assert_eq!(TransactionStatus::Transaction, conn.transaction_status());
        let err = conn.simple_query("select * from t").await.unwrap_err();
        assert_eq!("42P01", err.server_error().unwrap().code);
        assert!(!conn.is_bad());

        assert!(matches!(
            conn.commit().await,
            Err(GaussWireError::InFailedTransaction)
        ));
        assert_eq!(TransactionStatus::Idle, conn.transaction_status());
        assert!(!conn.is_bad());

        // rollback outside of a transaction is a state violation
        assert!(matches!(
            conn.rollback().await,
            Err(GaussWireError::TransactionStatusMismatch { .. })
        ));
        assert!(conn.is_bad());
        assert!(matches!(
            conn.begin().await,
            Err(GaussWireError::BadConnection)
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unexpected_tag_poisons() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut socket = accept(&listener).await;
            recv(&mut socket).await;
            send(
                &mut socket,
                vec![complete("SELECT 0"), ready(TransactionStatus::Transaction)],
            )
            .await;
        });

        let mut conn = connect_to(addr).await;
        assert!(matches!(
            conn.begin().await,
            Err(GaussWireError::UnexpectedCommandTag(_, "BEGIN"))
        ));
        assert!(conn.is_bad());
        server.await.unwrap();
    }
}
